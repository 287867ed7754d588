//! Parameter bindings and their random draws.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::Normal;

use crate::error::{Error, Result};

/// One complete set of pipeline parameters.
///
/// The shapes are fixed by the array types; slices of the wrong length are rejected by
/// [`ParameterBinding::from_slices`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParameterBinding {
    /// Linear energy-shift coefficients (ELep term, RecoEnu term).
    pub shift: [f64; 2],
    /// Normalizations of the three upper Q2 regions.
    pub norm: [f64; 3],
    /// Spline systematic parameter `alpha`.
    pub spline: [f64; 1],
}

impl ParameterBinding {
    pub const fn new(shift: [f64; 2], norm: [f64; 3], alpha: f64) -> Self {
        Self {
            shift,
            norm,
            spline: [alpha],
        }
    }

    /// The fixed parameter set used for the reference plot.
    pub const fn nominal() -> Self {
        Self::new([0.1, 0.2], [1.11, 1.18, 1.40], 1.0)
    }

    /// Bind parameter vectors, checking their lengths and that every value is finite.
    pub fn from_slices(shift: &[f64], norm: &[f64], spline: &[f64]) -> Result<Self> {
        Ok(Self {
            shift: to_array("shift_params", shift)?,
            norm: to_array("norm_params", norm)?,
            spline: to_array("spline_params", spline)?,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.spline[0]
    }
}

fn to_array<const N: usize>(name: &str, values: &[f64]) -> Result<[f64; N]> {
    let array: [f64; N] = values.try_into().map_err(|_| {
        Error::InvalidParameters(format!(
            "{name} needs {N} values, got {}",
            values.len()
        ))
    })?;
    if let Some((i, value)) = array.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(Error::InvalidParameters(format!(
            "{name}[{i}] is not finite ({value})"
        )));
    }
    Ok(array)
}

/// The live binding a pipeline reads, shared by handle.
///
/// Cloning the handle shares the same cell. An evaluation copies the contents once under
/// the read lock and works from that copy, so [`SharedBinding::rebind`] never changes an
/// evaluation that has already started.
#[derive(Clone, Debug)]
pub struct SharedBinding {
    cell: Arc<RwLock<ParameterBinding>>,
}

impl SharedBinding {
    pub fn new(binding: ParameterBinding) -> Self {
        Self {
            cell: Arc::new(RwLock::new(binding)),
        }
    }

    /// Overwrite the contents; the identity of the cell is unchanged.
    pub fn rebind(&self, binding: ParameterBinding) {
        *self.cell.write() = binding;
    }

    /// A consistent copy of the current contents.
    pub fn snapshot(&self) -> ParameterBinding {
        *self.cell.read()
    }

    /// Whether both handles point at the same cell.
    pub fn same_cell(&self, other: &SharedBinding) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

/// Gaussian widths of the random parameter draws.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DrawWidths {
    pub shift: [(f64, f64); 2],
    pub norm: [(f64, f64); 3],
    pub alpha: (f64, f64),
}

impl Default for DrawWidths {
    fn default() -> Self {
        Self {
            shift: [(0.0, 0.1), (0.0, 0.1)],
            norm: [(1.0, 0.11), (1.0, 0.18), (1.0, 0.4)],
            alpha: (1.0, 0.3),
        }
    }
}

/// Seeded generator of independent random bindings.
pub struct ParameterSampler {
    rng: StdRng,
    shift: [Normal<f64>; 2],
    norm: [Normal<f64>; 3],
    alpha: Normal<f64>,
}

impl ParameterSampler {
    pub fn new(seed: u64) -> Result<Self> {
        Self::with_widths(seed, DrawWidths::default())
    }

    pub fn with_widths(seed: u64, widths: DrawWidths) -> Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            shift: [normal(widths.shift[0])?, normal(widths.shift[1])?],
            norm: [
                normal(widths.norm[0])?,
                normal(widths.norm[1])?,
                normal(widths.norm[2])?,
            ],
            alpha: normal(widths.alpha)?,
        })
    }

    pub fn draw(&mut self) -> ParameterBinding {
        let rng = &mut self.rng;
        ParameterBinding {
            shift: self.shift.map(|dist| rng.sample(dist)),
            norm: self.norm.map(|dist| rng.sample(dist)),
            spline: [rng.sample(self.alpha)],
        }
    }

    pub fn draws(&mut self, n: usize) -> Vec<ParameterBinding> {
        (0..n).map(|_| self.draw()).collect()
    }
}

fn normal((mean, sigma): (f64, f64)) -> Result<Normal<f64>> {
    Normal::new(mean, sigma).map_err(|err| {
        Error::InvalidParameters(format!("cannot draw from N({mean}, {sigma}): {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slices_checks_shapes() {
        let binding =
            ParameterBinding::from_slices(&[0.1, 0.2], &[1.11, 1.18, 1.4], &[1.0]).unwrap();
        assert_eq!(binding, ParameterBinding::nominal());

        for (shift, norm, spline) in [
            (&[0.1][..], &[1.0, 1.0, 1.0][..], &[1.0][..]),
            (&[0.1, 0.2, 0.3][..], &[1.0, 1.0, 1.0][..], &[1.0][..]),
            (&[0.1, 0.2][..], &[1.0, 1.0][..], &[1.0][..]),
            (&[0.1, 0.2][..], &[1.0, 1.0, 1.0][..], &[][..]),
        ] {
            let err = ParameterBinding::from_slices(shift, norm, spline).unwrap_err();
            assert!(matches!(err, Error::InvalidParameters(_)));
        }
    }

    #[test]
    fn from_slices_rejects_non_finite_values() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            for (shift, norm, spline) in [
                ([bad, 0.2], [1.0, 1.0, 1.0], [1.0]),
                ([0.1, 0.2], [1.0, bad, 1.0], [1.0]),
                ([0.1, 0.2], [1.0, 1.0, 1.0], [bad]),
            ] {
                let err = ParameterBinding::from_slices(&shift, &norm, &spline).unwrap_err();
                assert!(matches!(err, Error::InvalidParameters(_)));
            }
        }
    }

    #[test]
    fn rebind_keeps_identity() {
        let binding = SharedBinding::new(ParameterBinding::nominal());
        let handle = binding.clone();
        let next = ParameterBinding::new([0.0, 0.0], [2.0, 2.0, 2.0], 0.5);
        binding.rebind(next);
        assert!(handle.same_cell(&binding));
        assert_eq!(handle.snapshot(), next);
        assert!(!handle.same_cell(&SharedBinding::new(next)));
    }

    #[test]
    fn draws_are_reproducible_per_seed() {
        let a = ParameterSampler::new(7).unwrap().draws(20);
        let b = ParameterSampler::new(7).unwrap().draws(20);
        let c = ParameterSampler::new(8).unwrap().draws(20);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn draws_follow_their_centers() {
        let draws = ParameterSampler::new(1).unwrap().draws(4000);
        let mean = |f: fn(&ParameterBinding) -> f64| {
            draws.iter().map(f).sum::<f64>() / draws.len() as f64
        };
        assert!(mean(|p| p.shift[0]).abs() < 0.02);
        assert!(mean(|p| p.shift[1]).abs() < 0.02);
        assert!((mean(|p| p.norm[2]) - 1.0).abs() < 0.05);
        assert!((mean(|p| p.alpha()) - 1.0).abs() < 0.05);
    }

    #[test]
    fn invalid_width_is_rejected() {
        let widths = DrawWidths {
            alpha: (1.0, f64::NAN),
            ..DrawWidths::default()
        };
        assert!(matches!(
            ParameterSampler::with_widths(0, widths),
            Err(Error::InvalidParameters(_))
        ));
    }
}
