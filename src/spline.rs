//! Binned spline weight tables.
//!
//! A [`SplineWeightTable`] maps a true neutrino energy to a systematic weight: the energy
//! selects a bin, and the bin's interpolator is evaluated at the systematic parameter
//! `alpha`. Energies outside the binned range take the neutral weight `1.0`.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::histogram::{find_bin, validate_edges};

/// Weight returned for energies outside the table's range.
pub const NEUTRAL_WEIGHT: f64 = 1.0;

/// A 1-D response function of the systematic parameter.
pub trait Interpolator: Send + Sync {
    fn eval(&self, x: f64) -> f64;
}

impl<F> Interpolator for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn eval(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Interpolator stored as knots with per-knot polynomial coefficients.
///
/// Around knot `k` the value is `y[k] + dt * (b[k] + dt * (c[k] + dt * d[k]))` with
/// `dt = x - x[k]`. Below the first knot the first polynomial is used, above the last knot
/// the last one.
#[derive(Debug, Clone)]
pub struct KnotSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl KnotSpline {
    /// Piecewise-linear interpolator through `(x, y)`.
    pub fn linear(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        Self::from_record("<linear>", KnotRecord { x, y, b: None, c: None, d: None })
    }

    fn from_record(name: &str, record: KnotRecord) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidSpline {
            name: name.to_string(),
            reason,
        };
        let KnotRecord { x, y, b, c, d } = record;
        let k = x.len();
        if k == 0 {
            return Err(invalid("no knots".into()));
        }
        if y.len() != k {
            return Err(invalid(format!("x has {} knots but y has {}", k, y.len())));
        }
        if x.iter().chain(&y).any(|v| !v.is_finite()) {
            return Err(invalid("non-finite knot".into()));
        }
        if x.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invalid("knots must be strictly increasing".into()));
        }
        let b = match b {
            Some(b) => b,
            None => linear_slopes(&x, &y),
        };
        let c = c.unwrap_or_else(|| vec![0.0; k]);
        let d = d.unwrap_or_else(|| vec![0.0; k]);
        for (label, coeffs) in [("b", &b), ("c", &c), ("d", &d)] {
            if coeffs.len() != k {
                return Err(invalid(format!(
                    "coefficient '{label}' has {} entries, expected {k}",
                    coeffs.len()
                )));
            }
        }
        Ok(Self { x, y, b, c, d })
    }

    /// Knot whose polynomial covers `t`; NaN falls back to the first knot.
    fn knot(&self, t: f64) -> usize {
        let last = self.x.len() - 1;
        if t >= self.x[last] {
            last
        } else {
            self.x.partition_point(|knot| *knot <= t).saturating_sub(1)
        }
    }
}

impl Interpolator for KnotSpline {
    fn eval(&self, t: f64) -> f64 {
        let k = self.knot(t);
        let dt = t - self.x[k];
        self.y[k] + dt * (self.b[k] + dt * (self.c[k] + dt * self.d[k]))
    }
}

fn linear_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    if x.len() < 2 {
        return vec![0.0; x.len()];
    }
    let mut slopes: Vec<f64> = x
        .windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (ys[1] - ys[0]) / (xs[1] - xs[0]))
        .collect();
    let last = slopes[slopes.len() - 1];
    slopes.push(last);
    slopes
}

/// One interpolator per energy bin plus the bin edges.
pub struct SplineWeightTable {
    edges: Vec<f64>,
    interpolators: Vec<Arc<dyn Interpolator>>,
}

impl fmt::Debug for SplineWeightTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplineWeightTable")
            .field("edges", &self.edges)
            .field("n_interpolators", &self.interpolators.len())
            .finish()
    }
}

impl SplineWeightTable {
    /// Assemble a table from explicit edges and per-bin interpolators.
    pub fn new(edges: Vec<f64>, interpolators: Vec<Arc<dyn Interpolator>>) -> Result<Self> {
        validate_edges(&edges)?;
        if interpolators.len() != edges.len() - 1 {
            return Err(Error::InvalidBinning(format!(
                "{} interpolators for {} bins",
                interpolators.len(),
                edges.len() - 1
            )));
        }
        Ok(Self {
            edges,
            interpolators,
        })
    }

    /// Read `bin_count` interpolators named `"<prefix>.ccqe.sp.<i>.0.0"` and the bin edges
    /// of the first axis of the reference histogram `"<hist_name>.0.0"`.
    ///
    /// A reference axis with more than `bin_count` bins is cut to the first `bin_count`
    /// bins, so energies in the surplus bins take the neutral weight.
    pub fn build(
        file: &SplineFile,
        prefix: &str,
        hist_name: &str,
        bin_count: usize,
    ) -> Result<Self> {
        if bin_count == 0 {
            return Err(Error::InvalidBinning("spline table needs at least one bin".into()));
        }
        let hist_key = format!("{hist_name}.0.0");
        let mut edges = file.histogram(&hist_key)?.x_axis.edges()?;
        let available = edges.len().saturating_sub(1);
        if available < bin_count {
            return Err(Error::InvalidBinning(format!(
                "'{hist_key}' has {available} bins on its first axis, {bin_count} requested"
            )));
        }
        if available > bin_count {
            tracing::warn!(
                histogram = %hist_key,
                available,
                bin_count,
                "reference axis has more bins than splines, surplus bins get the neutral weight"
            );
            edges.truncate(bin_count + 1);
        }
        let interpolators = (0..bin_count)
            .map(|i| {
                let name = format!("{prefix}.ccqe.sp.{i}.0.0");
                file.spline(&name)
                    .map(|spline| Arc::new(spline) as Arc<dyn Interpolator>)
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(prefix, bins = bin_count, "spline weight table built");
        Self::new(edges, interpolators)
    }

    /// Weight for `energy` at systematic parameter `alpha`.
    #[inline]
    pub fn lookup(&self, energy: f64, alpha: f64) -> f64 {
        match find_bin(&self.edges, energy) {
            Some(bin) => self.interpolators[bin].eval(alpha),
            None => NEUTRAL_WEIGHT,
        }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn bin_count(&self) -> usize {
        self.interpolators.len()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct KnotRecord {
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    b: Option<Vec<f64>>,
    #[serde(default)]
    c: Option<Vec<f64>>,
    #[serde(default)]
    d: Option<Vec<f64>>,
}

/// Histogram axis: explicit edges or a uniform range.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AxisRecord {
    Variable { edges: Vec<f64> },
    Uniform { n_bins: usize, min: f64, max: f64 },
}

impl AxisRecord {
    /// Low edges of every bin followed by the upper edge of the last bin.
    pub fn edges(&self) -> Result<Vec<f64>> {
        let edges = match self {
            AxisRecord::Variable { edges } => edges.clone(),
            AxisRecord::Uniform { n_bins, min, max } => {
                let width = (max - min) / *n_bins as f64;
                (0..=*n_bins)
                    .map(|i| if i == *n_bins { *max } else { min + width * i as f64 })
                    .collect()
            }
        };
        validate_edges(&edges)?;
        Ok(edges)
    }
}

/// Reference 3-D histogram; only its axes are read.
#[derive(Debug, Clone, Deserialize)]
pub struct Hist3Record {
    pub x_axis: AxisRecord,
    #[serde(default)]
    pub y_axis: Option<AxisRecord>,
    #[serde(default)]
    pub z_axis: Option<AxisRecord>,
}

/// A JSON store of named interpolators and reference histograms.
///
/// ```json
/// {
///   "splines": { "dev.mysyst1.ccqe.sp.0.0.0": { "x": [0, 1, 2], "y": [0.9, 1.0, 1.2] } },
///   "histograms": { "dev_tmp.0.0": { "x_axis": { "edges": [0, 1, 2, 3, 4, 5] } } }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplineFile {
    #[serde(default)]
    splines: HashMap<String, KnotRecord>,
    #[serde(default)]
    histograms: HashMap<String, Hist3Record>,
}

impl SplineFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| Error::TableNotFound {
            path: path.to_path_buf(),
        })?;
        let parsed: Self = serde_json::from_reader(BufReader::new(file))?;
        tracing::info!(
            path = %path.display(),
            splines = parsed.splines.len(),
            histograms = parsed.histograms.len(),
            "spline file loaded"
        );
        Ok(parsed)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn spline(&self, name: &str) -> Result<KnotSpline> {
        let record = self.splines.get(name).ok_or_else(|| Error::SplineNotFound {
            name: name.to_string(),
        })?;
        KnotSpline::from_record(name, record.clone())
    }

    pub fn histogram(&self, name: &str) -> Result<&Hist3Record> {
        self.histograms.get(name).ok_or_else(|| Error::SplineNotFound {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f64) -> Arc<dyn Interpolator> {
        Arc::new(move |_alpha: f64| value)
    }

    fn sample_table() -> SplineWeightTable {
        let interpolators: Vec<Arc<dyn Interpolator>> = vec![
            Arc::new(|alpha: f64| 1.0 + 0.1 * alpha),
            Arc::new(|alpha: f64| 2.0 * alpha),
            constant(0.5),
        ];
        SplineWeightTable::new(vec![0.0, 1.0, 2.0, 4.0], interpolators).unwrap()
    }

    #[test]
    fn lookup_uses_the_bin_interpolator() {
        let table = sample_table();
        assert_eq!(table.lookup(0.0, 2.0), 1.0 + 0.1 * 2.0);
        assert_eq!(table.lookup(0.99, 3.0), 1.0 + 0.1 * 3.0);
        assert_eq!(table.lookup(1.0, 3.0), 6.0);
        assert_eq!(table.lookup(3.999, 7.0), 0.5);
    }

    #[test]
    fn out_of_range_lookup_is_neutral() {
        let table = sample_table();
        for alpha in [-3.0, 0.0, 1.0, 12.5] {
            assert_eq!(table.lookup(-0.001, alpha), NEUTRAL_WEIGHT);
            assert_eq!(table.lookup(4.0, alpha), NEUTRAL_WEIGHT);
            assert_eq!(table.lookup(100.0, alpha), NEUTRAL_WEIGHT);
            assert_eq!(table.lookup(f64::NAN, alpha), NEUTRAL_WEIGHT);
        }
    }

    #[test]
    fn interpolator_count_must_match_bins() {
        let err = SplineWeightTable::new(vec![0.0, 1.0, 2.0], vec![constant(1.0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidBinning(_)));
    }

    #[test]
    fn knot_spline_evaluates_stored_polynomials() {
        let linear = KnotSpline::linear(vec![0.0, 1.0, 2.0], vec![1.0, 3.0, 4.0]).unwrap();
        assert_eq!(linear.eval(0.5), 2.0);
        assert_eq!(linear.eval(1.5), 3.5);
        // extrapolation continues the edge segments
        assert_eq!(linear.eval(-1.0), -1.0);
        assert_eq!(linear.eval(3.0), 5.0);

        let cubic = KnotSpline::from_record(
            "cubic",
            KnotRecord {
                x: vec![0.0, 1.0],
                y: vec![1.0, 2.0],
                b: Some(vec![0.5, 0.0]),
                c: Some(vec![0.25, 0.0]),
                d: Some(vec![0.25, 0.0]),
            },
        )
        .unwrap();
        let t: f64 = 0.5;
        assert_eq!(cubic.eval(t), 1.0 + t * (0.5 + t * (0.25 + t * 0.25)));
    }

    #[test]
    fn nan_alpha_does_not_panic() {
        let spline = KnotSpline::linear(vec![0.0, 1.0, 2.0], vec![1.0, 3.0, 4.0]).unwrap();
        assert_eq!(spline.knot(f64::NAN), 0);
        assert!(spline.eval(f64::NAN).is_nan());

        let interpolators: Vec<Arc<dyn Interpolator>> = vec![Arc::new(spline)];
        let table = SplineWeightTable::new(vec![0.0, 4.0], interpolators).unwrap();
        assert!(table.lookup(1.0, f64::NAN).is_nan());
        assert_eq!(table.lookup(5.0, f64::NAN), NEUTRAL_WEIGHT);
    }

    #[test]
    fn knot_spline_rejects_unsorted_knots() {
        let err = KnotSpline::linear(vec![0.0, 0.0], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidSpline { .. }));
    }

    const FILE: &str = r#"{
        "splines": {
            "dev.mysyst1.ccqe.sp.0.0.0": { "x": [0.0, 2.0], "y": [0.8, 1.2] },
            "dev.mysyst1.ccqe.sp.1.0.0": { "x": [0.0, 2.0], "y": [1.0, 1.0] }
        },
        "histograms": {
            "dev_tmp.0.0": { "x_axis": { "n_bins": 3, "min": 0.0, "max": 3.0 } }
        }
    }"#;

    #[test]
    fn build_reads_named_splines_and_reference_axis() {
        let file = SplineFile::from_json(FILE).unwrap();
        let table = SplineWeightTable::build(&file, "dev.mysyst1", "dev_tmp", 2).unwrap();
        // the third reference bin has no spline and is cut away
        assert_eq!(table.edges(), &[0.0, 1.0, 2.0]);
        assert_eq!(table.bin_count(), 2);
        assert!((table.lookup(0.5, 1.0) - 1.0).abs() < 1e-12);
        assert!((table.lookup(0.5, 2.0) - 1.2).abs() < 1e-12);
        assert_eq!(table.lookup(2.5, 2.0), NEUTRAL_WEIGHT);
    }

    #[test]
    fn build_reports_missing_objects() {
        let file = SplineFile::from_json(FILE).unwrap();
        let err = SplineWeightTable::build(&file, "dev.other", "dev_tmp", 2).unwrap_err();
        assert!(
            matches!(err, Error::SplineNotFound { ref name } if name == "dev.other.ccqe.sp.0.0.0")
        );
        let err = SplineWeightTable::build(&file, "dev.mysyst1", "missing", 2).unwrap_err();
        assert!(matches!(err, Error::SplineNotFound { .. }));
        let err = SplineWeightTable::build(&file, "dev.mysyst1", "dev_tmp", 4).unwrap_err();
        assert!(matches!(err, Error::InvalidBinning(_)));
    }

    #[test]
    fn open_reports_missing_file() {
        let err = SplineFile::open("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));
    }
}
