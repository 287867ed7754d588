//! Weighted 1-D histograms with arbitrary bin edges.

use crate::error::{Error, Result};

/// Locate the bin `i` with `edges[i] <= value < edges[i + 1]`.
///
/// This is an upper-bound search minus one. Values below the first edge, at or above the
/// last edge, and `NaN` have no bin.
#[inline]
pub fn find_bin(edges: &[f64], value: f64) -> Option<usize> {
    let upper = edges.partition_point(|edge| *edge <= value);
    if upper == 0 || upper >= edges.len() {
        None
    } else {
        Some(upper - 1)
    }
}

/// Check that `edges` describe at least one bin and are strictly increasing.
pub fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::InvalidBinning(format!(
            "need at least 2 edges, got {}",
            edges.len()
        )));
    }
    for (i, pair) in edges.windows(2).enumerate() {
        if !(pair[0] < pair[1]) {
            return Err(Error::InvalidBinning(format!(
                "edges must be strictly increasing, but edges[{}]={} >= edges[{}]={}",
                i,
                pair[0],
                i + 1,
                pair[1]
            )));
        }
    }
    Ok(())
}

/// A filled histogram.
///
/// Values outside `[edges[0], edges[last])` are dropped from the bins, the entry count and
/// the integral. Their weight is still tallied in [`Histogram::underflow`] and
/// [`Histogram::overflow`].
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    edges: Vec<f64>,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
    underflow: f64,
    overflow: f64,
}

impl Histogram {
    /// Create an empty histogram over `edges`.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        validate_edges(&edges)?;
        let n_bins = edges.len() - 1;
        Ok(Self {
            edges,
            sumw: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            entries: 0,
            underflow: 0.0,
            overflow: 0.0,
        })
    }

    /// An empty histogram with the same binning as `self`.
    pub fn empty_like(&self) -> Self {
        Self {
            edges: self.edges.clone(),
            sumw: vec![0.0; self.n_bins()],
            sumw2: vec![0.0; self.n_bins()],
            entries: 0,
            underflow: 0.0,
            overflow: 0.0,
        }
    }

    /// Fill a histogram from a stream of `(value, weight)` pairs.
    pub fn accumulate<I>(edges: Vec<f64>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut hist = Self::new(edges)?;
        hist.extend(pairs);
        Ok(hist)
    }

    /// Add one weighted value.
    #[inline]
    pub fn fill(&mut self, value: f64, weight: f64) {
        match find_bin(&self.edges, value) {
            Some(bin) => {
                self.sumw[bin] += weight;
                self.sumw2[bin] += weight * weight;
                self.entries += 1;
            }
            None if value < self.edges[0] => self.underflow += weight,
            None if value >= self.edges[self.edges.len() - 1] => self.overflow += weight,
            // NaN
            None => {}
        }
    }

    /// Add `other` bin by bin. Both histograms must share the same edges.
    pub fn merge(&mut self, other: &Histogram) -> Result<()> {
        if self.edges != other.edges {
            return Err(Error::InvalidBinning(format!(
                "cannot merge histograms with different edges ({} vs {} edges)",
                self.edges.len(),
                other.edges.len()
            )));
        }
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        Ok(())
    }

    pub fn n_bins(&self) -> usize {
        self.sumw.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Sum of weights per bin.
    pub fn bin_contents(&self) -> &[f64] {
        &self.sumw
    }

    /// Sum of squared weights per bin.
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Number of in-range values filled (unweighted).
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of in-range weights.
    pub fn integral(&self) -> f64 {
        self.sumw.iter().sum()
    }

    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Iterate over `(low_edge, high_edge, content)` for every bin.
    pub fn bins(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.edges
            .windows(2)
            .zip(&self.sumw)
            .map(|(pair, content)| (pair[0], pair[1], *content))
    }
}

impl Extend<(f64, f64)> for Histogram {
    fn extend<I: IntoIterator<Item = (f64, f64)>>(&mut self, pairs: I) {
        for (value, weight) in pairs {
            self.fill(value, weight);
        }
    }
}
