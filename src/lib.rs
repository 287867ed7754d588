//! Parameterized event reweighting and histogram sweeps.
//!
//! Events are read once through a [`ColumnView`], run through a [`Pipeline`] of per-event
//! stages, and filled into a [`Histogram`]. The pipeline's parameters live in a
//! [`SharedBinding`] that can be overwritten between evaluations without rebuilding
//! anything, which is what a [`Sweep`] does for every random draw.

pub mod columns;
pub mod error;
pub mod exec;
pub mod histogram;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod plot;
pub mod spline;
pub mod sweep;

pub use columns::{ColumnSource, ColumnView, TableId};
pub use error::{Error, Result};
pub use exec::Executor;
pub use histogram::Histogram;
pub use output::StagedOutputs;
pub use params::{ParameterBinding, ParameterSampler, SharedBinding};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, Systematic};
pub use spline::{Interpolator, SplineFile, SplineWeightTable};
pub use sweep::{Sweep, SweepStrategy, SweepSummary};
