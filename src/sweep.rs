//! Timed parameter sweeps.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressIterator, ProgressStyle};

use crate::error::Result;
use crate::exec::Executor;
use crate::histogram::Histogram;
use crate::params::{ParameterBinding, SharedBinding};
use crate::pipeline::{Pipeline, PipelineBuilder};

/// How a draw reaches the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SweepStrategy {
    /// Build once, overwrite the bound parameters before every trial.
    #[default]
    Rebind,
    /// Build a fresh pipeline with a fresh binding for every trial.
    Rebuild,
}

impl FromStr for SweepStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rebind" => Ok(SweepStrategy::Rebind),
            "rebuild" => Ok(SweepStrategy::Rebuild),
            other => Err(format!("unknown strategy '{other}' (expected rebind or rebuild)")),
        }
    }
}

impl fmt::Display for SweepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepStrategy::Rebind => write!(f, "rebind"),
            SweepStrategy::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// Result of one trial.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialOutcome {
    pub entries: u64,
    pub integral: f64,
    pub elapsed: Duration,
}

/// Timing and results of a whole sweep.
#[derive(Clone, Debug)]
pub struct SweepSummary {
    pub strategy: SweepStrategy,
    pub trials: Vec<TrialOutcome>,
    pub total: Duration,
}

impl SweepSummary {
    pub fn average(&self) -> Duration {
        if self.trials.is_empty() {
            Duration::ZERO
        } else {
            self.total / u32::try_from(self.trials.len()).unwrap_or(u32::MAX)
        }
    }

    pub fn integrals(&self) -> Vec<f64> {
        self.trials.iter().map(|t| t.integral).collect()
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total time: {} ms", self.total.as_millis())?;
        write!(
            f,
            "Average time per trial: {:.3} ms",
            self.average().as_secs_f64() * 1e3
        )
    }
}

/// Runs one trial per draw, strictly one after another.
pub struct Sweep<'a> {
    builder: &'a PipelineBuilder,
    executor: &'a Executor,
    strategy: SweepStrategy,
    warm_up: bool,
    progress: bool,
}

impl<'a> Sweep<'a> {
    pub fn new(builder: &'a PipelineBuilder, executor: &'a Executor) -> Self {
        Self {
            builder,
            executor,
            strategy: SweepStrategy::default(),
            warm_up: true,
            progress: false,
        }
    }

    pub fn strategy(mut self, strategy: SweepStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Run one untimed evaluation before the timed trials.
    pub fn warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, n: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::with_draw_target(Some(n as u64), ProgressDrawTarget::hidden());
        }
        let bar = ProgressBar::new(n as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40} {pos}/{len} trials [{elapsed_precise}<{eta}]")
        {
            bar.set_style(style);
        }
        bar
    }

    /// Evaluate every draw and time each trial.
    ///
    /// With [`SweepStrategy::Rebind`] every draw is written into `pipeline`'s binding and
    /// `pipeline` itself is evaluated. With [`SweepStrategy::Rebuild`] each draw gets a fresh
    /// pipeline from the sweep's builder. Either way `pipeline`'s binding holds the last draw
    /// afterwards.
    pub fn run(&self, pipeline: &Pipeline, draws: &[ParameterBinding]) -> Result<SweepSummary> {
        let binding = pipeline.binding();
        let bar = self.progress_bar(draws.len());
        let mut trials = Vec::with_capacity(draws.len());
        let start = match self.strategy {
            SweepStrategy::Rebind => {
                if self.warm_up {
                    if let Some(first) = draws.first() {
                        binding.rebind(*first);
                    }
                    pipeline.evaluate(self.executor)?;
                }
                let start = Instant::now();
                for draw in draws.iter().progress_with(bar) {
                    let trial_start = Instant::now();
                    binding.rebind(*draw);
                    // evaluate joins every worker before returning, so the next rebind
                    // cannot overlap this trial
                    let hist = pipeline.evaluate(self.executor)?;
                    trials.push(outcome(&hist, trial_start));
                }
                start
            }
            SweepStrategy::Rebuild => {
                if self.warm_up {
                    let first = draws.first().copied().unwrap_or_else(|| binding.snapshot());
                    self.builder
                        .build(SharedBinding::new(first))?
                        .evaluate(self.executor)?;
                }
                let start = Instant::now();
                for draw in draws.iter().progress_with(bar) {
                    let trial_start = Instant::now();
                    let fresh = self.builder.build(SharedBinding::new(*draw))?;
                    let hist = fresh.evaluate(self.executor)?;
                    trials.push(outcome(&hist, trial_start));
                }
                if let Some(last) = draws.last() {
                    binding.rebind(*last);
                }
                start
            }
        };
        Ok(self.finish(trials, start))
    }

    fn finish(&self, trials: Vec<TrialOutcome>, start: Instant) -> SweepSummary {
        let summary = SweepSummary {
            strategy: self.strategy,
            trials,
            total: start.elapsed(),
        };
        tracing::info!(
            strategy = %summary.strategy,
            trials = summary.trials.len(),
            threads = self.executor.threads(),
            total_ms = summary.total.as_millis() as u64,
            "sweep finished"
        );
        summary
    }
}

fn outcome(hist: &Histogram, trial_start: Instant) -> TrialOutcome {
    let trial = TrialOutcome {
        entries: hist.entries(),
        integral: hist.integral(),
        elapsed: trial_start.elapsed(),
    };
    tracing::debug!(entries = trial.entries, integral = trial.integral, "trial done");
    trial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnView;
    use crate::params::ParameterSampler;
    use crate::pipeline::{Systematic, BASE_COLUMNS};
    use crate::spline::{Interpolator, SplineWeightTable};
    use polars::prelude::*;
    use std::sync::Arc;

    fn builder() -> PipelineBuilder {
        let n = 2000;
        let elep: Vec<f64> = (0..n).map(|i| (i % 41) as f64 * 0.13).collect();
        let enu: Vec<f64> = (0..n).map(|i| (i % 47) as f64 * 0.1 - 0.2).collect();
        let q2: Vec<f64> = (0..n).map(|i| (i % 23) as f64 * 0.12).collect();
        let frame = df!("ELep" => elep, "Enu_true" => enu, "Q2" => q2).unwrap();
        let view = ColumnView::new("Events", frame.lazy(), &BASE_COLUMNS).unwrap();
        view.cache().unwrap();
        let interpolators: Vec<Arc<dyn Interpolator>> = vec![
            Arc::new(|a: f64| 1.0 + 0.1 * a),
            Arc::new(|a: f64| 1.0 - 0.05 * a),
        ];
        let table = Arc::new(SplineWeightTable::new(vec![0.0, 1.5, 3.0], interpolators).unwrap());
        PipelineBuilder::new(view).systematic(Systematic::new("spline_weight_0", table))
    }

    fn nominal_pipeline(builder: &PipelineBuilder) -> Pipeline {
        builder
            .build(SharedBinding::new(ParameterBinding::nominal()))
            .unwrap()
    }

    #[test]
    fn rebind_and_rebuild_agree() {
        let builder = builder();
        let exec = Executor::sequential();
        let draws = ParameterSampler::new(11).unwrap().draws(25);

        let pipeline = nominal_pipeline(&builder);
        let rebind = Sweep::new(&builder, &exec).run(&pipeline, &draws).unwrap();
        let other = nominal_pipeline(&builder);
        let rebuild = Sweep::new(&builder, &exec)
            .strategy(SweepStrategy::Rebuild)
            .run(&other, &draws)
            .unwrap();

        assert_eq!(rebind.trials.len(), 25);
        assert_eq!(rebind.integrals(), rebuild.integrals());
        // both leave the last draw in the caller's binding
        assert_eq!(pipeline.binding().snapshot(), draws[24]);
        assert_eq!(other.binding().snapshot(), draws[24]);
        // draws differ, so do the results
        assert_ne!(rebind.integrals()[0], rebind.integrals()[1]);
    }

    #[test]
    fn rebind_sweeps_the_given_pipeline() {
        let builder = builder();
        let exec = Executor::sequential();
        let draws = ParameterSampler::new(3).unwrap().draws(4);
        let pipeline = nominal_pipeline(&builder);
        let handle = pipeline.binding().clone();

        let summary = Sweep::new(&builder, &exec).run(&pipeline, &draws).unwrap();
        assert!(handle.same_cell(pipeline.binding()));
        let last = pipeline.evaluate(&exec).unwrap();
        assert_eq!(Some(last.integral()), summary.trials.last().map(|t| t.integral));
    }

    #[test]
    fn each_trial_matches_a_standalone_evaluation() {
        let builder = builder();
        let exec = Executor::parallel(3, 128).unwrap();
        let draws = ParameterSampler::new(5).unwrap().draws(6);
        let summary = Sweep::new(&builder, &exec)
            .warm_up(false)
            .run(&nominal_pipeline(&builder), &draws)
            .unwrap();
        let reference = nominal_pipeline(&builder);
        for (draw, trial) in draws.iter().zip(&summary.trials) {
            let hist = reference.evaluate_with(draw, &exec).unwrap();
            assert_eq!(hist.integral(), trial.integral);
            assert_eq!(hist.entries(), trial.entries);
        }
    }

    #[test]
    fn summary_prints_totals() {
        let summary = SweepSummary {
            strategy: SweepStrategy::Rebind,
            trials: vec![
                TrialOutcome {
                    entries: 1,
                    integral: 1.0,
                    elapsed: Duration::from_millis(10),
                };
                4
            ],
            total: Duration::from_millis(40),
        };
        assert_eq!(summary.average(), Duration::from_millis(10));
        assert_eq!(
            summary.to_string(),
            "Total time: 40 ms\nAverage time per trial: 10.000 ms"
        );
    }

    #[test]
    fn strategy_parses() {
        assert_eq!("rebind".parse::<SweepStrategy>(), Ok(SweepStrategy::Rebind));
        assert_eq!("Rebuild".parse::<SweepStrategy>(), Ok(SweepStrategy::Rebuild));
        assert!("jit".parse::<SweepStrategy>().is_err());
    }
}
