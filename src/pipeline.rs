//! The reweighting pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s built once against a column view, a set
//! of systematics and a [`SharedBinding`]. Every evaluation runs all stages over all rows
//! with one snapshot of the binding:
//!
//! 1. `RecoEnu = Enu_true`
//! 2. `ELep_shift = RecoEnu + shift[0] * ELep + shift[1] * RecoEnu`
//! 3. keep the event iff `low < Enu_true < high`
//! 4. `norm_weight` piecewise in `Q2`
//! 5. `spline_weight` = product of the enabled systematic lookups at `Enu_true`
//! 6. `evt_weight = norm_weight * spline_weight`
//!
//! and fills `ELep_shift` weighted by `evt_weight` into the output histogram.

use std::fmt::{self, Write as _};
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::columns::{ColumnView, EventColumns};
use crate::error::{Error, Result};
use crate::exec::Executor;
use crate::histogram::Histogram;
use crate::params::{ParameterBinding, SharedBinding};
use crate::spline::SplineWeightTable;

/// Base columns every pipeline reads.
pub const BASE_COLUMNS: [&str; 3] = ["ELep", "Enu_true", "Q2"];

/// Open interval on `Enu_true` that events must fall in.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct SelectionWindow {
    pub low: f64,
    pub high: f64,
}

impl SelectionWindow {
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.low < value && value < self.high
    }
}

/// Constants of the stage sequence.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub selection: SelectionWindow,
    /// Lower bounds of the three parameterized Q2 regions.
    pub norm_breaks: [f64; 3],
    /// Edges of the output ELep_shift histogram.
    pub hist_edges: Vec<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            selection: SelectionWindow {
                low: 0.0,
                high: 4.0,
            },
            norm_breaks: [0.25, 0.5, 2.0],
            hist_edges: vec![
                0.0, 0.5, 1.0, 1.25, 1.5, 1.75, 2.0, 2.25, 2.5, 2.75, 3.0, 3.25, 3.5, 3.75, 4.0,
                5.0, 6.0, 10.0,
            ],
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| Error::TableNotFound {
            path: path.to_path_buf(),
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn validate(&self) -> Result<()> {
        let SelectionWindow { low, high } = self.selection;
        if !(low < high) {
            return Err(Error::InvalidConfig(format!(
                "selection window ({low}, {high}) is empty"
            )));
        }
        let [a, b, c] = self.norm_breaks;
        if !(a < b && b < c) {
            return Err(Error::InvalidConfig(format!(
                "normalization break points must be strictly increasing, got [{a}, {b}, {c}]"
            )));
        }
        Ok(())
    }
}

/// Piecewise-constant normalization weight in `Q2`.
///
/// Below the first break point the weight is fixed at `1.0`.
#[inline]
pub fn norm_weight(q2: f64, breaks: &[f64; 3], norm: &[f64; 3]) -> f64 {
    if q2 < breaks[0] {
        1.0
    } else if q2 < breaks[1] {
        norm[0]
    } else if q2 < breaks[2] {
        norm[1]
    } else {
        norm[2]
    }
}

/// A named spline weight table that can be switched off.
#[derive(Clone, Debug)]
pub struct Systematic {
    name: String,
    table: Arc<SplineWeightTable>,
    enabled: bool,
}

impl Systematic {
    pub fn new(name: impl Into<String>, table: Arc<SplineWeightTable>) -> Self {
        Self {
            name: name.into(),
            table,
            enabled: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Base and derived values of one event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub elep: f64,
    pub enu_true: f64,
    pub q2: f64,
    pub reco_enu: f64,
    pub elep_shift: f64,
    pub norm_weight: f64,
    pub spline_weight: f64,
    pub evt_weight: f64,
}

impl EventRecord {
    pub fn new(elep: f64, enu_true: f64, q2: f64) -> Self {
        Self {
            elep,
            enu_true,
            q2,
            reco_enu: 0.0,
            elep_shift: 0.0,
            norm_weight: 1.0,
            spline_weight: 1.0,
            evt_weight: 1.0,
        }
    }
}

/// One per-event transform.
#[derive(Clone, Debug)]
pub enum Stage {
    DefineRecoEnu,
    Shift,
    Select(SelectionWindow),
    NormWeight([f64; 3]),
    SplineWeight {
        name: String,
        table: Arc<SplineWeightTable>,
    },
    Combine,
}

impl Stage {
    /// Apply the stage; `false` drops the event.
    #[inline]
    pub fn apply(&self, ev: &mut EventRecord, params: &ParameterBinding) -> bool {
        match self {
            Stage::DefineRecoEnu => ev.reco_enu = ev.enu_true,
            Stage::Shift => {
                let [p0, p1] = params.shift;
                ev.elep_shift = ev.reco_enu + p0 * ev.elep + p1 * ev.reco_enu;
            }
            Stage::Select(window) => return window.contains(ev.enu_true),
            Stage::NormWeight(breaks) => ev.norm_weight = norm_weight(ev.q2, breaks, &params.norm),
            Stage::SplineWeight { table, .. } => {
                ev.spline_weight *= table.lookup(ev.enu_true, params.alpha())
            }
            Stage::Combine => ev.evt_weight = ev.norm_weight * ev.spline_weight,
        }
        true
    }

    /// Column defined (or filter applied) by this stage.
    pub fn output(&self) -> &str {
        match self {
            Stage::DefineRecoEnu => "RecoEnu",
            Stage::Shift => "ELep_shift",
            Stage::Select(_) => "Enu cut",
            Stage::NormWeight(_) => "norm_weight",
            Stage::SplineWeight { name, .. } => name,
            Stage::Combine => "evt_weight",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Stage::Select(_) => "Filter",
            _ => "Define",
        }
    }
}

fn run_stages(
    stages: &[Stage],
    mut ev: EventRecord,
    params: &ParameterBinding,
) -> Option<EventRecord> {
    for stage in stages {
        if !stage.apply(&mut ev, params) {
            return None;
        }
    }
    Some(ev)
}

struct BaseColumns<'a> {
    elep: &'a [f64],
    enu_true: &'a [f64],
    q2: &'a [f64],
}

impl<'a> BaseColumns<'a> {
    fn from_rows(rows: &'a EventColumns, table: &str) -> Result<Self> {
        let get = |name: &str| {
            rows.column(name).ok_or_else(|| Error::ColumnNotFound {
                table: table.to_string(),
                name: name.to_string(),
            })
        };
        Ok(Self {
            elep: get("ELep")?,
            enu_true: get("Enu_true")?,
            q2: get("Q2")?,
        })
    }

    #[inline]
    fn event(&self, row: usize) -> EventRecord {
        EventRecord::new(self.elep[row], self.enu_true[row], self.q2[row])
    }
}

/// Builds pipelines over one view, one configuration and one list of systematics.
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
    view: ColumnView,
    config: PipelineConfig,
    systematics: Vec<Systematic>,
}

impl PipelineBuilder {
    pub fn new(view: ColumnView) -> Self {
        Self {
            view,
            config: PipelineConfig::default(),
            systematics: Vec::new(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn systematic(mut self, systematic: Systematic) -> Self {
        self.systematics.push(systematic);
        self
    }

    pub fn systematics(mut self, systematics: impl IntoIterator<Item = Systematic>) -> Self {
        self.systematics.extend(systematics);
        self
    }

    /// Assemble the stage list against `binding`.
    pub fn build(&self, binding: SharedBinding) -> Result<Pipeline> {
        for name in BASE_COLUMNS {
            if !self.view.has_column(name) {
                return Err(Error::ColumnNotFound {
                    table: self.view.table().to_string(),
                    name: name.to_string(),
                });
            }
        }
        self.config.validate()?;
        let template = Histogram::new(self.config.hist_edges.clone())?;

        let mut stages = vec![
            Stage::DefineRecoEnu,
            Stage::Shift,
            Stage::Select(self.config.selection),
            Stage::NormWeight(self.config.norm_breaks),
        ];
        stages.extend(
            self.systematics
                .iter()
                .filter(|s| s.enabled)
                .map(|s| Stage::SplineWeight {
                    name: s.name.clone(),
                    table: s.table.clone(),
                }),
        );
        stages.push(Stage::Combine);
        tracing::debug!(
            stages = stages.len(),
            systematics = self.systematics.iter().filter(|s| s.enabled).count(),
            "pipeline built"
        );
        Ok(Pipeline {
            view: self.view.clone(),
            stages,
            selection: self.config.selection,
            template,
            binding,
        })
    }
}

/// A built stage sequence bound to a parameter cell.
#[derive(Debug)]
pub struct Pipeline {
    view: ColumnView,
    stages: Vec<Stage>,
    selection: SelectionWindow,
    template: Histogram,
    binding: SharedBinding,
}

impl Pipeline {
    pub fn binding(&self) -> &SharedBinding {
        &self.binding
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn view(&self) -> &ColumnView {
        &self.view
    }

    /// Run every stage on one event; `None` if the event is rejected.
    pub fn process(&self, event: EventRecord, params: &ParameterBinding) -> Option<EventRecord> {
        run_stages(&self.stages, event, params)
    }

    /// Fill the output histogram using the binding's current contents.
    ///
    /// The binding is read once, before any row is processed.
    pub fn evaluate(&self, executor: &Executor) -> Result<Histogram> {
        let params = self.binding.snapshot();
        self.evaluate_with(&params, executor)
    }

    /// Fill the output histogram using `params` instead of the bound cell.
    pub fn evaluate_with(
        &self,
        params: &ParameterBinding,
        executor: &Executor,
    ) -> Result<Histogram> {
        let rows = self.view.materialize()?;
        let base = BaseColumns::from_rows(&rows, self.view.table())?;
        let stages = self.stages.as_slice();
        executor.fill(rows.n_rows(), &self.template, |range: Range<usize>, hist: &mut Histogram| {
            for row in range {
                if let Some(ev) = run_stages(stages, base.event(row), params) {
                    hist.fill(ev.elep_shift, ev.evt_weight);
                }
            }
        })
    }

    /// Count the events seen and kept by the selection.
    pub fn report(&self) -> Result<CutReport> {
        let rows = self.view.materialize()?;
        let base = BaseColumns::from_rows(&rows, self.view.table())?;
        let passed = base
            .enu_true
            .iter()
            .filter(|enu| self.selection.contains(**enu))
            .count();
        Ok(CutReport {
            name: "Enu cut".to_string(),
            all: rows.n_rows() as u64,
            passed: passed as u64,
        })
    }

    /// Graphviz rendering of the stage sequence.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph pipeline {\n");
        let _ = writeln!(
            dot,
            "  0 [label=\"{}\\n({})\", shape=box];",
            self.view.table(),
            self.view.columns().join(", ")
        );
        for (i, stage) in self.stages.iter().enumerate() {
            let shape = match stage {
                Stage::Select(_) => "diamond",
                _ => "ellipse",
            };
            let _ = writeln!(
                dot,
                "  {} [label=\"{}\\n{}\", shape={shape}];",
                i + 1,
                stage.kind(),
                stage.output()
            );
        }
        let sink = self.stages.len() + 1;
        let _ = writeln!(
            dot,
            "  {sink} [label=\"Histo1D\\nELep_shift weighted by evt_weight\", shape=box];"
        );
        for i in 0..sink {
            let _ = writeln!(dot, "  {} -> {};", i, i + 1);
        }
        dot.push_str("}\n");
        dot
    }
}

/// Cut-flow counts for the selection stage.
#[derive(Clone, Debug, PartialEq)]
pub struct CutReport {
    pub name: String,
    pub all: u64,
    pub passed: u64,
}

impl CutReport {
    /// Fraction of events kept, in percent.
    pub fn efficiency(&self) -> f64 {
        if self.all == 0 {
            0.0
        } else {
            100.0 * self.passed as f64 / self.all as f64
        }
    }
}

impl fmt::Display for CutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10}: pass={:<10} all={:<10} -- eff={:.2} %",
            self.name,
            self.passed,
            self.all,
            self.efficiency()
        )
    }
}
