//! Run recording: parameter snapshots, metric rows and diagnostics.
//!
//! [`Recorder`] is the sink the training and evaluation entry points write
//! to. [`MemoryRecorder`] keeps everything in memory and serializes each
//! flushed record to JSON.

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::NodePair;
use crate::error::Result;
use crate::eval::Diagnostics;

/// Data split a metric row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    /// Training batches
    Train,
    /// Validation batches
    Val,
    /// Test batches
    Test,
}

/// Named metric values, optionally tagged with an epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Epoch the row was produced in; `None` for standalone evaluation
    pub epoch: Option<usize>,
    /// Metric name to value
    pub values: BTreeMap<String, f64>,
}

impl MetricRow {
    /// Empty row for `epoch`.
    pub fn new(epoch: Option<usize>) -> Self {
        Self {
            epoch,
            values: BTreeMap::new(),
        }
    }

    /// Add a metric.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Look up a metric.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Sink for run artifacts.
pub trait Recorder {
    /// Snapshot the model's parameters at the end of `epoch`.
    fn save_model(&mut self, params: &Array1<f64>, epoch: usize) -> Result<()>;

    /// Append one row of metrics for `split`.
    fn append_full_metrics(&mut self, split: Split, row: MetricRow) -> Result<()>;

    /// Append the diagnostic curve and intervals of one evaluated pair.
    fn append_diagnostics(&mut self, pair: NodePair, diagnostics: &Diagnostics) -> Result<()>;

    /// Flush everything appended so far.
    fn save_record(&mut self) -> Result<()>;

    /// Parameter state `name` saved by run `run_id`, if any.
    fn load_model(&self, run_id: &str, name: &str) -> Result<Option<Array1<f64>>>;
}

/// Everything a flushed record contains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier
    pub run_id: String,
    /// Metric rows per split, in append order
    pub metrics: BTreeMap<Split, Vec<MetricRow>>,
    /// Diagnostics per evaluated pair, in append order
    pub diagnostics: Vec<(NodePair, Diagnostics)>,
}

/// In-memory recorder.
///
/// `save_model` stores the snapshot as `epoch_{n}` and as `last` under the
/// recorder's own run id. Other runs' states can be seeded with
/// [`insert_state`](Self::insert_state).
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    record: RunRecord,
    states: BTreeMap<(String, String), Array1<f64>>,
    flushed: Vec<String>,
}

impl MemoryRecorder {
    /// Recorder for `run_id`.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            record: RunRecord {
                run_id: run_id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Store a named parameter state for `run_id`.
    pub fn insert_state(&mut self, run_id: impl Into<String>, name: impl Into<String>, params: Array1<f64>) {
        self.states.insert((run_id.into(), name.into()), params);
    }

    /// Current record
    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Metric rows appended for `split`
    pub fn metrics(&self, split: Split) -> &[MetricRow] {
        self.record
            .metrics
            .get(&split)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// JSON snapshots produced by each `save_record` call
    pub fn flushed(&self) -> &[String] {
        &self.flushed
    }
}

impl Recorder for MemoryRecorder {
    fn save_model(&mut self, params: &Array1<f64>, epoch: usize) -> Result<()> {
        let run = self.record.run_id.clone();
        self.states
            .insert((run.clone(), format!("epoch_{epoch}")), params.clone());
        self.states.insert((run, "last".to_string()), params.clone());
        Ok(())
    }

    fn append_full_metrics(&mut self, split: Split, row: MetricRow) -> Result<()> {
        self.record.metrics.entry(split).or_default().push(row);
        Ok(())
    }

    fn append_diagnostics(&mut self, pair: NodePair, diagnostics: &Diagnostics) -> Result<()> {
        self.record.diagnostics.push((pair, diagnostics.clone()));
        Ok(())
    }

    fn save_record(&mut self) -> Result<()> {
        let json = serde_json::to_string(&self.record)?;
        debug!(run_id = %self.record.run_id, bytes = json.len(), "record flushed");
        self.flushed.push(json);
        Ok(())
    }

    fn load_model(&self, run_id: &str, name: &str) -> Result<Option<Array1<f64>>> {
        Ok(self
            .states
            .get(&(run_id.to_string(), name.to_string()))
            .cloned())
    }
}
