use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One flow result as handed to the evaluators.
///
/// Field names are the evaluator input names; their order is the key order
/// of each serialized line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub question: String,
    /// Prior conversation turns, always empty for a batch run
    pub chat_history: Vec<Value>,
    pub answer: String,
    pub context: String,
}

/// Outcome of a single dataset line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStatus {
    Completed,
    Failed,
}

/// Status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Handle to a finished flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    /// Run name, `<flow>_variant_0_<timestamp>`
    pub name: String,
    pub flow: PathBuf,
    pub data: PathBuf,
    pub status: RunStatus,
    pub total_lines: usize,
    pub failed_lines: usize,
}

/// One row of the run details table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailRow {
    /// Zero-based position of the line in the dataset
    pub line_number: usize,
    pub status: LineStatus,
    /// `inputs.*` and `outputs.*` columns
    pub columns: Map<String, Value>,
    /// Failure message for a failed line
    pub error: Option<String>,
}

impl DetailRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// Tabular output of a run, one row per dataset line in dataset order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDetails {
    pub rows: Vec<DetailRow>,
}

impl RunDetails {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first `n` rows
    pub fn head(&self, n: usize) -> &[DetailRow] {
        &self.rows[..n.min(self.rows.len())]
    }
}

/// Aggregated result of applying every evaluator to every record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// `"<prefix> Quality Evaluation"`
    pub name: String,
    /// Flat rows keyed `inputs.<field>` and `outputs.<Evaluator>.<metric>`
    pub rows: Vec<Map<String, Value>>,
    /// Mean score per `<Evaluator>.<metric>`
    pub metrics: BTreeMap<String, f64>,
}

impl EvaluationReport {
    /// All non-null scores recorded for `metric` across the rows
    pub fn scores(&self, metric: &str) -> Vec<f64> {
        let column = format!("outputs.{}", metric);
        self.rows
            .iter()
            .filter_map(|row| row.get(&column).and_then(Value::as_f64))
            .collect()
    }
}

/// Summary statistics for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean: f64,
    pub median: f64,
    /// Most frequent score, rounded to one decimal place
    pub mode: f64,
}
