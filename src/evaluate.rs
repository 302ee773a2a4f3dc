use crate::error::{EvaluationError, ScoringError};
use crate::evaluators::Evaluator;
use crate::models::{EvaluationReport, RunRecord, Statistics};
use futures::future::join_all;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Evaluators keyed by the name they report under
pub type NamedEvaluators = [(String, Arc<dyn Evaluator>)];

/// Read evaluation records from a JSON-lines file, skipping blank lines
pub fn load_records(path: &Path) -> Result<Vec<RunRecord>, EvaluationError> {
    let content = std::fs::read_to_string(path).map_err(|source| EvaluationError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| EvaluationError::InvalidRecord {
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Apply every evaluator to every record in `data` and write the report to `output_path`.
///
/// A scoring request the model rejects leaves a null score for that record.
/// An unreachable model endpoint aborts the call before anything is written.
pub async fn evaluate(
    name: &str,
    data: &Path,
    evaluators: &NamedEvaluators,
    output_path: &Path,
) -> Result<EvaluationReport, EvaluationError> {
    let records = load_records(data)?;
    info!(
        evaluation = name,
        records = records.len(),
        evaluators = evaluators.len(),
        "Starting evaluation"
    );

    let mut rows = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let scores = score_record(record, evaluators).await?;
        debug!("Scored record {}/{}", index + 1, records.len());
        rows.push(report_row(record, evaluators, &scores));
    }

    let mut report = EvaluationReport {
        name: name.to_string(),
        rows,
        metrics: BTreeMap::new(),
    };
    report.metrics = aggregate_metrics(&report, evaluators);

    write_report(&report, output_path)?;
    info!(evaluation = name, path = %output_path.display(), "Wrote evaluation report");

    Ok(report)
}

/// Run all evaluators on one record concurrently
async fn score_record(
    record: &RunRecord,
    evaluators: &NamedEvaluators,
) -> Result<HashMap<String, Option<f64>>, EvaluationError> {
    let results = join_all(
        evaluators
            .iter()
            .map(|(_, evaluator)| evaluator.evaluate(record)),
    )
    .await;

    let mut scores = HashMap::new();
    for ((evaluator_name, _), result) in evaluators.iter().zip(results) {
        let score = match result {
            Ok(score) => score,
            Err(ScoringError::Unreachable(message)) => {
                return Err(EvaluationError::Aborted {
                    evaluator: evaluator_name.clone(),
                    source: ScoringError::Unreachable(message),
                });
            }
            Err(e) => {
                warn!(evaluator = %evaluator_name, error = %e, "Evaluator failed for record");
                None
            }
        };
        scores.insert(evaluator_name.clone(), score);
    }
    Ok(scores)
}

fn report_row(
    record: &RunRecord,
    evaluators: &NamedEvaluators,
    scores: &HashMap<String, Option<f64>>,
) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("inputs.question".to_string(), json!(record.question));
    row.insert("inputs.chat_history".to_string(), json!(record.chat_history));
    row.insert("inputs.answer".to_string(), json!(record.answer));
    row.insert("inputs.context".to_string(), json!(record.context));

    for (name, evaluator) in evaluators {
        let score = scores.get(name).copied().flatten();
        row.insert(
            format!("outputs.{}.{}", name, evaluator.metric()),
            json!(score),
        );
    }
    row
}

/// Mean of the non-null scores for each `<Evaluator>.<metric>`
fn aggregate_metrics(report: &EvaluationReport, evaluators: &NamedEvaluators) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    for (name, evaluator) in evaluators {
        let key = format!("{}.{}", name, evaluator.metric());
        if let Some(stats) = calculate_statistics(&report.scores(&key)) {
            metrics.insert(key, stats.mean);
        }
    }
    metrics
}

/// Write the report as pretty JSON, replacing any previous file
pub fn write_report(report: &EvaluationReport, path: &Path) -> Result<(), EvaluationError> {
    let json_content = serde_json::to_string_pretty(report)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| EvaluationError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    std::fs::write(path, json_content).map_err(|source| EvaluationError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Mean, median and mode of a set of scores; `None` when there are none
pub fn calculate_statistics(scores: &[f64]) -> Option<Statistics> {
    if scores.is_empty() {
        return None;
    }

    Some(Statistics {
        mean: calculate_mean(scores),
        median: calculate_median(scores),
        mode: calculate_mode(scores),
    })
}

fn calculate_mean(scores: &[f64]) -> f64 {
    let sum: f64 = scores.iter().sum();
    sum / scores.len() as f64
}

fn calculate_median(scores: &[f64]) -> f64 {
    let mut sorted_scores = scores.to_vec();
    sorted_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted_scores.len() / 2;
    if sorted_scores.len() % 2 == 0 {
        (sorted_scores[mid - 1] + sorted_scores[mid]) / 2.0
    } else {
        sorted_scores[mid]
    }
}

/// Most frequent score rounded to one decimal place; ties go to the lower score
fn calculate_mode(scores: &[f64]) -> f64 {
    let mut frequency: BTreeMap<i64, usize> = BTreeMap::new();
    for &score in scores {
        *frequency.entry((score * 10.0).round() as i64).or_insert(0) += 1;
    }

    frequency
        .iter()
        .fold(None, |best: Option<(i64, usize)>, (&tenths, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((tenths, count)),
        })
        .map(|(tenths, _)| tenths as f64 / 10.0)
        .unwrap_or(0.0)
}
