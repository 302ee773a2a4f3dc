use crate::evaluate::calculate_statistics;
use crate::models::EvaluationReport;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the evaluation report in the specified format
pub fn print_report(report: &EvaluationReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_plain(report)),
        OutputFormat::Json => print_json(report),
    }
}

/// Render the report summary as plain text
pub fn render_plain(report: &EvaluationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== {} ===\n\n", report.name));
    out.push_str(&format!("Records evaluated: {}\n\n", report.rows.len()));

    if report.metrics.is_empty() {
        out.push_str("No scores available.\n");
        return out;
    }

    out.push_str(&format!(
        "{:<32} {:<8} {:<8} {:<8}\n",
        "Metric", "Mean", "Median", "Mode"
    ));
    out.push_str(&format!("{}\n", "-".repeat(59)));

    for metric in report.metrics.keys() {
        if let Some(stats) = calculate_statistics(&report.scores(metric)) {
            out.push_str(&format!(
                "{:<32} {:<8.3} {:<8.3} {:<8.3}\n",
                metric, stats.mean, stats.median, stats.mode
            ));
        }
    }
    out
}

/// Print the report in JSON format
fn print_json(report: &EvaluationReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing report to JSON: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::collections::BTreeMap;

    fn create_test_report() -> EvaluationReport {
        let rows: Vec<Map<String, serde_json::Value>> = [4.0, 5.0, 4.0]
            .iter()
            .map(|score| {
                json!({
                    "inputs.question": "q",
                    "outputs.Fluency.gpt_fluency": score,
                })
                .as_object()
                .unwrap()
                .clone()
            })
            .collect();

        let mut metrics = BTreeMap::new();
        metrics.insert("Fluency.gpt_fluency".to_string(), 13.0 / 3.0);

        EvaluationReport {
            name: "pr42 Quality Evaluation".to_string(),
            rows,
            metrics,
        }
    }

    #[test]
    fn test_render_plain() {
        let text = render_plain(&create_test_report());
        assert!(text.contains("=== pr42 Quality Evaluation ==="));
        assert!(text.contains("Records evaluated: 3"));
        assert!(text.contains("Fluency.gpt_fluency"));
        assert!(text.contains("4.333"));
        assert!(text.contains("4.000"));
    }

    #[test]
    fn test_render_plain_without_scores() {
        let report = EvaluationReport {
            name: "empty Quality Evaluation".to_string(),
            ..EvaluationReport::default()
        };
        let text = render_plain(&report);
        assert!(text.contains("Records evaluated: 0"));
        assert!(text.contains("No scores available."));
    }

    #[test]
    fn test_json_output() {
        // serialization must not panic
        print_report(&create_test_report(), OutputFormat::Json);
    }
}
