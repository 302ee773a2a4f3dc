use crate::error::FlowError;
use crate::models::{DetailRow, FlowRun, LineStatus, RunDetails, RunStatus};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a flow input takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum InputBinding {
    /// A field of the dataset record, written `${data.<field>}`
    Data(String),
    /// The same value for every line
    Literal(Value),
}

impl InputBinding {
    /// Parse a mapping value: `${data.<field>}` strings reference the record,
    /// anything else is taken literally
    pub fn from_value(value: Value) -> Self {
        if let Some(field) = value
            .as_str()
            .and_then(|s| s.strip_prefix("${data."))
            .and_then(|s| s.strip_suffix('}'))
        {
            return InputBinding::Data(field.to_string());
        }
        InputBinding::Literal(value)
    }
}

/// Binds flow inputs to dataset fields or constants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMapping {
    bindings: Vec<(String, InputBinding)>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// `question` from the record's `question`, `chat_history` always empty
    pub fn question_with_empty_history() -> Self {
        Self::new()
            .bind("question", json!("${data.question}"))
            .bind("chat_history", json!([]))
    }

    pub fn bind(mut self, input: impl Into<String>, value: Value) -> Self {
        self.bindings
            .push((input.into(), InputBinding::from_value(value)));
        self
    }

    /// Build the flow inputs for one record; `line` is 1-based for error reporting
    pub fn apply(&self, record: &Map<String, Value>, line: usize) -> Result<Map<String, Value>, FlowError> {
        let mut inputs = Map::new();
        for (input, binding) in &self.bindings {
            let value = match binding {
                InputBinding::Data(field) => record
                    .get(field)
                    .cloned()
                    .ok_or_else(|| FlowError::MissingDataField {
                        line,
                        field: field.clone(),
                    })?,
                InputBinding::Literal(value) => value.clone(),
            };
            inputs.insert(input.clone(), value);
        }
        Ok(inputs)
    }
}

/// A batch execution request
#[derive(Debug, Clone)]
pub struct FlowRunRequest {
    /// Directory of the flow definition
    pub flow: PathBuf,
    /// Newline-delimited JSON dataset
    pub data: PathBuf,
    pub column_mapping: ColumnMapping,
    /// Report each finished line at info level
    pub stream: bool,
}

/// Batch execution of a flow over a dataset
#[async_trait]
pub trait FlowClient: Send + Sync {
    /// Execute every dataset line, blocking until all have finished
    async fn run(&self, request: &FlowRunRequest) -> Result<FlowRun, FlowError>;

    /// Tabular output of a finished run
    async fn details(&self, run: &FlowRun) -> Result<RunDetails, FlowError>;
}

/// Read a JSON-lines dataset, skipping blank lines
pub fn load_dataset(path: &Path) -> Result<Vec<Map<String, Value>>, FlowError> {
    let content = std::fs::read_to_string(path).map_err(|source| FlowError::Dataset {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| FlowError::InvalidRecord {
            line: index + 1,
            message: e.to_string(),
        })?;
        match value {
            Value::Object(record) => records.push(record),
            other => {
                return Err(FlowError::InvalidRecord {
                    line: index + 1,
                    message: format!("expected a JSON object, found {}", other),
                });
            }
        }
    }
    Ok(records)
}

/// Run name in the form `<flow dir>_variant_0_<YYYYmmdd_HHMMSS_ffffff>`
pub fn run_name(flow: &Path, now: NaiveDateTime) -> String {
    let flow_name = flow
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("flow");
    format!("{}_variant_0_{}", flow_name, now.format("%Y%m%d_%H%M%S_%6f"))
}

/// Runs a flow served over HTTP, one `POST /score` per dataset line
pub struct HttpFlowClient {
    endpoint: String,
    http: reqwest::Client,
    runs: Mutex<HashMap<String, RunDetails>>,
}

impl HttpFlowClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Execute one line; HTTP-level failures are recorded on the row
    async fn execute_line(
        &self,
        line_number: usize,
        inputs: Map<String, Value>,
    ) -> Result<DetailRow, FlowError> {
        let mut columns = Map::new();
        columns.insert("inputs.line_number".to_string(), json!(line_number));
        for (name, value) in &inputs {
            columns.insert(format!("inputs.{}", name), value.clone());
        }

        let url = format!("{}/score", self.endpoint);
        let response = match self.http.post(&url).json(&inputs).send().await {
            Ok(response) => response,
            Err(source) if source.is_connect() => {
                return Err(FlowError::Unreachable {
                    endpoint: self.endpoint.clone(),
                    source,
                });
            }
            Err(e) => return Ok(failed_row(line_number, columns, e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(failed_row(
                line_number,
                columns,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        match response.json::<Value>().await {
            Ok(Value::Object(outputs)) => {
                for (name, value) in outputs {
                    columns.insert(format!("outputs.{}", name), value);
                }
                Ok(DetailRow {
                    line_number,
                    status: LineStatus::Completed,
                    columns,
                    error: None,
                })
            }
            Ok(other) => Ok(failed_row(
                line_number,
                columns,
                format!("flow returned a non-object output: {}", other),
            )),
            Err(e) => Ok(failed_row(line_number, columns, e.to_string())),
        }
    }
}

fn failed_row(line_number: usize, columns: Map<String, Value>, error: String) -> DetailRow {
    DetailRow {
        line_number,
        status: LineStatus::Failed,
        columns,
        error: Some(error),
    }
}

#[async_trait]
impl FlowClient for HttpFlowClient {
    async fn run(&self, request: &FlowRunRequest) -> Result<FlowRun, FlowError> {
        if !request.flow.is_dir() {
            return Err(FlowError::FlowNotFound(request.flow.clone()));
        }

        let records = load_dataset(&request.data)?;
        let inputs = records
            .iter()
            .enumerate()
            .map(|(index, record)| request.column_mapping.apply(record, index + 1))
            .collect::<Result<Vec<_>, _>>()?;

        let name = run_name(&request.flow, Local::now().naive_local());
        let total = inputs.len();
        info!(run = %name, lines = total, "Submitting flow run");

        let mut rows = Vec::with_capacity(total);
        for (line_number, line_inputs) in inputs.into_iter().enumerate() {
            let row = self.execute_line(line_number, line_inputs).await?;
            if row.status == LineStatus::Failed {
                warn!(
                    run = %name,
                    line = line_number,
                    error = row.error.as_deref().unwrap_or_default(),
                    "Line failed"
                );
            } else if request.stream {
                info!(run = %name, "Finished line {}/{}", line_number + 1, total);
            } else {
                debug!(run = %name, "Finished line {}/{}", line_number + 1, total);
            }
            rows.push(row);
        }

        let failed_lines = rows
            .iter()
            .filter(|row| row.status == LineStatus::Failed)
            .count();
        let status = if total > 0 && failed_lines == total {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        info!(run = %name, total, failed = failed_lines, ?status, "Flow run finished");

        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.clone(), RunDetails { rows });

        Ok(FlowRun {
            name,
            flow: request.flow.clone(),
            data: request.data.clone(),
            status,
            total_lines: total,
            failed_lines,
        })
    }

    async fn details(&self, run: &FlowRun) -> Result<RunDetails, FlowError> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&run.name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownRun(run.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mockito::Matcher;
    use tempfile::{TempDir, tempdir};

    fn write_dataset(dir: &TempDir, lines: &[&str]) -> PathBuf {
        let path = dir.path().join("test-dataset.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn request(flow: &Path, data: PathBuf) -> FlowRunRequest {
        FlowRunRequest {
            flow: flow.to_path_buf(),
            data,
            column_mapping: ColumnMapping::question_with_empty_history(),
            stream: true,
        }
    }

    #[test]
    fn test_binding_from_value() {
        assert_eq!(
            InputBinding::from_value(json!("${data.question}")),
            InputBinding::Data("question".to_string())
        );
        assert_eq!(
            InputBinding::from_value(json!([])),
            InputBinding::Literal(json!([]))
        );
        assert_eq!(
            InputBinding::from_value(json!("plain text")),
            InputBinding::Literal(json!("plain text"))
        );
    }

    #[test]
    fn test_mapping_apply() {
        let mapping = ColumnMapping::question_with_empty_history();
        let record = json!({"question": "What is Rust?", "truth": "A language"});
        let inputs = mapping.apply(record.as_object().unwrap(), 1).unwrap();

        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs["question"], json!("What is Rust?"));
        assert_eq!(inputs["chat_history"], json!([]));
    }

    #[test]
    fn test_mapping_missing_field() {
        let mapping = ColumnMapping::question_with_empty_history();
        let record = json!({"prompt": "What is Rust?"});
        let err = mapping.apply(record.as_object().unwrap(), 3).unwrap_err();

        match err {
            FlowError::MissingDataField { line, field } => {
                assert_eq!(line, 3);
                assert_eq!(field, "question");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_load_dataset_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = write_dataset(&dir, &[r#"{"question": "a"}"#, "", r#"{"question": "b"}"#, ""]);
        let records = load_dataset(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["question"], json!("b"));
    }

    #[test]
    fn test_load_dataset_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = write_dataset(&dir, &[r#"{"question": "a"}"#, r#"["not", "an", "object"]"#]);
        let err = load_dataset(&path).unwrap_err();
        assert!(matches!(err, FlowError::InvalidRecord { line: 2, .. }));
    }

    #[test]
    fn test_run_name_format() {
        let now = NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_micro_opt(9, 30, 15, 42)
            .unwrap();
        assert_eq!(
            run_name(Path::new("./src/"), now),
            "src_variant_0_20261018_093015_000042"
        );
    }

    #[tokio::test]
    async fn test_run_collects_rows_in_order() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/score")
            .match_body(Matcher::PartialJson(
                json!({"question": "What is Rust?", "chat_history": []}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"answer": "A systems language.", "context": "Rust docs"}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/score")
            .match_body(Matcher::PartialJson(json!({"question": "What is Cargo?"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"answer": "The package manager.", "context": "Cargo book"}"#)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let data = write_dataset(
            &dir,
            &[
                r#"{"question": "What is Rust?"}"#,
                r#"{"question": "What is Cargo?"}"#,
            ],
        );
        let client = HttpFlowClient::new(server.url());
        let run = client.run(&request(dir.path(), data)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_lines, 2);
        assert_eq!(run.failed_lines, 0);

        let details = client.details(&run).await.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details.rows[0].line_number, 0);
        assert_eq!(details.rows[0].get("inputs.question"), Some(&json!("What is Rust?")));
        assert_eq!(details.rows[0].get("inputs.chat_history"), Some(&json!([])));
        assert_eq!(
            details.rows[0].get("outputs.answer"),
            Some(&json!("A systems language."))
        );
        assert_eq!(details.rows[1].get("outputs.context"), Some(&json!("Cargo book")));

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_line_is_recorded_not_raised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/score")
            .with_status(500)
            .with_body("flow crashed")
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let data = write_dataset(&dir, &[r#"{"question": "Why?"}"#]);
        let client = HttpFlowClient::new(format!("{}/", server.url()));
        let run = client.run(&request(dir.path(), data)).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_lines, 1);

        let details = client.details(&run).await.unwrap();
        let row = &details.rows[0];
        assert_eq!(row.status, LineStatus::Failed);
        assert!(row.get("outputs.answer").is_none());
        assert!(row.error.as_deref().unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_empty_dataset_completes() {
        let dir = tempdir().unwrap();
        let data = write_dataset(&dir, &[]);
        let client = HttpFlowClient::new("http://127.0.0.1:1");
        let run = client.run(&request(dir.path(), data)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_lines, 0);
        assert!(client.details(&run).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_flow_dir() {
        let dir = tempdir().unwrap();
        let data = write_dataset(&dir, &[r#"{"question": "a"}"#]);
        let client = HttpFlowClient::new("http://127.0.0.1:1");
        let err = client
            .run(&request(&dir.path().join("missing"), data))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::FlowNotFound(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_aborts_run() {
        let dir = tempdir().unwrap();
        let data = write_dataset(&dir, &[r#"{"question": "a"}"#]);
        let client = HttpFlowClient::new("http://127.0.0.1:1");
        let err = client.run(&request(dir.path(), data)).await.unwrap_err();
        assert!(matches!(err, FlowError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_details_unknown_run() {
        let client = HttpFlowClient::new("http://127.0.0.1:1");
        let run = FlowRun {
            name: "never_ran".to_string(),
            flow: PathBuf::from("./src/"),
            data: PathBuf::from("./data.jsonl"),
            status: RunStatus::Completed,
            total_lines: 0,
            failed_lines: 0,
        };
        let err = client.details(&run).await.unwrap_err();
        assert!(matches!(err, FlowError::UnknownRun(name) if name == "never_ran"));
    }
}
