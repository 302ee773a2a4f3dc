use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty
    #[error("Environment variable {0} is not set")]
    MissingVar(&'static str),

    /// The settings file could not be read
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`crate::config::Settings`]
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors raised by the flow runner
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow directory not found: {0}")]
    FlowNotFound(PathBuf),

    #[error("Failed to read dataset {path}: {source}")]
    Dataset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dataset line is not a JSON object
    #[error("Invalid dataset record on line {line}: {message}")]
    InvalidRecord { line: usize, message: String },

    /// The column mapping references a field the record does not have
    #[error("Dataset record on line {line} has no field '{field}'")]
    MissingDataField { line: usize, field: String },

    /// The flow service could not be reached at all
    #[error("Flow service unreachable at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unknown run: {0}")]
    UnknownRun(String),
}

/// Errors raised while turning run details into evaluation records
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Column '{column}' missing from run output on line {line}")]
    MissingColumn { column: &'static str, line: usize },

    #[error("Column '{column}' on line {line} has an unexpected type: {message}")]
    InvalidColumn {
        column: &'static str,
        line: usize,
        message: String,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by a single scoring request
#[derive(Debug, Error)]
pub enum ScoringError {
    /// The model endpoint could not be reached; aborts the whole evaluation
    #[error("Model endpoint unreachable: {0}")]
    Unreachable(String),

    /// The model rejected or failed this request; degrades a single score
    #[error("Scoring request failed: {0}")]
    Request(String),
}

/// Errors raised by the batch evaluation call
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Failed to read evaluation data {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid evaluation record on line {line}: {source}")]
    InvalidRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Evaluator {evaluator} aborted the evaluation: {source}")]
    Aborted {
        evaluator: String,
        #[source]
        source: ScoringError,
    },

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while uploading the report to the project
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to acquire credential: {0}")]
    Credential(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Any failure of the pipeline, tagged by stage
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}
