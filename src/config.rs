use crate::error::ConfigError;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const AZURE_LOCATION: &str = "AZURE_LOCATION";
pub const AZURE_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const AZURE_RESOURCE_GROUP: &str = "AZURE_RESOURCE_GROUP";
pub const AZUREAI_PROJECT_NAME: &str = "AZUREAI_PROJECT_NAME";
pub const PREFIX: &str = "PREFIX";
pub const AZURE_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const AZURE_OPENAI_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const AZURE_OPENAI_CHAT_DEPLOYMENT: &str = "AZURE_OPENAI_CHAT_DEPLOYMENT";
pub const AZURE_OPENAI_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";

/// Maximum length of the run-name prefix
pub const PREFIX_LEN: usize = 14;

/// Identifying parameters read from the process environment.
///
/// Values are captured as-is and only checked when a descriptor needs them,
/// so a missing variable fails at first use rather than at load time.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub location: Option<String>,
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub project_name: Option<String>,
    pub openai_endpoint: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_deployment: Option<String>,
    pub openai_api_version: Option<String>,
    pub tenant_id: Option<String>,
    /// Run-name prefix, at most [`PREFIX_LEN`] characters
    pub prefix: String,
}

impl EnvConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), Local::now().naive_local())
    }

    /// Read the configuration through `lookup`, using `now` for the default prefix
    pub fn from_lookup<F>(lookup: F, now: NaiveDateTime) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let prefix = read(PREFIX).unwrap_or_else(|| default_prefix(now));

        Self {
            location: read(AZURE_LOCATION),
            subscription_id: read(AZURE_SUBSCRIPTION_ID),
            resource_group: read(AZURE_RESOURCE_GROUP),
            project_name: read(AZUREAI_PROJECT_NAME),
            openai_endpoint: read(AZURE_OPENAI_ENDPOINT),
            openai_api_key: read(AZURE_OPENAI_API_KEY),
            openai_deployment: read(AZURE_OPENAI_CHAT_DEPLOYMENT),
            openai_api_version: read(AZURE_OPENAI_API_VERSION),
            tenant_id: read(AZURE_TENANT_ID),
            prefix: prefix.chars().take(PREFIX_LEN).collect(),
        }
    }

    /// Name of the evaluation run, `"<prefix> Quality Evaluation"`
    pub fn evaluation_name(&self) -> String {
        format!("{} Quality Evaluation", self.prefix)
    }

    pub fn location(&self) -> Result<&str, ConfigError> {
        required(&self.location, AZURE_LOCATION)
    }

    pub fn subscription_id(&self) -> Result<&str, ConfigError> {
        required(&self.subscription_id, AZURE_SUBSCRIPTION_ID)
    }

    pub fn resource_group(&self) -> Result<&str, ConfigError> {
        required(&self.resource_group, AZURE_RESOURCE_GROUP)
    }

    pub fn project_name(&self) -> Result<&str, ConfigError> {
        required(&self.project_name, AZUREAI_PROJECT_NAME)
    }

    pub fn openai_endpoint(&self) -> Result<&str, ConfigError> {
        required(&self.openai_endpoint, AZURE_OPENAI_ENDPOINT)
    }

    pub fn openai_api_key(&self) -> Result<&str, ConfigError> {
        required(&self.openai_api_key, AZURE_OPENAI_API_KEY)
    }

    pub fn openai_deployment(&self) -> Result<&str, ConfigError> {
        required(&self.openai_deployment, AZURE_OPENAI_CHAT_DEPLOYMENT)
    }

    pub fn openai_api_version(&self) -> Result<&str, ConfigError> {
        required(&self.openai_api_version, AZURE_OPENAI_API_VERSION)
    }

    pub fn tenant_id(&self) -> Result<&str, ConfigError> {
        required(&self.tenant_id, AZURE_TENANT_ID)
    }
}

fn required<'a>(value: &'a Option<String>, var: &'static str) -> Result<&'a str, ConfigError> {
    value.as_deref().ok_or(ConfigError::MissingVar(var))
}

/// Timestamp prefix `YYMMDDHHMMSS` followed by sub-second digits, cut to [`PREFIX_LEN`]
pub fn default_prefix(now: NaiveDateTime) -> String {
    now.format("%y%m%d%H%M%S%f")
        .to_string()
        .chars()
        .take(PREFIX_LEN)
        .collect()
}

/// File locations and service endpoints for a pipeline run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the flow definition
    pub flow_dir: PathBuf,
    /// Newline-delimited JSON dataset, one object with a `question` per line
    pub dataset: PathBuf,
    /// Intermediate JSON-lines file handed to the evaluators
    pub responses_path: PathBuf,
    /// Final evaluation report
    pub report_path: PathBuf,
    /// Base URL of the served flow
    pub flow_endpoint: String,
    /// Log each completed line at info level while the flow runs
    pub stream: bool,
    /// Overrides the `https://` host derived from the project endpoint
    pub project_api_base: Option<String>,
    /// API version used for the file upload
    pub upload_api_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            flow_dir: PathBuf::from("./src/"),
            dataset: PathBuf::from("./evaluations/test-dataset.jsonl"),
            responses_path: PathBuf::from("./responses.jsonl"),
            report_path: PathBuf::from("./qa_flow_quality_eval.json"),
            flow_endpoint: "http://localhost:8080".to_string(),
            stream: true,
            project_api_base: None,
            upload_api_version: "2024-07-01-preview".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
