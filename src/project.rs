use crate::config::EnvConfig;
use crate::error::{ConfigError, UploadError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Token scope for the machine learning workspace APIs
pub const ML_SCOPE: &str = "https://ml.azure.com/.default";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Source of bearer tokens for the project APIs
#[async_trait]
pub trait Credential: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String, UploadError>;
}

/// Token from `AZURE_ACCESS_TOKEN`, otherwise a client-secret grant from
/// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`
pub struct DefaultCredential {
    access_token: Option<String>,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    authority_host: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl DefaultCredential {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.is_empty());
        Self {
            access_token: read("AZURE_ACCESS_TOKEN"),
            tenant_id: read("AZURE_TENANT_ID"),
            client_id: read("AZURE_CLIENT_ID"),
            client_secret: read("AZURE_CLIENT_SECRET"),
            authority_host: read("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string())
                .trim_end_matches('/')
                .to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Credential for DefaultCredential {
    async fn token(&self, scope: &str) -> Result<String, UploadError> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }

        let (Some(tenant), Some(client_id), Some(secret)) =
            (&self.tenant_id, &self.client_id, &self.client_secret)
        else {
            return Err(UploadError::Credential(
                "set AZURE_ACCESS_TOKEN, or AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET"
                    .to_string(),
            ));
        };

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority_host, tenant);
        debug!(url = %url, "Requesting access token");
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| UploadError::Credential(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Credential(format!(
                "token request failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Credential(e.to_string()))?;
        Ok(token.access_token)
    }
}

/// The cloud project the report is uploaded to
#[derive(Clone)]
pub struct ProjectDescriptor {
    pub subscription_id: String,
    pub resource_group: String,
    pub project_name: String,
    pub credential: Arc<dyn Credential>,
}

impl ProjectDescriptor {
    pub fn from_env_config(env: &EnvConfig, credential: Arc<dyn Credential>) -> Result<Self, ConfigError> {
        Ok(Self {
            subscription_id: env.subscription_id()?.to_string(),
            resource_group: env.resource_group()?.to_string(),
            project_name: env.project_name()?.to_string(),
            credential,
        })
    }
}

/// Project endpoint assembled from region, tenant, resource group and project name
pub fn project_endpoint(env: &EnvConfig) -> Result<String, ConfigError> {
    Ok(format!(
        "{}.api.azureml.ms/?tid={}/resourcegroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
        env.location()?,
        env.tenant_id()?,
        env.resource_group()?,
        env.project_name()?
    ))
}

/// A stored file artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// Somewhere a finished report can be stored
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload_file(&self, path: &Path) -> Result<UploadedFile, UploadError>;
}

/// Client for a project workspace
pub struct ProjectClient {
    endpoint: String,
    api_base: String,
    api_version: String,
    project: ProjectDescriptor,
    http: reqwest::Client,
}

impl ProjectClient {
    pub fn new(endpoint: impl Into<String>, project: ProjectDescriptor, api_version: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let api_base = format!("https://{}", endpoint_host(&endpoint));
        Self {
            endpoint,
            api_base,
            api_version: api_version.into(),
            project,
            http: reqwest::Client::new(),
        }
    }

    /// Send requests to `api_base` instead of the host derived from the endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn files_url(&self) -> String {
        format!(
            "{}/agents/v1.0/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}/files",
            self.api_base,
            self.project.subscription_id,
            self.project.resource_group,
            self.project.project_name
        )
    }
}

/// Host part of an endpoint, with any scheme, path and query removed
fn endpoint_host(endpoint: &str) -> &str {
    let without_scheme = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme)
}

#[async_trait]
impl ArtifactStore for ProjectClient {
    async fn upload_file(&self, path: &Path) -> Result<UploadedFile, UploadError> {
        let content = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("report.json")
            .to_string();

        let token = self.project.credential.token(ML_SCOPE).await?;
        let part = Part::bytes(content)
            .file_name(filename.clone())
            .mime_str("application/json")?;
        let form = Form::new().text("purpose", "assistants").part("file", part);

        info!(
            file = %filename,
            project = %self.project.project_name,
            endpoint = %self.endpoint,
            "Uploading file to project"
        );
        debug!(api_base = %self.api_base(), "Sending upload request");
        let response = self
            .http
            .post(self.files_url())
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let uploaded: UploadedFile = response.json().await?;
        info!(id = %uploaded.id, "Uploaded file");
        Ok(uploaded)
    }
}
