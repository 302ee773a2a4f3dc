use crate::config::EnvConfig;
use crate::error::{ConfigError, ScoringError};
use async_openai::{
    Client,
    config::AzureConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

/// Connection details for the Azure OpenAI chat deployment used for scoring
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl ModelConfig {
    /// Resolve the connection from the environment; fails before any request is made
    pub fn from_env_config(env: &EnvConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: env.openai_endpoint()?.to_string(),
            api_key: env.openai_api_key()?.to_string(),
            deployment: env.openai_deployment()?.to_string(),
            api_version: env.openai_api_version()?.to_string(),
        })
    }
}

/// A chat model that answers one scoring prompt at a time
#[async_trait]
pub trait ScoringModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ScoringError>;
}

/// [`ScoringModel`] backed by an Azure OpenAI deployment
pub struct AzureChatModel {
    client: Client<AzureConfig>,
    deployment: String,
}

impl AzureChatModel {
    pub fn new(config: &ModelConfig) -> Self {
        let azure_config = AzureConfig::new()
            .with_api_base(&config.endpoint)
            .with_api_key(&config.api_key)
            .with_deployment_id(&config.deployment)
            .with_api_version(&config.api_version);

        Self {
            client: Client::with_config(azure_config),
            deployment: config.deployment.clone(),
        }
    }

    fn build_request(&self, system: &str, user: &str) -> Result<CreateChatCompletionRequest, ScoringError> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system.to_string())
            .build()
            .map_err(|e| ScoringError::Request(e.to_string()))?
            .into();

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(user.to_string())
            .build()
            .map_err(|e| ScoringError::Request(e.to_string()))?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.deployment)
            .messages([system_message, user_message])
            .temperature(0.0_f32)
            .max_tokens(800_u16)
            .build()
            .map_err(|e| ScoringError::Request(e.to_string()))
    }
}

#[async_trait]
impl ScoringModel for AzureChatModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ScoringError> {
        let request = self.build_request(system, user)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_error)?;

        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default())
    }
}

fn classify_error(error: OpenAIError) -> ScoringError {
    match error {
        OpenAIError::Reqwest(e) if e.is_connect() => ScoringError::Unreachable(e.to_string()),
        other => ScoringError::Request(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn model_config(endpoint: String) -> ModelConfig {
        ModelConfig {
            endpoint,
            api_key: "test-key".to_string(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-06-01".to_string(),
        }
    }

    const COMPLETION: &str = r#"{
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1760000000,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "4"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 1, "total_tokens": 121}
    }"#;

    #[test]
    fn test_model_config_requires_endpoint() {
        let env = EnvConfig {
            openai_api_key: Some("key".to_string()),
            openai_deployment: Some("gpt-4o".to_string()),
            openai_api_version: Some("2024-06-01".to_string()),
            ..EnvConfig::default()
        };
        let err = ModelConfig::from_env_config(&env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("AZURE_OPENAI_ENDPOINT")));
    }

    #[test]
    fn test_model_config_from_env() {
        let env = EnvConfig {
            openai_endpoint: Some("https://qa.openai.azure.com".to_string()),
            openai_api_key: Some("key".to_string()),
            openai_deployment: Some("gpt-4o".to_string()),
            openai_api_version: Some("2024-06-01".to_string()),
            ..EnvConfig::default()
        };
        let config = ModelConfig::from_env_config(&env).unwrap();
        assert_eq!(config.endpoint, "https://qa.openai.azure.com");
        assert_eq!(config.deployment, "gpt-4o");
    }

    #[tokio::test]
    async fn test_complete_against_deployment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                Matcher::Regex("^/openai/deployments/gpt-4o/chat/completions".to_string()),
            )
            .match_query(Matcher::UrlEncoded(
                "api-version".to_string(),
                "2024-06-01".to_string(),
            ))
            .match_header("api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .create_async()
            .await;

        let model = AzureChatModel::new(&model_config(server.url()));
        let reply = model.complete("Rate fluency.", "Answer: fine").await.unwrap();

        assert_eq!(reply, "4");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_unreachable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                Matcher::Regex("^/openai/deployments/gpt-4o/chat/completions".to_string()),
            )
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "content filtered", "type": "invalid_request_error", "param": null, "code": "content_filter"}}"#)
            .create_async()
            .await;

        let model = AzureChatModel::new(&model_config(server.url()));
        let err = model.complete("Rate fluency.", "Answer: fine").await.unwrap_err();
        assert!(matches!(err, ScoringError::Request(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let model = AzureChatModel::new(&model_config("http://127.0.0.1:1".to_string()));
        let err = model.complete("Rate fluency.", "Answer: fine").await.unwrap_err();
        assert!(matches!(err, ScoringError::Unreachable(_)));
    }
}
