//! LLM integration.
//!
//! `LlmProvider` is the seam the analysis engine calls through. The
//! production backend is OpenAI via rig-core, bridged by `RigAdapter`.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Upper bound on a single completion call.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client_error = |e: &dyn std::fmt::Display| LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: format!("Failed to create OpenAI client: {e}"),
    };

    let key = config.api_key.expose_secret();
    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        if config.base_url == DEFAULT_BASE_URL {
            openai::Client::new(key).map_err(|e| client_error(&e))?
        } else {
            openai::Client::builder()
                .api_key(key)
                .base_url(&config.base_url)
                .build()
                .map_err(|e| client_error(&e))?
        };

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, base_url = %config.base_url, "Using OpenAI provider");
    Ok(Arc::new(RigAdapter::new(model, &config.model, PROVIDER)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
            base_url: base_url.to_string(),
        }
    }

    #[test]
    fn create_provider_uses_configured_model() {
        // rig clients accept any key at construction; auth fails on the first request.
        let provider = create_provider(&config(DEFAULT_BASE_URL)).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }

    #[tokio::test]
    async fn unreachable_base_url_is_request_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = create_provider(&config(&format!("http://{addr}/v1"))).unwrap();
        let err = provider
            .complete(CompletionRequest::new(vec![
                ChatMessage::system("s"),
                ChatMessage::user("u"),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }), "{err:?}");
    }
}
