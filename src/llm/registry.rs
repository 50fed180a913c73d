//! Provider-type constructor registry.
//!
//! Maps a provider type tag ("openai", "deepseek", ...) to a constructor.
//! Built-in types all use the OpenAI-compatible client; deployments with a
//! bespoke gateway can register their own constructor at startup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::LlmError;
use crate::store::LlmProviderConfig;

use super::client::{LlmProvider, OpenAiCompatClient};

/// Builds a provider client from stored configuration.
pub type ClientFactory =
    Arc<dyn Fn(&LlmProviderConfig) -> Result<Arc<dyn LlmProvider>, LlmError> + Send + Sync>;

static REGISTRY: OnceLock<RwLock<HashMap<String, ClientFactory>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, ClientFactory>> {
    REGISTRY.get_or_init(|| {
        let mut factories: HashMap<String, ClientFactory> = HashMap::new();

        let openai_compat: ClientFactory = Arc::new(|config: &LlmProviderConfig| {
            let client = OpenAiCompatClient::new(
                config.name.clone(),
                config.base_url.clone(),
                config.api_key.clone(),
                config.model.clone(),
            )?;
            Ok(Arc::new(client) as Arc<dyn LlmProvider>)
        });

        for provider_type in ["openai", "deepseek", "openai-compatible"] {
            factories.insert(provider_type.to_string(), Arc::clone(&openai_compat));
        }

        RwLock::new(factories)
    })
}

/// Registers (or replaces) a constructor for a provider type.
pub fn register_provider(provider_type: &str, factory: ClientFactory) {
    if let Ok(mut factories) = registry().write() {
        factories.insert(provider_type.to_string(), factory);
    }
}

/// Builds a client for the given provider configuration.
///
/// # Errors
///
/// Returns `LlmError::UnknownProviderType` if no constructor is registered
/// for the configuration's type, or the constructor's own error.
pub fn create_client(config: &LlmProviderConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let factories = registry()
        .read()
        .map_err(|_| LlmError::ParseError("provider registry poisoned".to_string()))?;

    match factories.get(&config.provider_type) {
        Some(factory) => factory(config),
        None => {
            let mut registered: Vec<&str> = factories.keys().map(String::as_str).collect();
            registered.sort_unstable();
            Err(LlmError::UnknownProviderType {
                provider_type: config.provider_type.clone(),
                registered: registered.join(", "),
            })
        }
    }
}

/// Registered provider types, sorted.
pub fn registered_types() -> Vec<String> {
    let mut types: Vec<String> = registry()
        .read()
        .map(|factories| factories.keys().cloned().collect())
        .unwrap_or_default();
    types.sort_unstable();
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{ChatRequest, ChatResponse, TokenUsage};
    use async_trait::async_trait;

    fn provider_config(provider_type: &str) -> LlmProviderConfig {
        LlmProviderConfig {
            id: 1,
            name: "test".to_string(),
            provider_type: provider_type.to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            api_key: "key".to_string(),
            model: "model-a".to_string(),
        }
    }

    #[derive(Debug)]
    struct StaticProvider;

    #[async_trait]
    impl LlmProvider for StaticProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                model: "static".to_string(),
                content: "{}".to_string(),
                usage: TokenUsage::default(),
            })
        }

        fn default_model(&self) -> &str {
            "static"
        }
    }

    #[test]
    fn test_builtin_types_registered() {
        let types = registered_types();
        for expected in ["openai", "deepseek", "openai-compatible"] {
            assert!(types.iter().any(|t| t == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_create_client_builtin() {
        let client = create_client(&provider_config("openai")).expect("client builds");
        assert_eq!(client.default_model(), "model-a");
    }

    #[test]
    fn test_create_client_unknown_type() {
        let err = create_client(&provider_config("no-such-provider")).unwrap_err();
        match err {
            LlmError::UnknownProviderType {
                provider_type,
                registered,
            } => {
                assert_eq!(provider_type, "no-such-provider");
                assert!(registered.contains("openai"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_register_custom_provider() {
        register_provider(
            "static-test",
            Arc::new(|_| Ok(Arc::new(StaticProvider) as Arc<dyn LlmProvider>)),
        );

        let client = create_client(&provider_config("static-test")).expect("custom client");
        assert_eq!(client.default_model(), "static");
    }
}
