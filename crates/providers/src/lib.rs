//! LLM provider implementations for taskforge.
//!
//! Every provider implements [`taskforge_core::Provider`]. The factory in
//! this crate builds the configured provider from [`AppConfig`], carrying the
//! per-provider `streams_tool_calls` capability flag into the transport.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;
use taskforge_config::AppConfig;
use taskforge_core::Provider;
use taskforge_core::error::ProviderError;

/// Build the configured provider from application config.
///
/// Known names get sensible base URLs; anything else requires an explicit
/// `api_url` in its `[providers.<name>]` section.
pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.default_provider.as_str();
    let per_provider = config.providers.get(name);

    let api_key = per_provider
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone());

    let streams_tool_calls = per_provider.map(|p| p.streams_tool_calls).unwrap_or(true);

    let provider = match name {
        "openrouter" => OpenAiCompatProvider::openrouter(api_key.ok_or_else(|| {
            ProviderError::NotConfigured("openrouter requires an API key".into())
        })?)?,
        "openai" => OpenAiCompatProvider::openai(
            api_key
                .ok_or_else(|| ProviderError::NotConfigured("openai requires an API key".into()))?,
        )?,
        "ollama" => OpenAiCompatProvider::ollama(
            per_provider.and_then(|p| p.api_url.as_deref()),
        )?,
        other => {
            let url = per_provider
                .and_then(|p| p.api_url.clone())
                .ok_or_else(|| {
                    ProviderError::NotConfigured(format!(
                        "provider '{other}' requires [providers.{other}] api_url"
                    ))
                })?;
            OpenAiCompatProvider::new(other, url, api_key.unwrap_or_default())?
        }
    };

    Ok(Arc::new(provider.with_tool_streaming(streams_tool_calls)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_config::ProviderConfig;

    #[test]
    fn ollama_needs_no_key() {
        let mut config = AppConfig::default();
        config.default_provider = "ollama".into();
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn openrouter_without_key_fails() {
        let config = AppConfig::default();
        assert!(provider_from_config(&config).is_err());
    }

    #[test]
    fn custom_provider_requires_url() {
        let mut config = AppConfig::default();
        config.default_provider = "lmstudio".into();
        assert!(provider_from_config(&config).is_err());

        config.providers.insert(
            "lmstudio".into(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://localhost:1234/v1".into()),
                default_model: None,
                streams_tool_calls: false,
            },
        );
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "lmstudio");
        assert!(!provider.supports_streaming_with_tools());
    }
}
