//! LLM integration.
//!
//! Supports:
//! - **OpenAI-compatible** `/chat/completions` servers at a configured API
//!   base, via rig-core's OpenAI completions client
//! - **Anthropic**: direct API access via rig-core
//! - **OpenAI**: direct API access via rig-core
//!
//! The `RigAdapter` bridges rig's `CompletionModel` trait to our
//! `LlmProvider` trait.

mod costs;
pub mod provider;
pub mod reasoning;
mod rig_adapter;

pub use provider::*;
pub use reasoning::{CallOptions, Reasoning, ReasoningCapability, TokenUsage};
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::{LlmBackend, Settings};
use crate::error::LlmError;

/// Create a provider for `model` from the configured backend.
pub fn create_provider(settings: &Settings, model: &str) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match settings.backend {
        LlmBackend::Compatible => create_compatible_provider(settings, model),
        LlmBackend::Anthropic => create_anthropic_provider(settings, model),
        LlmBackend::OpenAi => create_openai_provider(settings, model),
    }
}

fn api_key(settings: &Settings, provider: &str) -> Result<String, LlmError> {
    settings
        .api_key
        .as_ref()
        .map(|k| k.expose_secret().to_string())
        .ok_or_else(|| LlmError::AuthFailed {
            provider: provider.to_string(),
        })
}

fn create_compatible_provider(
    settings: &Settings,
    model: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let api_base = settings
        .api_base
        .as_deref()
        .ok_or_else(|| LlmError::RequestFailed {
            provider: "compatible".to_string(),
            reason: "API_BASE is not set".to_string(),
        })?
        .trim_end_matches('/');
    // Local servers usually run without auth and ignore the bearer value.
    let key = settings
        .api_key
        .as_ref()
        .map(|k| k.expose_secret().to_string())
        .unwrap_or_default();

    let client: openai::CompletionsClient = openai::CompletionsClient::builder()
        .api_key(key.as_str())
        .base_url(api_base)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: "compatible".to_string(),
            reason: format!("Failed to create OpenAI-compatible client: {}", e),
        })?;

    let completion_model = client.completion_model(model);
    tracing::info!("Using OpenAI-compatible endpoint {} (model: {})", api_base, model);
    Ok(Arc::new(
        RigAdapter::new(completion_model, model, "compatible").with_body_params(),
    ))
}

fn create_anthropic_provider(
    settings: &Settings,
    model: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let key = api_key(settings, "anthropic")?;
    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(key.as_str()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let completion_model = client.completion_model(model);
    tracing::info!("Using Anthropic (model: {})", model);
    Ok(Arc::new(RigAdapter::new(completion_model, model, "anthropic")))
}

fn create_openai_provider(
    settings: &Settings,
    model: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let key = api_key(settings, "openai")?;
    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(key.as_str()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let completion_model = client.completion_model(model);
    tracing::info!("Using OpenAI (model: {})", model);
    Ok(Arc::new(RigAdapter::new(completion_model, model, "openai")))
}

/// Build the production reasoning capability from settings.
///
/// Loads the stage templates (custom file or built-in) and one provider per
/// model role.
pub fn build_reasoning(settings: &Settings) -> crate::error::Result<Reasoning> {
    let templates = match &settings.templates_path {
        Some(path) => crate::templates::StageTemplates::load(path)?,
        None => crate::templates::StageTemplates::builtin()?,
    };

    let classifier = create_provider(settings, &settings.classification_model)?;
    let evaluator = create_provider(settings, &settings.evaluation_model)?;

    Ok(
        Reasoning::new(classifier, evaluator, Arc::new(templates)).with_options(CallOptions {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: settings.request_timeout,
        }),
    )
}
