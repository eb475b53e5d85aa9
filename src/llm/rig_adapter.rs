//! Bridges rig-core completion models to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel};
use rig::message::Message;
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// An [`LlmProvider`] backed by any rig `CompletionModel`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    body_params: bool,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
            body_params: false,
        }
    }

    /// Send `max_tokens` and JSON mode as raw chat-completions body fields.
    ///
    /// rig's chat-completions model drops `max_tokens` from the request and
    /// has no JSON mode switch.
    pub fn with_body_params(mut self) -> Self {
        self.body_params = true;
        self
    }

    fn map_error(&self, error: CompletionError) -> LlmError {
        match error {
            CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason,
            },
            CompletionError::JsonError(e) => LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            },
            other => LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost(&self.model_name)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // rig takes the final user turn as the prompt and everything before
        // it as history; system messages become the preamble.
        let mut turns: Vec<Message> = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(Message::user(m.content.clone())),
                Role::Assistant => Some(Message::assistant(m.content.clone())),
            })
            .collect();
        let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "request has no user message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt);
        if let Some(system) = request.system_prompt() {
            builder = builder.preamble(system);
        }
        if !turns.is_empty() {
            builder = builder.messages(turns);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if self.body_params {
            let mut params = serde_json::Map::new();
            if let Some(max_tokens) = request.max_tokens {
                params.insert("max_tokens".into(), max_tokens.into());
            }
            if request.json_output {
                params.insert(
                    "response_format".into(),
                    serde_json::json!({ "type": "json_object" }),
                );
            }
            if !params.is_empty() {
                builder = builder.additional_params(serde_json::Value::Object(params));
            }
        } else if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "response contained no text".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}
