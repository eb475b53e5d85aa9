//! Reasoning capability: the typed seam between the pipeline and the LLM.
//!
//! The pipeline only knows [`ReasoningCapability`]: give it a stage and the
//! stage's context, get back structured or textual output. [`Reasoning`] is
//! the production implementation that renders templates and calls a
//! provider under a timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::decode::StageOutput;
use crate::pipeline::stages::{ModelRole, Stage, StageContext};
use crate::templates::StageTemplates;

/// Something that can answer a stage prompt.
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    /// Run `stage` with `context` merged into its instruction template.
    ///
    /// Network and remote failures (including timeouts) are `Err`; the
    /// output itself is not validated here.
    async fn invoke(&self, stage: Stage, context: &StageContext) -> Result<StageOutput, LlmError>;
}

/// Token usage from an LLM call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Sampling options shared by every stage call.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Template-driven reasoning over two providers.
pub struct Reasoning {
    classifier: Arc<dyn LlmProvider>,
    evaluator: Arc<dyn LlmProvider>,
    templates: Arc<StageTemplates>,
    options: CallOptions,
}

impl Reasoning {
    pub fn new(
        classifier: Arc<dyn LlmProvider>,
        evaluator: Arc<dyn LlmProvider>,
        templates: Arc<StageTemplates>,
    ) -> Self {
        Self {
            classifier,
            evaluator,
            templates,
            options: CallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    fn provider_for(&self, stage: Stage) -> &Arc<dyn LlmProvider> {
        match stage.descriptor().model_role {
            ModelRole::Classifier => &self.classifier,
            ModelRole::Evaluator => &self.evaluator,
        }
    }
}

#[async_trait]
impl ReasoningCapability for Reasoning {
    async fn invoke(&self, stage: Stage, context: &StageContext) -> Result<StageOutput, LlmError> {
        let provider = self.provider_for(stage);
        let prompt = self.templates.render(stage, context);

        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompt.system),
            ChatMessage::user(prompt.user),
        ])
        .with_temperature(self.options.temperature)
        .with_max_tokens(self.options.max_tokens)
        .with_json_output();

        debug!(stage = %stage, model = provider.model_name(), "Invoking reasoning stage");

        let response = tokio::time::timeout(self.options.timeout, provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: provider.model_name().to_string(),
                timeout: self.options.timeout,
            })??;

        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };
        let cost = costs::call_cost(
            provider.cost_per_token(),
            usage.input_tokens,
            usage.output_tokens,
        );
        info!(
            stage = %stage,
            model = provider.model_name(),
            tokens = usage.total(),
            cost_usd = %cost,
            finish_reason = ?response.finish_reason,
            "Reasoning stage completed"
        );

        Ok(StageOutput::Text(response.content))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rust_decimal::Decimal;

    use super::*;
    use crate::llm::provider::{CompletionResponse, FinishReason};
    use crate::pipeline::stages::{CLASSIFICATION_OUTPUT, EMAIL, NUM_TESTS};

    /// Records requests and replies with a fixed body after an optional delay.
    struct RecordingLlm {
        name: &'static str,
        reply: String,
        delay: Duration,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl RecordingLlm {
        fn new(name: &'static str, reply: &str) -> Self {
            Self {
                name,
                reply: reply.to_string(),
                delay: Duration::ZERO,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            self.name
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            tokio::time::sleep(self.delay).await;
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn templates() -> Arc<StageTemplates> {
        Arc::new(StageTemplates::builtin().unwrap())
    }

    #[tokio::test]
    async fn classify_uses_classifier_model() {
        let classifier = Arc::new(RecordingLlm::new("small", "{}"));
        let evaluator = Arc::new(RecordingLlm::new("large", "{}"));
        let reasoning = Reasoning::new(classifier.clone(), evaluator.clone(), templates());

        let ctx = StageContext::new().with(EMAIL, "Quarterly report attached");
        let output = reasoning.invoke(Stage::Classify, &ctx).await.unwrap();
        assert_eq!(output, StageOutput::Text("{}".into()));

        let requests = classifier.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].json_output);
        assert!(requests[0].messages[1].content.contains("Quarterly report attached"));
        assert!(evaluator.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn evaluate_and_tests_use_evaluator_model() {
        let classifier = Arc::new(RecordingLlm::new("small", "{}"));
        let evaluator = Arc::new(RecordingLlm::new("large", "{}"));
        let reasoning = Reasoning::new(classifier.clone(), evaluator.clone(), templates());

        let ctx = StageContext::new()
            .with(EMAIL, "hi")
            .with(CLASSIFICATION_OUTPUT, "{\"category\":\"Spam\"}");
        reasoning.invoke(Stage::Evaluate, &ctx).await.unwrap();
        reasoning
            .invoke(Stage::GenerateTests, &StageContext::new().with(NUM_TESTS, "3"))
            .await
            .unwrap();

        assert!(classifier.requests.lock().unwrap().is_empty());
        let requests = evaluator.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages[1].content.contains("exactly 3"));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let mut slow = RecordingLlm::new("slow", "{}");
        slow.delay = Duration::from_secs(5);
        let slow = Arc::new(slow);
        let reasoning = Reasoning::new(slow.clone(), slow, templates()).with_options(CallOptions {
            timeout: Duration::from_millis(20),
            ..CallOptions::default()
        });

        let err = reasoning
            .invoke(Stage::Classify, &StageContext::new().with(EMAIL, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { .. }));
    }

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 7,
            output_tokens: 3,
        };
        assert_eq!(usage.total(), 10);
    }
}
