//! JSON HTTP API over the classification pipeline.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::{MetricsError, PipelineError, TestSuiteError};
use crate::metrics::compute_metrics_from_json;
use crate::pipeline::ClassificationPipeline;

/// Emails classified at once by the batch endpoint.
const BATCH_CONCURRENCY: usize = 4;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ClassificationPipeline>,
}

/// Build the Axum router with the classification API routes.
pub fn api_routes(pipeline: Arc<ClassificationPipeline>) -> Router {
    let state = AppState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/api/classify", post(classify))
        .route("/api/classify/batch", post(classify_batch))
        .route("/api/tests", post(run_tests))
        .route("/api/metrics", post(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-reasoner"
    }))
}

// ── Classification ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ClassifyRequest {
    email: String,
}

async fn classify(State(state): State<AppState>, Json(body): Json<ClassifyRequest>) -> Response {
    match state.pipeline.classify_and_refine(&body.email).await {
        Ok(run) => {
            let mut value = serde_json::json!(run);
            value["final"] = serde_json::json!(run.final_classification());
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(e) => pipeline_error(e),
    }
}

#[derive(Deserialize)]
struct BatchRequest {
    emails: Vec<String>,
}

async fn classify_batch(State(state): State<AppState>, Json(body): Json<BatchRequest>) -> Response {
    if body.emails.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "emails must not be empty");
    }

    let results = state
        .pipeline
        .classify_many(body.emails, BATCH_CONCURRENCY)
        .await;

    let items: Vec<serde_json::Value> = results
        .into_iter()
        .map(|result| match result {
            Ok(run) => serde_json::json!({
                "status": "ok",
                "final": run.final_classification(),
                "run": run,
            }),
            Err(e) => serde_json::json!({ "status": "error", "error": e.to_string() }),
        })
        .collect();

    (StatusCode::OK, Json(serde_json::json!(items))).into_response()
}

// ── Test suite ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TestsRequest {
    #[serde(default = "default_test_count")]
    count: u32,
}

fn default_test_count() -> u32 {
    10
}

async fn run_tests(State(state): State<AppState>, Json(body): Json<TestsRequest>) -> Response {
    match state.pipeline.run_test_suite(body.count).await {
        Ok(report) => {
            info!(
                count = body.count,
                accuracy = report.metrics.accuracy,
                "Test suite served"
            );
            (StatusCode::OK, Json(serde_json::json!(report))).into_response()
        }
        Err(TestSuiteError::Pipeline(e)) => pipeline_error(e),
        Err(TestSuiteError::Metrics(e)) => metrics_error(e),
    }
}

async fn metrics(Json(body): Json<serde_json::Value>) -> Response {
    match compute_metrics_from_json(&body) {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))).into_response(),
        Err(e) => metrics_error(e),
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

fn pipeline_error(e: PipelineError) -> Response {
    let status = match e {
        PipelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        PipelineError::Invocation { .. }
        | PipelineError::SchemaDecode { .. }
        | PipelineError::TestCountMismatch { .. } => StatusCode::BAD_GATEWAY,
    };
    warn!(status = status.as_u16(), error = %e, "Pipeline request failed");
    error_response(status, &e.to_string())
}

fn metrics_error(e: MetricsError) -> Response {
    error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::reasoning::ReasoningCapability;
    use crate::pipeline::decode::StageOutput;
    use crate::pipeline::stages::{Stage, StageContext};

    /// Answers each stage with a fixed reply, or fails evaluate on demand.
    struct FixedReasoner {
        fail_evaluate: bool,
    }

    #[async_trait]
    impl ReasoningCapability for FixedReasoner {
        async fn invoke(&self, stage: Stage, _context: &StageContext) -> Result<StageOutput, LlmError> {
            let reply = match stage {
                Stage::Classify | Stage::Refine => serde_json::json!({
                    "spam": false, "category": "Urgent", "reasoning": "Deadline today"
                }),
                Stage::Evaluate if self.fail_evaluate => {
                    return Err(LlmError::Timeout {
                        provider: "evaluator".into(),
                        timeout: std::time::Duration::from_secs(1),
                    });
                }
                Stage::Evaluate => serde_json::json!({
                    "verdict": "Correct", "explanation": "ok",
                    "evaluator_classification": "Urgent", "evaluator_spam": false
                }),
                Stage::GenerateTests => serde_json::json!({
                    "tests": [
                        {"email": "a", "expected": "Spam", "predicted": "Spam", "success": true},
                        {"email": "b", "expected": "Urgent", "predicted": "To Read", "success": false}
                    ],
                    "score": 1
                }),
            };
            Ok(StageOutput::Structured(reply))
        }
    }

    fn app(fail_evaluate: bool) -> Router {
        let reasoner = Arc::new(FixedReasoner { fail_evaluate });
        api_routes(Arc::new(ClassificationPipeline::new(reasoner)))
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app(false)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn classify_returns_run_with_final() {
        let (status, body) =
            post_json(app(false), "/api/classify", serde_json::json!({"email": "Server down"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["final"]["category"], "Urgent");
        assert_eq!(body["evaluation"]["status"], "judged");
        assert!(body["refinement"].is_null());
    }

    #[tokio::test]
    async fn empty_email_is_bad_request() {
        let (status, body) =
            post_json(app(false), "/api/classify", serde_json::json!({"email": ""})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn reasoning_failure_is_bad_gateway() {
        let (status, body) =
            post_json(app(true), "/api/classify", serde_json::json!({"email": "hello"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("evaluate"));
    }

    #[tokio::test]
    async fn batch_reports_each_email() {
        let (status, body) = post_json(
            app(false),
            "/api/classify/batch",
            serde_json::json!({"emails": ["one", "", "three"]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["status"], "ok");
        assert_eq!(items[1]["status"], "error");
        assert_eq!(items[2]["final"]["category"], "Urgent");
    }

    #[tokio::test]
    async fn tests_endpoint_returns_batch_and_metrics() {
        let (status, body) = post_json(app(false), "/api/tests", serde_json::json!({"count": 2})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["batch"]["tests"].as_array().unwrap().len(), 2);
        assert_eq!(body["metrics"]["accuracy"], 0.5);
    }

    #[tokio::test]
    async fn tests_count_mismatch_is_bad_gateway() {
        let (status, _) = post_json(app(false), "/api/tests", serde_json::json!({"count": 5})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn metrics_endpoint_validates_input() {
        let (status, body) = post_json(
            app(false),
            "/api/metrics",
            serde_json::json!([
                {"expected": "Spam", "predicted": "Spam"},
                {"expected": "To Read", "predicted": "Spam"}
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accuracy"], 0.5);

        let (status, _) = post_json(app(false), "/api/metrics", serde_json::json!([])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = post_json(
            app(false),
            "/api/metrics",
            serde_json::json!([{"expected": "Maybe", "predicted": "Spam"}]),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
