//! HTTP surface: JSON in, JSON out.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use synth_protocol::{
    CompletionRequest, CompletionResponse, ErrorBody, ErrorCode, FunctionRequest,
    FunctionResponse, COMPLETE_CODE_PATH, HEALTH_PATH, SYNTHESIZE_FUNCTION_PATH,
};
use tracing::error;

use crate::errors::ServiceError;
use crate::service::CodeSynthService;

pub type AppState = Arc<CodeSynthService>;

pub fn router(service: AppState) -> Router {
    Router::new()
        .route(SYNTHESIZE_FUNCTION_PATH, post(synthesize_function))
        .route("/generate_code/", post(synthesize_function))
        .route(COMPLETE_CODE_PATH, post(complete_code))
        .route("/complete_code/", post(complete_code))
        .route(HEALTH_PATH, get(health))
        .with_state(service)
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidIntent => StatusCode::BAD_REQUEST,
        ErrorCode::GenerationEmpty | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::ServiceBusy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let code = self.code();
        if code == ErrorCode::Internal {
            error!(error = %self, "request failed");
        }
        let body = ErrorBody::new(code, self.to_string());
        (status_for(code), Json(body)).into_response()
    }
}

async fn synthesize_function(
    State(service): State<AppState>,
    Json(req): Json<FunctionRequest>,
) -> Result<Json<FunctionResponse>, ServiceError> {
    let out = service.synthesize_function(&req.function_name).await?;
    Ok(Json(FunctionResponse {
        function_name: out.name,
        generated_code: out.code,
    }))
}

async fn complete_code(
    State(service): State<AppState>,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, ServiceError> {
    let out = service.complete_code(&req.prompt).await?;
    Ok(Json(CompletionResponse {
        prompt: out.prefix,
        completed_code: out.code,
    }))
}

async fn health(State(service): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "engine": service.engine_description(),
        "pending": service.pending(),
        "queue_depth": service.queue_depth(),
        "metrics": service.metrics(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::serializer::testing::ScriptedGenerator;

    fn app(generator: ScriptedGenerator) -> Router {
        let service = CodeSynthService::start(generator, &ServiceConfig::default())
            .expect("start service");
        router(Arc::new(service))
    }

    async fn post_json(app: Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn function_endpoint_returns_generated_code() {
        let app = app(ScriptedGenerator::appending("a, b):\n    return a + b\n\ndef unrelated():"));
        let (status, body) = post_json(
            app,
            "/synthesize_function",
            json!({ "function_name": "add_numbers" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["function_name"], "add_numbers");
        assert_eq!(body["generated_code"], "def add_numbers(a, b):\n    return a + b");
    }

    #[tokio::test]
    async fn invalid_function_name_is_400() {
        let app = app(ScriptedGenerator::appending("):\n    pass"));
        let (status, body) =
            post_json(app, "/generate_code/", json!({ "function_name": "123abc" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INTENT");
        assert_eq!(body["detail"], "invalid function name");
    }

    #[tokio::test]
    async fn completion_endpoint_echoes_prompt() {
        let app = app(ScriptedGenerator::appending("return 1\n"));
        let (status, body) =
            post_json(app, "/complete_code/", json!({ "prompt": "def one():\n    " })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prompt"], "def one():\n    ");
        assert_eq!(body["completed_code"], "def one():\n    return 1\n");
    }

    #[tokio::test]
    async fn empty_prompt_is_400_and_engine_failure_is_500() {
        let (status, _) = post_json(
            app(ScriptedGenerator::appending("x")),
            "/complete_code",
            json!({ "prompt": "   " }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_json(
            app(ScriptedGenerator::failing("device lost")),
            "/complete_code",
            json!({ "prompt": "x = " }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL");
        assert!(body["detail"].as_str().expect("detail").contains("device lost"));
    }

    #[tokio::test]
    async fn empty_generation_is_500_with_distinct_code() {
        let (status, body) = post_json(
            app(ScriptedGenerator::appending("")),
            "/synthesize_function",
            json!({ "function_name": "nothing" }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "GENERATION_EMPTY");
    }

    #[test]
    fn busy_maps_to_503() {
        assert_eq!(status_for(ErrorCode::ServiceBusy), StatusCode::SERVICE_UNAVAILABLE);
        let response = ServiceError::ServiceBusy { pending: 2 }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_engine_and_counters() {
        let app = app(ScriptedGenerator::appending(""));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine"], "scripted");
        assert_eq!(body["metrics"]["requests"], 0);
    }
}
