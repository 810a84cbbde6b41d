use crate::config::AppConfig;
use crate::data::{GenerateOptions, Schedule, TimetableInput};
use crate::engine;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(flatten)]
    pub input: TimetableInput,
    #[serde(default)]
    pub options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Clone)]
struct AppState {
    defaults: GenerateOptions,
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<Value>)> {
    let options = request.options.unwrap_or_else(|| state.defaults.clone());
    let input = request.input;

    // search is CPU-bound; keep it off the async workers
    let result = tokio::task::spawn_blocking(move || engine::generate(&input, &options)).await;

    match result {
        Ok(Ok(schedules)) => Ok(Json(GenerateResponse { schedules })),
        Ok(Err(model_error)) => {
            warn!("Rejected timetable request: {model_error}");
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": model_error.to_string() })),
            ))
        }
        Err(join_error) => {
            error!("Timetable generation aborted: {join_error}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "timetable generation failed" })),
            ))
        }
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(defaults: GenerateOptions) -> Router {
    Router::new()
        .route("/v1/timetable/generate", post(generate_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(AppState { defaults }))
}

pub async fn run_server(config: AppConfig) -> Result<(), ServerError> {
    let app = router(config.defaults.clone());

    let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/timetable/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("body");
        serde_json::from_slice(&body).expect("json")
    }

    fn payload(strength: u32) -> Value {
        json!({
            "faculty": [{ "id": 1, "name": "Ada", "subjects": [10], "maxHoursPerWeek": 10 }],
            "subjects": [{ "id": 10, "name": "Algorithms", "sessionsPerWeek": 2 }],
            "rooms": [{ "id": 100, "capacity": 40 }],
            "batches": [{ "id": 7, "department": "CS", "year": 1, "strength": strength, "subjects": [10] }],
            "options": { "maxAlternatives": 2, "timeLimitMs": 1000 }
        })
    }

    #[tokio::test]
    async fn generate_returns_schedules() {
        let response = router(GenerateOptions::default())
            .oneshot(request(payload(30)))
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::OK);

        let payload = body_json(response).await;
        let best = &payload["schedules"][0];
        assert_eq!(best["totalSlots"], json!(2));
        assert_eq!(best["assignedSlots"], json!(2));
        assert_eq!(best["conflicts"], json!(0));
        assert_eq!(best["status"], json!("complete"));
        assert_eq!(best["assignments"][0]["facultyId"], json!(1));
        assert_eq!(best["assignments"][0]["roomId"], json!(100));
    }

    #[tokio::test]
    async fn unsatisfiable_model_is_a_bad_request() {
        let response = router(GenerateOptions::default())
            .oneshot(request(payload(50)))
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let payload = body_json(response).await;
        let message = payload["error"].as_str().expect("error message");
        assert!(message.contains("batch 7"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router(GenerateOptions::default())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }
}
