use crate::state::AppState;
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq)]
pub struct DeploymentView {
    pub namespace: String,
    pub app: String,
    pub images: Vec<String>,
}

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Every tracked deployment with the images it currently runs, ordered by namespace and app.
pub async fn list_deployments(State(state): State<AppState>) -> Json<Vec<DeploymentView>> {
    let deployments = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(key, images)| DeploymentView {
            namespace: key.namespace,
            app: key.name,
            images,
        })
        .collect();
    Json(deployments)
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/deployments", get(list_deployments))
        .with_state(state)
}
