use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error_response;
use crate::metrics::Tool;
use crate::models::{ApplyRequest, ApplyResult, UpdateIntent, UpdateSuggestion};
use crate::state::AppState;
use crate::update;

/// POST /api/updates/suggest - propose an edit with fact preflight.
pub async fn suggest(
    State(state): State<AppState>,
    Json(intent): Json<UpdateIntent>,
) -> Result<Json<UpdateSuggestion>, (StatusCode, String)> {
    let start = Instant::now();
    if intent.intent.trim().is_empty() {
        state
            .metrics
            .record(Tool::SuggestUpdate, start.elapsed(), false);
        return Err((StatusCode::BAD_REQUEST, "Intent is required".to_string()));
    }

    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || update::suggest_update(&worker, &intent))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Suggest task failed: {e}"),
            )
        })?
        .map_err(error_response);

    state
        .metrics
        .record(Tool::SuggestUpdate, start.elapsed(), result.is_ok());
    result.map(Json)
}

/// POST /api/updates/apply - apply a suggested diff.
///
/// Conflicts come back as a structured `status = "error"` payload with HTTP
/// 200; they are an expected outcome, not a server failure.
pub async fn apply(
    State(state): State<AppState>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<ApplyResult>, (StatusCode, String)> {
    let start = Instant::now();
    if req.target_path.trim().is_empty() {
        state
            .metrics
            .record(Tool::ApplyUpdate, start.elapsed(), false);
        return Err((
            StatusCode::BAD_REQUEST,
            "target_path is required".to_string(),
        ));
    }

    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || update::apply_update(&worker, &req))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Apply task failed: {e}"),
            )
        })?;

    state
        .metrics
        .record(Tool::ApplyUpdate, start.elapsed(), result.status == "success");
    Ok(Json(result))
}
