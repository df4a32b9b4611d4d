use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    models::{ChatPayload, ChatResponse, Tier},
};

use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsInfo {
    pub default: String,
    pub exec: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendationCounts {
    #[serde(rename = "FREE")]
    pub free: usize,
    #[serde(rename = "PRO")]
    pub pro: usize,
    #[serde(rename = "EXEC")]
    pub exec: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub credential_configured: bool,
    pub models: ModelsInfo,
    pub model_timeout_ms: u64,
    pub fast_timeout_ms: u64,
    pub cache_backend: &'static str,
    pub cache_ttl_ms: u64,
    pub cache_max_size: usize,
    pub cache_entries: usize,
    pub default_affiliate_tag: String,
    pub recommendation_counts: RecommendationCounts,
}

// Handlers

/// Liveness probe
pub async fn liveness() -> &'static str {
    "ok"
}

/// Reports credential presence and the active cache/timeout configuration
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = &state.config;
    let limits = state.orchestrator.limits();

    Json(HealthResponse {
        status: "ok",
        credential_configured: config.has_credential(),
        models: ModelsInfo {
            default: config.model_default.clone(),
            exec: config.model_exec.clone(),
        },
        model_timeout_ms: config.model_timeout_ms,
        fast_timeout_ms: state.orchestrator.fast_timeout().as_millis() as u64,
        cache_backend: state.cache.name(),
        cache_ttl_ms: config.cache_ttl_ms,
        cache_max_size: config.cache_max_size,
        cache_entries: state.cache.entry_count().await,
        default_affiliate_tag: config.default_affiliate_tag.clone(),
        recommendation_counts: RecommendationCounts {
            free: limits.count_for(Tier::Free),
            pro: limits.count_for(Tier::Pro),
            exec: limits.count_for(Tier::Exec),
        },
    })
}

/// Recommendation endpoint
///
/// Only a missing or empty message is rejected; every other path answers 200
/// with exactly the tier's number of cards. A body that is not a JSON object
/// carries no message, so it gets the same 400.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ChatPayload>, JsonRejection>,
) -> AppResult<Json<ChatResponse>> {
    let Json(payload) = payload.map_err(|rejection| {
        tracing::debug!(
            request_id = %request_id,
            error = %rejection.body_text(),
            "Unusable chat body"
        );
        AppError::InvalidInput("message is required".to_string())
    })?;

    let request = payload.into_request(&state.config.default_affiliate_tag)?;

    tracing::info!(
        request_id = %request_id,
        tier = %request.tier(),
        message_chars = request.message().chars().count(),
        "Processing chat request"
    );

    let response = state.orchestrator.handle(request).await;

    Ok(Json(response))
}
