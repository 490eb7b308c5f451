use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use relief_budget_core::messages::{
    BroadcastMessage, BroadcastUpdateRequest, BroadcastUpdateResponse, ValidateRequest,
};
use relief_budget_core::notifications::Notification;
use relief_budget_core::{
    validate_against_snapshot, BudgetFigures, BudgetSnapshot, Quarter, ValidationResult,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

/// Body of `PUT /budget/{mis}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertBudgetBody {
    pub figures: BudgetFigures,
    #[serde(default)]
    pub current_quarter: Option<Quarter>,
}

async fn validate_budget(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidationResult>> {
    if request.amount <= Decimal::ZERO {
        return Ok(Json(ValidationResult::missing_amount()));
    }
    let snapshot = state
        .repository
        .get(&request.mis)
        .ok_or_else(|| ApiError::NotFound(format!("No budget for project {}", request.mis)))?;

    let result = validate_against_snapshot(request.amount, &snapshot);
    tracing::debug!(
        mis = %request.mis,
        amount = %request.amount,
        tier = ?result.tier(),
        "Validated amount"
    );
    if result.requires_notification {
        if let Some(category) = result.notification_category {
            state.notifier.notify(Notification::budget_escalation(
                request.mis.clone(),
                request.amount,
                category,
                Some(request.session_id),
            ));
        }
    }
    Ok(Json(result))
}

async fn broadcast_update(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastUpdateRequest>,
) -> ApiResult<Json<BroadcastUpdateResponse>> {
    if request.mis.trim().is_empty() {
        return Err(ApiError::BadRequest("mis is required".to_string()));
    }
    let recipients = state.hub.broadcast_budget(request.into_message())?;
    Ok(Json(BroadcastUpdateResponse {
        success: true,
        recipients,
    }))
}

async fn get_budget(
    State(state): State<Arc<AppState>>,
    Path(mis): Path<String>,
) -> ApiResult<Json<BudgetSnapshot>> {
    state
        .repository
        .get(&mis)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No budget for project {}", mis)))
}

/// Stores new figures and pushes an authoritative update to every watcher.
async fn put_budget(
    State(state): State<Arc<AppState>>,
    Path(mis): Path<String>,
    Json(body): Json<UpsertBudgetBody>,
) -> ApiResult<Json<BudgetSnapshot>> {
    if mis.trim().is_empty() {
        return Err(ApiError::BadRequest("mis is required".to_string()));
    }
    let snapshot = state
        .repository
        .upsert(&mis, body.figures, body.current_quarter);
    let recipients = state.hub.broadcast_budget(BroadcastMessage {
        mis: mis.clone(),
        amount: None,
        origin_session_id: None,
        simple_budget_data: None,
        timestamp: Some(snapshot.updated_at),
    })?;
    tracing::info!("Budget {} updated, {} watcher(s) notified", mis, recipients);
    Ok(Json(snapshot))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/budget/validate", post(validate_budget))
        .route("/budget/broadcast-update", post(broadcast_update))
        .route("/budget/{mis}", get(get_budget).put(put_budget))
}
