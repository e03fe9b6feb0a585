use crate::error::AppError;
use crate::models::ReminderRecord;
use crate::services::{DispatchSummary, QuotaDecision};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub invoice_id: Uuid,
    pub scheduled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_version: Option<i32>,
    pub reminders: Vec<ReminderRecord>,
}

/// Recompute the invoice's reminder plan, superseding any unfired one.
#[instrument(skip(state), fields(invoice_id = %invoice_id))]
pub async fn plan_reminders(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<PlanResponse>, AppError> {
    let records = state.planner.plan_reminders(invoice_id).await?;
    Ok(Json(PlanResponse {
        invoice_id,
        scheduled: records.len(),
        plan_version: records.first().map(|r| r.plan_version),
        reminders: records,
    }))
}

#[instrument(skip(state), fields(invoice_id = %invoice_id))]
pub async fn list_reminders(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<ReminderRecord>>, AppError> {
    let records = state.reminders.records_for(invoice_id).await?;
    Ok(Json(records))
}

#[instrument(skip(state), fields(invoice_id = %invoice_id))]
pub async fn can_send(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<QuotaDecision>, AppError> {
    let decision = state.quota.can_send(invoice_id).await?;
    Ok(Json(decision))
}

/// Internal sweep trigger. Requires the scheduler shared secret.
#[instrument(skip(state, headers))]
pub async fn dispatch_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DispatchSummary>, AppError> {
    let presented = headers
        .get("x-scheduler-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let authorized: bool = presented
        .as_bytes()
        .ct_eq(state.scheduler_secret.as_bytes())
        .into();
    if !authorized {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid scheduler secret"
        )));
    }

    let summary = state.dispatcher.dispatch_due_reminders().await?;
    Ok(Json(summary))
}
