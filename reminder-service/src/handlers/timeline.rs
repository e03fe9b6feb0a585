use crate::error::AppError;
use crate::models::TimelineEntry;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::instrument;
use uuid::Uuid;

/// Chronological activity feed for an invoice. Reading it also accrues any
/// overdue-day and late-fee milestones that have come due.
#[instrument(skip(state), fields(invoice_id = %invoice_id))]
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<TimelineEntry>>, AppError> {
    let entries = state.accrual.get_activity_timeline(invoice_id).await?;
    Ok(Json(entries))
}
