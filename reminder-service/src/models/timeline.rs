//! Assembled activity timeline entries.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Source category of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEntryKind {
    OverdueDay,
    LateFeeApplied,
    ReminderSent,
    ReminderDelivered,
    ReminderBounced,
    PaymentReceived,
    InvoiceViewed,
}

/// One entry of the merged, privacy-truncated activity timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub kind: TimelineEntryKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Stable tie-breaker for entries sharing an instant, derived from the
    /// source record id.
    #[serde(skip)]
    pub sort_key: String,
}
