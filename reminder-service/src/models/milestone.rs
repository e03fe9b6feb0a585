//! Immutable activity milestones derived by the accrual engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Milestone kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    OverdueDay,
    LateFeeApplied,
}

impl MilestoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneKind::OverdueDay => "overdue_day",
            MilestoneKind::LateFeeApplied => "late_fee_applied",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "late_fee_applied" => MilestoneKind::LateFeeApplied,
            _ => MilestoneKind::OverdueDay,
        }
    }
}

/// A persisted milestone. `occurred_utc` is immutable once stored; only the
/// late-fee amount may be corrected in place.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Milestone {
    pub milestone_id: Uuid,
    pub invoice_id: Uuid,
    pub kind: String,
    pub day_number: Option<i32>,
    pub amount: Option<Decimal>,
    pub occurred_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl Milestone {
    pub fn kind(&self) -> MilestoneKind {
        MilestoneKind::from_string(&self.kind)
    }
}

/// A "viewed" signal recorded when the client opens the invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceView {
    pub view_id: Uuid,
    pub invoice_id: Uuid,
    pub viewed_utc: DateTime<Utc>,
}
