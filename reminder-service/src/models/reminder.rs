//! Reminder plan configuration and lifecycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Escalating severity of a reminder, tied to its timing relative to the due
/// date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTone {
    Friendly,
    Polite,
    Firm,
    Urgent,
}

impl ReminderTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderTone::Friendly => "friendly",
            ReminderTone::Polite => "polite",
            ReminderTone::Firm => "firm",
            ReminderTone::Urgent => "urgent",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "polite" => ReminderTone::Polite,
            "firm" => ReminderTone::Firm,
            "urgent" => ReminderTone::Urgent,
            _ => ReminderTone::Friendly,
        }
    }

    /// Tone for the n-th slot of a plan, capped at the most severe tone for
    /// any excess slots.
    pub fn for_slot(index: usize) -> Self {
        match index {
            0 => ReminderTone::Friendly,
            1 => ReminderTone::Polite,
            2 => ReminderTone::Firm,
            _ => ReminderTone::Urgent,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ReminderTone::Friendly => "Friendly",
            ReminderTone::Polite => "Polite",
            ReminderTone::Firm => "Firm",
            ReminderTone::Urgent => "Urgent",
        }
    }
}

/// Reminder record status. All transitions out of `scheduled` are terminal;
/// the only way back is a fresh planner run creating a brand-new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Scheduled,
    Sent,
    Delivered,
    Bounced,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Scheduled => "scheduled",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Delivered => "delivered",
            ReminderStatus::Bounced => "bounced",
            ReminderStatus::Failed => "failed",
            ReminderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => ReminderStatus::Sent,
            "delivered" => ReminderStatus::Delivered,
            "bounced" => ReminderStatus::Bounced,
            "failed" => ReminderStatus::Failed,
            "cancelled" => ReminderStatus::Cancelled,
            _ => ReminderStatus::Scheduled,
        }
    }
}

/// One reminder slot of an invoice's plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReminderRecord {
    pub reminder_id: Uuid,
    pub invoice_id: Uuid,
    pub tone: String,
    /// Signed day offset from the due date: negative fires before, positive
    /// after.
    pub offset_days: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    /// Plan batch this record belongs to. The dispatcher ignores records
    /// whose version is stale.
    pub plan_version: i32,
    pub email_id: Option<String>,
    pub failure_reason: Option<String>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl ReminderRecord {
    pub fn status(&self) -> ReminderStatus {
        ReminderStatus::from_string(&self.status)
    }

    pub fn tone(&self) -> ReminderTone {
        ReminderTone::from_string(&self.tone)
    }
}

/// Direction of a custom reminder rule relative to the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Before,
    After,
}

/// One custom reminder rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderRule {
    pub rule_type: RuleType,
    pub days: i32,
    pub enabled: bool,
}

impl ReminderRule {
    /// Signed offset in days: before-due rules are negative.
    pub fn signed_offset(&self) -> i32 {
        match self.rule_type {
            RuleType::Before => -self.days,
            RuleType::After => self.days,
        }
    }
}

/// Per-invoice reminder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub use_system_defaults: bool,
    pub rules: Vec<ReminderRule>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            use_system_defaults: true,
            rules: Vec::new(),
        }
    }
}
