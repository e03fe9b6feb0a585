//! Invoice model as seen by the reminder engine.
//!
//! Invoices are owned by the surrounding application; this service reads them
//! and only writes status transitions and reminder counters it triggers.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Sent,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending" => InvoiceStatus::Pending,
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Reminders may only go out while the invoice is awaiting payment.
    pub fn is_sendable(&self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Pending)
    }
}

/// Payment terms attached to an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    DueOnReceipt,
    Net15,
    Net30,
    Net60,
}

impl PaymentTerms {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentTerms::DueOnReceipt => "due_on_receipt",
            PaymentTerms::Net15 => "net_15",
            PaymentTerms::Net30 => "net_30",
            PaymentTerms::Net60 => "net_60",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "due_on_receipt" => PaymentTerms::DueOnReceipt,
            "net_15" => PaymentTerms::Net15,
            "net_60" => PaymentTerms::Net60,
            _ => PaymentTerms::Net30,
        }
    }
}

/// Late-fee calculation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateFeeType {
    Percentage,
    Fixed,
}

impl LateFeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LateFeeType::Percentage => "percentage",
            LateFeeType::Fixed => "fixed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "fixed" => LateFeeType::Fixed,
            _ => LateFeeType::Percentage,
        }
    }
}

/// Late-fee policy for an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateFeePolicy {
    pub enabled: bool,
    pub fee_type: LateFeeType,
    pub amount: Decimal,
    pub grace_period_days: i32,
}

/// Invoice row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    /// Owning user. Nullable only through data corruption; dispatch treats a
    /// missing owner as an integrity failure.
    pub user_id: Option<Uuid>,
    pub client_id: Uuid,
    pub status: String,
    pub total: Decimal,
    pub due_date: NaiveDate,
    pub payment_terms: String,
    pub payment_terms_enabled: bool,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub late_fee_enabled: bool,
    pub late_fee_type: String,
    pub late_fee_amount: Decimal,
    pub late_fee_grace_days: i32,
    pub reminder_count: i32,
    pub last_reminder_sent: Option<DateTime<Utc>>,
    pub plan_version: i32,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    /// Terms category, falling back to Net 30 when terms are disabled.
    pub fn terms(&self) -> PaymentTerms {
        if self.payment_terms_enabled {
            PaymentTerms::from_string(&self.payment_terms)
        } else {
            PaymentTerms::Net30
        }
    }

    pub fn late_fee_policy(&self) -> LateFeePolicy {
        LateFeePolicy {
            enabled: self.late_fee_enabled,
            fee_type: LateFeeType::from_string(&self.late_fee_type),
            amount: self.late_fee_amount,
            grace_period_days: self.late_fee_grace_days,
        }
    }
}

/// Client contact details, read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub name: String,
    pub email: Option<String>,
}
