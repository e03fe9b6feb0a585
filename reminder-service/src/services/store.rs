//! Store contracts the reminder engine depends on.
//!
//! The invoice, client, payment, and plan data belong to the surrounding
//! application; this service consumes them through these narrow traits so the
//! core operations stay testable without a transport or a live database.

use crate::error::AppError;
use crate::models::{
    Client, Invoice, InvoiceView, Milestone, Payment, PlanTier, ReminderRecord, ReminderSettings,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Invoice read access plus the few writes this engine is allowed to make.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Reminder configuration attached to an invoice. `None` means the
    /// invoice has no explicit settings and system defaults apply.
    async fn get_reminder_settings(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<ReminderSettings>, AppError>;

    /// Transition the invoice to paid, recording the settlement instant.
    async fn mark_paid(&self, invoice_id: Uuid, paid_utc: DateTime<Utc>) -> Result<(), AppError>;

    /// Bump the invoice's plan version, returning the new value. Each planner
    /// run stamps its batch with the version it obtained here.
    async fn bump_plan_version(&self, invoice_id: Uuid) -> Result<i32, AppError>;

    /// Increment the reminder counter and update the last-sent timestamp.
    async fn record_reminder_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Lifecycle store for reminder records.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn insert_batch(&self, records: &[ReminderRecord]) -> Result<(), AppError>;

    async fn get(&self, reminder_id: Uuid) -> Result<Option<ReminderRecord>, AppError>;

    /// All records for an invoice, any status.
    async fn records_for(&self, invoice_id: Uuid) -> Result<Vec<ReminderRecord>, AppError>;

    /// Delete every currently `scheduled` record for the invoice, returning
    /// the number removed. Fired history is never touched.
    async fn delete_scheduled(&self, invoice_id: Uuid) -> Result<u64, AppError>;

    /// Remove duplicate `failed` records per tone, keeping only the most
    /// recent one.
    async fn dedupe_failed(&self, invoice_id: Uuid) -> Result<u64, AppError>;

    /// Due dispatch candidates: `scheduled`, `scheduled_at <= now`, invoice
    /// not draft/paid, and `plan_version` matching the invoice's current
    /// plan version.
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>, AppError>;

    async fn mark_sent(
        &self,
        reminder_id: Uuid,
        email_id: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn mark_failed(&self, reminder_id: Uuid, reason: &str) -> Result<(), AppError>;

    /// Cancel a record. `email_id` is recorded when the cancellation happens
    /// after an irreversible send (quota race reconciliation).
    async fn mark_cancelled(
        &self,
        reminder_id: Uuid,
        reason: &str,
        email_id: Option<&str>,
    ) -> Result<(), AppError>;

    /// Cancel every `scheduled` record for the invoice in one pass, returning
    /// the number affected. Used when the invoice settles: a paid invoice must
    /// end up with zero scheduled records, not just the slot that happened to
    /// be due.
    async fn cancel_scheduled(&self, invoice_id: Uuid, reason: &str) -> Result<u64, AppError>;

    /// Number of records counted `sent` for the invoice.
    async fn count_sent(&self, invoice_id: Uuid) -> Result<i64, AppError>;
}

/// Read-only payment history.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn payments_for(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError>;
}

/// Read-only client contact lookup.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError>;
}

/// Subscription tier lookup for quota enforcement.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn plan_for_user(&self, user_id: Uuid) -> Result<PlanTier, AppError>;
}

/// Persisted milestones. Writes must tolerate concurrent duplicate-insert
/// attempts: overdue-day persistence is an idempotent upsert keyed by
/// invoice + day.
#[async_trait]
pub trait MilestoneStore: Send + Sync {
    async fn milestones_for(&self, invoice_id: Uuid) -> Result<Vec<Milestone>, AppError>;

    async fn upsert_overdue_day(
        &self,
        invoice_id: Uuid,
        day_number: i32,
        occurred_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn find_late_fee(&self, invoice_id: Uuid) -> Result<Option<Milestone>, AppError>;

    async fn insert_late_fee(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        occurred_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Correct a stored late-fee amount in place. The stored timestamp is
    /// never altered.
    async fn update_late_fee_amount(
        &self,
        milestone_id: Uuid,
        amount: Decimal,
    ) -> Result<(), AppError>;
}

/// Invoice "viewed" signals.
#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn views_for(&self, invoice_id: Uuid) -> Result<Vec<InvoiceView>, AppError>;
}
