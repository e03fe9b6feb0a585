//! Overdue / late-fee accrual engine and activity timeline assembly.
//!
//! Milestones are derived lazily on timeline reads and persisted
//! opportunistically. Stored occurrence timestamps are always read back
//! rather than recomputed, so display order is stable across runs.

use crate::error::AppError;
use crate::models::{
    total_paid, Invoice, InvoiceStatus, LateFeePolicy, LateFeeType, Milestone, MilestoneKind,
    ReminderStatus, TimelineEntry, TimelineEntryKind,
};
use crate::services::metrics::LATE_FEES_TOTAL;
use crate::services::store::{
    InvoiceStore, MilestoneStore, PaymentStore, ReminderStore, ViewStore,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Two timeline items with the same title within this window collapse into
/// one.
const DEDUPE_TOLERANCE_SECS: i64 = 5;

/// Canonical occurrence instant for calendar-day milestones: end of day UTC.
pub fn end_of_day_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59)
        .expect("valid wall-clock time")
        .and_utc()
}

/// Whole days the invoice is overdue, floored at zero.
pub fn overdue_days(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - due_date).num_days().max(0)
}

/// Balance late fees accrue against. Remaining balance after partial
/// payments, floored at zero — except for sent and cancelled invoices, where
/// the gross total is used regardless of partial payments (intentional
/// asymmetry inherited from the billing rules).
pub fn fee_base(status: InvoiceStatus, total: Decimal, paid: Decimal) -> Decimal {
    match status {
        InvoiceStatus::Sent | InvoiceStatus::Cancelled => total,
        _ => (total - paid).max(Decimal::ZERO),
    }
}

/// Late-fee amount for a given base balance.
pub fn late_fee_amount(policy: &LateFeePolicy, base: Decimal) -> Decimal {
    match policy.fee_type {
        LateFeeType::Percentage => base * policy.amount / Decimal::from(100),
        LateFeeType::Fixed => policy.amount,
    }
}

/// Derives and persists milestones, and assembles the merged activity
/// timeline.
pub struct AccrualEngine {
    invoices: Arc<dyn InvoiceStore>,
    reminders: Arc<dyn ReminderStore>,
    payments: Arc<dyn PaymentStore>,
    milestones: Arc<dyn MilestoneStore>,
    views: Arc<dyn ViewStore>,
}

impl AccrualEngine {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        reminders: Arc<dyn ReminderStore>,
        payments: Arc<dyn PaymentStore>,
        milestones: Arc<dyn MilestoneStore>,
        views: Arc<dyn ViewStore>,
    ) -> Self {
        Self {
            invoices,
            reminders,
            payments,
            milestones,
            views,
        }
    }

    /// The ordered, privacy-truncated activity timeline for an invoice.
    pub async fn get_activity_timeline(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<TimelineEntry>, AppError> {
        self.timeline_at(invoice_id, Utc::now()).await
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn timeline_at(
        &self,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimelineEntry>, AppError> {
        let invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        self.accrue_milestones(&invoice, now).await;

        let mut entries = Vec::new();

        // Milestones, with their stored (immutable) occurrence timestamps.
        for milestone in self.milestones.milestones_for(invoice_id).await? {
            entries.push(milestone_entry(&milestone));
        }

        // Reminder dispatch history: only outcomes the client actually saw.
        for record in self.reminders.records_for(invoice_id).await? {
            let kind = match record.status() {
                ReminderStatus::Sent => TimelineEntryKind::ReminderSent,
                ReminderStatus::Delivered => TimelineEntryKind::ReminderDelivered,
                ReminderStatus::Bounced => TimelineEntryKind::ReminderBounced,
                _ => continue,
            };
            let occurred_at = record.sent_utc.unwrap_or(record.created_utc);
            let verb = match kind {
                TimelineEntryKind::ReminderDelivered => "delivered",
                TimelineEntryKind::ReminderBounced => "bounced",
                _ => "sent",
            };
            entries.push(TimelineEntry {
                kind,
                title: format!("{} reminder {}", record.tone().display_name(), verb),
                detail: None,
                occurred_at,
                sort_key: record.reminder_id.to_string(),
            });
        }

        for payment in self.payments.payments_for(invoice_id).await? {
            entries.push(TimelineEntry {
                kind: TimelineEntryKind::PaymentReceived,
                title: "Payment received".to_string(),
                detail: Some(format!("Payment of {} recorded", payment.amount)),
                occurred_at: payment.created_utc,
                sort_key: payment.payment_id.to_string(),
            });
        }

        // Only the most recent view survives; older ones are noise.
        if let Some(view) = self
            .views
            .views_for(invoice_id)
            .await?
            .into_iter()
            .max_by_key(|v| v.viewed_utc)
        {
            entries.push(TimelineEntry {
                kind: TimelineEntryKind::InvoiceViewed,
                title: "Invoice viewed".to_string(),
                detail: None,
                occurred_at: view.viewed_utc,
                sort_key: view.view_id.to_string(),
            });
        }

        // Never-future, stop-at-paid-instant truncation.
        let mut cutoff = end_of_day_utc(now.date_naive());
        if let Some(paid_utc) = invoice.paid_utc {
            cutoff = cutoff.min(paid_utc);
        }
        entries.retain(|e| e.occurred_at <= cutoff);

        entries.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.sort_key.cmp(&b.sort_key))
        });

        Ok(dedupe_entries(entries))
    }

    /// Persist any newly crossed milestones. Persistence failures are logged
    /// and swallowed; the upserts are idempotent, so the next read retries
    /// safely.
    async fn accrue_milestones(&self, invoice: &Invoice, now: DateTime<Utc>) {
        let status = invoice.status();
        if matches!(status, InvoiceStatus::Draft | InvoiceStatus::Paid) {
            return;
        }

        let today = now.date_naive();
        let total_overdue = overdue_days(invoice.due_date, today);
        if total_overdue == 0 {
            return;
        }
        let end_of_today = end_of_day_utc(today);

        let existing = match self.milestones.milestones_for(invoice.invoice_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(invoice_id = %invoice.invoice_id, error = %e, "Skipping milestone accrual");
                return;
            }
        };
        let existing_days: HashSet<i32> = existing
            .iter()
            .filter(|m| m.kind() == MilestoneKind::OverdueDay)
            .filter_map(|m| m.day_number)
            .collect();

        for day in 1..=total_overdue {
            let day = day as i32;
            if existing_days.contains(&day) {
                continue;
            }
            let occurred = end_of_day_utc(invoice.due_date + Duration::days(day as i64));
            if occurred > end_of_today {
                continue;
            }
            if let Err(e) = self
                .milestones
                .upsert_overdue_day(invoice.invoice_id, day, occurred)
                .await
            {
                warn!(
                    invoice_id = %invoice.invoice_id,
                    day,
                    error = %e,
                    "Failed to persist overdue milestone"
                );
            }
        }

        let policy = invoice.late_fee_policy();
        if !policy.enabled {
            return;
        }

        let application_day = policy.grace_period_days as i64 + 1;
        let application_time =
            end_of_day_utc(invoice.due_date + Duration::days(application_day));
        if total_overdue < application_day || application_time > end_of_today {
            return;
        }

        let paid = match self.payments.payments_for(invoice.invoice_id).await {
            Ok(payments) => total_paid(&payments),
            Err(e) => {
                warn!(invoice_id = %invoice.invoice_id, error = %e, "Skipping late-fee accrual");
                return;
            }
        };
        let amount = late_fee_amount(&policy, fee_base(status, invoice.total, paid));

        let existing_fee = existing
            .iter()
            .find(|m| m.kind() == MilestoneKind::LateFeeApplied);
        match existing_fee {
            None => {
                if let Err(e) = self
                    .milestones
                    .insert_late_fee(invoice.invoice_id, amount, application_time)
                    .await
                {
                    warn!(invoice_id = %invoice.invoice_id, error = %e, "Failed to persist late fee");
                } else {
                    LATE_FEES_TOTAL.with_label_values(&["applied"]).inc();
                }
            }
            Some(fee) => {
                // Correct the amount in place when payment data moved it by
                // more than a cent. The stored timestamp is never altered.
                let stored = fee.amount.unwrap_or(Decimal::ZERO);
                if (stored - amount).abs() > Decimal::new(1, 2) {
                    if let Err(e) = self
                        .milestones
                        .update_late_fee_amount(fee.milestone_id, amount)
                        .await
                    {
                        warn!(invoice_id = %invoice.invoice_id, error = %e, "Failed to correct late fee");
                    } else {
                        LATE_FEES_TOTAL.with_label_values(&["corrected"]).inc();
                    }
                }
            }
        }
    }
}

fn milestone_entry(milestone: &Milestone) -> TimelineEntry {
    match milestone.kind() {
        MilestoneKind::OverdueDay => {
            let day = milestone.day_number.unwrap_or(0);
            let title = if day == 1 {
                "1 day overdue".to_string()
            } else {
                format!("{} days overdue", day)
            };
            TimelineEntry {
                kind: TimelineEntryKind::OverdueDay,
                title,
                detail: None,
                occurred_at: milestone.occurred_utc,
                sort_key: milestone.milestone_id.to_string(),
            }
        }
        MilestoneKind::LateFeeApplied => TimelineEntry {
            kind: TimelineEntryKind::LateFeeApplied,
            title: "Late fee applied".to_string(),
            detail: milestone
                .amount
                .map(|amount| format!("Late fee of {} added to the balance", amount)),
            occurred_at: milestone.occurred_utc,
            sort_key: milestone.milestone_id.to_string(),
        },
    }
}

/// Collapse entries sharing a title within the tolerance window. Input must
/// already be sorted chronologically; the earliest occurrence wins.
fn dedupe_entries(entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    let mut kept: Vec<TimelineEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let duplicate = kept.iter().rev().any(|k| {
            k.title == entry.title
                && (entry.occurred_at - k.occurred_at).num_seconds().abs()
                    <= DEDUPE_TOLERANCE_SECS
        });
        if !duplicate {
            kept.push(entry);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(fee_type: LateFeeType, amount: Decimal, grace: i32) -> LateFeePolicy {
        LateFeePolicy {
            enabled: true,
            fee_type,
            amount,
            grace_period_days: grace,
        }
    }

    #[test]
    fn percentage_fee_applies_to_remaining_balance() {
        let base = fee_base(InvoiceStatus::Pending, Decimal::from(100), Decimal::from(60));
        assert_eq!(base, Decimal::from(40));
        let amount = late_fee_amount(&policy(LateFeeType::Percentage, Decimal::from(10), 5), base);
        assert_eq!(amount, Decimal::from(4));
    }

    #[test]
    fn sent_invoices_accrue_on_gross_total() {
        let base = fee_base(InvoiceStatus::Sent, Decimal::from(100), Decimal::from(60));
        assert_eq!(base, Decimal::from(100));
    }

    #[test]
    fn overpayment_floors_base_at_zero() {
        let base = fee_base(InvoiceStatus::Pending, Decimal::from(100), Decimal::from(150));
        assert_eq!(base, Decimal::ZERO);
    }

    #[test]
    fn fixed_fee_ignores_balance() {
        let amount = late_fee_amount(
            &policy(LateFeeType::Fixed, Decimal::from(25), 0),
            Decimal::from(1),
        );
        assert_eq!(amount, Decimal::from(25));
    }

    #[test]
    fn overdue_days_floor_at_zero() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(overdue_days(due, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()), 0);
        assert_eq!(overdue_days(due, due), 0);
        assert_eq!(overdue_days(due, NaiveDate::from_ymd_opt(2026, 3, 21).unwrap()), 6);
    }

    #[test]
    fn dedupe_collapses_same_title_within_tolerance() {
        let base = end_of_day_utc(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        let entry = |title: &str, offset_secs: i64, key: &str| TimelineEntry {
            kind: TimelineEntryKind::PaymentReceived,
            title: title.to_string(),
            detail: None,
            occurred_at: base + Duration::seconds(offset_secs),
            sort_key: key.to_string(),
        };
        let deduped = dedupe_entries(vec![
            entry("Payment received", 0, "a"),
            entry("Invoice viewed", 1, "d"),
            entry("Payment received", 3, "b"),
            entry("Payment received", 30, "c"),
        ]);
        let titles: Vec<&str> = deduped.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Payment received", "Invoice viewed", "Payment received"]
        );
    }
}
