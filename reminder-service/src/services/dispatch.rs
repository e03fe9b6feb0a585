//! Dispatch Runner: the periodic sweep that sends due reminders.
//!
//! Correctness holds for any number of overlapping sweeps. There are no
//! distributed locks: the re-read before send and the double quota check
//! bound the race window, and the documented policy prefers cancelling a
//! record after the fact over blocking the send.

use crate::error::AppError;
use crate::models::{total_paid, Invoice, InvoiceStatus, ReminderRecord, ReminderStatus};
use crate::services::accrual::{fee_base, late_fee_amount, overdue_days};
use crate::services::metrics::{
    ERRORS_TOTAL, INVOICES_SETTLED_TOTAL, REMINDERS_TOTAL, SWEEP_DURATION,
};
use crate::services::providers::{EmailMessage, EmailProvider, ProviderError};
use crate::services::quota::QuotaGuard;
use crate::services::store::{ClientStore, InvoiceStore, PaymentStore, ReminderStore};
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Token-bucket pacer shared by every concurrent sweep in the process.
pub type SendPacer = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create the shared send pacer. A cooperative throttle, not a hard
/// cross-process ceiling.
pub fn create_send_pacer(sends_per_minute: u32) -> SendPacer {
    let sends = sends_per_minute.max(1);
    let period = Duration::from_millis(60_000 / sends as u64);
    let quota = Quota::with_period(period)
        .expect("Failed to create quota with valid period")
        .allow_burst(NonZeroU32::new(sends).expect("sends is guaranteed to be non-zero"));

    Arc::new(RateLimiter::direct(quota))
}

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub total_found: usize,
    pub processed: usize,
    pub success: usize,
    pub errors: usize,
    pub skipped: usize,
}

enum Outcome {
    Sent,
    Cancelled,
    Failed,
    Skipped,
}

/// Sends due, eligible reminders and finalizes their status.
pub struct DispatchRunner {
    invoices: Arc<dyn InvoiceStore>,
    reminders: Arc<dyn ReminderStore>,
    payments: Arc<dyn PaymentStore>,
    clients: Arc<dyn ClientStore>,
    quota: Arc<QuotaGuard>,
    email: Arc<dyn EmailProvider>,
    pacer: SendPacer,
}

impl DispatchRunner {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        reminders: Arc<dyn ReminderStore>,
        payments: Arc<dyn PaymentStore>,
        clients: Arc<dyn ClientStore>,
        quota: Arc<QuotaGuard>,
        email: Arc<dyn EmailProvider>,
        pacer: SendPacer,
    ) -> Self {
        Self {
            invoices,
            reminders,
            payments,
            clients,
            quota,
            email,
            pacer,
        }
    }

    /// Sweep all due reminder slots. One record's failure never aborts the
    /// sweep; the aggregate summary is always returned.
    pub async fn dispatch_due_reminders(&self) -> Result<DispatchSummary, AppError> {
        self.dispatch_at(Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn dispatch_at(&self, now: DateTime<Utc>) -> Result<DispatchSummary, AppError> {
        let timer = SWEEP_DURATION.start_timer();

        let candidates = self.reminders.due_scheduled(now).await?;
        let mut summary = DispatchSummary {
            total_found: candidates.len(),
            ..Default::default()
        };

        for record in candidates {
            match self.process_candidate(&record, now).await {
                Ok(Outcome::Sent) => {
                    summary.processed += 1;
                    summary.success += 1;
                    REMINDERS_TOTAL.with_label_values(&["sent"]).inc();
                }
                Ok(Outcome::Cancelled) => {
                    summary.processed += 1;
                    REMINDERS_TOTAL.with_label_values(&["cancelled"]).inc();
                }
                Ok(Outcome::Failed) => {
                    summary.processed += 1;
                    summary.errors += 1;
                    REMINDERS_TOTAL.with_label_values(&["failed"]).inc();
                }
                Ok(Outcome::Skipped) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    // Store/network failure for this record only; the record
                    // stays untouched and is retried next sweep.
                    summary.processed += 1;
                    summary.errors += 1;
                    ERRORS_TOTAL.with_label_values(&["dispatch"]).inc();
                    error!(
                        reminder_id = %record.reminder_id,
                        error = %e,
                        "Reminder processing failed"
                    );
                }
            }
        }

        timer.observe_duration();

        info!(
            total_found = summary.total_found,
            success = summary.success,
            errors = summary.errors,
            skipped = summary.skipped,
            "Dispatch sweep complete"
        );

        Ok(summary)
    }

    async fn process_candidate(
        &self,
        record: &ReminderRecord,
        now: DateTime<Utc>,
    ) -> Result<Outcome, AppError> {
        let Some(invoice) = self.invoices.get_invoice(record.invoice_id).await? else {
            self.reminders
                .mark_failed(record.reminder_id, "invoice not found")
                .await?;
            return Ok(Outcome::Failed);
        };

        if invoice.user_id.is_none() {
            self.reminders
                .mark_failed(record.reminder_id, "invoice is missing owner linkage")
                .await?;
            return Ok(Outcome::Failed);
        }

        let status = invoice.status();

        // Settlement pre-filter: an invoice fully covered by partial payments
        // must not be nagged, whatever its recorded status says. Settling
        // cancels every remaining scheduled slot, not just the due one: a
        // paid invoice owns zero scheduled records.
        if !matches!(status, InvoiceStatus::Sent | InvoiceStatus::Cancelled) {
            let payments = self.payments.payments_for(invoice.invoice_id).await?;
            if total_paid(&payments) >= invoice.total {
                self.reminders
                    .cancel_scheduled(invoice.invoice_id, "fully paid via partial payments")
                    .await?;
                if status != InvoiceStatus::Paid {
                    self.invoices.mark_paid(invoice.invoice_id, now).await?;
                    INVOICES_SETTLED_TOTAL
                        .with_label_values(&["partial_payments"])
                        .inc();
                    info!(
                        invoice_id = %invoice.invoice_id,
                        "Invoice settled via partial payments"
                    );
                }
                return Ok(Outcome::Cancelled);
            }
        }

        if status == InvoiceStatus::Paid {
            self.reminders
                .cancel_scheduled(invoice.invoice_id, "already paid")
                .await?;
            return Ok(Outcome::Cancelled);
        }

        if !status.is_sendable() {
            return Ok(Outcome::Skipped);
        }

        let client = self.clients.get_client(invoice.client_id).await?;
        let email_address = match client.as_ref().and_then(|c| c.email.as_deref()) {
            Some(address) if EMAIL_REGEX.is_match(address) => address.to_string(),
            _ => {
                self.reminders
                    .mark_failed(record.reminder_id, "client email is missing or invalid")
                    .await?;
                return Ok(Outcome::Failed);
            }
        };

        // Re-read immediately before the irreversible send; a concurrent
        // sweep may already have resolved this record.
        match self.reminders.get(record.reminder_id).await? {
            Some(fresh) if fresh.status() == ReminderStatus::Scheduled => {}
            _ => return Ok(Outcome::Skipped),
        }

        let decision = self.quota.can_send(invoice.invoice_id).await?;
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "reminder quota exceeded".to_string());
            self.reminders
                .mark_cancelled(record.reminder_id, &reason, None)
                .await?;
            return Ok(Outcome::Cancelled);
        }

        let payments = self.payments.payments_for(invoice.invoice_id).await?;
        let paid = total_paid(&payments);
        let remaining = (invoice.total - paid).max(Decimal::ZERO);
        let policy = invoice.late_fee_policy();
        // The fee only exists once the grace period has lapsed; mention it
        // on the same application-day boundary the accrual engine uses.
        let fee_applies = policy.enabled
            && overdue_days(invoice.due_date, now.date_naive())
                >= policy.grace_period_days as i64 + 1;
        let late_fee = if fee_applies {
            late_fee_amount(&policy, fee_base(status, invoice.total, paid))
        } else {
            Decimal::ZERO
        };

        let client_name = client.map(|c| c.name).unwrap_or_default();
        let message = build_reminder_email(
            &invoice,
            record,
            &client_name,
            &email_address,
            remaining,
            late_fee,
        );

        self.pacer.until_ready().await;

        match self.email.send(&message).await {
            Ok(response) => {
                let email_id = response.provider_id.unwrap_or_default();

                // The send cannot be rolled back. If a concurrent sweep
                // filled the quota while this one was in flight, reconcile
                // by cancelling this record instead of overcounting.
                let recheck = self.quota.can_send(invoice.invoice_id).await?;
                if !recheck.allowed {
                    let reason = recheck
                        .reason
                        .unwrap_or_else(|| "reminder quota exceeded".to_string());
                    warn!(
                        reminder_id = %record.reminder_id,
                        "Quota filled mid-send; cancelling record"
                    );
                    self.reminders
                        .mark_cancelled(record.reminder_id, &reason, Some(&email_id))
                        .await?;
                    return Ok(Outcome::Cancelled);
                }

                self.reminders
                    .mark_sent(record.reminder_id, &email_id, now)
                    .await?;
                self.invoices
                    .record_reminder_sent(invoice.invoice_id, now)
                    .await?;
                info!(
                    reminder_id = %record.reminder_id,
                    invoice_id = %invoice.invoice_id,
                    tone = %record.tone,
                    "Reminder sent"
                );
                Ok(Outcome::Sent)
            }
            Err(provider_error) => {
                let reason = failure_reason(&provider_error);
                self.reminders
                    .mark_failed(record.reminder_id, &reason)
                    .await?;
                warn!(
                    reminder_id = %record.reminder_id,
                    reason = %reason,
                    "Reminder send failed"
                );
                Ok(Outcome::Failed)
            }
        }
    }
}

/// Human-readable failure reason with actionable guidance where the class
/// warrants it.
fn failure_reason(error: &ProviderError) -> String {
    match error {
        ProviderError::RateLimited(msg) => format!(
            "Email provider rate limit hit; the reminder will be replanned on the next edit: {}",
            msg
        ),
        ProviderError::DeliveryRestricted(msg) => format!(
            "Email delivery restricted; verify the sending domain or leave the provider sandbox: {}",
            msg
        ),
        other => other.to_string(),
    }
}

fn build_reminder_email(
    invoice: &Invoice,
    record: &ReminderRecord,
    client_name: &str,
    to: &str,
    remaining: Decimal,
    late_fee: Decimal,
) -> EmailMessage {
    let tone = record.tone();
    let subject = format!(
        "{} reminder: invoice due {}",
        tone.display_name(),
        invoice.due_date
    );

    let greeting = if client_name.is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello {},", client_name)
    };
    let fee_line = if late_fee > Decimal::ZERO {
        format!("<p>A late fee of {} has been applied.</p>", late_fee)
    } else {
        String::new()
    };
    let body_html = format!(
        "<p>{}</p>\
         <p>This is a {} reminder that invoice payment of {} was due on {}.</p>{}",
        greeting,
        tone.as_str(),
        remaining,
        invoice.due_date,
        fee_line
    );
    let body_text = format!(
        "{}\n\nThis is a {} reminder that invoice payment of {} was due on {}.",
        greeting,
        tone.as_str(),
        remaining,
        invoice.due_date
    );

    EmailMessage {
        to: to.to_string(),
        subject,
        body_text: Some(body_text),
        body_html: Some(body_html),
        from_name: None,
        reply_to: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_regex_accepts_plain_addresses() {
        assert!(EMAIL_REGEX.is_match("client@example.com"));
        assert!(EMAIL_REGEX.is_match("a.b+c@mail.example.co"));
    }

    #[test]
    fn email_regex_rejects_malformed_addresses() {
        assert!(!EMAIL_REGEX.is_match(""));
        assert!(!EMAIL_REGEX.is_match("no-at-sign.example.com"));
        assert!(!EMAIL_REGEX.is_match("two@@example.com "));
        assert!(!EMAIL_REGEX.is_match("spaces in@example.com"));
    }

    #[test]
    fn rate_limited_failures_carry_guidance() {
        let reason = failure_reason(&ProviderError::RateLimited("429".to_string()));
        assert!(reason.contains("rate limit"));
        let reason =
            failure_reason(&ProviderError::DeliveryRestricted("sandbox".to_string()));
        assert!(reason.contains("sending domain"));
    }
}
