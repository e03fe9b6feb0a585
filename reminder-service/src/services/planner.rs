//! Schedule Planner: computes and persists the reminder plan for an invoice.

use crate::error::AppError;
use crate::models::{
    Invoice, InvoiceStatus, PaymentTerms, ReminderRecord, ReminderSettings, ReminderStatus,
    ReminderTone,
};
use crate::services::store::{InvoiceStore, ReminderStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Hour of day (UTC) reminders are slotted at.
const SEND_HOUR_UTC: u32 = 9;

/// System-default reminder offsets (days from the baseline date) per
/// payment-term category, in escalating tone order.
pub fn default_offsets(terms: PaymentTerms) -> [i32; 4] {
    match terms {
        PaymentTerms::DueOnReceipt => [1, 3, 7, 14],
        PaymentTerms::Net15 => [-2, 2, 7, 15],
        PaymentTerms::Net30 => [-3, 3, 10, 20],
        PaymentTerms::Net60 => [-5, 5, 15, 30],
    }
}

/// One computed reminder slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSlot {
    pub tone: ReminderTone,
    pub offset_days: i32,
    pub scheduled_at: DateTime<Utc>,
}

/// Baseline date the offsets count from. Due-on-receipt invoices that have
/// left draft count from the moment they were sent.
fn baseline_for(invoice: &Invoice) -> DateTime<Utc> {
    let due = invoice
        .due_date
        .and_hms_opt(SEND_HOUR_UTC, 0, 0)
        .expect("valid wall-clock time")
        .and_utc();
    if invoice.terms() == PaymentTerms::DueOnReceipt && invoice.status() != InvoiceStatus::Draft {
        invoice.sent_utc.unwrap_or(due)
    } else {
        due
    }
}

/// Compute the ordered reminder slots for an invoice. Pure: no store access.
pub fn compute_slots(invoice: &Invoice, settings: &ReminderSettings) -> Vec<ReminderSlot> {
    let baseline = baseline_for(invoice);

    if settings.use_system_defaults {
        return default_offsets(invoice.terms())
            .iter()
            .enumerate()
            .map(|(i, &offset)| ReminderSlot {
                tone: ReminderTone::for_slot(i),
                offset_days: offset,
                scheduled_at: baseline + Duration::days(offset as i64),
            })
            .collect();
    }

    let mut slots: Vec<ReminderSlot> = settings
        .rules
        .iter()
        .filter(|rule| rule.enabled)
        .map(|rule| {
            let offset = rule.signed_offset();
            ReminderSlot {
                tone: ReminderTone::Friendly, // assigned by position below
                offset_days: offset,
                scheduled_at: baseline + Duration::days(offset as i64),
            }
        })
        .collect();
    slots.sort_by_key(|slot| slot.scheduled_at);
    for (i, slot) in slots.iter_mut().enumerate() {
        slot.tone = ReminderTone::for_slot(i);
    }
    slots
}

/// Plans reminder batches and supersedes unfired plans.
pub struct SchedulePlanner {
    invoices: Arc<dyn InvoiceStore>,
    reminders: Arc<dyn ReminderStore>,
}

impl SchedulePlanner {
    pub fn new(invoices: Arc<dyn InvoiceStore>, reminders: Arc<dyn ReminderStore>) -> Self {
        Self {
            invoices,
            reminders,
        }
    }

    /// Replace the invoice's unfired plan with a freshly computed one.
    ///
    /// All currently `scheduled` records are purged first; fired history
    /// (sent/delivered/bounced/failed) is never touched, except that stale
    /// duplicate `failed` records of the same tone are pruned down to the
    /// most recent one. Draft and paid invoices end up with zero scheduled
    /// records.
    pub async fn plan_reminders(&self, invoice_id: Uuid) -> Result<Vec<ReminderRecord>, AppError> {
        self.plan_reminders_at(invoice_id, Utc::now()).await
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn plan_reminders_at(
        &self,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderRecord>, AppError> {
        let invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        let purged = self.reminders.delete_scheduled(invoice_id).await?;
        let deduped = self.reminders.dedupe_failed(invoice_id).await?;
        if purged > 0 || deduped > 0 {
            info!(purged, deduped, "Superseded prior reminder plan");
        }

        if matches!(
            invoice.status(),
            InvoiceStatus::Draft | InvoiceStatus::Paid
        ) {
            return Ok(Vec::new());
        }

        let settings = self
            .invoices
            .get_reminder_settings(invoice_id)
            .await?
            .unwrap_or_default();

        let slots = compute_slots(&invoice, &settings);
        let plan_version = self.invoices.bump_plan_version(invoice_id).await?;

        let records: Vec<ReminderRecord> = slots
            .into_iter()
            .map(|slot| ReminderRecord {
                reminder_id: Uuid::new_v4(),
                invoice_id,
                tone: slot.tone.as_str().to_string(),
                offset_days: slot.offset_days,
                scheduled_at: slot.scheduled_at,
                status: ReminderStatus::Scheduled.as_str().to_string(),
                plan_version,
                email_id: None,
                failure_reason: None,
                sent_utc: None,
                created_utc: now,
            })
            .collect();

        self.reminders.insert_batch(&records).await?;

        info!(
            slots = records.len(),
            plan_version, "Reminder plan written"
        );

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReminderRule, RuleType};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn invoice_with(terms: PaymentTerms, status: &str) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            client_id: Uuid::new_v4(),
            status: status.to_string(),
            total: Decimal::from(100),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
            payment_terms: terms.as_str().to_string(),
            payment_terms_enabled: true,
            sent_utc: None,
            paid_utc: None,
            late_fee_enabled: false,
            late_fee_type: "percentage".to_string(),
            late_fee_amount: Decimal::ZERO,
            late_fee_grace_days: 0,
            reminder_count: 0,
            last_reminder_sent: None,
            plan_version: 1,
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn net_30_defaults_yield_four_escalating_slots() {
        let invoice = invoice_with(PaymentTerms::Net30, "sent");
        let slots = compute_slots(&invoice, &ReminderSettings::default());

        assert_eq!(slots.len(), 4);
        let offsets: Vec<i32> = slots.iter().map(|s| s.offset_days).collect();
        assert_eq!(offsets, vec![-3, 3, 10, 20]);
        let tones: Vec<ReminderTone> = slots.iter().map(|s| s.tone).collect();
        assert_eq!(
            tones,
            vec![
                ReminderTone::Friendly,
                ReminderTone::Polite,
                ReminderTone::Firm,
                ReminderTone::Urgent
            ]
        );
    }

    #[test]
    fn due_on_receipt_counts_from_sent_timestamp() {
        let mut invoice = invoice_with(PaymentTerms::DueOnReceipt, "sent");
        let sent = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
            .and_utc();
        invoice.sent_utc = Some(sent);

        let slots = compute_slots(&invoice, &ReminderSettings::default());
        assert_eq!(slots[0].scheduled_at, sent + Duration::days(1));
        assert_eq!(slots[3].scheduled_at, sent + Duration::days(14));
    }

    #[test]
    fn custom_rules_sort_by_date_and_cap_tone() {
        let invoice = invoice_with(PaymentTerms::Net30, "sent");
        let settings = ReminderSettings {
            use_system_defaults: false,
            rules: vec![
                ReminderRule {
                    rule_type: RuleType::After,
                    days: 30,
                    enabled: true,
                },
                ReminderRule {
                    rule_type: RuleType::Before,
                    days: 7,
                    enabled: true,
                },
                ReminderRule {
                    rule_type: RuleType::After,
                    days: 5,
                    enabled: true,
                },
                ReminderRule {
                    rule_type: RuleType::After,
                    days: 10,
                    enabled: true,
                },
                ReminderRule {
                    rule_type: RuleType::After,
                    days: 20,
                    enabled: true,
                },
                ReminderRule {
                    rule_type: RuleType::After,
                    days: 60,
                    enabled: false,
                },
            ],
        };

        let slots = compute_slots(&invoice, &settings);
        let offsets: Vec<i32> = slots.iter().map(|s| s.offset_days).collect();
        assert_eq!(offsets, vec![-7, 5, 10, 20, 30]);
        // The fifth slot keeps the most severe tone.
        assert_eq!(slots[3].tone, ReminderTone::Urgent);
        assert_eq!(slots[4].tone, ReminderTone::Urgent);
    }

    #[test]
    fn disabled_terms_fall_back_to_net_30_table() {
        let mut invoice = invoice_with(PaymentTerms::Net60, "sent");
        invoice.payment_terms_enabled = false;
        let slots = compute_slots(&invoice, &ReminderSettings::default());
        let offsets: Vec<i32> = slots.iter().map(|s| s.offset_days).collect();
        assert_eq!(offsets, vec![-3, 3, 10, 20]);
    }
}
