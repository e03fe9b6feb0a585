//! In-memory store used by tests and local development without Postgres.

use crate::error::AppError;
use crate::models::{
    Client, Invoice, InvoiceView, Milestone, MilestoneKind, Payment, PlanTier, ReminderRecord,
    ReminderSettings, ReminderStatus,
};
use crate::services::store::{
    ClientStore, InvoiceStore, MilestoneStore, PaymentStore, PlanStore, ReminderStore, ViewStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    invoices: HashMap<Uuid, Invoice>,
    settings: HashMap<Uuid, ReminderSettings>,
    reminders: HashMap<Uuid, ReminderRecord>,
    payments: HashMap<Uuid, Vec<Payment>>,
    clients: HashMap<Uuid, Client>,
    plans: HashMap<Uuid, PlanTier>,
    milestones: HashMap<Uuid, Milestone>,
    views: HashMap<Uuid, Vec<InvoiceView>>,
}

/// Single in-memory backing store implementing every store trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.inner
            .write()
            .await
            .invoices
            .insert(invoice.invoice_id, invoice);
    }

    pub async fn set_reminder_settings(&self, invoice_id: Uuid, settings: ReminderSettings) {
        self.inner.write().await.settings.insert(invoice_id, settings);
    }

    pub async fn insert_client(&self, client: Client) {
        self.inner
            .write()
            .await
            .clients
            .insert(client.client_id, client);
    }

    pub async fn insert_payment(&self, payment: Payment) {
        self.inner
            .write()
            .await
            .payments
            .entry(payment.invoice_id)
            .or_default()
            .push(payment);
    }

    pub async fn set_plan(&self, user_id: Uuid, tier: PlanTier) {
        self.inner.write().await.plans.insert(user_id, tier);
    }

    pub async fn insert_view(&self, view: InvoiceView) {
        self.inner
            .write()
            .await
            .views
            .entry(view.invoice_id)
            .or_default()
            .push(view);
    }

    pub async fn insert_reminder(&self, record: ReminderRecord) {
        self.inner
            .write()
            .await
            .reminders
            .insert(record.reminder_id, record);
    }

    pub async fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        self.inner.read().await.invoices.get(&invoice_id).cloned()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.inner.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn get_reminder_settings(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<ReminderSettings>, AppError> {
        Ok(self.inner.read().await.settings.get(&invoice_id).cloned())
    }

    async fn mark_paid(&self, invoice_id: Uuid, paid_utc: DateTime<Utc>) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(invoice) = inner.invoices.get_mut(&invoice_id) {
            invoice.status = "paid".to_string();
            invoice.paid_utc = Some(paid_utc);
            invoice.updated_utc = paid_utc;
        }
        Ok(())
    }

    async fn bump_plan_version(&self, invoice_id: Uuid) -> Result<i32, AppError> {
        let mut inner = self.inner.write().await;
        let invoice = inner.invoices.get_mut(&invoice_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id))
        })?;
        invoice.plan_version += 1;
        Ok(invoice.plan_version)
    }

    async fn record_reminder_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(invoice) = inner.invoices.get_mut(&invoice_id) {
            invoice.reminder_count += 1;
            invoice.last_reminder_sent = Some(sent_utc);
            invoice.updated_utc = sent_utc;
        }
        Ok(())
    }
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn insert_batch(&self, records: &[ReminderRecord]) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        for record in records {
            inner.reminders.insert(record.reminder_id, record.clone());
        }
        Ok(())
    }

    async fn get(&self, reminder_id: Uuid) -> Result<Option<ReminderRecord>, AppError> {
        Ok(self.inner.read().await.reminders.get(&reminder_id).cloned())
    }

    async fn records_for(&self, invoice_id: Uuid) -> Result<Vec<ReminderRecord>, AppError> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .reminders
            .values()
            .filter(|r| r.invoice_id == invoice_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.scheduled_at);
        Ok(records)
    }

    async fn delete_scheduled(&self, invoice_id: Uuid) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let before = inner.reminders.len();
        inner.reminders.retain(|_, r| {
            !(r.invoice_id == invoice_id && r.status() == ReminderStatus::Scheduled)
        });
        Ok((before - inner.reminders.len()) as u64)
    }

    async fn dedupe_failed(&self, invoice_id: Uuid) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let mut latest_per_tone: HashMap<String, (Uuid, DateTime<Utc>)> = HashMap::new();
        for r in inner.reminders.values() {
            if r.invoice_id != invoice_id || r.status() != ReminderStatus::Failed {
                continue;
            }
            let entry = latest_per_tone
                .entry(r.tone.clone())
                .or_insert((r.reminder_id, r.created_utc));
            if r.created_utc > entry.1 {
                *entry = (r.reminder_id, r.created_utc);
            }
        }
        let keep: Vec<Uuid> = latest_per_tone.values().map(|(id, _)| *id).collect();
        let before = inner.reminders.len();
        inner.reminders.retain(|id, r| {
            !(r.invoice_id == invoice_id
                && r.status() == ReminderStatus::Failed
                && !keep.contains(id))
        });
        Ok((before - inner.reminders.len()) as u64)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>, AppError> {
        let inner = self.inner.read().await;
        let mut due: Vec<_> = inner
            .reminders
            .values()
            .filter(|r| r.status() == ReminderStatus::Scheduled && r.scheduled_at <= now)
            .filter(|r| match inner.invoices.get(&r.invoice_id) {
                Some(invoice) => {
                    !matches!(invoice.status.as_str(), "draft" | "paid")
                        && invoice.plan_version == r.plan_version
                }
                None => true, // surfaced so dispatch can fail the orphan record
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        Ok(due)
    }

    async fn mark_sent(
        &self,
        reminder_id: Uuid,
        email_id: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(r) = inner.reminders.get_mut(&reminder_id) {
            r.status = ReminderStatus::Sent.as_str().to_string();
            r.email_id = Some(email_id.to_string());
            r.sent_utc = Some(sent_utc);
        }
        Ok(())
    }

    async fn mark_failed(&self, reminder_id: Uuid, reason: &str) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(r) = inner.reminders.get_mut(&reminder_id) {
            r.status = ReminderStatus::Failed.as_str().to_string();
            r.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn mark_cancelled(
        &self,
        reminder_id: Uuid,
        reason: &str,
        email_id: Option<&str>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(r) = inner.reminders.get_mut(&reminder_id) {
            r.status = ReminderStatus::Cancelled.as_str().to_string();
            r.failure_reason = Some(reason.to_string());
            if let Some(email_id) = email_id {
                r.email_id = Some(email_id.to_string());
            }
        }
        Ok(())
    }

    async fn cancel_scheduled(&self, invoice_id: Uuid, reason: &str) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let mut affected = 0;
        for r in inner.reminders.values_mut() {
            if r.invoice_id == invoice_id && r.status() == ReminderStatus::Scheduled {
                r.status = ReminderStatus::Cancelled.as_str().to_string();
                r.failure_reason = Some(reason.to_string());
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn count_sent(&self, invoice_id: Uuid) -> Result<i64, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .reminders
            .values()
            .filter(|r| r.invoice_id == invoice_id && r.status() == ReminderStatus::Sent)
            .count() as i64)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn payments_for(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .payments
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        Ok(self.inner.read().await.clients.get(&client_id).cloned())
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn plan_for_user(&self, user_id: Uuid) -> Result<PlanTier, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .plans
            .get(&user_id)
            .copied()
            .unwrap_or(PlanTier::Free))
    }
}

#[async_trait]
impl MilestoneStore for MemoryStore {
    async fn milestones_for(&self, invoice_id: Uuid) -> Result<Vec<Milestone>, AppError> {
        let inner = self.inner.read().await;
        let mut milestones: Vec<_> = inner
            .milestones
            .values()
            .filter(|m| m.invoice_id == invoice_id)
            .cloned()
            .collect();
        milestones.sort_by_key(|m| m.occurred_utc);
        Ok(milestones)
    }

    async fn upsert_overdue_day(
        &self,
        invoice_id: Uuid,
        day_number: i32,
        occurred_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let exists = inner.milestones.values().any(|m| {
            m.invoice_id == invoice_id
                && m.kind() == MilestoneKind::OverdueDay
                && m.day_number == Some(day_number)
        });
        if !exists {
            let milestone = Milestone {
                milestone_id: Uuid::new_v4(),
                invoice_id,
                kind: MilestoneKind::OverdueDay.as_str().to_string(),
                day_number: Some(day_number),
                amount: None,
                occurred_utc,
                created_utc: Utc::now(),
            };
            inner.milestones.insert(milestone.milestone_id, milestone);
        }
        Ok(())
    }

    async fn find_late_fee(&self, invoice_id: Uuid) -> Result<Option<Milestone>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .milestones
            .values()
            .find(|m| m.invoice_id == invoice_id && m.kind() == MilestoneKind::LateFeeApplied)
            .cloned())
    }

    async fn insert_late_fee(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        occurred_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .milestones
            .values()
            .any(|m| m.invoice_id == invoice_id && m.kind() == MilestoneKind::LateFeeApplied);
        if !exists {
            let milestone = Milestone {
                milestone_id: Uuid::new_v4(),
                invoice_id,
                kind: MilestoneKind::LateFeeApplied.as_str().to_string(),
                day_number: None,
                amount: Some(amount),
                occurred_utc,
                created_utc: Utc::now(),
            };
            inner.milestones.insert(milestone.milestone_id, milestone);
        }
        Ok(())
    }

    async fn update_late_fee_amount(
        &self,
        milestone_id: Uuid,
        amount: Decimal,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if let Some(m) = inner.milestones.get_mut(&milestone_id) {
            m.amount = Some(amount);
        }
        Ok(())
    }
}

#[async_trait]
impl ViewStore for MemoryStore {
    async fn views_for(&self, invoice_id: Uuid) -> Result<Vec<InvoiceView>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .views
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }
}
