//! Quota Guard: per-plan reminder-count ceiling.

use crate::error::AppError;
use crate::services::store::{InvoiceStore, PlanStore, ReminderStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Result of a quota check.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl QuotaDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Enforces the per-invoice reminder cap for constrained plans.
///
/// Invoked both before and after the irreversible send: the send cannot be
/// rolled back, so the second call only detects and reconciles races.
pub struct QuotaGuard {
    invoices: Arc<dyn InvoiceStore>,
    reminders: Arc<dyn ReminderStore>,
    plans: Arc<dyn PlanStore>,
    constrained_cap: i64,
}

impl QuotaGuard {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        reminders: Arc<dyn ReminderStore>,
        plans: Arc<dyn PlanStore>,
        constrained_cap: i64,
    ) -> Self {
        Self {
            invoices,
            reminders,
            plans,
            constrained_cap,
        }
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn can_send(&self, invoice_id: Uuid) -> Result<QuotaDecision, AppError> {
        let invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        let user_id = invoice.user_id.ok_or_else(|| {
            AppError::DataIntegrity(anyhow::anyhow!(
                "Invoice {} is missing owner linkage",
                invoice_id
            ))
        })?;

        let tier = self.plans.plan_for_user(user_id).await?;
        if tier.is_unrestricted() {
            return Ok(QuotaDecision::allowed());
        }

        let sent = self.reminders.count_sent(invoice_id).await?;
        if sent >= self.constrained_cap {
            return Ok(QuotaDecision::denied(format!(
                "Reminder limit reached for the {} plan ({} of {} sent for this invoice)",
                tier.as_str(),
                sent,
                self.constrained_cap
            )));
        }

        Ok(QuotaDecision::allowed())
    }
}
