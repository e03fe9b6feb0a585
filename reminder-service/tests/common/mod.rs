//! Shared harness for integration tests: an in-memory store wired through
//! the full service graph, with a mock email provider.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use reminder_service::models::{
    Client, Invoice, InvoiceView, Payment, ReminderRecord, ReminderStatus, ReminderTone,
};
use reminder_service::services::providers::MockEmailProvider;
use reminder_service::services::{
    create_send_pacer, AccrualEngine, DispatchRunner, MemoryStore, QuotaGuard, SchedulePlanner,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub email: Arc<MockEmailProvider>,
    pub planner: SchedulePlanner,
    pub dispatcher: Arc<DispatchRunner>,
    pub accrual: AccrualEngine,
    pub quota: Arc<QuotaGuard>,
}

pub fn setup() -> TestContext {
    setup_with_cap(4)
}

pub fn setup_with_cap(cap: i64) -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(MockEmailProvider::new(true));
    // Generous pacer so tests never stall on throttling.
    let pacer = create_send_pacer(6000);

    let quota = Arc::new(QuotaGuard::new(
        store.clone(),
        store.clone(),
        store.clone(),
        cap,
    ));
    let planner = SchedulePlanner::new(store.clone(), store.clone());
    let dispatcher = Arc::new(DispatchRunner::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        quota.clone(),
        email.clone(),
        pacer,
    ));
    let accrual = AccrualEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );

    TestContext {
        store,
        email,
        planner,
        dispatcher,
        accrual,
        quota,
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(date: NaiveDate, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    date.and_hms_opt(h, min, s).unwrap().and_utc()
}

pub fn invoice(status: &str, total: i64, due_date: NaiveDate) -> Invoice {
    Invoice {
        invoice_id: Uuid::new_v4(),
        user_id: Some(Uuid::new_v4()),
        client_id: Uuid::new_v4(),
        status: status.to_string(),
        total: Decimal::from(total),
        due_date,
        payment_terms: "net_30".to_string(),
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
        updated_utc: at(due_date, 0, 0, 0),
    }
}

pub fn with_late_fee(mut inv: Invoice, fee_type: &str, amount: i64, grace_days: i32) -> Invoice {
    inv.late_fee_enabled = true;
    inv.late_fee_type = fee_type.to_string();
    inv.late_fee_amount = Decimal::from(amount);
    inv.late_fee_grace_days = grace_days;
    inv
}

pub fn client_for(inv: &Invoice, email: Option<&str>) -> Client {
    Client {
        client_id: inv.client_id,
        name: "Acme Corp".to_string(),
        email: email.map(|e| e.to_string()),
    }
}

pub fn payment(inv: &Invoice, amount: i64, paid_at: DateTime<Utc>) -> Payment {
    Payment {
        payment_id: Uuid::new_v4(),
        invoice_id: inv.invoice_id,
        amount: Decimal::from(amount),
        payment_date: paid_at.date_naive(),
        created_utc: paid_at,
    }
}

pub fn view(inv: &Invoice, viewed_at: DateTime<Utc>) -> InvoiceView {
    InvoiceView {
        view_id: Uuid::new_v4(),
        invoice_id: inv.invoice_id,
        viewed_utc: viewed_at,
    }
}

pub fn reminder(
    inv: &Invoice,
    tone: ReminderTone,
    status: ReminderStatus,
    scheduled_at: DateTime<Utc>,
) -> ReminderRecord {
    ReminderRecord {
        reminder_id: Uuid::new_v4(),
        invoice_id: inv.invoice_id,
        tone: tone.as_str().to_string(),
        offset_days: 0,
        scheduled_at,
        status: status.as_str().to_string(),
        plan_version: inv.plan_version,
        email_id: None,
        failure_reason: None,
        sent_utc: if status == ReminderStatus::Sent {
            Some(scheduled_at)
        } else {
            None
        },
        created_utc: scheduled_at,
    }
}

/// Insert an invoice plus a client with a deliverable address.
pub async fn seed_sendable(ctx: &TestContext, inv: &Invoice) {
    ctx.store.insert_invoice(inv.clone()).await;
    ctx.store
        .insert_client(client_for(inv, Some("client@example.com")))
        .await;
}
