//! Quota guard: per-invoice sent-reminder ceiling by plan tier.

mod common;

use common::*;
use reminder_service::models::{PlanTier, ReminderStatus, ReminderTone};
use reminder_service::services::store::ReminderStore;

async fn seed_sent_reminders(ctx: &TestContext, inv: &reminder_service::models::Invoice, n: usize) {
    for i in 0..n {
        let record = reminder(
            inv,
            ReminderTone::for_slot(i),
            ReminderStatus::Sent,
            at(day(2026, 3, 16), 9, 0, 0),
        );
        ctx.store.insert_reminder(record).await;
    }
}

#[tokio::test]
async fn free_plan_allows_sends_under_the_cap() {
    let ctx = setup();
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;
    seed_sent_reminders(&ctx, &inv, 3).await;

    let decision = ctx.quota.can_send(inv.invoice_id).await.unwrap();
    assert!(decision.allowed);
    assert!(decision.reason.is_none());
}

#[tokio::test]
async fn free_plan_denies_the_fifth_reminder() {
    let ctx = setup();
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;
    seed_sent_reminders(&ctx, &inv, 4).await;

    let decision = ctx.quota.can_send(inv.invoice_id).await.unwrap();
    assert!(!decision.allowed);
    let reason = decision.reason.unwrap();
    assert!(reason.contains("4 of 4"));
    assert!(reason.contains("free"));
}

#[tokio::test]
async fn pro_plan_is_not_capped() {
    let ctx = setup();
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;
    ctx.store.set_plan(inv.user_id.unwrap(), PlanTier::Pro).await;
    seed_sent_reminders(&ctx, &inv, 10).await;

    let decision = ctx.quota.can_send(inv.invoice_id).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn only_sent_records_count_against_the_cap() {
    let ctx = setup();
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;
    seed_sent_reminders(&ctx, &inv, 3).await;
    for status in [
        ReminderStatus::Failed,
        ReminderStatus::Cancelled,
        ReminderStatus::Scheduled,
    ] {
        ctx.store
            .insert_reminder(reminder(
                &inv,
                ReminderTone::Urgent,
                status,
                at(day(2026, 3, 17), 9, 0, 0),
            ))
            .await;
    }

    let decision = ctx.quota.can_send(inv.invoice_id).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn unknown_invoice_is_an_error() {
    let ctx = setup();
    let result = ctx.quota.can_send(uuid::Uuid::new_v4()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn dispatch_cancels_records_past_the_cap() {
    let ctx = setup_with_cap(2);
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;

    for i in 0..3 {
        ctx.store
            .insert_reminder(reminder(
                &inv,
                ReminderTone::for_slot(i),
                ReminderStatus::Scheduled,
                at(day(2026, 3, 16), 9, 0, 0),
            ))
            .await;
    }

    let summary = ctx
        .dispatcher
        .dispatch_at(at(day(2026, 3, 16), 10, 0, 0))
        .await
        .unwrap();
    assert_eq!(summary.success, 2);

    let records = ctx.store.records_for(inv.invoice_id).await.unwrap();
    let cancelled: Vec<_> = records
        .iter()
        .filter(|r| r.status() == ReminderStatus::Cancelled)
        .collect();
    assert_eq!(cancelled.len(), 1);
    assert!(cancelled[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("limit reached"));
    assert_eq!(ctx.email.send_count(), 2);
}
