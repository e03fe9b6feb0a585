//! Milestone accrual and timeline assembly.

mod common;

use common::*;
use reminder_service::models::{
    MilestoneKind, ReminderStatus, ReminderTone, TimelineEntryKind,
};
use reminder_service::services::store::MilestoneStore;
use rust_decimal::Decimal;

#[tokio::test]
async fn late_fee_appears_on_the_day_after_grace_with_remaining_balance() {
    let ctx = setup();
    // 100 total, 60 paid, 10% fee, 5 grace days: 4.00 on day 6.
    let inv = with_late_fee(invoice("pending", 100, day(2026, 3, 15)), "percentage", 10, 5);
    seed_sendable(&ctx, &inv).await;
    ctx.store
        .insert_payment(payment(&inv, 60, at(day(2026, 3, 14), 12, 0, 0)))
        .await;

    let now = at(day(2026, 3, 21), 9, 0, 0); // six days overdue
    let entries = ctx.accrual.timeline_at(inv.invoice_id, now).await.unwrap();

    let fee_entries: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == TimelineEntryKind::LateFeeApplied)
        .collect();
    assert_eq!(fee_entries.len(), 1);
    assert!(fee_entries[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("Late fee of 4"));
    // Applied at end of the day after grace, not at read time.
    assert_eq!(
        fee_entries[0].occurred_at,
        at(day(2026, 3, 21), 23, 59, 59)
    );

    let fee = ctx.store.find_late_fee(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(fee.amount, Some(Decimal::from(4)));

    let overdue: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == TimelineEntryKind::OverdueDay)
        .collect();
    assert_eq!(overdue.len(), 6);
    assert_eq!(overdue[0].title, "1 day overdue");
    assert_eq!(overdue[5].title, "6 days overdue");
}

#[tokio::test]
async fn no_late_fee_within_the_grace_window() {
    let ctx = setup();
    let inv = with_late_fee(invoice("pending", 100, day(2026, 3, 15)), "percentage", 10, 5);
    seed_sendable(&ctx, &inv).await;

    let now = at(day(2026, 3, 20), 12, 0, 0); // five days overdue, still in grace
    let entries = ctx.accrual.timeline_at(inv.invoice_id, now).await.unwrap();

    assert!(entries
        .iter()
        .all(|e| e.kind != TimelineEntryKind::LateFeeApplied));
    assert!(ctx.store.find_late_fee(inv.invoice_id).await.unwrap().is_none());
}

#[tokio::test]
async fn sent_invoices_accrue_fee_on_the_gross_total() {
    let ctx = setup();
    let inv = with_late_fee(invoice("sent", 100, day(2026, 3, 15)), "percentage", 10, 5);
    seed_sendable(&ctx, &inv).await;
    ctx.store
        .insert_payment(payment(&inv, 60, at(day(2026, 3, 14), 12, 0, 0)))
        .await;

    ctx.accrual
        .timeline_at(inv.invoice_id, at(day(2026, 3, 21), 9, 0, 0))
        .await
        .unwrap();

    let fee = ctx.store.find_late_fee(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(fee.amount, Some(Decimal::from(10)));
}

#[tokio::test]
async fn accrual_is_idempotent_across_repeated_reads() {
    let ctx = setup();
    let inv = with_late_fee(invoice("pending", 100, day(2026, 3, 15)), "fixed", 25, 2);
    seed_sendable(&ctx, &inv).await;

    let now = at(day(2026, 3, 20), 12, 0, 0);
    let first = ctx.accrual.timeline_at(inv.invoice_id, now).await.unwrap();
    let second = ctx.accrual.timeline_at(inv.invoice_id, now).await.unwrap();

    assert_eq!(first.len(), second.len());

    let milestones = ctx.store.milestones_for(inv.invoice_id).await.unwrap();
    let fees = milestones
        .iter()
        .filter(|m| m.kind() == MilestoneKind::LateFeeApplied)
        .count();
    assert_eq!(fees, 1);
    let days = milestones
        .iter()
        .filter(|m| m.kind() == MilestoneKind::OverdueDay)
        .count();
    assert_eq!(days, 5);
}

#[tokio::test]
async fn late_fee_amount_is_corrected_when_payments_change() {
    let ctx = setup();
    let inv = with_late_fee(invoice("pending", 100, day(2026, 3, 15)), "percentage", 10, 5);
    seed_sendable(&ctx, &inv).await;

    let now = at(day(2026, 3, 21), 9, 0, 0);
    ctx.accrual.timeline_at(inv.invoice_id, now).await.unwrap();
    let original = ctx.store.find_late_fee(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(original.amount, Some(Decimal::from(10)));

    // A late-arriving partial payment shrinks the base.
    ctx.store
        .insert_payment(payment(&inv, 60, at(day(2026, 3, 21), 10, 0, 0)))
        .await;
    ctx.accrual
        .timeline_at(inv.invoice_id, at(day(2026, 3, 21), 11, 0, 0))
        .await
        .unwrap();

    let corrected = ctx.store.find_late_fee(inv.invoice_id).await.unwrap().unwrap();
    assert_eq!(corrected.amount, Some(Decimal::from(4)));
    // The occurrence instant never moves.
    assert_eq!(corrected.occurred_utc, original.occurred_utc);
}

#[tokio::test]
async fn timeline_truncates_at_the_payment_instant() {
    let ctx = setup();
    let paid_at = at(day(2026, 3, 20), 14, 0, 0);
    let mut inv = invoice("paid", 100, day(2026, 3, 15));
    inv.paid_utc = Some(paid_at);
    seed_sendable(&ctx, &inv).await;

    ctx.store
        .insert_payment(payment(&inv, 100, paid_at))
        .await;
    // A reminder that slipped out after settlement must not show.
    let late_send = reminder(
        &inv,
        ReminderTone::Firm,
        ReminderStatus::Sent,
        at(day(2026, 3, 20), 16, 0, 0),
    );
    ctx.store.insert_reminder(late_send).await;

    let entries = ctx
        .accrual
        .timeline_at(inv.invoice_id, at(day(2026, 3, 25), 9, 0, 0))
        .await
        .unwrap();

    assert!(entries.iter().all(|e| e.occurred_at <= paid_at));
    assert!(entries
        .iter()
        .any(|e| e.kind == TimelineEntryKind::PaymentReceived));
    assert!(entries
        .iter()
        .all(|e| e.kind != TimelineEntryKind::ReminderSent));
}

#[tokio::test]
async fn only_the_latest_view_is_shown() {
    let ctx = setup();
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;
    ctx.store.insert_view(view(&inv, at(day(2026, 3, 10), 9, 0, 0))).await;
    ctx.store.insert_view(view(&inv, at(day(2026, 3, 12), 9, 0, 0))).await;
    ctx.store.insert_view(view(&inv, at(day(2026, 3, 11), 9, 0, 0))).await;

    let entries = ctx
        .accrual
        .timeline_at(inv.invoice_id, at(day(2026, 3, 13), 9, 0, 0))
        .await
        .unwrap();

    let views: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == TimelineEntryKind::InvoiceViewed)
        .collect();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].occurred_at, at(day(2026, 3, 12), 9, 0, 0));
}

#[tokio::test]
async fn reminder_outcomes_appear_with_tone_titles() {
    let ctx = setup();
    let inv = invoice("sent", 100, day(2026, 3, 15));
    seed_sendable(&ctx, &inv).await;
    ctx.store
        .insert_reminder(reminder(
            &inv,
            ReminderTone::Friendly,
            ReminderStatus::Sent,
            at(day(2026, 3, 12), 9, 0, 0),
        ))
        .await;
    ctx.store
        .insert_reminder(reminder(
            &inv,
            ReminderTone::Polite,
            ReminderStatus::Scheduled,
            at(day(2026, 3, 18), 9, 0, 0),
        ))
        .await;

    let entries = ctx
        .accrual
        .timeline_at(inv.invoice_id, at(day(2026, 3, 13), 9, 0, 0))
        .await
        .unwrap();

    assert!(entries.iter().any(|e| e.title == "Friendly reminder sent"));
    // Unfired slots are plans, not activity.
    assert!(entries
        .iter()
        .all(|e| e.kind != TimelineEntryKind::ReminderSent || e.title.contains("Friendly")));
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.kind == TimelineEntryKind::ReminderSent)
            .count(),
        1
    );
}
