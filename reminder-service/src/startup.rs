use crate::handlers::{
    health::{health_check, metrics_endpoint, readiness_check},
    reminders::{can_send, dispatch_reminders, list_reminders, plan_reminders},
    timeline::get_timeline,
};
use crate::services::store::{
    ClientStore, InvoiceStore, MilestoneStore, PaymentStore, PlanStore, ReminderStore, ViewStore,
};
use crate::services::{
    AccrualEngine, Database, DispatchRunner, QuotaGuard, SchedulePlanner, SendPacer,
};
use crate::services::providers::EmailProvider;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Store handles the services are wired from. One concrete backend
/// implements every trait; splitting them keeps the services honest about
/// what they touch.
#[derive(Clone)]
pub struct Stores {
    pub invoices: Arc<dyn InvoiceStore>,
    pub reminders: Arc<dyn ReminderStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub clients: Arc<dyn ClientStore>,
    pub plans: Arc<dyn PlanStore>,
    pub milestones: Arc<dyn MilestoneStore>,
    pub views: Arc<dyn ViewStore>,
}

impl Stores {
    pub fn from_database(db: Arc<Database>) -> Self {
        Self {
            invoices: db.clone(),
            reminders: db.clone(),
            payments: db.clone(),
            clients: db.clone(),
            plans: db.clone(),
            milestones: db.clone(),
            views: db,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Option<Database>,
    pub planner: Arc<SchedulePlanner>,
    pub dispatcher: Arc<DispatchRunner>,
    pub accrual: Arc<AccrualEngine>,
    pub quota: Arc<QuotaGuard>,
    pub reminders: Arc<dyn ReminderStore>,
    pub scheduler_secret: String,
}

impl AppState {
    /// Wire the full service graph over the given store handles.
    pub fn build(
        db: Option<Database>,
        stores: Stores,
        email: Arc<dyn EmailProvider>,
        pacer: SendPacer,
        free_plan_reminder_cap: i64,
        scheduler_secret: String,
    ) -> Self {
        let quota = Arc::new(QuotaGuard::new(
            stores.invoices.clone(),
            stores.reminders.clone(),
            stores.plans.clone(),
            free_plan_reminder_cap,
        ));
        let planner = Arc::new(SchedulePlanner::new(
            stores.invoices.clone(),
            stores.reminders.clone(),
        ));
        let dispatcher = Arc::new(DispatchRunner::new(
            stores.invoices.clone(),
            stores.reminders.clone(),
            stores.payments.clone(),
            stores.clients.clone(),
            quota.clone(),
            email,
            pacer,
        ));
        let accrual = Arc::new(AccrualEngine::new(
            stores.invoices.clone(),
            stores.reminders.clone(),
            stores.payments.clone(),
            stores.milestones.clone(),
            stores.views.clone(),
        ));

        Self {
            db,
            planner,
            dispatcher,
            accrual,
            quota,
            reminders: stores.reminders,
            scheduler_secret,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/invoices/:invoice_id/reminders/plan", post(plan_reminders))
        .route("/invoices/:invoice_id/reminders", get(list_reminders))
        .route("/invoices/:invoice_id/reminders/can-send", get(can_send))
        .route("/invoices/:invoice_id/timeline", get(get_timeline))
        .route("/internal/reminders/dispatch", post(dispatch_reminders))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

/// Background sweep loop. The shared pacer inside the dispatcher keeps
/// overlapping manual and scheduled sweeps under one send-rate ceiling.
pub fn spawn_sweep_loop(dispatcher: Arc<DispatchRunner>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match dispatcher.dispatch_due_reminders().await {
                Ok(summary) => {
                    if summary.total_found > 0 {
                        info!(
                            total_found = summary.total_found,
                            success = summary.success,
                            errors = summary.errors,
                            skipped = summary.skipped,
                            "Reminder sweep completed"
                        );
                    }
                }
                Err(e) => error!("Reminder sweep failed: {}", e),
            }
        }
    })
}
