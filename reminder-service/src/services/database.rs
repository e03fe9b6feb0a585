//! Database service for reminder-service.
//!
//! Owns the reminder_records, invoice_milestones, and invoice_views tables.
//! Invoices, clients, payments, and subscriptions belong to the surrounding
//! application and are reached read-mostly through the same pool.

use crate::error::AppError;
use crate::models::{
    Client, Invoice, InvoiceView, Milestone, Payment, PlanTier, ReminderRecord, ReminderSettings,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    ClientStore, InvoiceStore, MilestoneStore, PaymentStore, PlanStore, ReminderStore, ViewStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const REMINDER_COLUMNS: &str = "reminder_id, invoice_id, tone, offset_days, scheduled_at, \
     status, plan_version, email_id, failure_reason, sent_utc, created_utc";

const INVOICE_COLUMNS: &str = "invoice_id, user_id, client_id, status, total, due_date, \
     payment_terms, payment_terms_enabled, sent_utc, paid_utc, late_fee_enabled, late_fee_type, \
     late_fee_amount, late_fee_grace_days, reminder_count, last_reminder_sent, plan_version, \
     updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "reminder-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for Database {
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_reminder_settings(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<ReminderSettings>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_reminder_settings"])
            .start_timer();

        let raw: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT settings FROM invoice_reminder_settings WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get reminder settings: {}", e))
        })?;

        timer.observe_duration();

        match raw {
            Some(value) => {
                let settings = serde_json::from_value(value).map_err(|e| {
                    AppError::DataIntegrity(anyhow::anyhow!("Malformed reminder settings: {}", e))
                })?;
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn mark_paid(&self, invoice_id: Uuid, paid_utc: DateTime<Utc>) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_paid"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_utc = $2, updated_utc = NOW()
            WHERE invoice_id = $1 AND status <> 'paid'
            "#,
        )
        .bind(invoice_id)
        .bind(paid_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark paid: {}", e)))?;

        timer.observe_duration();

        info!(invoice_id = %invoice_id, "Invoice marked paid");

        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn bump_plan_version(&self, invoice_id: Uuid) -> Result<i32, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["bump_plan_version"])
            .start_timer();

        let version: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE invoices
            SET plan_version = plan_version + 1, updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING plan_version
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to bump plan version: {}", e))
        })?;

        timer.observe_duration();

        version.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn record_reminder_sent(
        &self,
        invoice_id: Uuid,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_reminder_sent"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE invoices
            SET reminder_count = reminder_count + 1,
                last_reminder_sent = $2,
                updated_utc = NOW()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(sent_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record reminder sent: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }
}

#[async_trait]
impl ReminderStore for Database {
    #[instrument(skip(self, records))]
    async fn insert_batch(&self, records: &[ReminderRecord]) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_batch"])
            .start_timer();

        for record in records {
            sqlx::query(&format!(
                "INSERT INTO reminder_records ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                REMINDER_COLUMNS
            ))
            .bind(record.reminder_id)
            .bind(record.invoice_id)
            .bind(&record.tone)
            .bind(record.offset_days)
            .bind(record.scheduled_at)
            .bind(&record.status)
            .bind(record.plan_version)
            .bind(&record.email_id)
            .bind(&record.failure_reason)
            .bind(record.sent_utc)
            .bind(record.created_utc)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert reminder: {}", e))
            })?;
        }

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(reminder_id = %reminder_id))]
    async fn get(&self, reminder_id: Uuid) -> Result<Option<ReminderRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_reminder"])
            .start_timer();

        let record = sqlx::query_as::<_, ReminderRecord>(&format!(
            "SELECT {} FROM reminder_records WHERE reminder_id = $1",
            REMINDER_COLUMNS
        ))
        .bind(reminder_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get reminder: {}", e)))?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn records_for(&self, invoice_id: Uuid) -> Result<Vec<ReminderRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["records_for"])
            .start_timer();

        let records = sqlx::query_as::<_, ReminderRecord>(&format!(
            "SELECT {} FROM reminder_records WHERE invoice_id = $1 ORDER BY scheduled_at",
            REMINDER_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list reminders: {}", e))
        })?;

        timer.observe_duration();

        Ok(records)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn delete_scheduled(&self, invoice_id: Uuid) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_scheduled"])
            .start_timer();

        let result = sqlx::query(
            "DELETE FROM reminder_records WHERE invoice_id = $1 AND status = 'scheduled'",
        )
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to purge scheduled reminders: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn dedupe_failed(&self, invoice_id: Uuid) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["dedupe_failed"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM reminder_records
            WHERE invoice_id = $1
              AND status = 'failed'
              AND reminder_id NOT IN (
                  SELECT DISTINCT ON (tone) reminder_id
                  FROM reminder_records
                  WHERE invoice_id = $1 AND status = 'failed'
                  ORDER BY tone, created_utc DESC
              )
            "#,
        )
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to dedupe failed reminders: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ReminderRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["due_scheduled"])
            .start_timer();

        // Orphan records (invoice row gone) are surfaced so the sweep can
        // fail them with a reason instead of leaving them due forever.
        let records = sqlx::query_as::<_, ReminderRecord>(
            r#"
            SELECT r.reminder_id, r.invoice_id, r.tone, r.offset_days, r.scheduled_at,
                   r.status, r.plan_version, r.email_id, r.failure_reason, r.sent_utc,
                   r.created_utc
            FROM reminder_records r
            LEFT JOIN invoices i ON i.invoice_id = r.invoice_id
            WHERE r.status = 'scheduled'
              AND r.scheduled_at <= $1
              AND (i.invoice_id IS NULL
                   OR (i.status NOT IN ('draft', 'paid')
                       AND i.plan_version = r.plan_version))
            ORDER BY r.scheduled_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to query due reminders: {}", e))
        })?;

        timer.observe_duration();

        Ok(records)
    }

    #[instrument(skip(self), fields(reminder_id = %reminder_id))]
    async fn mark_sent(
        &self,
        reminder_id: Uuid,
        email_id: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_sent"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reminder_records
            SET status = 'sent', email_id = $2, sent_utc = $3
            WHERE reminder_id = $1
            "#,
        )
        .bind(reminder_id)
        .bind(email_id)
        .bind(sent_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark reminder sent: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(reminder_id = %reminder_id))]
    async fn mark_failed(&self, reminder_id: Uuid, reason: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_failed"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reminder_records
            SET status = 'failed', failure_reason = $2
            WHERE reminder_id = $1
            "#,
        )
        .bind(reminder_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark reminder failed: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(reminder_id = %reminder_id))]
    async fn mark_cancelled(
        &self,
        reminder_id: Uuid,
        reason: &str,
        email_id: Option<&str>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_cancelled"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reminder_records
            SET status = 'cancelled',
                failure_reason = $2,
                email_id = COALESCE($3, email_id)
            WHERE reminder_id = $1
            "#,
        )
        .bind(reminder_id)
        .bind(reason)
        .bind(email_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark reminder cancelled: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn cancel_scheduled(&self, invoice_id: Uuid, reason: &str) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_scheduled"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reminder_records
            SET status = 'cancelled', failure_reason = $2
            WHERE invoice_id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(invoice_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to cancel scheduled reminders: {}",
                e
            ))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn count_sent(&self, invoice_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_sent"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reminder_records WHERE invoice_id = $1 AND status = 'sent'",
        )
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count sent reminders: {}", e))
        })?;

        timer.observe_duration();

        Ok(count)
    }
}

#[async_trait]
impl PaymentStore for Database {
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn payments_for(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_for"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, amount, payment_date, created_utc
            FROM payments
            WHERE invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }
}

#[async_trait]
impl ClientStore for Database {
    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(
            "SELECT client_id, name, email FROM clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))?;

        timer.observe_duration();

        Ok(client)
    }
}

#[async_trait]
impl PlanStore for Database {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn plan_for_user(&self, user_id: Uuid) -> Result<PlanTier, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["plan_for_user"])
            .start_timer();

        let plan: Option<String> = sqlx::query_scalar(
            "SELECT plan FROM user_subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan
            .map(|p| PlanTier::from_string(&p))
            .unwrap_or(PlanTier::Free))
    }
}

#[async_trait]
impl MilestoneStore for Database {
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn milestones_for(&self, invoice_id: Uuid) -> Result<Vec<Milestone>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["milestones_for"])
            .start_timer();

        let milestones = sqlx::query_as::<_, Milestone>(
            r#"
            SELECT milestone_id, invoice_id, kind, day_number, amount, occurred_utc, created_utc
            FROM invoice_milestones
            WHERE invoice_id = $1
            ORDER BY occurred_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list milestones: {}", e))
        })?;

        timer.observe_duration();

        Ok(milestones)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id, day_number))]
    async fn upsert_overdue_day(
        &self,
        invoice_id: Uuid,
        day_number: i32,
        occurred_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_overdue_day"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoice_milestones (milestone_id, invoice_id, kind, day_number, occurred_utc)
            VALUES ($1, $2, 'overdue_day', $3, $4)
            ON CONFLICT (invoice_id, day_number) WHERE kind = 'overdue_day' DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(day_number)
        .bind(occurred_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert overdue milestone: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn find_late_fee(&self, invoice_id: Uuid) -> Result<Option<Milestone>, AppError> {
        let milestone = sqlx::query_as::<_, Milestone>(
            r#"
            SELECT milestone_id, invoice_id, kind, day_number, amount, occurred_utc, created_utc
            FROM invoice_milestones
            WHERE invoice_id = $1 AND kind = 'late_fee_applied'
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find late fee: {}", e)))?;

        Ok(milestone)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn insert_late_fee(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
        occurred_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_late_fee"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoice_milestones (milestone_id, invoice_id, kind, amount, occurred_utc)
            VALUES ($1, $2, 'late_fee_applied', $3, $4)
            ON CONFLICT (invoice_id) WHERE kind = 'late_fee_applied' DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(amount)
        .bind(occurred_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert late fee: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(milestone_id = %milestone_id))]
    async fn update_late_fee_amount(
        &self,
        milestone_id: Uuid,
        amount: Decimal,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE invoice_milestones SET amount = $2 WHERE milestone_id = $1")
            .bind(milestone_id)
            .bind(amount)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to correct late fee: {}", e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl ViewStore for Database {
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn views_for(&self, invoice_id: Uuid) -> Result<Vec<InvoiceView>, AppError> {
        let views = sqlx::query_as::<_, InvoiceView>(
            r#"
            SELECT view_id, invoice_id, viewed_utc
            FROM invoice_views
            WHERE invoice_id = $1
            ORDER BY viewed_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list views: {}", e)))?;

        Ok(views)
    }
}
