//! Database service for dojo-billing.
//!
//! Wraps a PgPool and exposes typed query methods for families, enrollments,
//! tax rates, discount codes, invoices, and payments. Money columns are
//! integer minor units throughout.

use crate::models::{
    CreatePayment, DiscountCode, Enrollment, Family, Invoice, Payment, PaymentStatus, PaymentTax,
    Student, TaxRate,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use dojo_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Database service wrapping a Postgres connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database service with a connection pool.
    #[instrument(skip(database_url), fields(service = "dojo-billing"))]
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to connect to database: {}", e))
            })?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Family Operations
    // -------------------------------------------------------------------------

    /// Get a family by ID.
    #[instrument(skip(self), fields(family_id = %family_id))]
    pub async fn get_family(&self, family_id: Uuid) -> Result<Option<Family>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_family"])
            .start_timer();

        let family = sqlx::query_as::<_, Family>(
            r#"
            SELECT family_id, name, email, created_utc
            FROM families
            WHERE family_id = $1
            "#,
        )
        .bind(family_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get family: {}", e)))?;

        timer.observe_duration();

        Ok(family)
    }

    /// Get active students of a family, restricted to the given IDs.
    #[instrument(skip(self, student_ids), fields(family_id = %family_id))]
    pub async fn get_active_students(
        &self,
        family_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<Vec<Student>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_students"])
            .start_timer();

        let students = sqlx::query_as::<_, Student>(
            r#"
            SELECT student_id, family_id, first_name, last_name, active
            FROM students
            WHERE family_id = $1 AND student_id = ANY($2) AND active = TRUE
            ORDER BY last_name, first_name
            "#,
        )
        .bind(family_id)
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get students: {}", e)))?;

        timer.observe_duration();

        Ok(students)
    }

    /// Get active enrollments for the given students.
    #[instrument(skip(self, student_ids))]
    pub async fn get_active_enrollments(
        &self,
        student_ids: &[Uuid],
    ) -> Result<Vec<Enrollment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_enrollments"])
            .start_timer();

        let enrollments = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT enrollment_id, student_id, program_name,
                monthly_fee, yearly_fee, individual_session_fee, currency, active
            FROM enrollments
            WHERE student_id = ANY($1) AND active = TRUE
            ORDER BY program_name
            "#,
        )
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get enrollments: {}", e))
        })?;

        timer.observe_duration();

        Ok(enrollments)
    }

    // -------------------------------------------------------------------------
    // Tax Rate Operations
    // -------------------------------------------------------------------------

    /// Get active tax rates that apply to a charge category.
    #[instrument(skip(self))]
    pub async fn applicable_tax_rates(&self, category: &str) -> Result<Vec<TaxRate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["applicable_tax_rates"])
            .start_timer();

        let rates = sqlx::query_as::<_, TaxRate>(
            r#"
            SELECT tax_rate_id, name, rate, applies_to, active, created_utc
            FROM tax_rates
            WHERE active = TRUE AND $1 = ANY(applies_to)
            ORDER BY name
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get tax rates: {}", e)))?;

        timer.observe_duration();

        Ok(rates)
    }

    // -------------------------------------------------------------------------
    // Discount Operations
    // -------------------------------------------------------------------------

    /// Look up a discount code by its code string, case-insensitively.
    #[instrument(skip(self))]
    pub async fn find_discount_by_code(&self, code: &str) -> Result<Option<DiscountCode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_discount_by_code"])
            .start_timer();

        let discount = sqlx::query_as::<_, DiscountCode>(
            r#"
            SELECT discount_code_id, code, name, discount_type, discount_value,
                scope, family_id, student_id, applicable_to, usage_type,
                max_uses, current_uses, valid_from, valid_until, active,
                created_automatically, created_utc
            FROM discount_codes
            WHERE lower(code) = lower($1)
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find discount code: {}", e))
        })?;

        timer.observe_duration();

        Ok(discount)
    }

    /// Candidate discount codes for a family and charge category.
    ///
    /// Applies the cheap SQL-side filters (active, window, remaining uses,
    /// category, scope). Final eligibility and ranking happen in the discount
    /// module so the rules live in one place.
    #[instrument(skip(self, student_ids), fields(family_id = %family_id))]
    pub async fn eligible_discounts(
        &self,
        family_id: Uuid,
        student_ids: &[Uuid],
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DiscountCode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["eligible_discounts"])
            .start_timer();

        let discounts = sqlx::query_as::<_, DiscountCode>(
            r#"
            SELECT discount_code_id, code, name, discount_type, discount_value,
                scope, family_id, student_id, applicable_to, usage_type,
                max_uses, current_uses, valid_from, valid_until, active,
                created_automatically, created_utc
            FROM discount_codes
            WHERE active = TRUE
              AND valid_from <= $4
              AND (valid_until IS NULL OR valid_until >= $4)
              AND (max_uses IS NULL OR current_uses < max_uses)
              AND $3 = ANY(applicable_to)
              AND (
                  scope = 'global'
                  OR (scope = 'per_family' AND family_id = $1)
                  OR (scope = 'per_student' AND student_id = ANY($2))
              )
            ORDER BY code
            "#,
        )
        .bind(family_id)
        .bind(student_ids)
        .bind(category)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list eligible discounts: {}", e))
        })?;

        timer.observe_duration();

        Ok(discounts)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Insert a pending payment with its tax snapshots and payee rows in one
    /// transaction.
    #[instrument(skip(self, input), fields(family_id = %input.family_id))]
    pub async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let payment_id = Uuid::new_v4();
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                payment_id, family_id, payment_type, status, currency,
                subtotal_amount, discount_amount, tax_amount, total_amount,
                discount_code_id, invoice_id, provider
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING payment_id, family_id, payment_type, status, currency,
                subtotal_amount, discount_amount, tax_amount, total_amount,
                discount_code_id, invoice_id, provider, provider_session_id,
                provider_payment_intent_id, receipt_url, payment_date, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(input.family_id)
        .bind(input.payment_type.as_str())
        .bind(input.currency.as_str())
        .bind(input.subtotal_amount)
        .bind(input.discount_amount)
        .bind(input.tax_amount)
        .bind(input.total_amount)
        .bind(input.discount_code_id)
        .bind(input.invoice_id)
        .bind(&input.provider)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create payment: {}", e)))?;

        for snapshot in &input.taxes {
            sqlx::query(
                r#"
                INSERT INTO payment_taxes (
                    payment_tax_id, payment_id, tax_rate_id,
                    tax_name_snapshot, tax_rate_snapshot, tax_amount
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(payment.payment_id)
            .bind(snapshot.tax_rate_id)
            .bind(&snapshot.tax_name_snapshot)
            .bind(snapshot.tax_rate_snapshot)
            .bind(snapshot.tax_amount.minor_units())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment tax: {}", e))
            })?;
        }

        for payee in &input.payees {
            sqlx::query(
                r#"
                INSERT INTO payment_students (payment_id, student_id, quantity)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(payment.payment_id)
            .bind(payee.student_id)
            .bind(payee.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment student: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(payment_id = %payment.payment_id, "Pending payment created");

        Ok(payment)
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, family_id, payment_type, status, currency,
                subtotal_amount, discount_amount, tax_amount, total_amount,
                discount_code_id, invoice_id, provider, provider_session_id,
                provider_payment_intent_id, receipt_url, payment_date, created_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Tax snapshot rows of a payment.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment_taxes(&self, payment_id: Uuid) -> Result<Vec<PaymentTax>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment_taxes"])
            .start_timer();

        let taxes = sqlx::query_as::<_, PaymentTax>(
            r#"
            SELECT payment_tax_id, payment_id, tax_rate_id,
                tax_name_snapshot, tax_rate_snapshot, tax_amount
            FROM payment_taxes
            WHERE payment_id = $1
            ORDER BY tax_name_snapshot
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get payment taxes: {}", e))
        })?;

        timer.observe_duration();

        Ok(taxes)
    }

    /// Record the provider checkout session on a pending payment.
    ///
    /// Returns false when the payment is no longer pending.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn set_provider_session(
        &self,
        payment_id: Uuid,
        provider_session_id: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_provider_session"])
            .start_timer();

        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET provider_session_id = $2
            WHERE payment_id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_id)
        .bind(provider_session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to set provider session: {}", e))
        })?
        .rows_affected();

        timer.observe_duration();

        Ok(updated == 1)
    }

    /// Find a payment by its provider checkout session ID.
    #[instrument(skip(self))]
    pub async fn find_payment_by_session(
        &self,
        provider: &str,
        provider_session_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_by_session"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, family_id, payment_type, status, currency,
                subtotal_amount, discount_amount, tax_amount, total_amount,
                discount_code_id, invoice_id, provider, provider_session_id,
                provider_payment_intent_id, receipt_url, payment_date, created_utc
            FROM payments
            WHERE provider = $1 AND provider_session_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find payment by session: {}", e))
        })?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Settle a pending payment and apply its side effects in one transaction.
    ///
    /// The status update is conditional on the row still being pending, which
    /// makes webhook redelivery and the watcher/webhook race idempotent: only
    /// the first settlement wins, later calls return false. On success the
    /// discount use is consumed (conditional on remaining uses) and a linked
    /// invoice is marked paid.
    #[instrument(skip(self, payment), fields(payment_id = %payment.payment_id, to = status.as_str()))]
    pub async fn settle_payment(
        &self,
        payment: &Payment,
        status: PaymentStatus,
        payment_date: Option<DateTime<Utc>>,
        receipt_url: Option<&str>,
        payment_intent_id: Option<&str>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                payment_date = $3,
                receipt_url = COALESCE($4, receipt_url),
                provider_payment_intent_id = COALESCE($5, provider_payment_intent_id)
            WHERE payment_id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment.payment_id)
        .bind(status.as_str())
        .bind(payment_date)
        .bind(receipt_url)
        .bind(payment_intent_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update payment status: {}", e))
        })?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        if status == PaymentStatus::Succeeded {
            if let Some(discount_code_id) = payment.discount_code_id {
                let consumed = sqlx::query(
                    r#"
                    UPDATE discount_codes
                    SET current_uses = current_uses + 1
                    WHERE discount_code_id = $1
                      AND (max_uses IS NULL OR current_uses < max_uses)
                    "#,
                )
                .bind(discount_code_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to consume discount use: {}",
                        e
                    ))
                })?
                .rows_affected();

                if consumed == 0 {
                    // The buyer already paid; record the payment anyway.
                    warn!(
                        payment_id = %payment.payment_id,
                        discount_code_id = %discount_code_id,
                        "Discount code exhausted before settlement"
                    );
                }
            }

            if let Some(invoice_id) = payment.invoice_id {
                let marked = sqlx::query(
                    r#"
                    UPDATE invoices
                    SET status = 'paid', paid_utc = $3, paid_by_payment_id = $2
                    WHERE invoice_id = $1 AND status = 'issued'
                    "#,
                )
                .bind(invoice_id)
                .bind(payment.payment_id)
                .bind(payment_date.unwrap_or_else(Utc::now))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
                })?
                .rows_affected();

                if marked == 0 {
                    warn!(
                        payment_id = %payment.payment_id,
                        invoice_id = %invoice_id,
                        "Invoice was not in issued state when its payment settled"
                    );
                }
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(payment_id = %payment.payment_id, status = status.as_str(), "Payment settled");

        Ok(true)
    }

    /// Fail pending payments that never got a provider session and are older
    /// than the cutoff. Returns the number of rows swept.
    #[instrument(skip(self))]
    pub async fn expire_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_stale_pending"])
            .start_timer();

        let swept = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed'
            WHERE status = 'pending'
              AND provider_session_id IS NULL
              AND created_utc < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to expire stale payments: {}", e))
        })?
        .rows_affected();

        timer.observe_duration();

        Ok(swept)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, family_id, status, currency,
                subtotal_amount, discount_amount, tax_amount, total_amount,
                due_date, created_utc, paid_utc, paid_by_payment_id
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }
}
