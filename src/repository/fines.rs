//! Fines repository for database operations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres, Row};

use crate::{error::AppResult, models::fine::Fine};

#[derive(Clone)]
pub struct FinesRepository {
    pool: Pool<Postgres>,
}

impl FinesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The loan's active overdue fine, if one exists.
    ///
    /// The assessment engine keeps at most one unpaid overdue fine per loan;
    /// this is the row it updates instead of duplicating.
    pub async fn find_active_overdue_for_loan(&self, loan_id: i32) -> AppResult<Option<Fine>> {
        let fine = sqlx::query_as::<_, Fine>(
            "SELECT * FROM fines WHERE loan_id = $1 AND kind = 0 AND paid_at IS NULL",
        )
        .bind(loan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fine)
    }

    /// Create an overdue fine
    pub async fn create_overdue(
        &self,
        loan_id: i32,
        amount: Decimal,
        currency: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Fine> {
        let fine = sqlx::query_as::<_, Fine>(
            r#"
            INSERT INTO fines (loan_id, kind, amount, currency, reason, created_at)
            VALUES ($1, 0, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(amount)
        .bind(currency)
        .bind(reason)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(fine)
    }

    /// Update an existing fine's amount and reason
    pub async fn update_amount(
        &self,
        fine_id: i32,
        amount: Decimal,
        currency: &str,
        reason: &str,
    ) -> AppResult<()> {
        sqlx::query("UPDATE fines SET amount = $2, currency = $3, reason = $4 WHERE id = $1")
            .bind(fine_id)
            .bind(amount)
            .bind(currency)
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Users whose unpaid fine total has reached `limit`
    pub async fn user_ids_with_outstanding_at_least(&self, limit: Decimal) -> AppResult<Vec<i32>> {
        let ids: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT l.user_id
            FROM fines f
            JOIN loans l ON f.loan_id = l.id
            WHERE f.paid_at IS NULL
            GROUP BY l.user_id
            HAVING SUM(f.amount) >= $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Unpaid totals per user for a candidate set
    pub async fn outstanding_totals(&self, user_ids: &[i32]) -> AppResult<Vec<(i32, Decimal)>> {
        let rows = sqlx::query(
            r#"
            SELECT l.user_id, SUM(f.amount) AS total
            FROM fines f
            JOIN loans l ON f.loan_id = l.id
            WHERE f.paid_at IS NULL AND l.user_id = ANY($1)
            GROUP BY l.user_id
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("user_id"), row.get("total")))
            .collect())
    }
}
