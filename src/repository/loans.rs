//! Loans repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::loan::Loan,
};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::LoanNotFound(id))
    }

    /// Count open loans for a user
    pub async fn count_open_for_user(&self, user_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE user_id = $1 AND returned_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Create a new loan
    pub async fn create(
        &self,
        user_id: i32,
        book_id: i32,
        copy_id: i32,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (user_id, book_id, copy_id, borrowed_at, due_at, renewals)
            VALUES ($1, $2, $3, $4, $5, 0)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(copy_id)
        .bind(borrowed_at)
        .bind(due_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(loan)
    }

    /// Close a loan. Conditional on the loan still being open, so a doubled
    /// return request cannot set `returned_at` twice.
    pub async fn mark_returned(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE loans SET returned_at = $2 WHERE id = $1 AND returned_at IS NULL")
                .bind(loan_id)
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Push the due date and bump the renewal count. Conditional on the loan
    /// still being open and the renewal count not having moved underneath us.
    pub async fn extend(
        &self,
        loan_id: i32,
        expected_renewals: i16,
        new_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans SET due_at = $3, renewals = renewals + 1, last_extended_at = $4
            WHERE id = $1 AND returned_at IS NULL AND renewals = $2
            "#,
        )
        .bind(loan_id)
        .bind(expected_renewals)
        .bind(new_due_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Open loans whose due date lies before `cutoff`, oldest due first
    pub async fn find_overdue(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE returned_at IS NULL AND due_at < $1 ORDER BY due_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Distinct users holding an open loan overdue since before `cutoff`
    pub async fn user_ids_with_overdue_since(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<i32>> {
        let ids: Vec<i32> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM loans WHERE returned_at IS NULL AND due_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
