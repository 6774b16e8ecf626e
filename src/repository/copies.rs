//! Copies repository for database operations
//!
//! All status mutations here are single conditional statements that demand the
//! expected current status in their `WHERE` clause. The affected-row count is
//! how callers distinguish success from a lost race: never read-then-write
//! without that guard.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::InventoryCounters,
        copy::{Copy, CopyStatus},
    },
};

#[derive(Clone)]
pub struct CopiesRepository {
    pool: Pool<Postgres>,
}

impl CopiesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get copy by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Copy> {
        sqlx::query_as::<_, Copy>("SELECT * FROM copies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Copy with id {} not found", id)))
    }

    /// AVAILABLE copies of a book, lowest id first.
    ///
    /// A snapshot, not a claim: the ledger ranks these by its selection policy
    /// and then claims one with `claim_specific`, which re-checks the status
    /// atomically.
    pub async fn list_available(&self, book_id: i32) -> AppResult<Vec<Copy>> {
        let copies = sqlx::query_as::<_, Copy>(
            "SELECT * FROM copies WHERE book_id = $1 AND status = 0 ORDER BY id",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(copies)
    }

    /// Atomically claim one specific copy, provided it is AVAILABLE.
    pub async fn claim_specific(
        &self,
        copy_id: i32,
        next: CopyStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Copy>> {
        debug_assert!(CopyStatus::Available.can_transition_to(next));

        let copy = sqlx::query_as::<_, Copy>(
            "UPDATE copies SET status = $2, updated_at = $3 WHERE id = $1 AND status = 0 RETURNING *",
        )
        .bind(copy_id)
        .bind(next)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(copy)
    }

    /// Conditional status transition. Returns whether a row moved.
    ///
    /// Rejects transitions outside the allowed table before touching the
    /// database; finding the copy in an unexpected state afterwards is the
    /// caller's signal of a consistency fault.
    pub async fn transition(
        &self,
        copy_id: i32,
        from: CopyStatus,
        to: CopyStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        if !from.can_transition_to(to) {
            return Err(AppError::Invariant(format!(
                "illegal copy transition {} -> {} for copy {}",
                from, to, copy_id
            )));
        }

        let result = sqlx::query(
            "UPDATE copies SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(copy_id)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Recompute the owning book's cached counters from copy rows.
    ///
    /// Never increments: `available_copies` is the count of AVAILABLE copies
    /// and `total_copies` the count of non-REMOVED copies, whatever happened
    /// before this call.
    pub async fn recount_book(&self, book_id: i32) -> AppResult<InventoryCounters> {
        let counters = sqlx::query_as::<_, InventoryCounters>(
            r#"
            UPDATE books SET
                available_copies = (SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status = 0),
                total_copies = (SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status <> 3)
            WHERE id = $1
            RETURNING available_copies, total_copies
            "#,
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        Ok(counters)
    }

    /// Read the cached counters (tests compare them against a live recount).
    pub async fn counters(&self, book_id: i32) -> AppResult<InventoryCounters> {
        sqlx::query_as::<_, InventoryCounters>(
            "SELECT available_copies, total_copies FROM books WHERE id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))
    }
}
