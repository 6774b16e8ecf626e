//! Reservations repository for database operations
//!
//! Every state transition is a conditional `UPDATE ... WHERE status = $expected`.
//! A sweep that re-processes the same rows therefore becomes a no-op on the
//! second pass, and two concurrent promoters cannot both move one reservation.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::reservation::{Reservation, ReservationStatus},
};

#[derive(Clone)]
pub struct ReservationsRepository {
    pool: Pool<Postgres>,
}

impl ReservationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get reservation by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation with id {} not found", id)))
    }

    /// Append an ACTIVE reservation to a book's queue
    pub async fn create_active(
        &self,
        user_id: i32,
        book_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (user_id, book_id, status, reserved_at)
            VALUES ($1, $2, 0, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(reservation)
    }

    /// ACTIVE queue for a book, FIFO by reservation time (id breaks ties)
    pub async fn active_queue(&self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let queue = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE book_id = $1 AND status = 0 ORDER BY reserved_at, id",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(queue)
    }

    /// Whether any reader but `user_id` waits in the book's ACTIVE queue
    pub async fn other_user_waiting(&self, book_id: i32, user_id: i32) -> AppResult<bool> {
        let waiting: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE book_id = $1 AND status = 0 AND user_id <> $2)",
        )
        .bind(book_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(waiting)
    }

    /// Whether the user already holds a live (ACTIVE or READY) hold on the book
    pub async fn has_live_for_user_and_book(&self, user_id: i32, book_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE user_id = $1 AND book_id = $2 AND status IN (0, 1))",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Count a user's live (ACTIVE or READY) reservations
    pub async fn count_live_for_user(&self, user_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE user_id = $1 AND status IN (0, 1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// READY reservations whose pickup window has closed, oldest first
    pub async fn find_expired_ready(
        &self,
        now: DateTime<Utc>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Reservation>> {
        let expired = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = 1 AND expires_at <= $1
            ORDER BY expires_at, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(expired)
    }

    /// ACTIVE -> READY with an assigned copy and a pickup deadline
    pub async fn mark_ready(
        &self,
        id: i32,
        copy_id: i32,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 1, copy_id = $2, expires_at = $3 WHERE id = $1 AND status = 0",
        )
        .bind(id)
        .bind(copy_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// READY -> FULFILLED (pickup consumed the held copy)
    pub async fn mark_fulfilled(&self, id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 2, fulfilled_at = $2 WHERE id = $1 AND status = 1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// READY -> EXPIRED, releasing the copy reference. Only rows still READY
    /// and past their deadline move; an already-expired row is left alone.
    pub async fn mark_expired(&self, id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET status = 3, expired_at = $2, copy_id = NULL
            WHERE id = $1 AND status = 1 AND expires_at <= $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// ACTIVE/READY -> CANCELLED, conditional on the expected current status
    pub async fn mark_cancelled(
        &self,
        id: i32,
        expected: ReservationStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET status = 4, cancelled_at = $3, copy_id = NULL
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
