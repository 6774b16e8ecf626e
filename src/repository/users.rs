//! Users repository: account-standing reads and the block gate
//!
//! Only the standing columns of the users table belong to this core. The
//! block is one-way: `block` refuses to touch an already-blocked row, so a
//! re-run of the enforcement job can never overwrite an earlier reason.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::user::UserStanding,
};

const STANDING_COLUMNS: &str = "id, email, blocked, blocked_reason, blocked_at, staff, loan_limit";

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Account standing for one user
    pub async fn standing(&self, user_id: i32) -> AppResult<UserStanding> {
        sqlx::query_as::<_, UserStanding>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            STANDING_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user_id)))
    }

    /// Standings for a candidate set, non-blocked accounts only
    pub async fn unblocked_standings(&self, user_ids: &[i32]) -> AppResult<Vec<UserStanding>> {
        let standings = sqlx::query_as::<_, UserStanding>(&format!(
            "SELECT {} FROM users WHERE id = ANY($1) AND blocked = FALSE ORDER BY id",
            STANDING_COLUMNS
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(standings)
    }

    /// Block an account with a reason. Returns false when the account was
    /// already blocked (reason untouched) or does not exist.
    pub async fn block(&self, user_id: i32, reason: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET blocked = TRUE, blocked_reason = $2, blocked_at = $3
            WHERE id = $1 AND blocked = FALSE
            "#,
        )
        .bind(user_id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
