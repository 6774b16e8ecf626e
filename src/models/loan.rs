//! Loan (lending episode) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Loan model from database.
///
/// A loan is open while `returned_at` is null; `OPEN -> RETURNED` is the whole
/// state machine, and RETURNED is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub copy_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub renewals: i16,
    pub last_extended_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_at < now
    }
}

/// Create loan request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLoan {
    pub user_id: i32,
    pub book_id: i32,
    /// READY reservation to consume instead of a generic claim.
    pub reservation_id: Option<i32>,
    /// Specific copy requested at the desk (e.g. scanned inventory code).
    pub copy_id: Option<i32>,
    /// Access types to prefer when the ledger picks the copy.
    #[serde(default)]
    pub preferred_access_types: Vec<crate::models::copy::AccessType>,
}
