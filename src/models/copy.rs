//! Copy (lendable unit) model and status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Copy status codes (stored in copies.status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum CopyStatus {
    Available = 0,
    Reserved = 1,
    Loaned = 2,
    Removed = 3,
}

impl CopyStatus {
    /// Allowed-transition table. Anything outside it is a consistency bug in
    /// the allocation path and must surface as an invariant violation.
    /// LOANED -> RESERVED is the return-time handoff: a returned copy goes
    /// straight to the waiting hold without passing through AVAILABLE.
    pub fn can_transition_to(self, next: CopyStatus) -> bool {
        use CopyStatus::*;
        matches!(
            (self, next),
            (Available, Reserved)
                | (Available, Loaned)
                | (Available, Removed)
                | (Reserved, Loaned)
                | (Reserved, Available)
                | (Loaned, Available)
                | (Loaned, Reserved)
                | (Loaned, Removed)
        )
    }
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CopyStatus::Available => "AVAILABLE",
            CopyStatus::Reserved => "RESERVED",
            CopyStatus::Loaned => "LOANED",
            CopyStatus::Removed => "REMOVED",
        };
        write!(f, "{}", label)
    }
}

/// Access type codes (stored in copies.access_type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum AccessType {
    Circulating = 0,
    OnSite = 1,
}

/// One lendable unit of a book.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Copy {
    pub id: i32,
    pub book_id: i32,
    pub inventory_code: String,
    pub status: CopyStatus,
    pub access_type: AccessType,
    pub condition_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
