//! Reservation (hold) model and status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Reservation status codes (stored in reservations.status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum ReservationStatus {
    /// Waiting in the FIFO queue, no copy assigned.
    Active = 0,
    /// Copy assigned, pickup window running.
    Ready = 1,
    Fulfilled = 2,
    Expired = 3,
    Cancelled = 4,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Fulfilled | ReservationStatus::Expired | ReservationStatus::Cancelled
        )
    }

    /// Allowed-transition table.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Active, Ready) | (Active, Cancelled) | (Ready, Fulfilled) | (Ready, Expired) | (Ready, Cancelled)
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Ready => "READY",
            ReservationStatus::Fulfilled => "FULFILLED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", label)
    }
}

/// One hold request in a book's queue.
///
/// Queue order among ACTIVE reservations is FIFO by `reserved_at`; `copy_id`
/// and `expires_at` are set only once the reservation is promoted to READY.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub status: ReservationStatus,
    pub copy_id: Option<i32>,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}
