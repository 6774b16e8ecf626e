//! Fine (monetary charge) model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Fine kind codes (stored in fines.kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum FineKind {
    /// Created and maintained by the assessment engine; at most one active
    /// (unpaid) overdue fine exists per loan.
    Overdue = 0,
    /// Entered by staff (damage, lost item, ...); outside the engine's reach.
    Manual = 1,
}

/// Monetary charge tied to a loan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fine {
    pub id: i32,
    pub loan_id: i32,
    pub kind: FineKind,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}
