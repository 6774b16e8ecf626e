//! Cached inventory counters
//!
//! The catalog owns books; this core only maintains the two aggregate
//! counters. Both are recomputed from copy rows after every status change,
//! never incremented in place, so they cannot drift under retries.

use sqlx::FromRow;

/// Counter pair recomputed from the copy ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct InventoryCounters {
    pub available_copies: i32,
    pub total_copies: i32,
}
