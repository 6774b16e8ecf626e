//! Account-standing view of a user
//!
//! Profile fields live elsewhere; the circulation core only reads the standing
//! columns and writes the block flag. Blocking is a one-way gate here;
//! unblocking is a manual staff action outside this core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserStanding {
    pub id: i32,
    /// Notification address; readers without one still circulate, their
    /// notices are log-only.
    pub email: Option<String>,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub staff: bool,
    /// Per-user concurrent-loan cap; 0 means "use the policy default".
    pub loan_limit: i64,
}

impl UserStanding {
    pub fn effective_loan_limit(&self, policy_default: i64) -> i64 {
        if self.loan_limit > 0 {
            self.loan_limit
        } else {
            policy_default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standing(loan_limit: i64) -> UserStanding {
        UserStanding {
            id: 1,
            email: None,
            blocked: false,
            blocked_reason: None,
            blocked_at: None,
            staff: false,
            loan_limit,
        }
    }

    #[test]
    fn per_user_limit_overrides_policy() {
        assert_eq!(standing(3).effective_loan_limit(5), 3);
        assert_eq!(standing(0).effective_loan_limit(5), 5);
    }
}
