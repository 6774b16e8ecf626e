//! Delinquency enforcement
//!
//! Periodic scan that blocks accounts exceeding the outstanding-fine limit or
//! holding a loan overdue past the age threshold. Blocking is a one-way gate:
//! an already-blocked account is skipped and its reason never overwritten.

use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::{
    clock::Clock,
    config::CirculationPolicy,
    error::AppResult,
    repository::Repository,
};

/// Why an account gets blocked, if it does.
///
/// Pure decision over the two thresholds; a zero fine limit disables the
/// fine-based condition entirely.
pub fn block_reason(
    outstanding: Decimal,
    fine_limit: Decimal,
    currency: &str,
    has_long_overdue: bool,
    overdue_days: i64,
) -> Option<String> {
    let over_fine_limit = fine_limit > Decimal::ZERO && outstanding >= fine_limit;
    if !over_fine_limit && !has_long_overdue {
        return None;
    }

    let mut parts = Vec::new();
    if over_fine_limit {
        parts.push(format!("outstanding fines {:.2} {}", outstanding, currency));
    }
    if has_long_overdue {
        parts.push(format!("loan overdue for more than {} days", overdue_days));
    }
    Some(format!("Automatic block: {}", parts.join(", ")))
}

/// Outcome counts of one enforcement run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforcementSummary {
    pub examined: usize,
    pub blocked: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct DelinquencyService {
    repository: Repository,
    policy: CirculationPolicy,
    clock: Arc<dyn Clock>,
}

impl DelinquencyService {
    pub fn new(repository: Repository, policy: CirculationPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { repository, policy, clock }
    }

    /// Scan for delinquent accounts and block them.
    ///
    /// A pure function of current persisted state plus the injected clock:
    /// re-running it blocks nobody twice and changes no stored reason, since
    /// the block itself is conditional on the account being unblocked.
    pub async fn enforce(&self, dry_run: bool) -> AppResult<EnforcementSummary> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(self.policy.overdue_block_days);

        let overdue_ids = self.repository.loans.user_ids_with_overdue_since(cutoff).await?;
        let fine_ids = if self.policy.fine_block_limit > Decimal::ZERO {
            self.repository
                .fines
                .user_ids_with_outstanding_at_least(self.policy.fine_block_limit)
                .await?
        } else {
            Vec::new()
        };

        let candidates: Vec<i32> = overdue_ids
            .iter()
            .chain(fine_ids.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut summary = EnforcementSummary::default();
        if candidates.is_empty() {
            tracing::info!("no accounts matched the blocking criteria");
            return Ok(summary);
        }

        let overdue_lookup: HashSet<i32> = overdue_ids.into_iter().collect();
        let outstanding: HashMap<i32, Decimal> = self
            .repository
            .fines
            .outstanding_totals(&candidates)
            .await?
            .into_iter()
            .collect();

        // already-blocked accounts are filtered out here; staff below
        let standings = self.repository.users.unblocked_standings(&candidates).await?;

        for standing in standings {
            if standing.staff {
                continue;
            }
            summary.examined += 1;

            let total = outstanding.get(&standing.id).copied().unwrap_or(Decimal::ZERO);
            let reason = match block_reason(
                total,
                self.policy.fine_block_limit,
                &self.policy.fine_currency,
                overdue_lookup.contains(&standing.id),
                self.policy.overdue_block_days,
            ) {
                Some(reason) => reason,
                None => continue,
            };

            if dry_run {
                tracing::info!(user_id = standing.id, %reason, "dry-run: would block account");
                summary.blocked += 1;
                continue;
            }

            match self.repository.users.block(standing.id, &reason, now).await {
                Ok(true) => {
                    tracing::warn!(user_id = standing.id, %reason, "account blocked");
                    summary.blocked += 1;
                }
                Ok(false) => {
                    // blocked concurrently since the candidate query; the
                    // earlier reason stands
                }
                Err(e) => {
                    tracing::error!(user_id = standing.id, error = %e, "failed to block account");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            blocked = summary.blocked,
            failed = summary.failed,
            dry_run,
            "delinquency enforcement finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn fines_over_limit_trigger_a_block_citing_the_amount() {
        let reason = block_reason(dec(6000), dec(5000), "PLN", false, 30).unwrap();
        assert!(reason.contains("60.00 PLN"), "reason was: {}", reason);
        assert!(!reason.contains("overdue"));
    }

    #[test]
    fn long_overdue_triggers_a_block_citing_the_threshold() {
        let reason = block_reason(dec(0), dec(5000), "PLN", true, 30).unwrap();
        assert!(reason.contains("more than 30 days"), "reason was: {}", reason);
        assert!(!reason.contains("fines"));
    }

    #[test]
    fn both_conditions_are_cited_together() {
        let reason = block_reason(dec(7550), dec(5000), "EUR", true, 14).unwrap();
        assert!(reason.contains("75.50 EUR"));
        assert!(reason.contains("more than 14 days"));
    }

    #[test]
    fn under_both_thresholds_no_block() {
        assert_eq!(block_reason(dec(4999), dec(5000), "PLN", false, 30), None);
        assert_eq!(block_reason(dec(0), dec(5000), "PLN", false, 30), None);
    }

    #[test]
    fn zero_fine_limit_disables_the_fine_condition() {
        assert_eq!(block_reason(dec(100_000), Decimal::ZERO, "PLN", false, 30), None);
        // the overdue condition still applies
        assert!(block_reason(dec(0), Decimal::ZERO, "PLN", true, 30).is_some());
    }

    #[test]
    fn boundary_amount_blocks() {
        assert!(block_reason(dec(5000), dec(5000), "PLN", false, 30).is_some());
    }
}
