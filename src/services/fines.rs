//! Fine assessment engine
//!
//! A pure function of current loan state and an injected "now": re-running it
//! any number of times within a scheduling window converges on the same fine
//! amounts, creating each loan's overdue fine once and updating it in place
//! afterwards.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::{
    clock::Clock,
    config::CirculationPolicy,
    error::AppResult,
    models::loan::Loan,
    repository::Repository,
};

/// Days a loan can be charged for: whole days late past the grace period.
/// Any positive lateness counts as at least one day late.
pub fn chargeable_days(due_at: DateTime<Utc>, now: DateTime<Utc>, grace_days: i64) -> i64 {
    let seconds_late = (now - due_at).num_seconds();
    if seconds_late <= 0 {
        return 0;
    }
    let days_late = (seconds_late / 86_400).max(1);
    (days_late - grace_days).max(0)
}

/// Charge for a number of chargeable days, normalized to two decimal places.
pub fn overdue_amount(days: i64, daily_rate: Decimal) -> Decimal {
    (Decimal::from(days) * daily_rate).round_dp(2)
}

fn overdue_reason(days: i64) -> String {
    format!("Overdue loan ({} day(s) late)", days)
}

/// What the engine decided for one loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FineChange {
    Created { amount: Decimal },
    Updated { amount: Decimal },
    /// Existing fine already carries the right amount, or nothing chargeable.
    Unchanged,
}

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssessmentSummary {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct FineAssessmentService {
    repository: Repository,
    policy: CirculationPolicy,
    clock: Arc<dyn Clock>,
}

impl FineAssessmentService {
    pub fn new(repository: Repository, policy: CirculationPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { repository, policy, clock }
    }

    /// Assess one loan against the overdue policy. Used by the batch sweep
    /// and by the return path, so a late return is charged immediately.
    pub async fn assess_loan(&self, loan: &Loan, now: DateTime<Utc>) -> AppResult<FineChange> {
        let days = chargeable_days(loan.due_at, now, self.policy.grace_days);
        if days == 0 {
            return Ok(FineChange::Unchanged);
        }

        let amount = overdue_amount(days, self.policy.daily_fine_rate);
        let reason = overdue_reason(days);
        let currency = self.policy.fine_currency.as_str();

        match self.repository.fines.find_active_overdue_for_loan(loan.id).await? {
            Some(existing) => {
                if existing.amount == amount {
                    return Ok(FineChange::Unchanged);
                }
                self.repository
                    .fines
                    .update_amount(existing.id, amount, currency, &reason)
                    .await?;
                Ok(FineChange::Updated { amount })
            }
            None => {
                self.repository
                    .fines
                    .create_overdue(loan.id, amount, currency, &reason, now)
                    .await?;
                Ok(FineChange::Created { amount })
            }
        }
    }

    /// Batch sweep over every open overdue loan.
    ///
    /// Safe to run multiple times per day: amounts are recomputed from the
    /// loan's due date, not accumulated, and at most one overdue fine exists
    /// per loan. Per-loan failures are logged and the run continues.
    pub async fn assess_overdue(&self, dry_run: bool) -> AppResult<AssessmentSummary> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(self.policy.grace_days);
        let loans = self.repository.loans.find_overdue(cutoff).await?;

        let mut summary = AssessmentSummary::default();

        for loan in &loans {
            let days = chargeable_days(loan.due_at, now, self.policy.grace_days);
            if days == 0 {
                continue;
            }
            summary.processed += 1;

            if dry_run {
                let amount = overdue_amount(days, self.policy.daily_fine_rate);
                tracing::info!(
                    loan_id = loan.id,
                    user_id = loan.user_id,
                    %amount,
                    days,
                    "dry-run: would assess overdue fine"
                );
                continue;
            }

            match self.assess_loan(loan, now).await {
                Ok(FineChange::Created { amount }) => {
                    tracing::info!(loan_id = loan.id, user_id = loan.user_id, %amount, "overdue fine created");
                    summary.created += 1;
                }
                Ok(FineChange::Updated { amount }) => {
                    tracing::info!(loan_id = loan.id, user_id = loan.user_id, %amount, "overdue fine updated");
                    summary.updated += 1;
                }
                Ok(FineChange::Unchanged) => {}
                Err(e) => {
                    tracing::error!(loan_id = loan.id, error = %e, "overdue assessment failed for loan");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            dry_run,
            "overdue fine assessment finished"
        );

        Ok(summary)
    }
}
