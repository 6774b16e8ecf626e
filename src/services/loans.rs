//! Loan lifecycle manager
//!
//! Creates, extends, and closes loans against copies claimed from the ledger.
//! The return path hands the copy to the reservation queue before the request
//! finishes: with waiters it moves LOANED -> RESERVED directly, so a freed
//! copy is never visible as AVAILABLE ahead of a waiting hold.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::{
    clock::Clock,
    config::CirculationPolicy,
    error::{AppError, AppResult},
    models::{
        copy::CopyStatus,
        loan::{CreateLoan, Loan},
        reservation::ReservationStatus,
    },
    repository::Repository,
    services::{fines::FineAssessmentService, ledger::LedgerService, reservations::ReservationsService},
};

/// Extensions are measured from the current due date, never from "now", so
/// overlapping extension requests cannot accumulate drift.
pub fn extended_due(current_due: DateTime<Utc>, loan_period_days: i64) -> DateTime<Utc> {
    current_due + Duration::days(loan_period_days)
}

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    ledger: LedgerService,
    reservations: ReservationsService,
    fines: FineAssessmentService,
    policy: CirculationPolicy,
    clock: Arc<dyn Clock>,
}

impl LoansService {
    pub fn new(
        repository: Repository,
        ledger: LedgerService,
        reservations: ReservationsService,
        fines: FineAssessmentService,
        policy: CirculationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repository, ledger, reservations, fines, policy, clock }
    }

    /// Borrow a book: claim a copy and open a loan against it.
    pub async fn create_loan(&self, request: &CreateLoan) -> AppResult<Loan> {
        let now = self.clock.now();

        let standing = self.repository.users.standing(request.user_id).await?;
        if standing.blocked {
            return Err(AppError::UserBlocked(
                standing
                    .blocked_reason
                    .unwrap_or_else(|| "account blocked".to_string()),
            ));
        }

        let open = self.repository.loans.count_open_for_user(request.user_id).await?;
        let limit = standing.effective_loan_limit(self.policy.loan_limit);
        if open >= limit {
            return Err(AppError::LoanLimitExceeded { current: open, limit });
        }

        let copy = if let Some(reservation_id) = request.reservation_id {
            self.consume_ready_reservation(request, reservation_id, now).await?
        } else if let Some(copy_id) = request.copy_id {
            self.claim_requested_copy(request.book_id, copy_id).await?
        } else {
            self.ledger
                .claim(request.book_id, &request.preferred_access_types)
                .await?
        };

        let due_at = now + Duration::days(self.policy.loan_period_days);
        let loan = self
            .repository
            .loans
            .create(request.user_id, request.book_id, copy.id, now, due_at)
            .await?;

        tracing::info!(
            loan_id = loan.id,
            user_id = loan.user_id,
            book_id = loan.book_id,
            copy_id = loan.copy_id,
            %due_at,
            "loan created"
        );

        Ok(loan)
    }

    /// A READY reservation hands its held copy straight to the loan, bypassing
    /// the generic claim. The reservation is consumed (FULFILLED) first; the
    /// copy it held must then be RESERVED, anything else is a consistency bug.
    async fn consume_ready_reservation(
        &self,
        request: &CreateLoan,
        reservation_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<crate::models::copy::Copy> {
        let reservation = self.repository.reservations.get_by_id(reservation_id).await?;

        if reservation.user_id != request.user_id {
            return Err(AppError::ReservationNotUsable(
                "reservation belongs to another reader".to_string(),
            ));
        }
        if reservation.book_id != request.book_id {
            return Err(AppError::ReservationNotUsable(
                "reservation is for another book".to_string(),
            ));
        }
        if reservation.status != ReservationStatus::Ready {
            return Err(AppError::ReservationNotUsable(format!(
                "reservation is {}, not READY",
                reservation.status
            )));
        }
        let copy_id = reservation.copy_id.ok_or_else(|| {
            AppError::Invariant(format!("READY reservation {} holds no copy", reservation.id))
        })?;

        // Consume the reservation first; the conditional update loses against
        // a concurrent expiry sweep, which is exactly when the pickup must be
        // refused.
        if !self.repository.reservations.mark_fulfilled(reservation.id, now).await? {
            return Err(AppError::ReservationNotUsable(
                "reservation expired or was cancelled".to_string(),
            ));
        }

        let moved = self
            .repository
            .copies
            .transition(copy_id, CopyStatus::Reserved, CopyStatus::Loaned, now)
            .await?;
        if !moved {
            return Err(AppError::Invariant(format!(
                "copy {} held by READY reservation {} was not RESERVED",
                copy_id, reservation.id
            )));
        }
        self.repository.copies.recount_book(request.book_id).await?;

        self.repository.copies.get_by_id(copy_id).await
    }

    async fn claim_requested_copy(
        &self,
        book_id: i32,
        copy_id: i32,
    ) -> AppResult<crate::models::copy::Copy> {
        let copy = self.repository.copies.get_by_id(copy_id).await?;
        if copy.book_id != book_id {
            return Err(AppError::Validation(format!(
                "copy {} does not belong to book {}",
                copy_id, book_id
            )));
        }

        self.ledger
            .claim_copy(copy_id)
            .await?
            .ok_or_else(|| AppError::NoCopyAvailable(format!("copy {} is {}", copy_id, copy.status)))
    }

    /// Return a borrowed copy.
    ///
    /// Order matters: close the loan, charge any overdue fine, then hand the
    /// copy to the book's reservation queue (or the shelf), all within this
    /// request, never deferred.
    pub async fn return_loan(&self, loan_id: i32, caller_id: i32) -> AppResult<Loan> {
        let now = self.clock.now();
        let loan = self.repository.loans.get_by_id(loan_id).await?;

        let caller = self.repository.users.standing(caller_id).await?;
        if loan.user_id != caller_id && !caller.staff {
            return Err(AppError::Forbidden("Loan belongs to another reader".to_string()));
        }

        if !self.repository.loans.mark_returned(loan.id, now).await? {
            return Err(AppError::AlreadyReturned);
        }

        if loan.due_at < now {
            let change = self.fines.assess_loan(&loan, now).await?;
            tracing::info!(loan_id = loan.id, ?change, "late return assessed");
        }

        let copy = self.repository.copies.get_by_id(loan.copy_id).await?;
        self.reservations.promote_or_release(&copy).await?;

        tracing::info!(loan_id = loan.id, copy_id = loan.copy_id, "loan returned");

        self.repository.loans.get_by_id(loan.id).await
    }

    /// Extend an open loan by one loan period, measured from its current due
    /// date. Refused while another reader waits in the book's queue, and
    /// capped by the renewal policy.
    pub async fn extend_loan(&self, loan_id: i32, caller_id: i32) -> AppResult<Loan> {
        let now = self.clock.now();
        let loan = self.repository.loans.get_by_id(loan_id).await?;

        let caller = self.repository.users.standing(caller_id).await?;
        if loan.user_id != caller_id && !caller.staff {
            return Err(AppError::Forbidden("Loan belongs to another reader".to_string()));
        }

        if !loan.is_open() {
            return Err(AppError::AlreadyReturned);
        }

        if loan.renewals >= self.policy.max_renewals {
            return Err(AppError::ExtensionDenied(format!(
                "renewal limit reached ({}/{})",
                loan.renewals, self.policy.max_renewals
            )));
        }

        if self
            .repository
            .reservations
            .other_user_waiting(loan.book_id, loan.user_id)
            .await?
        {
            return Err(AppError::ExtensionDenied(
                "book is reserved by another reader".to_string(),
            ));
        }

        let new_due = extended_due(loan.due_at, self.policy.loan_period_days);
        if !self
            .repository
            .loans
            .extend(loan.id, loan.renewals, new_due, now)
            .await?
        {
            return Err(AppError::ExtensionDenied(
                "loan changed concurrently, retry".to_string(),
            ));
        }

        tracing::info!(loan_id = loan.id, %new_due, "loan extended");

        self.repository.loans.get_by_id(loan.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extension_is_anchored_to_due_date_not_now() {
        let due = Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap();
        let new_due = extended_due(due, 21);
        assert_eq!(new_due, Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn repeated_extension_advances_by_whole_periods() {
        let due = Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap();
        let twice = extended_due(extended_due(due, 14), 14);
        assert_eq!(twice - due, Duration::days(28));
    }
}
