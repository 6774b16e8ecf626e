//! Reservation queue
//!
//! One FIFO queue per book title. A copy that frees up is handed straight to
//! the oldest ACTIVE reservation, never crossing AVAILABLE while anyone
//! waits; a READY hold that is not collected inside the pickup window expires
//! and the copy cascades to the next survivor. The promotion itself is the
//! source of truth; the notice to the reader is best-effort.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::{
    clock::Clock,
    config::CirculationPolicy,
    error::{AppError, AppResult},
    models::{
        copy::{Copy, CopyStatus},
        reservation::{Reservation, ReservationStatus},
    },
    repository::Repository,
    services::{
        ledger::LedgerService,
        notifier::{dispatch_best_effort, EventKind, Notifier},
    },
};

/// Outcome counts of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: usize,
    pub promoted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReservationsService {
    repository: Repository,
    ledger: LedgerService,
    notifier: Arc<dyn Notifier>,
    policy: CirculationPolicy,
    clock: Arc<dyn Clock>,
}

impl ReservationsService {
    pub fn new(
        repository: Repository,
        ledger: LedgerService,
        notifier: Arc<dyn Notifier>,
        policy: CirculationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repository, ledger, notifier, policy, clock }
    }

    /// Append a hold to the book's queue.
    ///
    /// A book with free copies cannot be reserved (borrow instead), a reader
    /// holds at most one live reservation per book, and the per-user
    /// reservation cap applies.
    pub async fn enqueue(&self, user_id: i32, book_id: i32) -> AppResult<Reservation> {
        let now = self.clock.now();

        // existence checks: book via counters, user via standing
        let counters = self.repository.copies.counters(book_id).await?;
        let standing = self.repository.users.standing(user_id).await?;

        if counters.available_copies > 0 {
            return Err(AppError::BusinessRule(
                "Book is currently available - borrow instead of reserving".to_string(),
            ));
        }

        if self
            .repository
            .reservations
            .has_live_for_user_and_book(user_id, book_id)
            .await?
        {
            return Err(AppError::BusinessRule(
                "Book is already reserved by this reader".to_string(),
            ));
        }

        let live = self.repository.reservations.count_live_for_user(user_id).await?;
        if live >= self.policy.reservation_limit {
            return Err(AppError::BusinessRule(format!(
                "Maximum reservations reached ({}/{})",
                live, self.policy.reservation_limit
            )));
        }

        let reservation = self
            .repository
            .reservations
            .create_active(user_id, book_id, now)
            .await?;

        dispatch_best_effort(
            self.notifier.as_ref(),
            user_id,
            EventKind::ReservationQueued,
            json!({
                "reservation_id": reservation.id,
                "book_id": book_id,
                "email": standing.email,
            }),
        )
        .await;

        Ok(reservation)
    }

    /// Hand a copy its holder is giving up to the oldest waiting reservation,
    /// or shelve it when nobody waits.
    ///
    /// Called synchronously wherever a copy frees up (return, expiry,
    /// cancellation), in the same unit of work. With a non-empty queue the
    /// copy moves LOANED/RESERVED -> RESERVED for the next hold directly, so
    /// it is never visible as AVAILABLE to a concurrent borrow that would
    /// bypass the queue.
    pub async fn promote_or_release(&self, copy: &Copy) -> AppResult<Option<Reservation>> {
        let queue = self.repository.reservations.active_queue(copy.book_id).await?;
        if queue.is_empty() {
            self.ledger.shelve(copy).await?;
            return Ok(None);
        }

        let held = self.ledger.hold_for_handoff(copy).await?;

        let now = self.clock.now();
        let expires_at = now + Duration::hours(self.policy.pickup_window_hours);

        for candidate in &queue {
            let promoted = self
                .repository
                .reservations
                .mark_ready(candidate.id, held.id, expires_at)
                .await?;
            if !promoted {
                // candidate left ACTIVE behind our back (cancelled or taken
                // by a concurrent promoter), skip to the next-oldest
                continue;
            }

            tracing::info!(
                reservation_id = candidate.id,
                book_id = copy.book_id,
                copy_id = held.id,
                %expires_at,
                "reservation promoted to READY"
            );

            // recipient lookup is part of the best-effort notice, never of
            // the promotion itself
            let email = self
                .repository
                .users
                .standing(candidate.user_id)
                .await
                .ok()
                .and_then(|s| s.email);

            dispatch_best_effort(
                self.notifier.as_ref(),
                candidate.user_id,
                EventKind::ReservationReady,
                json!({
                    "reservation_id": candidate.id,
                    "book_id": copy.book_id,
                    "copy_id": held.id,
                    "expires_at": expires_at.to_rfc3339(),
                    "email": email,
                }),
            )
            .await;

            let reservation = self.repository.reservations.get_by_id(candidate.id).await?;
            return Ok(Some(reservation));
        }

        // every candidate raced away; put the copy on the shelf
        self.ledger.shelve(&held).await?;
        Ok(None)
    }

    /// Expire READY holds whose pickup window has closed and cascade their
    /// copies to the next waiters.
    ///
    /// Idempotent: the EXPIRED transition is conditional, so a reservation
    /// processed by an earlier (or concurrent) run is skipped, not re-done.
    /// Per-item failures are logged and the sweep continues.
    pub async fn expire_sweep(&self, dry_run: bool) -> AppResult<SweepSummary> {
        let now = self.clock.now();
        let expired = self.repository.reservations.find_expired_ready(now, None).await?;

        let mut summary = SweepSummary::default();

        for reservation in expired {
            if dry_run {
                tracing::info!(
                    reservation_id = reservation.id,
                    book_id = reservation.book_id,
                    "dry-run: would expire reservation"
                );
                summary.expired += 1;
                continue;
            }

            match self.expire_one(&reservation, now).await {
                Ok(Some(true)) => {
                    summary.expired += 1;
                    summary.promoted += 1;
                }
                Ok(Some(false)) => summary.expired += 1,
                Ok(None) => {} // already terminal, skipped
                Err(e) => {
                    tracing::error!(
                        reservation_id = reservation.id,
                        error = %e,
                        "failed to expire reservation"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            expired = summary.expired,
            promoted = summary.promoted,
            failed = summary.failed,
            dry_run,
            "reservation expiry sweep finished"
        );

        Ok(summary)
    }

    /// Returns None when the reservation was already processed, otherwise
    /// whether the freed copy was re-promoted to a next waiter.
    async fn expire_one(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> AppResult<Option<bool>> {
        let copy_id = reservation.copy_id.ok_or_else(|| {
            AppError::Invariant(format!(
                "READY reservation {} holds no copy",
                reservation.id
            ))
        })?;

        if !self.repository.reservations.mark_expired(reservation.id, now).await? {
            return Ok(None);
        }

        tracing::info!(
            reservation_id = reservation.id,
            book_id = reservation.book_id,
            copy_id,
            "reservation expired"
        );

        let copy = self.repository.copies.get_by_id(copy_id).await?;
        let promoted = self.promote_or_release(&copy).await?;
        Ok(Some(promoted.is_some()))
    }

    /// Cancel a hold. Allowed only while ACTIVE or READY; a held copy is
    /// released and offered to the next waiter.
    pub async fn cancel(&self, reservation_id: i32, caller_id: i32) -> AppResult<()> {
        let now = self.clock.now();
        let reservation = self.repository.reservations.get_by_id(reservation_id).await?;

        let caller = self.repository.users.standing(caller_id).await?;
        if reservation.user_id != caller_id && !caller.staff {
            return Err(AppError::Forbidden(
                "Reservation belongs to another reader".to_string(),
            ));
        }

        match reservation.status {
            ReservationStatus::Active => {
                if !self
                    .repository
                    .reservations
                    .mark_cancelled(reservation.id, ReservationStatus::Active, now)
                    .await?
                {
                    return Err(AppError::BusinessRule(
                        "Reservation changed state, retry".to_string(),
                    ));
                }
                Ok(())
            }
            ReservationStatus::Ready => {
                let copy_id = reservation.copy_id.ok_or_else(|| {
                    AppError::Invariant(format!(
                        "READY reservation {} holds no copy",
                        reservation.id
                    ))
                })?;

                let copy = self.repository.copies.get_by_id(copy_id).await?;
                if copy.status == CopyStatus::Loaned {
                    return Err(AppError::Invariant(format!(
                        "copy {} held by reservation {} is LOANED",
                        copy.id, reservation.id
                    )));
                }

                if !self
                    .repository
                    .reservations
                    .mark_cancelled(reservation.id, ReservationStatus::Ready, now)
                    .await?
                {
                    return Err(AppError::BusinessRule(
                        "Reservation changed state, retry".to_string(),
                    ));
                }

                self.promote_or_release(&copy).await?;
                Ok(())
            }
            status => Err(AppError::BusinessRule(format!(
                "Cannot cancel a {} reservation",
                status
            ))),
        }
    }
}
