//! Copy ledger: the single source of truth for copy allocation
//!
//! Every status change funnels through here so the book's cached counters are
//! recomputed from copy rows after each mutation. Claims are raced through
//! conditional per-copy updates: the selection policy picks a candidate, the
//! repository claims it only if it is still AVAILABLE, and the loser of a race
//! simply moves on to the next candidate.

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::copy::{AccessType, Copy, CopyStatus},
    repository::Repository,
};

/// Deterministic selection: preferred access types in the order given, then
/// any remaining copies; lowest copy id breaks every tie.
pub fn rank_candidates(mut copies: Vec<Copy>, preferred: &[AccessType]) -> Vec<Copy> {
    let tier = |copy: &Copy| {
        preferred
            .iter()
            .position(|p| *p == copy.access_type)
            .unwrap_or(preferred.len())
    };
    copies.sort_by_key(|c| (tier(c), c.id));
    copies
}

#[derive(Clone)]
pub struct LedgerService {
    repository: Repository,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Claim one copy for a loan (AVAILABLE -> LOANED).
    pub async fn claim(&self, book_id: i32, preferred: &[AccessType]) -> AppResult<Copy> {
        let now = self.clock.now();
        let candidates = self.repository.copies.list_available(book_id).await?;

        for candidate in rank_candidates(candidates, preferred) {
            if let Some(claimed) = self
                .repository
                .copies
                .claim_specific(candidate.id, CopyStatus::Loaned, now)
                .await?
            {
                self.repository.copies.recount_book(book_id).await?;
                return Ok(claimed);
            }
            // lost the race for this copy, try the next one
        }

        Err(AppError::NoCopyAvailable(format!("book {}", book_id)))
    }

    /// Claim one specific copy for a loan. `None` means it was not AVAILABLE.
    pub async fn claim_copy(&self, copy_id: i32) -> AppResult<Option<Copy>> {
        let now = self.clock.now();
        let claimed = self
            .repository
            .copies
            .claim_specific(copy_id, CopyStatus::Loaned, now)
            .await?;
        if let Some(ref copy) = claimed {
            self.repository.copies.recount_book(copy.book_id).await?;
        }
        Ok(claimed)
    }

    /// Move a copy the caller is giving up into RESERVED so it can be handed
    /// straight to a waiting hold, never crossing AVAILABLE on the way. The
    /// returned copy carries the updated status.
    pub async fn hold_for_handoff(&self, copy: &Copy) -> AppResult<Copy> {
        match copy.status {
            CopyStatus::Reserved => Ok(copy.clone()),
            CopyStatus::Loaned => {
                let now = self.clock.now();
                let moved = self
                    .repository
                    .copies
                    .transition(copy.id, CopyStatus::Loaned, CopyStatus::Reserved, now)
                    .await?;
                if !moved {
                    return Err(AppError::Invariant(format!(
                        "copy {} expected LOANED while handing off, found another state",
                        copy.id
                    )));
                }
                self.repository.copies.recount_book(copy.book_id).await?;
                Ok(Copy { status: CopyStatus::Reserved, ..copy.clone() })
            }
            other => Err(AppError::Invariant(format!(
                "copy {} cannot be handed off while {}",
                copy.id, other
            ))),
        }
    }

    /// Put a copy the caller is giving up back on the shelf (-> AVAILABLE).
    pub async fn shelve(&self, copy: &Copy) -> AppResult<()> {
        match copy.status {
            CopyStatus::Loaned | CopyStatus::Reserved => self.demote(copy, copy.status).await,
            other => Err(AppError::Invariant(format!(
                "copy {} cannot be shelved while {}",
                copy.id, other
            ))),
        }
    }

    async fn demote(&self, copy: &Copy, expected: CopyStatus) -> AppResult<()> {
        let now = self.clock.now();
        let moved = self
            .repository
            .copies
            .transition(copy.id, expected, CopyStatus::Available, now)
            .await?;

        if !moved {
            // The copy left the expected state behind our back: some other
            // path mutated an allocation it does not own.
            return Err(AppError::Invariant(format!(
                "copy {} expected {} while releasing, found another state",
                copy.id, expected
            )));
        }

        self.repository.copies.recount_book(copy.book_id).await?;
        Ok(())
    }
}
