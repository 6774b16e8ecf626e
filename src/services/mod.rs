//! Business logic services

pub mod delinquency;
pub mod fines;
pub mod ledger;
pub mod loans;
pub mod notifier;
pub mod reservations;

use std::sync::Arc;

use crate::{clock::Clock, config::CirculationPolicy, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub ledger: ledger::LedgerService,
    pub loans: loans::LoansService,
    pub reservations: reservations::ReservationsService,
    pub fines: fines::FineAssessmentService,
    pub delinquency: delinquency::DelinquencyService,
}

impl Services {
    /// Create all services with the given repository, policy, and collaborators
    pub fn new(
        repository: Repository,
        policy: CirculationPolicy,
        notifier: Arc<dyn notifier::Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = ledger::LedgerService::new(repository.clone(), clock.clone());
        let fines = fines::FineAssessmentService::new(repository.clone(), policy.clone(), clock.clone());
        let reservations = reservations::ReservationsService::new(
            repository.clone(),
            ledger.clone(),
            notifier,
            policy.clone(),
            clock.clone(),
        );
        let loans = loans::LoansService::new(
            repository.clone(),
            ledger.clone(),
            reservations.clone(),
            fines.clone(),
            policy.clone(),
            clock.clone(),
        );
        let delinquency = delinquency::DelinquencyService::new(repository, policy, clock);

        Self { ledger, loans, reservations, fines, delinquency }
    }
}
