//! Periodic job scheduler
//!
//! The three circulation jobs run on independent intervals with no shared
//! state between runs. Each pass is a pure function of persisted state plus
//! the injected clock, so overlapping or repeated runs are harmless; a failed
//! pass is logged and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::{config::JobsConfig, services::Services};

pub struct Scheduler {
    services: Arc<Services>,
    config: JobsConfig,
}

impl Scheduler {
    pub fn new(services: Arc<Services>, config: JobsConfig) -> Self {
        Self { services, config }
    }

    /// Spawn the three periodic jobs. The handles run until aborted.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_reservation_expiry(),
            self.spawn_fine_assessment(),
            self.spawn_delinquency(),
        ]
    }

    fn spawn_reservation_expiry(&self) -> JoinHandle<()> {
        let services = self.services.clone();
        let minutes = self.config.reservation_expiry_interval_minutes;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(minutes * 60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = services.reservations.expire_sweep(false).await {
                    tracing::error!(error = %e, "reservation expiry sweep failed");
                }
            }
        })
    }

    fn spawn_fine_assessment(&self) -> JoinHandle<()> {
        let services = self.services.clone();
        let minutes = self.config.fine_assessment_interval_minutes;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(minutes * 60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = services.fines.assess_overdue(false).await {
                    tracing::error!(error = %e, "overdue fine assessment failed");
                }
            }
        })
    }

    fn spawn_delinquency(&self) -> JoinHandle<()> {
        let services = self.services.clone();
        let minutes = self.config.delinquency_interval_minutes;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(minutes * 60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = services.delinquency.enforce(false).await {
                    tracing::error!(error = %e, "delinquency enforcement failed");
                }
            }
        })
    }
}
