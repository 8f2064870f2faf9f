//! Startup refresh source.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{RefreshReason, RefreshRequest, RefreshSender};
use crate::tracing::prelude::*;

/// Retry interval until the first job exists.
pub const BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(1);

/// Emits `initial` refreshes until the first job is built.
///
/// The dispatcher cancels `first_job` once it has inserted a job, which ends
/// this source for good.
pub struct BootstrapSource {
    tx: RefreshSender,
    first_job: CancellationToken,
    interval: Duration,
}

impl BootstrapSource {
    pub fn new(tx: RefreshSender, first_job: CancellationToken) -> Self {
        Self {
            tx,
            first_job,
            interval: BOOTSTRAP_INTERVAL,
        }
    }

    pub async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.first_job.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tx.try_send(RefreshRequest::new(false, RefreshReason::Initial)) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }

        trace!("Bootstrap source stopped");
    }
}
