//! Fixed-interval polling source.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{RefreshReason, RefreshRequest, RefreshSender};
use crate::tracing::prelude::*;

/// Emits a non-forced `poll` refresh every `interval`.
///
/// Ticks are rate limited rather than queued: a tick that finds the queue
/// full is dropped, and ticks missed while the runtime was busy are skipped.
pub struct PollSource {
    interval: Duration,
    tx: RefreshSender,
    shutdown: CancellationToken,
}

impl PollSource {
    pub fn new(interval: Duration, tx: RefreshSender, shutdown: CancellationToken) -> Self {
        Self {
            interval,
            tx,
            shutdown,
        }
    }

    pub async fn run(self) {
        debug!(interval_ms = self.interval.as_millis() as u64, "Polling for templates");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tx.try_send(RefreshRequest::new(false, RefreshReason::Poll)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => trace!("Refresh queue full, poll tick dropped"),
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        trace!("Poll source stopped");
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_on_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            PollSource::new(Duration::from_millis(1000), tx, shutdown.clone()).run(),
        );

        // Nothing before the first interval
        time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_millis(2)).await;
        let req = rx.try_recv().unwrap();
        assert_eq!(req.reason, RefreshReason::Poll);
        assert!(!req.force);
        assert!(req.payload.is_none());

        time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_ok());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drops_ticks_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            PollSource::new(Duration::from_millis(100), tx, shutdown.clone()).run(),
        );

        // Five intervals pass, but the queue holds only one
        time::sleep(Duration::from_millis(550)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_queue_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        PollSource::new(Duration::from_millis(100), tx, CancellationToken::new())
            .run()
            .await;
    }
}
