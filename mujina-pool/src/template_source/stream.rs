//! External template feed source.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ForceRefreshClock, RefreshReason, RefreshRequest, RefreshSender};
use crate::tracing::prelude::*;

/// Floor of the minimum forced-refresh interval.
const MIN_FORCE_INTERVAL: Duration = Duration::from_secs(1);

/// Slack subtracted from the rebroadcast timeout so a feed arriving on the
/// rebroadcast cadence still counts as due.
const FORCE_SLACK: Duration = Duration::from_millis(100);

/// Forwards externally delivered templates as `stream` refreshes.
///
/// A payload is forced when no forced refresh has happened yet, or when at
/// least `max(1s, rebroadcast_timeout - 100ms)` has passed since the last
/// one. Stream mode has no rebroadcast timer, so this is what keeps miners
/// on fresh work.
pub struct StreamSource {
    payloads: mpsc::Receiver<String>,
    tx: RefreshSender,
    clock: ForceRefreshClock,
    min_force_interval: Duration,
    shutdown: CancellationToken,
}

impl StreamSource {
    pub fn new(
        payloads: mpsc::Receiver<String>,
        tx: RefreshSender,
        clock: ForceRefreshClock,
        rebroadcast_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            payloads,
            tx,
            clock,
            min_force_interval: rebroadcast_timeout
                .saturating_sub(FORCE_SLACK)
                .max(MIN_FORCE_INTERVAL),
            shutdown,
        }
    }

    fn force_due(&self) -> bool {
        self.clock
            .elapsed()
            .is_none_or(|since| since >= self.min_force_interval)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                payload = self.payloads.recv() => {
                    let Some(payload) = payload else {
                        warn!("Template feed closed");
                        break;
                    };

                    let force = self.force_due();
                    trace!(force, bytes = payload.len(), "Template from feed");
                    let request = RefreshRequest::with_payload(force, RefreshReason::Stream, payload);
                    if self.tx.send(request).await.is_err() {
                        break;
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        trace!("Stream source stopped");
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use super::*;

    fn spawn_source(
        timeout: Duration,
        clock: ForceRefreshClock,
    ) -> (mpsc::Sender<String>, mpsc::Receiver<RefreshRequest>) {
        let (feed_tx, feed_rx) = mpsc::channel(4);
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(StreamSource::new(feed_rx, tx, clock, timeout, CancellationToken::new()).run());
        (feed_tx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn first_payload_is_forced() {
        let (feed, mut rx) = spawn_source(Duration::from_secs(55), ForceRefreshClock::default());

        feed.send("{\"height\":1}".into()).await.unwrap();
        let req = rx.recv().await.unwrap();
        assert!(req.force);
        assert_eq!(req.reason, RefreshReason::Stream);
        assert_eq!(req.payload.as_deref(), Some("{\"height\":1}"));
    }

    #[tokio::test(start_paused = true)]
    async fn force_follows_last_forced_refresh() {
        let clock = ForceRefreshClock::default();
        let (feed, mut rx) = spawn_source(Duration::from_secs(10), clock.clone());

        // Dispatcher just processed a forced refresh
        clock.stamp();
        feed.send("a".into()).await.unwrap();
        assert!(!rx.recv().await.unwrap().force);

        // 9.9s is the threshold for a 10s timeout
        time::advance(Duration::from_millis(9_899)).await;
        feed.send("b".into()).await.unwrap();
        assert!(!rx.recv().await.unwrap().force);

        time::advance(Duration::from_millis(1)).await;
        feed.send("c".into()).await.unwrap();
        assert!(rx.recv().await.unwrap().force);
    }

    #[tokio::test(start_paused = true)]
    async fn short_timeout_floors_at_one_second() {
        let clock = ForceRefreshClock::default();
        let (feed, mut rx) = spawn_source(Duration::ZERO, clock.clone());

        clock.stamp();
        time::advance(Duration::from_millis(500)).await;
        feed.send("a".into()).await.unwrap();
        assert!(!rx.recv().await.unwrap().force);

        time::advance(Duration::from_millis(500)).await;
        feed.send("b".into()).await.unwrap();
        assert!(rx.recv().await.unwrap().force);
    }
}
