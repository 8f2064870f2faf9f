//! Refresh signal sources.
//!
//! Every way the pool learns that work may be stale ends up as a
//! [`RefreshRequest`] in the job manager's queue. Sources are **active async
//! tasks**: each owns its input (a timer, a notification stream, a payload
//! channel) and runs its own `run()` loop until the shutdown token fires.
//!
//! ```text
//!  BootstrapSource ──┐
//!  PollSource ───────┤                      ┌──────────────┐
//!  PushSource ───────┼──► RefreshSender ───►│  dispatcher  │──► fetch/build
//!  StreamSource ─────┤     (mpsc)           └──────────────┘
//!  share reconciler ─┘
//! ```
//!
//! Exactly one of poll, push or stream runs per manager, chosen once from
//! [`TemplateSourceMode`]. The bootstrap source runs alongside it until the
//! first job exists.

mod blocknotify;
mod bootstrap;
mod poll;
mod push;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use blocknotify::BlockNotifyListener;
pub use bootstrap::BootstrapSource;
pub use poll::PollSource;
pub use push::PushSource;
pub use stream::StreamSource;

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RefreshReason {
    /// Startup, until the first job is built.
    Initial,

    /// Block notification from the daemon.
    Push,

    /// Polling timer.
    Poll,

    /// Template pushed by an external feed.
    Stream,

    /// No broadcast for a full rebroadcast timeout.
    JobRefresh,

    /// A block found by the pool was accepted.
    BlockFound,
}

/// One request to re-fetch the template and maybe broadcast a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Build and broadcast even if the template is not a new block.
    pub force: bool,

    pub reason: RefreshReason,

    /// Pre-fetched `getblocktemplate` JSON, skipping the daemon query.
    pub payload: Option<String>,
}

impl RefreshRequest {
    pub fn new(force: bool, reason: RefreshReason) -> Self {
        Self {
            force,
            reason,
            payload: None,
        }
    }

    pub fn with_payload(force: bool, reason: RefreshReason, payload: String) -> Self {
        Self {
            force,
            reason,
            payload: Some(payload),
        }
    }

    /// Fold `next` into `self` if both are payload-free requests for the same
    /// reason. Returns false, leaving `self` unchanged, otherwise.
    pub fn coalesce(&mut self, next: &RefreshRequest) -> bool {
        if self.reason != next.reason || self.payload.is_some() || next.payload.is_some() {
            return false;
        }
        self.force |= next.force;
        true
    }
}

/// Producer side of the refresh queue.
pub type RefreshSender = mpsc::Sender<RefreshRequest>;

/// Time of the last forced refresh, shared by the dispatcher (which stamps
/// it) and the stream source (which reads it).
#[derive(Debug, Clone, Default)]
pub struct ForceRefreshClock(Arc<Mutex<Option<Instant>>>);

impl ForceRefreshClock {
    pub fn stamp(&self) {
        *self.0.lock() = Some(Instant::now());
    }

    /// Time since the last forced refresh, or `None` if there has been none.
    pub fn elapsed(&self) -> Option<Duration> {
        let last = *self.0.lock();
        last.map(|at| at.elapsed())
    }
}

/// How refresh signals reach the pipeline. Chosen once at startup.
pub enum TemplateSourceMode {
    /// Poll the daemon on a fixed interval.
    Poll { interval: Duration },

    /// Refresh on daemon notification frames.
    Push { frames: BoxStream<'static, Bytes> },

    /// Templates delivered by an external feed.
    Stream { payloads: mpsc::Receiver<String> },
}

impl TemplateSourceMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Poll { .. } => "poll",
            Self::Push { .. } => "push",
            Self::Stream { .. } => "stream",
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }
}
