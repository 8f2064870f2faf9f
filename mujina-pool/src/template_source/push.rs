//! Block notification source.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::{RefreshReason, RefreshRequest, RefreshSender};
use crate::tracing::prelude::*;

/// Turns daemon notification frames into `push` refreshes.
///
/// Only the identity of a frame matters: its SHA-256 digest. A frame whose
/// identity equals the previous frame's is a repeat and is dropped.
pub struct PushSource {
    frames: BoxStream<'static, Bytes>,
    tx: RefreshSender,
    shutdown: CancellationToken,
    last_identity: Option<String>,
}

impl PushSource {
    pub fn new(
        frames: BoxStream<'static, Bytes>,
        tx: RefreshSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            frames,
            tx,
            shutdown,
            last_identity: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                frame = self.frames.next() => {
                    let Some(frame) = frame else {
                        warn!("Block notification stream ended");
                        break;
                    };

                    let identity = hex::encode(Sha256::digest(&frame));
                    if self.last_identity.as_deref() == Some(identity.as_str()) {
                        trace!(identity = %identity, "Repeated block notification");
                        continue;
                    }

                    debug!(identity = %identity, "Block notification");
                    self.last_identity = Some(identity);
                    if self.tx.send(RefreshRequest::new(false, RefreshReason::Push)).await.is_err() {
                        break;
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        trace!("Push source stopped");
    }
}
