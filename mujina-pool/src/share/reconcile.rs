//! Block candidate submission and confirmation.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::Share;
use crate::notification::PoolNotification;
use crate::rpc::BlockchainDaemon;
use crate::template_source::{RefreshReason, RefreshRequest, RefreshSender};
use crate::tracing::prelude::*;

/// Submits block candidates and reconciles the share with the outcome.
pub struct BlockReconciler {
    daemon: Arc<dyn BlockchainDaemon>,
    refresh_tx: RefreshSender,
    notifications: broadcast::Sender<PoolNotification>,
    pool_id: String,
}

impl BlockReconciler {
    pub fn new(
        daemon: Arc<dyn BlockchainDaemon>,
        refresh_tx: RefreshSender,
        notifications: broadcast::Sender<PoolNotification>,
        pool_id: String,
    ) -> Self {
        Self {
            daemon,
            refresh_tx,
            notifications,
            pool_id,
        }
    }

    /// Submit `block` for a candidate `share` and return the share with the
    /// outcome applied.
    ///
    /// `submitblock` is sent exactly once. An accepted block is confirmed by
    /// `getblock` on its hash; anything short of a confirmed match demotes
    /// the share to an ordinary valid share.
    pub async fn reconcile(&self, mut share: Share, block: &[u8]) -> Share {
        let Some(hash) = share.block_hash else {
            return share;
        };
        let hash_hex = hash.to_string();

        info!(
            height = share.block_height,
            hash = %hash_hex,
            worker = %share.worker,
            "Submitting block"
        );

        let outcome = match self.daemon.submit_block(&hex::encode(block)).await {
            Ok(None) => match self.daemon.get_block(&hash).await {
                Ok(found) if found.hash.eq_ignore_ascii_case(&hash_hex) => Ok(found.tx.first().cloned()),
                Ok(found) => Err(format!("daemon returned block {}", found.hash)),
                Err(e) => Err(format!("getblock failed: {e}")),
            },
            Ok(Some(reason)) => Err(reason),
            Err(e) => Err(format!("submitblock failed: {e}")),
        };

        match outcome {
            Ok(coinbase_txid) => {
                info!(
                    height = share.block_height,
                    hash = %hash_hex,
                    reward = share.block_reward,
                    "Block accepted"
                );
                share.transaction_confirmation_data = coinbase_txid;

                let _ = self.notifications.send(PoolNotification::BlockFound {
                    pool_id: self.pool_id.clone(),
                    height: share.block_height,
                    hash: hash_hex,
                    worker: share.worker.clone(),
                    reward: share.block_reward,
                });

                let request = RefreshRequest::new(false, RefreshReason::BlockFound);
                if self.refresh_tx.send(request).await.is_err() {
                    debug!("Refresh queue closed, not refreshing after block");
                }
            }
            Err(reason) => {
                warn!(
                    height = share.block_height,
                    hash = %hash_hex,
                    %reason,
                    "Block rejected"
                );
                share.is_block_candidate = false;
                share.transaction_confirmation_data = None;

                let _ = self.notifications.send(PoolNotification::BlockSubmissionFailed {
                    pool_id: self.pool_id.clone(),
                    height: share.block_height,
                    hash: hash_hex,
                    reason,
                });
            }
        }

        share
    }
}
