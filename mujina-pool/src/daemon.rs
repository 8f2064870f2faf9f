//! Daemon lifecycle management for mujina-pool.
//!
//! This module handles the core daemon functionality including initialization,
//! task management, signal handling, and graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::json;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::tracing::prelude::*;
use crate::{
    api::{self, ApiConfig, SharedState},
    chain::ChainParams,
    config::{PoolConfig, TemplateSourceKind},
    job::EquihashJobBuilder,
    job_manager::JobManager,
    notification::PoolNotification,
    rpc::RpcClient,
    template_source::{BlockNotifyListener, TemplateSourceMode},
    verifier::EquihashVerifier,
};

/// Payloads buffered between the API and the stream source.
const TEMPLATE_FEED_DEPTH: usize = 16;

/// The main daemon.
pub struct Daemon {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = PoolConfig::from_env()?;
        let chain = ChainParams::lookup(&config.coin)
            .with_context(|| format!("unsupported coin {}", config.coin))?;

        let rpc = Arc::new(RpcClient::new(config.daemons.clone())?);
        check_daemons(&rpc).await?;

        let builder = Arc::new(EquihashJobBuilder::new(
            chain.clone(),
            config.payout_script.clone(),
            config.pool_tag.clone(),
            config.extranonce1_size as usize,
        ));
        let (manager, queue) = JobManager::new(
            (&config).into(),
            chain,
            rpc,
            builder,
            Arc::new(EquihashVerifier),
        )?;

        // Exactly one refresh source, chosen by MUJINA_TEMPLATE_SOURCE
        let mut template_feed = None;
        let mode = match config.template_source {
            TemplateSourceKind::Poll => TemplateSourceMode::Poll {
                interval: config.refresh_interval,
            },
            TemplateSourceKind::Push => {
                let (listener, frames) =
                    BlockNotifyListener::bind(config.blocknotify_addr, self.shutdown.clone())
                        .await
                        .with_context(|| {
                            format!("binding block notify listener on {}", config.blocknotify_addr)
                        })?;
                self.tracker.spawn(listener.run());
                TemplateSourceMode::Push { frames }
            }
            TemplateSourceKind::Stream => {
                let (tx, rx) = mpsc::channel(TEMPLATE_FEED_DEPTH);
                template_feed = Some(tx);
                TemplateSourceMode::Stream { payloads: rx }
            }
        };

        self.tracker.spawn(log_notifications(
            manager.subscribe_notifications(),
            self.shutdown.clone(),
        ));

        self.tracker
            .spawn(manager.clone().run(queue, mode, self.shutdown.clone()));

        // Start the API server
        self.tracker.spawn({
            let shutdown = self.shutdown.clone();
            let api_config = ApiConfig::from(&config);
            let state = SharedState::new(manager, template_feed);
            async move {
                if let Err(e) = api::serve(api_config, state, shutdown).await {
                    error!("API server error: {}", e);
                }
            }
        });

        self.tracker.close();

        info!(pool_id = %config.pool_id, coin = %config.coin, "Started.");
        info!("For debugging, set RUST_LOG=mujina_pool=debug or trace.");

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        // Wait for shutdown signal
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT.");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
            },
        }

        // Initiate shutdown
        self.shutdown.cancel();

        // Wait for all tasks to complete
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Ask every endpoint for `getblockchaininfo`; fail only if none answers.
async fn check_daemons(rpc: &RpcClient) -> anyhow::Result<()> {
    let results = rpc.execute_all("getblockchaininfo", json!([])).await;
    let mut healthy = 0;

    for (endpoint, result) in rpc.endpoints().iter().zip(&results) {
        match result {
            Ok(info) => {
                healthy += 1;
                info!(
                    url = %endpoint.url,
                    chain = ?info.get("chain"),
                    blocks = ?info.get("blocks"),
                    "Daemon online"
                );
            }
            Err(e) => warn!(url = %endpoint.url, error = %e, "Daemon unreachable"),
        }
    }

    if healthy == 0 {
        bail!("no daemon endpoint answered getblockchaininfo");
    }
    Ok(())
}

async fn log_notifications(
    mut notifications: broadcast::Receiver<PoolNotification>,
    shutdown: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            received = notifications.recv() => received,
            _ = shutdown.cancelled() => break,
        };

        match notification {
            Ok(PoolNotification::NewChainHeight { height, symbol, .. }) => {
                info!(height, %symbol, "Chain height");
            }
            Ok(PoolNotification::BlockFound {
                height,
                hash,
                worker,
                reward,
                ..
            }) => {
                info!(height, %hash, %worker, reward, "Block found");
            }
            Ok(PoolNotification::BlockSubmissionFailed {
                height,
                hash,
                reason,
                ..
            }) => {
                warn!(height, %hash, %reason, "Block submission failed");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Notification log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
