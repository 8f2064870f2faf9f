//! Pool daemon: builds Equihash jobs from daemon templates and serves the
//! status API.

use mujina_pool::daemon::Daemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mujina_pool::tracing::init_journald_or_stdout();
    Daemon::new().run().await
}
