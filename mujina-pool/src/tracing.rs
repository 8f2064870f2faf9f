//! Provide tracing, tailored to this program.
//!
//! At startup the daemon calls [`init_journald_or_stdout`] to install a
//! subscriber. The rest of the program uses `use crate::tracing::prelude::*`
//! for the `trace!()`, `debug!()`, `info!()`, `warn!()`, and `error!()`
//! macros.

use std::env;

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => tracing_subscriber::registry()
                .with(env_filter())
                .with(layer)
                .init(),
            Err(e) => {
                use_stdout();
                error!(error = %e, "Failed to initialize journald logging, using stdout.");
            }
        }
    } else {
        use_stdout();
    }
}

// Filter according to RUST_LOG, overriding the default level (ERROR) to INFO.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(true),
        )
        .init();
}

// Local time to the nearest second. The default timer is UTC with a long
// RFC 3339 timestamp, which is noise when tailing a pool log.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
