//! HTTP API for pool status and the stream-mode template feed.

mod server;
pub mod v0;

pub use server::{ApiConfig, SharedState, router, serve};
