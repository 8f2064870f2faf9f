//! Equihash mining pool job distribution.
//!
//! The pool learns about new work from a blockchain daemon, builds jobs for
//! miners, and validates their shares, submitting any that solve a block.
//! [`job_manager::JobManager`] ties the pieces together; [`daemon::Daemon`]
//! runs it as a service.

pub mod api;
pub mod api_client;
pub mod chain;
pub mod config;
pub mod daemon;
pub mod extranonce;
pub mod job;
pub mod job_manager;
pub mod notification;
pub mod rpc;
pub mod share;
pub mod template_source;
pub mod tracing;
pub mod types;
pub mod u256;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;
