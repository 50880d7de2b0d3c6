//! API server for the mobilize build orchestrator.
//!
//! Accepts work (archive uploads, AI chat turns, assembled file sets),
//! hands it to the idempotency guard, and serves pollable job status.

pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

pub use state::AppState;
