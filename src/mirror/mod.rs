//! HTTP surface: the Terraform provider network-mirror and v1 registry
//! protocols, an administrative API for manifest-driven ingestion and
//! job control, session auth, and local-backend blob serving.

mod admin;
mod auth_handlers;
mod blobs;
mod discovery;
pub mod error;
mod middleware;
mod registry;
pub mod server;
pub mod state;

pub use error::MirrorError;
pub use state::AppState;
