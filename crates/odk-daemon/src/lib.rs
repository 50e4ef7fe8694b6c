//! odk-daemon library target.
//!
//! Exposes the router, state and collaborator seams for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod notify;
pub mod provider;
pub mod routes;
pub mod state;
pub mod validation;
