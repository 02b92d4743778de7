//! HTTP surface for the preflight diagnostics core.
//!
//! `routes::build_router` is the single entry point; `main.rs` attaches
//! middleware layers so scenario tests can drive the bare router.

pub mod api_types;
pub mod error;
pub mod routes;
pub mod state;
