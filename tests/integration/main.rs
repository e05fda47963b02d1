//! Integration Tests
//!
//! Cross-crate tests through the facade, organized by concern:
//! - Primitives: counter and map over a live runtime
//! - Transactions: isolation, conflicts and nesting across objects
//! - Clients: several runtimes sharing one log
//! - Configuration: TOML-driven runtimes

#[path = "../common/mod.rs"]
mod common;

mod clients;
mod configuration;
mod primitives;
mod transactions;
