//! Gatekeeper — session token persistence for the API gateway.
//!
//! One repository contract (`store::TokenRepository`) with in-process,
//! MongoDB and Redis backends, plus the lifecycle flows built on it.

pub mod cli;
pub mod config;
pub mod errors;
pub mod models;
pub mod service;
pub mod store;
