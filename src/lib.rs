//! Library crate for port-sentry-rs exposing reusable modules.
pub mod classify;
pub mod collector;
pub mod config;
pub mod diff;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;
