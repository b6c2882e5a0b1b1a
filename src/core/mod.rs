//! Shared primitives: errors, configuration, persistence, globbing and time.

pub mod config;
pub mod db;
pub mod error;
pub mod glob;
pub mod store;
pub mod time;
