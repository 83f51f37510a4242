//! Query result caching with invalidation tags derived from query predicates.
//!
//! See [`cache`] for the read and write paths, [`config`] for settings and
//! [`infra::telemetry`] for logging setup.

pub mod cache;
pub mod config;
pub mod infra;
