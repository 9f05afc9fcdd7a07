//! # Observability
//!
//! Prometheus metrics for the controller and its cloud providers.

pub mod metrics;
