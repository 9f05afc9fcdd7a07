//! # Provider Metrics
//!
//! Metrics for cloud provider calls, labelled by provider and operation.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec};
use std::sync::LazyLock;

static PROVIDER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "resource_claim_provider_operations_total",
            "Total number of provider API calls",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATIONS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "resource_claim_provider_operation_errors_total",
            "Total number of failed provider API calls",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "resource_claim_provider_operation_duration_seconds",
            "Duration of provider API calls in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_DURATION metric - this should never happen")
});

/// Register provider metrics with the registry
pub(crate) fn register_provider_metrics() -> Result<()> {
    REGISTRY.register(Box::new(PROVIDER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_DURATION.clone()))?;
    Ok(())
}

pub fn increment_provider_operations(provider: &str, operation: &str) {
    PROVIDER_OPERATIONS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
}

pub fn increment_provider_operation_errors(provider: &str, operation: &str) {
    PROVIDER_OPERATION_ERRORS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
}

pub fn observe_provider_operation_duration(provider: &str, operation: &str, duration: f64) {
    PROVIDER_OPERATION_DURATION
        .with_label_values(&[provider, operation])
        .observe(duration);
}
