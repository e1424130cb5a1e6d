//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring merges.
//!
//! # Metrics
//!
//! - `wallet_merge_accepted_total` - Transactions merged into a patch
//! - `wallet_merge_rejected_total{reason}` - Rejections by reason
//! - `wallet_saves_total{changed}` - Patch saves, by whether the file changed

use crate::error::RejectReason;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions accepted by merges
    pub accepted_total: IntCounter,

    /// Rejections, labelled by reason
    pub rejected_total: IntCounterVec,

    /// Saves, labelled by `changed` = "true" / "false"
    pub saves_total: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("accepted_total", &self.accepted_total.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let accepted_total = IntCounter::new(
            "wallet_merge_accepted_total",
            "Transactions merged into a patch",
        )?;
        registry.register(Box::new(accepted_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("wallet_merge_rejected_total", "Merge rejections by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let saves_total = IntCounterVec::new(
            Opts::new("wallet_saves_total", "Patch saves by outcome"),
            &["changed"],
        )?;
        registry.register(Box::new(saves_total.clone()))?;

        Ok(Self {
            accepted_total,
            rejected_total,
            saves_total,
            registry,
        })
    }

    /// Record an accepted transaction
    pub fn record_accepted(&self) {
        self.accepted_total.inc();
    }

    /// Record a rejection
    pub fn record_rejected(&self, reason: &RejectReason) {
        self.rejected_total.with_label_values(&[reason.label()]).inc();
    }

    /// Record a save
    pub fn record_save(&self, changed: bool) {
        let label = if changed { "true" } else { "false" };
        self.saves_total.with_label_values(&[label]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current values in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
