//! Violation sink trait and implementations.
//!
//! The registry hands every new violation to a [`ViolationSink`] after the
//! chart's lock has been released. Delivery is fire-and-forget: a sink
//! cannot fail the ingestion call.

use std::collections::BTreeMap;
use std::sync::mpsc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::spc::{ChartMethod, UpdateResult, Violation};

/// A violation tagged with the metric it was found on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub metric: String,
    pub method: ChartMethod,
    /// Labels from the metric's [`ChartSpec`](crate::config::ChartSpec).
    pub labels: BTreeMap<String, String>,
    pub violation: Violation,
}

/// Consumer of violation events (alerting, persistence, dashboards).
pub trait ViolationSink: Send + Sync {
    /// Called once per new violation.
    fn on_violation(&self, event: &ViolationEvent);

    /// Called for every accepted update, violations or not.
    fn on_update(&self, _metric: &str, _result: &UpdateResult) {}
}

impl<F> ViolationSink for F
where
    F: Fn(&ViolationEvent) + Send + Sync,
{
    fn on_violation(&self, event: &ViolationEvent) {
        self(event)
    }
}

impl ViolationSink for mpsc::Sender<ViolationEvent> {
    fn on_violation(&self, event: &ViolationEvent) {
        if self.send(event.clone()).is_err() {
            warn!(
                metric = %event.metric,
                rule = event.violation.rule.number(),
                "violation receiver dropped; event discarded"
            );
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ViolationSink for NoopSink {
    fn on_violation(&self, _event: &ViolationEvent) {}
}

/// Sink that logs each violation at `warn` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ViolationSink for TracingSink {
    fn on_violation(&self, event: &ViolationEvent) {
        warn!(
            metric = %event.metric,
            method = %event.method,
            rule = event.violation.rule.number(),
            severity = event.violation.severity,
            point = event.violation.point_index,
            "{}",
            event.violation.description
        );
    }
}

/// Sink that collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ViolationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    pub fn events(&self) -> Vec<ViolationEvent> {
        self.events.lock().clone()
    }

    /// Remove and return everything received so far.
    pub fn take(&self) -> Vec<ViolationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ViolationSink for MemorySink {
    fn on_violation(&self, event: &ViolationEvent) {
        self.events.lock().push(event.clone());
    }
}
