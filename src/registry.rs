//! Named collection of charts with payload routing and fleet status.
//!
//! A [`ChartRegistry`] maps metric names to charts. A chart is created the
//! first time its metric is recorded (or explicitly via
//! [`register`](ChartRegistry::register)) and its type never changes
//! afterwards.
//!
//! # Concurrency
//!
//! The map is a [`DashMap`]; each chart sits behind its own
//! [`parking_lot::Mutex`]. Only chart creation writes to the map. Updates
//! clone the chart's `Arc` and lock that chart alone, so different metrics
//! never contend. Sinks run after the chart lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ChartConfig, ChartSettings, ChartSpec, RegistryConfig};
use crate::detection::{CusumChart, EwmaChart};
use crate::error::SpcError;
use crate::events::{ViolationEvent, ViolationSink};
use crate::spc::{
    ChartMethod, ChartStatus, ControlChart, ControlLimits, PChart, PayloadKind, Timestamp,
    UpdateResult, Violation, XBarRChart,
};

/// One observation routed to a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// A single measurement (CUSUM, EWMA).
    Value(f64),
    /// Simultaneous measurements (X-bar-R).
    Subgroup(Vec<f64>),
    /// A sample size and its defective count (p).
    Proportion { sample_size: u64, defective: u64 },
}

impl Payload {
    pub fn value(value: f64) -> Self {
        Payload::Value(value)
    }

    pub fn subgroup(values: impl Into<Vec<f64>>) -> Self {
        Payload::Subgroup(values.into())
    }

    /// `defective` nonconforming items out of `sample_size`.
    pub fn proportion(sample_size: u64, defective: u64) -> Self {
        Payload::Proportion {
            sample_size,
            defective,
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Value(_) => PayloadKind::Value,
            Payload::Subgroup(_) => PayloadKind::Subgroup,
            Payload::Proportion { .. } => PayloadKind::Proportion,
        }
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Value(value)
    }
}

impl From<Vec<f64>> for Payload {
    fn from(values: Vec<f64>) -> Self {
        Payload::Subgroup(values)
    }
}

// ---------------------------------------------------------------------------
// Chart variants
// ---------------------------------------------------------------------------

/// Any chart the registry can hold.
#[derive(Debug, Clone)]
pub enum Chart {
    XBarR(XBarRChart),
    P(PChart),
    Cusum(CusumChart),
    Ewma(EwmaChart),
}

impl Chart {
    /// Build an empty chart.
    ///
    /// # Errors
    ///
    /// Any validation error from the config or settings.
    pub fn from_config(config: &ChartConfig, settings: ChartSettings) -> Result<Self, SpcError> {
        config.validate()?;
        let chart = match *config {
            ChartConfig::XBarR { subgroup_size } => {
                Chart::XBarR(XBarRChart::with_settings(subgroup_size, settings)?)
            }
            ChartConfig::P { target_sample_size } => {
                Chart::P(PChart::with_settings(target_sample_size, settings)?)
            }
            ChartConfig::Cusum { k_factor, h_factor } => {
                Chart::Cusum(CusumChart::with_params(k_factor, h_factor, settings)?)
            }
            ChartConfig::Ewma {
                lambda_factor,
                limit_width,
            } => Chart::Ewma(EwmaChart::with_params(lambda_factor, limit_width, settings)?),
        };
        Ok(chart)
    }

    /// Route a payload to the chart's ingestion method.
    ///
    /// # Errors
    ///
    /// [`SpcError::TypeMismatch`] if the payload shape does not fit the chart,
    /// otherwise whatever the chart's own ingestion returns.
    pub fn ingest(&mut self, payload: &Payload, timestamp: Timestamp) -> Result<UpdateResult, SpcError> {
        match (self, payload) {
            (Chart::XBarR(chart), Payload::Subgroup(values)) => chart.add_subgroup(values, timestamp),
            (
                Chart::P(chart),
                Payload::Proportion {
                    sample_size,
                    defective,
                },
            ) => chart.add_sample(*sample_size, *defective, timestamp),
            (Chart::Cusum(chart), Payload::Value(value)) => chart.add_value(*value, timestamp),
            (Chart::Ewma(chart), Payload::Value(value)) => chart.add_value(*value, timestamp),
            (chart, payload) => Err(SpcError::TypeMismatch {
                expected: chart.method(),
                found: payload.kind(),
            }),
        }
    }

    fn as_chart(&self) -> &dyn ControlChart {
        match self {
            Chart::XBarR(chart) => chart,
            Chart::P(chart) => chart,
            Chart::Cusum(chart) => chart,
            Chart::Ewma(chart) => chart,
        }
    }

    fn as_chart_mut(&mut self) -> &mut dyn ControlChart {
        match self {
            Chart::XBarR(chart) => chart,
            Chart::P(chart) => chart,
            Chart::Cusum(chart) => chart,
            Chart::Ewma(chart) => chart,
        }
    }
}

impl ControlChart for Chart {
    fn method(&self) -> ChartMethod {
        self.as_chart().method()
    }

    fn status(&self) -> ChartStatus {
        self.as_chart().status()
    }

    fn control_limits(&self) -> Option<ControlLimits> {
        self.as_chart().control_limits()
    }

    fn is_in_control(&self) -> bool {
        self.as_chart().is_in_control()
    }

    fn violations(&self) -> Vec<Violation> {
        self.as_chart().violations()
    }

    fn drain_violations(&mut self) -> Vec<Violation> {
        self.as_chart_mut().drain_violations()
    }

    fn reset(&mut self) {
        self.as_chart_mut().reset()
    }
}

// ---------------------------------------------------------------------------
// Fleet status
// ---------------------------------------------------------------------------

/// Aggregate state of all charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    InControl,
    OutOfControl,
}

/// Snapshot across every chart in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallStatus {
    pub total_charts: usize,
    pub in_control_count: usize,
    /// Sum of active violations over all charts.
    pub active_violation_count: usize,
    /// `OutOfControl` when fewer than 90% of charts are in control.
    pub status: ProcessState,
}

impl OverallStatus {
    fn from_counts(total_charts: usize, in_control_count: usize, active_violation_count: usize) -> Self {
        // in_control / total < 0.9, in integers.
        let status = if in_control_count * 10 < total_charts * 9 {
            ProcessState::OutOfControl
        } else {
            ProcessState::InControl
        };
        Self {
            total_charts,
            in_control_count,
            active_violation_count,
            status,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Slot {
    chart: Chart,
    labels: BTreeMap<String, String>,
}

/// Thread-safe map of metric name to chart.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::registry::{ChartRegistry, Payload, ProcessState};
/// use u_spc::spc::ChartMethod;
///
/// let registry = ChartRegistry::default();
/// for _ in 0..25 {
///     registry
///         .record("fill_weight", Payload::subgroup([10.0; 5]), Utc::now())
///         .unwrap();
/// }
/// let result = registry
///     .record("fill_weight", Payload::subgroup([50.0; 5]), Utc::now())
///     .unwrap();
/// assert!(!result.in_control);
///
/// let status = registry.status("fill_weight").unwrap();
/// assert_eq!(status.method, ChartMethod::XBarR);
/// assert_eq!(registry.overall_status().status, ProcessState::OutOfControl);
/// ```
pub struct ChartRegistry {
    charts: DashMap<String, Arc<Mutex<Slot>>>,
    config: RegistryConfig,
    sink: Option<Arc<dyn ViolationSink>>,
}

impl Default for ChartRegistry {
    fn default() -> Self {
        Self {
            charts: DashMap::new(),
            config: RegistryConfig::default(),
            sink: None,
        }
    }
}

impl ChartRegistry {
    /// Create a registry from validated configuration.
    ///
    /// # Errors
    ///
    /// Any error from [`RegistryConfig::validate`].
    pub fn new(config: RegistryConfig) -> Result<Self, SpcError> {
        config.validate()?;
        Ok(Self {
            charts: DashMap::new(),
            config,
            sink: None,
        })
    }

    /// Attach a sink for violation events.
    pub fn with_sink(mut self, sink: Arc<dyn ViolationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create an empty chart for `metric` ahead of its first record.
    ///
    /// # Errors
    ///
    /// [`SpcError::DuplicateMetric`] if the metric already has a chart, or
    /// any validation error from `spec`.
    pub fn register(&self, metric: &str, spec: ChartSpec) -> Result<(), SpcError> {
        match self.charts.entry(metric.to_string()) {
            Entry::Occupied(_) => Err(SpcError::DuplicateMetric(metric.to_string())),
            Entry::Vacant(entry) => {
                let slot = self.build_slot(metric, spec)?;
                entry.insert(Arc::new(Mutex::new(slot)));
                Ok(())
            }
        }
    }

    /// Route one observation to `metric`, creating its chart on first use.
    ///
    /// The chart type comes from the configured spec for the metric; an
    /// unconfigured metric infers it from the payload (subgroup: X-bar-R with
    /// `n = len`, proportion: p, value: the configured default value chart).
    ///
    /// # Errors
    ///
    /// - [`SpcError::TypeMismatch`] if the payload does not fit the existing chart.
    /// - Any ingestion error from the chart. Nothing is created or changed on error.
    pub fn record(
        &self,
        metric: &str,
        payload: Payload,
        timestamp: Timestamp,
    ) -> Result<UpdateResult, SpcError> {
        let existing = self.charts.get(metric).map(|entry| Arc::clone(entry.value()));
        let (result, events) = match existing {
            Some(slot) => self.ingest(metric, &slot, &payload, timestamp)?,
            None => match self.charts.entry(metric.to_string()) {
                Entry::Occupied(entry) => {
                    let slot = Arc::clone(entry.get());
                    drop(entry);
                    self.ingest(metric, &slot, &payload, timestamp)?
                }
                Entry::Vacant(entry) => {
                    let spec = self.spec_for(metric, &payload)?;
                    let mut slot = self.build_slot(metric, spec)?;
                    let result = slot.chart.ingest(&payload, timestamp)?;
                    let events = self.events_for(metric, &slot, &result);
                    entry.insert(Arc::new(Mutex::new(slot)));
                    (result, events)
                }
            },
        };
        self.deliver(metric, &result, &events);
        Ok(result)
    }

    /// [`record`](Self::record) stamped with the current time.
    pub fn record_now(&self, metric: &str, payload: Payload) -> Result<UpdateResult, SpcError> {
        self.record(metric, payload, Utc::now())
    }

    /// Snapshot of one chart.
    pub fn status(&self, metric: &str) -> Result<ChartStatus, SpcError> {
        Ok(self.slot(metric)?.lock().chart.status())
    }

    /// Retained violation log of one chart.
    pub fn violations(&self, metric: &str) -> Result<Vec<Violation>, SpcError> {
        Ok(self.slot(metric)?.lock().chart.violations())
    }

    /// Remove and return the retained violation log of one chart.
    pub fn drain_violations(&self, metric: &str) -> Result<Vec<Violation>, SpcError> {
        Ok(self.slot(metric)?.lock().chart.drain_violations())
    }

    /// Labels attached to a metric at creation.
    pub fn labels(&self, metric: &str) -> Result<BTreeMap<String, String>, SpcError> {
        Ok(self.slot(metric)?.lock().labels.clone())
    }

    /// Clear one chart's history, keeping its type and configuration.
    pub fn reset(&self, metric: &str) -> Result<(), SpcError> {
        self.slot(metric)?.lock().chart.reset();
        debug!(metric, "chart reset");
        Ok(())
    }

    /// Drop a chart, returning its final status.
    pub fn remove(&self, metric: &str) -> Result<ChartStatus, SpcError> {
        let (_, slot) = self
            .charts
            .remove(metric)
            .ok_or_else(|| SpcError::UnknownMetric(metric.to_string()))?;
        let status = slot.lock().chart.status();
        debug!(metric, "chart removed");
        Ok(status)
    }

    /// Registered metric names, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.charts.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    /// Fleet-wide status. An empty registry is in control.
    pub fn overall_status(&self) -> OverallStatus {
        let slots: Vec<Arc<Mutex<Slot>>> = self
            .charts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut in_control = 0;
        let mut active = 0;
        for slot in &slots {
            let status = slot.lock().chart.status();
            if status.in_control {
                in_control += 1;
            }
            active += status.active_violations;
        }
        OverallStatus::from_counts(slots.len(), in_control, active)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn slot(&self, metric: &str) -> Result<Arc<Mutex<Slot>>, SpcError> {
        self.charts
            .get(metric)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SpcError::UnknownMetric(metric.to_string()))
    }

    /// Configured spec for `metric`, or one inferred from the payload.
    fn spec_for(&self, metric: &str, payload: &Payload) -> Result<ChartSpec, SpcError> {
        if let Some(spec) = self.config.metrics.get(metric) {
            return Ok(spec.clone());
        }
        let chart = match payload {
            Payload::Subgroup(values) if values.is_empty() => {
                return Err(SpcError::Shape("subgroup is empty".to_string()));
            }
            Payload::Subgroup(values) => ChartConfig::xbar_r(values.len()),
            Payload::Proportion { .. } => ChartConfig::p(),
            Payload::Value(_) => self.config.default_value_chart,
        };
        Ok(ChartSpec::new(chart))
    }

    fn build_slot(&self, metric: &str, spec: ChartSpec) -> Result<Slot, SpcError> {
        let settings = spec.settings.unwrap_or(self.config.defaults);
        let chart = Chart::from_config(&spec.chart, settings)?;
        debug!(metric, method = %chart.method(), "chart created");
        Ok(Slot {
            chart,
            labels: spec.labels,
        })
    }

    /// Ingest under the chart's lock, collecting events to deliver after unlock.
    fn ingest(
        &self,
        metric: &str,
        slot: &Mutex<Slot>,
        payload: &Payload,
        timestamp: Timestamp,
    ) -> Result<(UpdateResult, Vec<ViolationEvent>), SpcError> {
        let mut guard = slot.lock();
        let result = guard.chart.ingest(payload, timestamp).map_err(|err| {
            if let SpcError::TypeMismatch { expected, found } = &err {
                warn!(metric, %expected, %found, "payload rejected");
            }
            err
        })?;
        let events = self.events_for(metric, &guard, &result);
        Ok((result, events))
    }

    fn events_for(&self, metric: &str, slot: &Slot, result: &UpdateResult) -> Vec<ViolationEvent> {
        if self.sink.is_none() {
            return Vec::new();
        }
        result
            .violations
            .iter()
            .map(|violation| ViolationEvent {
                metric: metric.to_string(),
                method: slot.chart.method(),
                labels: slot.labels.clone(),
                violation: violation.clone(),
            })
            .collect()
    }

    fn deliver(&self, metric: &str, result: &UpdateResult, events: &[ViolationEvent]) {
        let Some(sink) = &self.sink else {
            return;
        };
        for event in events {
            sink.on_violation(event);
        }
        sink.on_update(metric, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::spc::{PointStatistic, Series, WesternElectricRule};
    use chrono::{DateTime, Duration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts(i: i64) -> Timestamp {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp") + Duration::seconds(i)
    }

    /// Warm up on a flat process, then spike.
    fn drive_out_of_control(registry: &ChartRegistry, metric: &str) -> UpdateResult {
        for i in 0..25 {
            registry
                .record(metric, Payload::subgroup([10.0; 5]), ts(i))
                .expect("valid subgroup");
        }
        registry
            .record(metric, Payload::subgroup([50.0; 5]), ts(25))
            .expect("valid subgroup")
    }

    #[test]
    fn test_end_to_end_xbar_r() {
        let registry = ChartRegistry::default();
        let result = drive_out_of_control(&registry, "fill_weight");

        let newest = result
            .violations
            .iter()
            .find(|v| v.point_index == 25)
            .expect("violation at the spike");
        assert_eq!(newest.rule, WesternElectricRule::BeyondLimits);
        assert_eq!(newest.series, Series::XBar);
        assert_eq!(newest.severity, 5);
        assert!(result.violations.iter().all(|v| v.series != Series::Range));

        let status = registry.status("fill_weight").expect("registered");
        assert_eq!(status.method, ChartMethod::XBarR);
        assert_eq!(status.observations, 26);
        assert!(!status.in_control);
        assert_eq!(
            status.range_limits.map(|r| r.upper_control_limit),
            Some(0.0)
        );
    }

    #[test]
    fn test_inference_from_payload() {
        let registry = ChartRegistry::default();
        registry
            .record("diameter", Payload::subgroup(vec![1.0, 2.0, 3.0]), ts(0))
            .expect("valid");
        registry
            .record("rejects", Payload::proportion(50, 2), ts(0))
            .expect("valid");
        registry.record("spread", 0.25.into(), ts(0)).expect("valid");

        assert_eq!(registry.status("diameter").expect("exists").method, ChartMethod::XBarR);
        assert_eq!(registry.status("rejects").expect("exists").method, ChartMethod::P);
        assert_eq!(registry.status("spread").expect("exists").method, ChartMethod::Ewma);
        assert_eq!(registry.metric_names(), vec!["diameter", "rejects", "spread"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_type_mismatch() {
        let registry = ChartRegistry::default();
        registry
            .record("temp", Payload::value(20.0), ts(0))
            .expect("valid");
        let before = registry.status("temp").expect("exists");

        let err = registry
            .record("temp", Payload::subgroup([1.0, 2.0]), ts(1))
            .expect_err("shape does not fit an EWMA chart");
        assert!(matches!(
            err,
            SpcError::TypeMismatch {
                expected: ChartMethod::Ewma,
                found: PayloadKind::Subgroup
            }
        ));
        assert_eq!(registry.status("temp").expect("exists"), before);
    }

    #[test]
    fn test_failed_first_record_creates_nothing() {
        let registry = ChartRegistry::default();
        assert!(matches!(
            registry.record("m", Payload::value(f64::NAN), ts(0)),
            Err(SpcError::Numeric(_))
        ));
        assert!(matches!(
            registry.record("m", Payload::subgroup(Vec::new()), ts(0)),
            Err(SpcError::Shape(_))
        ));
        assert!(matches!(
            registry.record("m", Payload::subgroup(vec![1.0; 11]), ts(0)),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            registry.record("m", Payload::proportion(2, 3), ts(0)),
            Err(SpcError::Config(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_error_does_not_mutate() {
        let registry = ChartRegistry::default();
        for i in 0..30 {
            registry
                .record("m", Payload::subgroup([1.0, 2.0, 4.0]), ts(i))
                .expect("valid");
        }
        let before = registry.status("m").expect("exists");
        let log = registry.violations("m").expect("exists");
        assert!(matches!(
            registry.record("m", Payload::subgroup([1.0, 2.0]), ts(40)),
            Err(SpcError::Shape(_))
        ));
        assert_eq!(registry.status("m").expect("exists"), before);
        assert_eq!(registry.violations("m").expect("exists"), log);
    }

    #[test]
    fn test_status_idempotent() {
        let registry = ChartRegistry::default();
        drive_out_of_control(&registry, "m");
        assert_eq!(registry.status("m").expect("exists"), registry.status("m").expect("exists"));
        assert_eq!(registry.overall_status(), registry.overall_status());
    }

    #[test]
    fn test_overall_status_threshold() {
        let registry = ChartRegistry::default();
        assert_eq!(
            registry.overall_status(),
            OverallStatus {
                total_charts: 0,
                in_control_count: 0,
                active_violation_count: 0,
                status: ProcessState::InControl,
            }
        );

        // Nine charts still warming up are in control.
        for i in 0..9 {
            registry
                .record(&format!("ok_{i}"), Payload::value(1.0), ts(0))
                .expect("valid");
        }
        drive_out_of_control(&registry, "bad_0");
        let status = registry.overall_status();
        assert_eq!(status.total_charts, 10);
        assert_eq!(status.in_control_count, 9);
        assert!(status.active_violation_count > 0);
        // 9 / 10 is not fewer than 90%.
        assert_eq!(status.status, ProcessState::InControl);

        drive_out_of_control(&registry, "bad_1");
        let status = registry.overall_status();
        assert_eq!(status.in_control_count, 9);
        assert_eq!(status.total_charts, 11);
        assert_eq!(status.status, ProcessState::OutOfControl);
    }

    #[test]
    fn test_sink_receives_labelled_events() {
        let sink = Arc::new(MemorySink::new());
        let registry = ChartRegistry::default().with_sink(sink.clone());
        registry
            .register(
                "fill_weight",
                ChartSpec::new(ChartConfig::xbar_r(5))
                    .with_label("line", "A")
                    .with_label("phase", "production"),
            )
            .expect("new metric");

        let result = drive_out_of_control(&registry, "fill_weight");
        let events = sink.events();
        assert_eq!(events.len(), result.violations.len());
        assert!(events.iter().all(|e| e.metric == "fill_weight"
            && e.method == ChartMethod::XBarR
            && e.labels["line"] == "A"));
        assert!(events
            .iter()
            .any(|e| e.violation.rule == WesternElectricRule::BeyondLimits
                && e.violation.point_index == 25));
    }

    #[test]
    fn test_sink_on_update_sees_every_record() {
        struct Counting(AtomicUsize);
        impl ViolationSink for Counting {
            fn on_violation(&self, _event: &ViolationEvent) {}
            fn on_update(&self, _metric: &str, _result: &UpdateResult) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        let registry = ChartRegistry::default().with_sink(sink.clone());
        for i in 0..5 {
            registry.record("m", Payload::value(i as f64), ts(i)).expect("valid");
        }
        assert!(registry.record("m", Payload::value(f64::NAN), ts(9)).is_err());
        assert_eq!(sink.0.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = std::sync::mpsc::channel::<ViolationEvent>();
        let registry = ChartRegistry::default().with_sink(Arc::new(tx));
        let result = drive_out_of_control(&registry, "m");
        let received: Vec<ViolationEvent> = rx.try_iter().collect();
        assert_eq!(received.len(), result.violations.len());
    }

    #[test]
    fn test_register_duplicate_and_unknown() {
        let registry = ChartRegistry::default();
        registry
            .register("m", ChartSpec::new(ChartConfig::cusum()))
            .expect("new metric");
        assert!(matches!(
            registry.register("m", ChartSpec::new(ChartConfig::p())),
            Err(SpcError::DuplicateMetric(_))
        ));
        assert!(matches!(
            registry.register("bad", ChartSpec::new(ChartConfig::xbar_r(12))),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            registry.status("missing"),
            Err(SpcError::UnknownMetric(_))
        ));
        assert!(matches!(
            registry.reset("missing"),
            Err(SpcError::UnknownMetric(_))
        ));
        assert_eq!(registry.metric_names(), vec!["m"]);
    }

    #[test]
    fn test_configured_specs() {
        let config = RegistryConfig::from_toml_str(
            r#"
            default_value_chart = { type = "cusum" }

            [metrics.rejects]
            chart = { type = "p", target_sample_size = 100 }
            labels = { line = "B" }
            "#,
        )
        .expect("valid config");
        let registry = ChartRegistry::new(config).expect("valid config");

        registry
            .record("rejects", Payload::proportion(40, 1), ts(0))
            .expect("valid");
        registry.record("latency", Payload::value(3.0), ts(0)).expect("valid");

        assert_eq!(registry.status("rejects").expect("exists").method, ChartMethod::P);
        assert_eq!(registry.labels("rejects").expect("exists")["line"], "B");
        assert_eq!(registry.status("latency").expect("exists").method, ChartMethod::Cusum);

        // A configured p chart refuses a value payload.
        assert!(matches!(
            registry.record("rejects", Payload::value(0.1), ts(1)),
            Err(SpcError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_reset_and_remove() {
        let registry = ChartRegistry::default();
        drive_out_of_control(&registry, "m");
        assert_eq!(registry.overall_status().status, ProcessState::OutOfControl);

        registry.reset("m").expect("exists");
        let status = registry.status("m").expect("exists");
        assert_eq!(status.observations, 0);
        assert!(status.in_control);
        assert_eq!(status.method, ChartMethod::XBarR);

        let last = registry.remove("m").expect("exists");
        assert_eq!(last.observations, 0);
        assert!(registry.is_empty());
        assert!(matches!(registry.remove("m"), Err(SpcError::UnknownMetric(_))));
    }

    #[test]
    fn test_drain_violations() {
        let registry = ChartRegistry::default();
        let result = drive_out_of_control(&registry, "m");
        let drained = registry.drain_violations("m").expect("exists");
        assert_eq!(drained.len(), result.violations.len());
        assert!(registry.violations("m").expect("exists").is_empty());
        // Draining the log does not change the in-control verdict.
        assert!(!registry.status("m").expect("exists").in_control);
    }

    #[test]
    fn test_bounded_memory_long_stream() {
        let registry = ChartRegistry::default();
        for i in 0..5_000_i64 {
            let x = [9.0, 11.0, 10.0, 12.0, 8.0][(i % 5) as usize];
            registry.record("m", Payload::value(x), ts(i)).expect("valid");
        }
        let status = registry.status("m").expect("exists");
        assert_eq!(status.window_len, 1000);
        assert_eq!(status.window_capacity, 1000);
        assert_eq!(status.observations, 5_000);
        assert!(registry.violations("m").expect("exists").len() <= 1000);
        assert!(status.active_violations <= 8 * 50);
    }

    #[test]
    fn test_proportion_payload_routes_size_then_defective() {
        let registry = ChartRegistry::default();
        let result = registry
            .record("rejects", Payload::proportion(40, 2), ts(0))
            .expect("valid");
        assert_eq!(
            result.statistic,
            PointStatistic::Proportion {
                proportion: 0.05,
                defective: 2,
                sample_size: 40
            }
        );
    }

    #[test]
    fn test_bounded_p_chart_long_stream() {
        let registry = ChartRegistry::default();
        for i in 0..3_000_i64 {
            let defective = [5, 7, 4, 6, 5][(i % 5) as usize];
            registry
                .record("rejects", Payload::proportion(100, defective), ts(i))
                .expect("valid");
        }
        let status = registry.status("rejects").expect("exists");
        assert_eq!(status.window_len, 1000);
        assert_eq!(status.observations, 3_000);
        assert!(status.active_violations <= 8 * 50);
    }

    #[test]
    fn test_concurrent_records() {
        let registry = ChartRegistry::default();
        std::thread::scope(|scope| {
            for t in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    for i in 0..200 {
                        let x = 10.0 + ((i * 7 + t) % 5) as f64;
                        registry
                            .record("shared", Payload::value(x), ts(i))
                            .expect("valid");
                        registry
                            .record(&format!("own_{t}"), Payload::value(x), ts(i))
                            .expect("valid");
                    }
                });
            }
        });
        assert_eq!(registry.status("shared").expect("exists").observations, 800);
        assert_eq!(registry.len(), 5);
        for t in 0..4 {
            assert_eq!(
                registry
                    .status(&format!("own_{t}"))
                    .expect("exists")
                    .observations,
                200
            );
        }
    }

    #[test]
    fn test_overall_status_counts() {
        let status = OverallStatus::from_counts(20, 18, 3);
        assert_eq!(status.status, ProcessState::InControl);
        let status = OverallStatus::from_counts(20, 17, 3);
        assert_eq!(status.status, ProcessState::OutOfControl);
        let status = OverallStatus::from_counts(1, 0, 1);
        assert_eq!(status.status, ProcessState::OutOfControl);
    }
}
