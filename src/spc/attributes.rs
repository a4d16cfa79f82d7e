//! Attributes control chart: proportion nonconforming (p) with variable
//! sample size.
//!
//! The p chart monitors the fraction of defective items per sample. Each
//! point is judged against a band computed from its own sample size, so
//! larger samples get tighter limits.
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.,
//!   Chapter 7: Control Charts for Attributes.
//! - ASTM E2587 — Standard Practice for Use of Control Charts

use tracing::debug;

use super::chart::{
    note_timestamp, ChartMethod, ChartStatus, ControlChart, ControlLimits, PointStatistic,
    Series, Timestamp, UpdateResult, Violation, ViolationTracker,
};
use super::limits::{p_band, p_limits};
use super::rules::RulePoint;
use crate::config::ChartSettings;
use crate::error::SpcError;
use crate::window::{SampleWindow, RAW_WINDOW_CAPACITY};

/// One `(sample_size, defective)` observation kept in the window.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProportionPoint {
    index: usize,
    defective: u64,
    sample_size: u64,
    timestamp: Timestamp,
}

impl ProportionPoint {
    fn proportion(&self) -> f64 {
        self.defective as f64 / self.sample_size as f64
    }
}

// ---------------------------------------------------------------------------
// P Chart
// ---------------------------------------------------------------------------

/// Proportion nonconforming (P) chart.
///
/// # Formulas
///
/// - CL = p-bar = total_defectives / total_inspected (over the window)
/// - UCL_i = min(1, p-bar + 3 * sqrt(p-bar * (1 - p-bar) / n_i))
/// - LCL_i = max(0, p-bar - 3 * sqrt(p-bar * (1 - p-bar) / n_i))
///
/// Running totals are adjusted on eviction, so p-bar always reflects exactly
/// the samples in the window.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::spc::{ControlChart, PChart};
///
/// let mut chart = PChart::new().unwrap();
/// for d in [5, 8, 3, 6, 4, 7, 2, 9, 5, 6].iter().cycle().take(25) {
///     chart.add_sample(100, *d, Utc::now()).unwrap();
/// }
/// let p_bar = chart.p_bar().unwrap();
/// assert!((p_bar - 0.0544).abs() < 1e-12);
///
/// let small = chart.limits_for(50).unwrap();
/// let large = chart.limits_for(500).unwrap();
/// assert!(large.upper_control_limit < small.upper_control_limit);
/// ```
///
/// # Reference
///
/// Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.,
/// Chapter 7, Section 7.3.
#[derive(Debug, Clone)]
pub struct PChart {
    /// Sample size used to quote a single representative band.
    target_sample_size: Option<u64>,
    settings: ChartSettings,
    samples: SampleWindow<ProportionPoint>,
    total_defective: u64,
    total_items: u64,
    /// Whether the warm-up threshold has been reached since creation or reset.
    established: bool,
    tracker: ViolationTracker,
    /// Rule points rebuilt on every evaluation.
    scratch: Vec<RulePoint>,
    observations: usize,
    last_timestamp: Option<Timestamp>,
}

impl PChart {
    /// Create a new P chart with default settings.
    pub fn new() -> Result<Self, SpcError> {
        Self::with_settings(None, ChartSettings::default())
    }

    /// Create a chart with a quoting sample size and explicit tunables.
    ///
    /// # Errors
    ///
    /// [`SpcError::Config`] if `target_sample_size == Some(0)` or the settings
    /// are invalid.
    pub fn with_settings(
        target_sample_size: Option<u64>,
        settings: ChartSettings,
    ) -> Result<Self, SpcError> {
        if target_sample_size == Some(0) {
            return Err(SpcError::Config(
                "target_sample_size must be positive".to_string(),
            ));
        }
        settings.validate(RAW_WINDOW_CAPACITY)?;
        let capacity = settings.window_capacity_or(RAW_WINDOW_CAPACITY);
        Ok(Self {
            target_sample_size,
            settings,
            samples: SampleWindow::new(capacity)?,
            total_defective: 0,
            total_items: 0,
            established: false,
            tracker: ViolationTracker::new(settings.violation_capacity)?,
            scratch: Vec::with_capacity(settings.lookback.min(capacity)),
            observations: 0,
            last_timestamp: None,
        })
    }

    /// Add a sample of `sample_size` items, `defective` of them nonconforming.
    ///
    /// # Errors
    ///
    /// [`SpcError::Config`] if `sample_size == 0`, `defective > sample_size`,
    /// or the window totals would overflow. The chart is unchanged on error.
    pub fn add_sample(
        &mut self,
        sample_size: u64,
        defective: u64,
        timestamp: Timestamp,
    ) -> Result<UpdateResult, SpcError> {
        if sample_size == 0 {
            return Err(SpcError::Config("sample_size must be positive".to_string()));
        }
        if defective > sample_size {
            return Err(SpcError::Config(format!(
                "defective count {defective} exceeds sample size {sample_size}"
            )));
        }

        // Totals after the push, including the eviction it will cause.
        let (out_defective, out_items) = match self.samples.iter().next() {
            Some(oldest) if self.samples.is_full() => (oldest.defective, oldest.sample_size),
            _ => (0, 0),
        };
        let overflow = || SpcError::Config("p chart window totals overflow u64".to_string());
        let total_defective = (self.total_defective - out_defective)
            .checked_add(defective)
            .ok_or_else(overflow)?;
        let total_items = (self.total_items - out_items)
            .checked_add(sample_size)
            .ok_or_else(overflow)?;

        note_timestamp(&mut self.last_timestamp, timestamp, ChartMethod::P);
        let index = self.observations;
        self.observations += 1;
        let point = ProportionPoint {
            index,
            defective,
            sample_size,
            timestamp,
        };
        self.samples.push(point);
        self.total_defective = total_defective;
        self.total_items = total_items;

        if !self.established && self.samples.len() >= self.settings.warmup_threshold {
            self.established = true;
            debug!(
                samples = self.samples.len(),
                p_bar = self.p_bar().unwrap_or_default(),
                "p chart control limits established"
            );
        }

        let violations = self.evaluate();
        Ok(UpdateResult::new(
            index,
            PointStatistic::Proportion {
                proportion: point.proportion(),
                defective,
                sample_size,
            },
            self.limits_for(sample_size),
            None,
            violations,
        ))
    }

    /// Overall proportion defective over the window, or `None` with no data.
    pub fn p_bar(&self) -> Option<f64> {
        (self.total_items > 0).then(|| self.total_defective as f64 / self.total_items as f64)
    }

    /// `(total_defective, total_items)` over the window.
    pub fn totals(&self) -> (u64, u64) {
        (self.total_defective, self.total_items)
    }

    pub fn target_sample_size(&self) -> Option<u64> {
        self.target_sample_size
    }

    /// Band for a sample of size `n`, or `None` before warm-up or for `n == 0`.
    pub fn limits_for(&self, n: u64) -> Option<ControlLimits> {
        if !self.established {
            return None;
        }
        p_limits(self.p_bar()?, n)
    }

    /// A single representative band: the configured target sample size, or
    /// the most recent sample's size when none is configured.
    pub fn quoted_limits(&self) -> Option<ControlLimits> {
        let n = match self.target_sample_size {
            Some(n) => n,
            None => self.samples.last()?.sample_size,
        };
        self.limits_for(n)
    }

    fn evaluate(&mut self) -> Vec<Violation> {
        let Some(p_bar) = self.p_bar().filter(|_| self.established) else {
            return Vec::new();
        };
        self.scratch.clear();
        self.scratch.extend(
            self.samples
                .iter_last(self.settings.lookback)
                .filter_map(|s| {
                    Some(RulePoint {
                        index: s.index,
                        value: s.proportion(),
                        timestamp: s.timestamp,
                        band: p_band(p_bar, s.sample_size)?,
                    })
                }),
        );
        self.tracker
            .evaluate(Series::Proportion, self.settings.rules, &self.scratch)
    }
}

impl ControlChart for PChart {
    fn method(&self) -> ChartMethod {
        ChartMethod::P
    }

    fn status(&self) -> ChartStatus {
        ChartStatus {
            method: ChartMethod::P,
            limits: self.quoted_limits(),
            range_limits: None,
            window_len: self.samples.len(),
            window_capacity: self.samples.capacity(),
            observations: self.observations,
            total_violations: self.tracker.total(),
            dropped_violations: self.tracker.dropped(),
            active_violations: self.tracker.active_count(),
            in_control: self.is_in_control(),
        }
    }

    fn control_limits(&self) -> Option<ControlLimits> {
        self.quoted_limits()
    }

    fn is_in_control(&self) -> bool {
        self.tracker.active_count() == 0
    }

    fn violations(&self) -> Vec<Violation> {
        self.tracker.snapshot()
    }

    fn drain_violations(&mut self) -> Vec<Violation> {
        self.tracker.drain()
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.total_defective = 0;
        self.total_items = 0;
        self.established = false;
        self.tracker.clear();
        self.observations = 0;
        self.last_timestamp = None;
    }
}
