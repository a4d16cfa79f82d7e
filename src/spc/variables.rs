//! Variables control chart: X-bar-R over a rolling window of subgroups.
//!
//! The chart tracks the mean (X-bar) and within-subgroup range (R) of
//! fixed-size subgroups. Limits are recomputed from the whole window on
//! every accepted subgroup once the warm-up threshold is reached, and both
//! series are scanned with the enabled run rules.
//!
//! # Control Chart Factors
//!
//! A2, D3, D4 come from [`xbar_r_factors`](super::xbar_r_factors).
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.
//! - ASTM E2587 — Standard Practice for Use of Control Charts
//! - Shewhart, W.A. (1931). *Economic Control of Quality of Manufactured Product*.

use tracing::debug;
use u_numflow::stats;

use super::chart::{
    note_timestamp, ChartMethod, ChartStatus, ControlChart, ControlLimits, PointStatistic,
    Sample, Series, Timestamp, UpdateResult, Violation, ViolationTracker,
};
use super::limits::{xbar_r_limits, MAX_SUBGROUP_SIZE, MIN_SUBGROUP_SIZE};
use super::rules::RulePoint;
use crate::config::ChartSettings;
use crate::error::SpcError;
use crate::window::{SampleWindow, SUBGROUP_WINDOW_CAPACITY};

/// Per-subgroup statistics kept in the window.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SubgroupPoint {
    index: usize,
    mean: f64,
    range: f64,
    timestamp: Timestamp,
}

/// Mean and range (`max - min`) of a non-empty subgroup.
///
/// Returns `None` for an empty slice.
///
/// # Examples
///
/// ```
/// use u_spc::spc::subgroup_stats;
///
/// let (mean, range) = subgroup_stats(&[9.0, 10.0, 11.0, 10.0]).unwrap();
/// assert_eq!(mean, 10.0);
/// assert_eq!(range, 2.0);
/// ```
pub fn subgroup_stats(values: &[f64]) -> Option<(f64, f64)> {
    let mean = stats::mean(values)?;
    let range = stats::max(values)? - stats::min(values)?;
    Some((mean, range))
}

// ---------------------------------------------------------------------------
// X-bar-R Chart
// ---------------------------------------------------------------------------

/// X-bar and Range (X-bar-R) control chart.
///
/// Monitors the process mean (X-bar chart) and process variability (R chart)
/// using subgroup ranges. Suitable for subgroup sizes n = 2..=10.
///
/// # Algorithm
///
/// 1. For each subgroup, compute the mean (X-bar) and range (R).
/// 2. Over the window, compute the grand mean (X-double-bar) and average range (R-bar).
/// 3. X-bar chart limits: CL = X-double-bar, UCL/LCL = CL +/- A2 * R-bar.
/// 4. R chart limits: CL = R-bar, UCL = D4 * R-bar, LCL = D3 * R-bar.
///
/// The chart is in control only when both series are. Window sums of the
/// means and ranges are kept incrementally, so steady-state updates do not
/// rescan the window.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::spc::{ControlChart, XBarRChart};
///
/// let mut chart = XBarRChart::new(5).unwrap();
/// for i in 0..25 {
///     let shift = (i % 3) as f64 * 0.1;
///     chart
///         .add_subgroup(&[25.0 + shift, 26.0, 24.5, 25.5, 25.0], Utc::now())
///         .unwrap();
/// }
///
/// let limits = chart.control_limits().expect("limits after warm-up");
/// assert!(limits.upper_control_limit > limits.center_line);
/// assert!(limits.center_line > limits.lower_control_limit);
/// ```
///
/// # Reference
///
/// Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.,
/// Chapter 6: Control Charts for Variables.
#[derive(Debug, Clone)]
pub struct XBarRChart {
    /// Fixed subgroup size (2..=10).
    subgroup_size: usize,
    settings: ChartSettings,
    subgroups: SampleWindow<SubgroupPoint>,
    /// Raw observations of the windowed subgroups.
    samples: SampleWindow<Sample>,
    sum_means: f64,
    sum_ranges: f64,
    /// X-bar chart control limits.
    xbar_limits: Option<ControlLimits>,
    /// R chart control limits.
    r_limits: Option<ControlLimits>,
    tracker: ViolationTracker,
    /// Rule points, rebuilt per series on every evaluation.
    scratch: Vec<RulePoint>,
    observations: usize,
    last_timestamp: Option<Timestamp>,
}

impl XBarRChart {
    /// Create a new X-bar-R chart with the given subgroup size and default settings.
    ///
    /// # Errors
    ///
    /// [`SpcError::Config`] if `subgroup_size` is not in 2..=10.
    pub fn new(subgroup_size: usize) -> Result<Self, SpcError> {
        Self::with_settings(subgroup_size, ChartSettings::default())
    }

    /// Create a chart with explicit tunables.
    ///
    /// # Errors
    ///
    /// [`SpcError::Config`] for an untabulated subgroup size, invalid
    /// settings, or a window too large to hold its raw observations.
    pub fn with_settings(subgroup_size: usize, settings: ChartSettings) -> Result<Self, SpcError> {
        if !(MIN_SUBGROUP_SIZE..=MAX_SUBGROUP_SIZE).contains(&subgroup_size) {
            return Err(SpcError::Config(format!(
                "subgroup_size must be {MIN_SUBGROUP_SIZE}..={MAX_SUBGROUP_SIZE}, got {subgroup_size}"
            )));
        }
        settings.validate(SUBGROUP_WINDOW_CAPACITY)?;
        let capacity = settings.window_capacity_or(SUBGROUP_WINDOW_CAPACITY);
        let raw_capacity = capacity.checked_mul(subgroup_size).ok_or_else(|| {
            SpcError::Config(format!(
                "window of {capacity} subgroups of {subgroup_size} overflows"
            ))
        })?;
        Ok(Self {
            subgroup_size,
            settings,
            subgroups: SampleWindow::new(capacity)?,
            samples: SampleWindow::new(raw_capacity)?,
            sum_means: 0.0,
            sum_ranges: 0.0,
            xbar_limits: None,
            r_limits: None,
            tracker: ViolationTracker::new(settings.violation_capacity)?,
            scratch: Vec::with_capacity(settings.lookback.min(capacity)),
            observations: 0,
            last_timestamp: None,
        })
    }

    pub fn subgroup_size(&self) -> usize {
        self.subgroup_size
    }

    /// R chart control limits, or `None` before warm-up.
    pub fn r_limits(&self) -> Option<ControlLimits> {
        self.r_limits
    }

    /// Raw observations of the subgroups still in the window, oldest first.
    /// Each carries the index of the subgroup it arrived in.
    pub fn raw_samples(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    /// Add one subgroup.
    ///
    /// # Errors
    ///
    /// - [`SpcError::Shape`] if the subgroup is empty or its length differs
    ///   from the chart's subgroup size.
    /// - [`SpcError::Numeric`] if any value is NaN or infinite.
    ///
    /// The chart is unchanged on error.
    pub fn add_subgroup(
        &mut self,
        values: &[f64],
        timestamp: Timestamp,
    ) -> Result<UpdateResult, SpcError> {
        if values.is_empty() {
            return Err(SpcError::Shape("subgroup is empty".to_string()));
        }
        if values.len() != self.subgroup_size {
            return Err(SpcError::Shape(format!(
                "expected subgroup of {} values, got {}",
                self.subgroup_size,
                values.len()
            )));
        }
        for &x in values {
            SpcError::ensure_finite("subgroup value", x)?;
        }
        let (mean, range) = subgroup_stats(values)
            .ok_or_else(|| SpcError::Shape("subgroup is empty".to_string()))?;

        note_timestamp(&mut self.last_timestamp, timestamp, ChartMethod::XBarR);
        let index = self.observations;
        self.observations += 1;
        if let Some(evicted) = self.subgroups.push(SubgroupPoint {
            index,
            mean,
            range,
            timestamp,
        }) {
            self.sum_means -= evicted.mean;
            self.sum_ranges -= evicted.range;
        }
        self.sum_means += mean;
        self.sum_ranges += range;
        for &value in values {
            self.samples.push(Sample {
                value,
                timestamp,
                subgroup_index: Some(index),
            });
        }

        self.recompute_limits();
        let violations = self.evaluate();

        Ok(UpdateResult::new(
            index,
            PointStatistic::Subgroup { mean, range },
            self.xbar_limits,
            self.r_limits,
            violations,
        ))
    }

    /// Recompute both limit sets from the window sums.
    fn recompute_limits(&mut self) {
        let len = self.subgroups.len();
        if len == 0 || len < self.settings.warmup_threshold {
            return;
        }
        let grand_mean = self.sum_means / len as f64;
        // Running subtraction can leave a tiny negative residue.
        let r_bar = (self.sum_ranges / len as f64).max(0.0);
        let Some((xbar, r)) = xbar_r_limits(grand_mean, r_bar, self.subgroup_size) else {
            return;
        };
        if self.xbar_limits.is_none() {
            debug!(
                subgroups = self.subgroups.len(),
                center_line = xbar.center_line,
                ucl = xbar.upper_control_limit,
                lcl = xbar.lower_control_limit,
                r_bar,
                "X-bar-R control limits established"
            );
        }
        self.xbar_limits = Some(xbar);
        self.r_limits = Some(r);
    }

    /// Scan both series over the lookback.
    fn evaluate(&mut self) -> Vec<Violation> {
        let (Some(xbar), Some(r)) = (self.xbar_limits, self.r_limits) else {
            return Vec::new();
        };
        let rules = self.settings.rules;
        self.fill_scratch(xbar, |s| s.mean);
        let mut violations = self.tracker.evaluate(Series::XBar, rules, &self.scratch);
        self.fill_scratch(r, |s| s.range);
        violations.extend(self.tracker.evaluate(Series::Range, rules, &self.scratch));
        violations
    }

    fn fill_scratch(&mut self, limits: ControlLimits, value: fn(&SubgroupPoint) -> f64) {
        let band = limits.band();
        self.scratch.clear();
        self.scratch.extend(
            self.subgroups
                .iter_last(self.settings.lookback)
                .map(|s| RulePoint {
                    index: s.index,
                    value: value(s),
                    timestamp: s.timestamp,
                    band,
                }),
        );
    }
}

impl ControlChart for XBarRChart {
    fn method(&self) -> ChartMethod {
        ChartMethod::XBarR
    }

    fn status(&self) -> ChartStatus {
        ChartStatus {
            method: ChartMethod::XBarR,
            limits: self.xbar_limits,
            range_limits: self.r_limits,
            window_len: self.subgroups.len(),
            window_capacity: self.subgroups.capacity(),
            observations: self.observations,
            total_violations: self.tracker.total(),
            dropped_violations: self.tracker.dropped(),
            active_violations: self.tracker.active_count(),
            in_control: self.is_in_control(),
        }
    }

    fn control_limits(&self) -> Option<ControlLimits> {
        self.xbar_limits
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
        self.subgroups.clear();
        self.samples.clear();
        self.sum_means = 0.0;
        self.sum_ranges = 0.0;
        self.xbar_limits = None;
        self.r_limits = None;
        self.tracker.clear();
        self.observations = 0;
        self.last_timestamp = None;
    }
}
