//! Cumulative Sum (CUSUM) chart for detecting small persistent shifts in process mean.
//!
//! # Algorithm
//!
//! The target mean mu_0 and standard deviation sigma are estimated once from
//! the warm-up window and frozen until [`reset`](crate::spc::ControlChart::reset).
//! With allowance `k = K * sigma` and decision interval `h = H * sigma`:
//!
//! ```text
//! S_H(i) = max(0, S_H(i-1) + (x_i - mu_0) - k)
//! S_L(i) = max(0, S_L(i-1) + (mu_0 - x_i) - k)
//! ```
//!
//! A signal is generated when `S_H(i) > h` or `S_L(i) > h`.
//!
//! For rule evaluation the chart plots one signed series, `S_H` when it
//! dominates and `-S_L` otherwise, against `CL = 0, UCL = h, LCL = -h`.
//!
//! # Parameters
//!
//! - **K**: reference value (allowance), typically 0.5 (designed to detect a 1-sigma shift)
//! - **H**: decision interval, typically 4 or 5
//!
//! # Reference
//!
//! Page, E.S. (1954). "Continuous inspection schemes", *Biometrika* 41(1-2), pp. 100-115.

use tracing::debug;

use crate::config::ChartSettings;
use crate::error::SpcError;
use crate::spc::chart::{note_timestamp, ViolationTracker};
use crate::spc::limits::{cusum_limits, estimate_baseline, Baseline};
use crate::spc::rules::RulePoint;
use crate::spc::{
    ChartMethod, ChartStatus, ControlChart, ControlLimits, PointStatistic, Sample, Series,
    Timestamp, UpdateResult, Violation,
};
use crate::window::{SampleWindow, RAW_WINDOW_CAPACITY};

/// One observation with its CUSUM sums, once the baseline exists.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CusumPoint {
    index: usize,
    sample: Sample,
    sums: Option<(f64, f64)>,
}

/// Signed plotting value: `S_H` if it dominates, else `-S_L`.
fn signed(s_high: f64, s_low: f64) -> f64 {
    if s_high >= s_low {
        s_high
    } else {
        -s_low
    }
}

/// Tabular two-sided CUSUM chart over a rolling window.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::detection::CusumChart;
/// use u_spc::spc::ControlChart;
///
/// let mut cusum = CusumChart::new().unwrap();
/// for i in 0..25 {
///     let x = if i % 2 == 0 { 9.5 } else { 10.5 };
///     cusum.add_value(x, Utc::now()).unwrap();
/// }
/// assert!(cusum.target().is_some());
///
/// // Sustained upward shift of 2 sigma
/// let mut signalled = false;
/// for _ in 0..10 {
///     let result = cusum.add_value(11.0, Utc::now()).unwrap();
///     signalled |= !result.violations.is_empty();
/// }
/// assert!(signalled);
/// ```
///
/// # Reference
///
/// Page, E.S. (1954). "Continuous inspection schemes", *Biometrika* 41(1-2).
#[derive(Debug, Clone)]
pub struct CusumChart {
    /// Allowance in units of sigma.
    k_factor: f64,
    /// Decision interval in units of sigma.
    h_factor: f64,
    settings: ChartSettings,
    points: SampleWindow<CusumPoint>,
    baseline: Option<Baseline>,
    s_high: f64,
    s_low: f64,
    tracker: ViolationTracker,
    scratch: Vec<RulePoint>,
    observations: usize,
    last_timestamp: Option<Timestamp>,
}

impl CusumChart {
    /// Creates a CUSUM chart with K = 0.5, H = 5.0 and default settings.
    ///
    /// # Reference
    ///
    /// Page (1954), *Biometrika* 41(1-2). K = 0.5 is optimal for detecting
    /// a shift of 1 sigma; H = 5 gives ARL_0 ~ 465.
    pub fn new() -> Result<Self, SpcError> {
        Self::with_params(0.5, 5.0, ChartSettings::default())
    }

    /// Creates a CUSUM chart with custom factors.
    ///
    /// # Parameters
    ///
    /// - `k_factor`: allowance in sigma units (non-negative, finite)
    /// - `h_factor`: decision interval in sigma units (positive, finite)
    ///
    /// # Errors
    ///
    /// [`SpcError::Numeric`] for non-finite factors, [`SpcError::Config`] for
    /// out-of-range factors or invalid settings.
    pub fn with_params(
        k_factor: f64,
        h_factor: f64,
        settings: ChartSettings,
    ) -> Result<Self, SpcError> {
        SpcError::ensure_finite("k_factor", k_factor)?;
        SpcError::ensure_finite("h_factor", h_factor)?;
        if k_factor < 0.0 {
            return Err(SpcError::Config(format!(
                "k_factor must be non-negative, got {k_factor}"
            )));
        }
        if h_factor <= 0.0 {
            return Err(SpcError::Config(format!(
                "h_factor must be positive, got {h_factor}"
            )));
        }
        settings.validate(RAW_WINDOW_CAPACITY)?;
        let capacity = settings.window_capacity_or(RAW_WINDOW_CAPACITY);
        Ok(Self {
            k_factor,
            h_factor,
            settings,
            points: SampleWindow::new(capacity)?,
            baseline: None,
            s_high: 0.0,
            s_low: 0.0,
            tracker: ViolationTracker::new(settings.violation_capacity)?,
            scratch: Vec::with_capacity(settings.lookback.min(capacity)),
            observations: 0,
            last_timestamp: None,
        })
    }

    /// Frozen target mean mu_0, once estimated.
    pub fn target(&self) -> Option<f64> {
        self.baseline.map(|b| b.mean)
    }

    /// Frozen sigma, once estimated.
    pub fn sigma(&self) -> Option<f64> {
        self.baseline.map(|b| b.std_dev)
    }

    /// Current `(S_high, S_low)`; both zero before the baseline exists.
    pub fn sums(&self) -> (f64, f64) {
        (self.s_high, self.s_low)
    }

    /// `h = H * sigma`, once the baseline exists.
    pub fn decision_interval(&self) -> Option<f64> {
        self.sigma().map(|sigma| self.h_factor * sigma)
    }

    /// Add one observation.
    ///
    /// # Errors
    ///
    /// [`SpcError::Numeric`] if `value` is NaN or infinite. The chart is
    /// unchanged on error.
    pub fn add_value(&mut self, value: f64, timestamp: Timestamp) -> Result<UpdateResult, SpcError> {
        SpcError::ensure_finite("value", value)?;

        // Estimate before mutating so a failure leaves the chart untouched.
        let warmup = self.settings.warmup_threshold;
        let new_baseline = if self.baseline.is_none() && self.points.len() + 1 >= warmup {
            let mut values: Vec<f64> = self
                .points
                .iter_last(warmup - 1)
                .map(|p| p.sample.value)
                .collect();
            values.push(value);
            Some(estimate_baseline(&values)?)
        } else {
            None
        };

        note_timestamp(&mut self.last_timestamp, timestamp, ChartMethod::Cusum);
        let index = self.observations;
        self.observations += 1;
        self.points.push(CusumPoint {
            index,
            sample: Sample::new(value, timestamp),
            sums: None,
        });

        if let Some(baseline) = new_baseline {
            self.establish(baseline);
        } else if let Some(baseline) = self.baseline {
            let sums = self.step(&baseline, value);
            if let Some(last) = self.points.last_mut() {
                last.sums = Some(sums);
            }
        }

        let violations = self.evaluate();
        let sums = self.points.last().and_then(|p| p.sums);
        Ok(UpdateResult::new(
            index,
            PointStatistic::Cusum {
                value,
                s_high: sums.map(|(high, _)| high),
                s_low: sums.map(|(_, low)| low),
            },
            self.control_limits(),
            None,
            violations,
        ))
    }

    /// Advance the recurrences by one observation.
    fn step(&mut self, baseline: &Baseline, x: f64) -> (f64, f64) {
        let k = self.k_factor * baseline.std_dev;
        self.s_high = (self.s_high + (x - baseline.mean) - k).max(0.0);
        self.s_low = (self.s_low + (baseline.mean - x) - k).max(0.0);
        (self.s_high, self.s_low)
    }

    /// Freeze the baseline and replay the sums over the warm-up window.
    fn establish(&mut self, baseline: Baseline) {
        debug!(
            target_mean = baseline.mean,
            sigma = baseline.std_dev,
            baseline_points = baseline.count,
            "CUSUM baseline established"
        );
        self.baseline = Some(baseline);
        self.s_high = 0.0;
        self.s_low = 0.0;
        let k = self.k_factor * baseline.std_dev;
        let (mut s_high, mut s_low) = (0.0_f64, 0.0_f64);
        for point in self.points.iter_mut() {
            let x = point.sample.value;
            s_high = (s_high + (x - baseline.mean) - k).max(0.0);
            s_low = (s_low + (baseline.mean - x) - k).max(0.0);
            point.sums = Some((s_high, s_low));
        }
        self.s_high = s_high;
        self.s_low = s_low;
    }

    fn evaluate(&mut self) -> Vec<Violation> {
        let Some(limits) = self.control_limits() else {
            return Vec::new();
        };
        let band = limits.band();
        self.scratch.clear();
        self.scratch.extend(
            self.points
                .iter_last(self.settings.lookback)
                .filter_map(|p| {
                    let (s_high, s_low) = p.sums?;
                    Some(RulePoint {
                        index: p.index,
                        value: signed(s_high, s_low),
                        timestamp: p.sample.timestamp,
                        band,
                    })
                }),
        );
        self.tracker
            .evaluate(Series::Cusum, self.settings.rules, &self.scratch)
    }
}

impl ControlChart for CusumChart {
    fn method(&self) -> ChartMethod {
        ChartMethod::Cusum
    }

    fn status(&self) -> ChartStatus {
        ChartStatus {
            method: ChartMethod::Cusum,
            limits: self.control_limits(),
            range_limits: None,
            window_len: self.points.len(),
            window_capacity: self.points.capacity(),
            observations: self.observations,
            total_violations: self.tracker.total(),
            dropped_violations: self.tracker.dropped(),
            active_violations: self.tracker.active_count(),
            in_control: self.is_in_control(),
        }
    }

    fn control_limits(&self) -> Option<ControlLimits> {
        let baseline = self.baseline?;
        Some(cusum_limits(
            self.h_factor * baseline.std_dev,
            baseline.count,
        ))
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
        self.points.clear();
        self.baseline = None;
        self.s_high = 0.0;
        self.s_low = 0.0;
        self.tracker.clear();
        self.observations = 0;
        self.last_timestamp = None;
    }
}
