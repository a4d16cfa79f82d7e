//! Exponentially Weighted Moving Average (EWMA) chart for detecting small shifts.
//!
//! # Algorithm
//!
//! The target mean mu_0 and sigma are estimated once from the warm-up
//! window and frozen until reset. The EWMA statistic is:
//!
//! ```text
//! Z_t = lambda * x_t + (1 - lambda) * Z_{t-1},   Z_0 = mu_0
//! ```
//!
//! Time-varying (exact) control limits, with `t` counted from 1 at the
//! first observation since creation or reset:
//!
//! ```text
//! sigma_z(t) = sigma * sqrt(lambda * (1 - (1 - lambda)^(2t)) / (2 - lambda))
//! UCL_t = mu_0 + L * sigma_z(t)
//! LCL_t = mu_0 - L * sigma_z(t)
//! ```
//!
//! Every point is evaluated against the band for its own `t`.
//!
//! # Parameters
//!
//! - **lambda**: smoothing constant in (0, 1]. Smaller values give more weight
//!   to historical data and are better at detecting small shifts.
//!   Typical range: 0.05-0.25.
//! - **L**: control limit width factor in multiples of sigma_z. Typical: 2.7-3.0.
//!
//! # Reference
//!
//! Roberts, S.W. (1959). "Control Chart Tests Based on Geometric Moving Averages",
//! *Technometrics* 1(3), pp. 239-250.

use tracing::debug;

use crate::config::ChartSettings;
use crate::error::SpcError;
use crate::spc::chart::{note_timestamp, ViolationTracker};
use crate::spc::limits::{estimate_baseline, ewma_limits, Baseline};
use crate::spc::rules::RulePoint;
use crate::spc::{
    ChartMethod, ChartStatus, ControlChart, ControlLimits, PointStatistic, Sample, Series,
    Timestamp, UpdateResult, Violation,
};
use crate::window::{SampleWindow, RAW_WINDOW_CAPACITY};

/// One observation with its EWMA value, once the baseline exists.
#[derive(Debug, Clone, Copy, PartialEq)]
struct EwmaPoint {
    index: usize,
    sample: Sample,
    z: Option<f64>,
}

impl EwmaPoint {
    /// 1-based time index for the limit formula.
    fn t(&self) -> u64 {
        self.index as u64 + 1
    }
}

/// EWMA chart over a rolling window.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::detection::EwmaChart;
/// use u_spc::spc::ControlChart;
///
/// let mut ewma = EwmaChart::new().unwrap();
/// for i in 0..25 {
///     let x = if i % 2 == 0 { 9.0 } else { 11.0 };
///     ewma.add_value(x, Utc::now()).unwrap();
/// }
/// let limits = ewma.control_limits().unwrap();
/// assert!(limits.upper_control_limit > limits.center_line);
/// assert!(ewma.z().is_some());
/// ```
///
/// # Reference
///
/// Roberts, S.W. (1959). "Control Chart Tests Based on Geometric Moving Averages",
/// *Technometrics* 1(3).
#[derive(Debug, Clone)]
pub struct EwmaChart {
    /// Smoothing constant (0 < lambda <= 1).
    lambda: f64,
    /// Control limit width factor (L).
    limit_width: f64,
    settings: ChartSettings,
    points: SampleWindow<EwmaPoint>,
    baseline: Option<Baseline>,
    z: Option<f64>,
    tracker: ViolationTracker,
    scratch: Vec<RulePoint>,
    observations: usize,
    last_timestamp: Option<Timestamp>,
}

impl EwmaChart {
    /// Creates an EWMA chart with lambda = 0.2, L = 3.0 and default settings.
    ///
    /// # Reference
    ///
    /// Roberts (1959), *Technometrics* 1(3). lambda = 0.2, L = 3.0 provides
    /// good sensitivity for detecting shifts of 0.5-2.0 sigma.
    pub fn new() -> Result<Self, SpcError> {
        Self::with_params(0.2, 3.0, ChartSettings::default())
    }

    /// Creates an EWMA chart with custom parameters.
    ///
    /// # Parameters
    ///
    /// - `lambda`: smoothing constant (must be in (0, 1])
    /// - `limit_width`: band half-width in sigma_z units (positive, finite)
    ///
    /// # Errors
    ///
    /// [`SpcError::Numeric`] for non-finite parameters, [`SpcError::Config`]
    /// for out-of-range parameters or invalid settings.
    pub fn with_params(
        lambda: f64,
        limit_width: f64,
        settings: ChartSettings,
    ) -> Result<Self, SpcError> {
        SpcError::ensure_finite("lambda", lambda)?;
        SpcError::ensure_finite("limit_width", limit_width)?;
        if lambda <= 0.0 || lambda > 1.0 {
            return Err(SpcError::Config(format!(
                "lambda must be in (0, 1], got {lambda}"
            )));
        }
        if limit_width <= 0.0 {
            return Err(SpcError::Config(format!(
                "limit_width must be positive, got {limit_width}"
            )));
        }
        settings.validate(RAW_WINDOW_CAPACITY)?;
        let capacity = settings.window_capacity_or(RAW_WINDOW_CAPACITY);
        Ok(Self {
            lambda,
            limit_width,
            settings,
            points: SampleWindow::new(capacity)?,
            baseline: None,
            z: None,
            tracker: ViolationTracker::new(settings.violation_capacity)?,
            scratch: Vec::with_capacity(settings.lookback.min(capacity)),
            observations: 0,
            last_timestamp: None,
        })
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Frozen target mean mu_0, once estimated.
    pub fn target(&self) -> Option<f64> {
        self.baseline.map(|b| b.mean)
    }

    /// Frozen sigma, once estimated.
    pub fn sigma(&self) -> Option<f64> {
        self.baseline.map(|b| b.std_dev)
    }

    /// Current EWMA statistic, once the baseline exists.
    pub fn z(&self) -> Option<f64> {
        self.z
    }

    /// Band at time index `t` (1-based), once the baseline exists.
    pub fn limits_at(&self, t: u64) -> Option<ControlLimits> {
        let baseline = self.baseline?;
        Some(ewma_limits(&baseline, self.lambda, self.limit_width, t))
    }

    /// Add one observation.
    ///
    /// # Errors
    ///
    /// [`SpcError::Numeric`] if `value` is NaN or infinite. The chart is
    /// unchanged on error.
    pub fn add_value(&mut self, value: f64, timestamp: Timestamp) -> Result<UpdateResult, SpcError> {
        SpcError::ensure_finite("value", value)?;

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

        note_timestamp(&mut self.last_timestamp, timestamp, ChartMethod::Ewma);
        let index = self.observations;
        self.observations += 1;
        self.points.push(EwmaPoint {
            index,
            sample: Sample::new(value, timestamp),
            z: None,
        });

        if let Some(baseline) = new_baseline {
            self.establish(baseline);
        } else if let Some(previous) = self.z {
            let z = self.lambda * value + (1.0 - self.lambda) * previous;
            self.z = Some(z);
            if let Some(last) = self.points.last_mut() {
                last.z = Some(z);
            }
        }

        let violations = self.evaluate();
        Ok(UpdateResult::new(
            index,
            PointStatistic::Ewma {
                value,
                z: self.points.last().and_then(|p| p.z),
            },
            self.control_limits(),
            None,
            violations,
        ))
    }

    /// Freeze the baseline and replay `z` over the warm-up window from `z_0 = mu_0`.
    fn establish(&mut self, baseline: Baseline) {
        debug!(
            target_mean = baseline.mean,
            sigma = baseline.std_dev,
            baseline_points = baseline.count,
            lambda = self.lambda,
            "EWMA baseline established"
        );
        self.baseline = Some(baseline);
        let mut z = baseline.mean;
        for point in self.points.iter_mut() {
            z = self.lambda * point.sample.value + (1.0 - self.lambda) * z;
            point.z = Some(z);
        }
        self.z = Some(z);
    }

    fn evaluate(&mut self) -> Vec<Violation> {
        let Some(baseline) = self.baseline else {
            return Vec::new();
        };
        let (lambda, limit_width) = (self.lambda, self.limit_width);
        self.scratch.clear();
        self.scratch.extend(
            self.points
                .iter_last(self.settings.lookback)
                .filter_map(|p| {
                    let z = p.z?;
                    let limits = ewma_limits(&baseline, lambda, limit_width, p.t());
                    Some(RulePoint {
                        index: p.index,
                        value: z,
                        timestamp: p.sample.timestamp,
                        band: limits.band(),
                    })
                }),
        );
        self.tracker
            .evaluate(Series::Ewma, self.settings.rules, &self.scratch)
    }
}

impl ControlChart for EwmaChart {
    fn method(&self) -> ChartMethod {
        ChartMethod::Ewma
    }

    fn status(&self) -> ChartStatus {
        ChartStatus {
            method: ChartMethod::Ewma,
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

    /// Band at the most recent time index.
    fn control_limits(&self) -> Option<ControlLimits> {
        let last = self.points.last()?;
        self.limits_at(last.t())
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
        self.z = None;
        self.tracker.clear();
        self.observations = 0;
        self.last_timestamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spc::{ewma_asymptotic_sigma, WesternElectricRule};
    use chrono::{DateTime, Duration};

    fn ts(i: i64) -> Timestamp {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp") + Duration::seconds(i)
    }

    fn warmed() -> EwmaChart {
        let mut chart = EwmaChart::new().expect("valid params");
        for i in 0..25 {
            let x = if i % 2 == 0 { 9.0 } else { 11.0 };
            chart.add_value(x, ts(i)).expect("finite");
        }
        chart
    }

    #[test]
    fn test_ewma_rejects_invalid_params() {
        let settings = ChartSettings::default();
        assert!(matches!(
            EwmaChart::with_params(0.0, 3.0, settings),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            EwmaChart::with_params(1.5, 3.0, settings),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            EwmaChart::with_params(0.2, -1.0, settings),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            EwmaChart::with_params(f64::INFINITY, 3.0, settings),
            Err(SpcError::Numeric(_))
        ));
        assert!(EwmaChart::with_params(1.0, 3.0, settings).is_ok());
    }

    #[test]
    fn test_ewma_warmup_gating() {
        let mut chart = EwmaChart::new().expect("valid params");
        for i in 0..24 {
            let result = chart.add_value(10.0, ts(i)).expect("finite");
            assert!(result.limits.is_none());
            assert!(chart.z().is_none());
        }
        let result = chart.add_value(12.0, ts(24)).expect("finite");
        assert!(result.limits.is_some());
        assert!(chart.status().limits.is_some());
    }

    #[test]
    fn test_ewma_replays_warmup_from_target() {
        let chart = warmed();
        let target = chart.target().expect("baseline");
        let mut z = target;
        for i in 0..25 {
            let x = if i % 2 == 0 { 9.0 } else { 11.0 };
            z = 0.2 * x + 0.8 * z;
        }
        assert!((chart.z().expect("baseline") - z).abs() < 1e-12);
    }

    #[test]
    fn test_ewma_limits_widen_with_t() {
        let chart = warmed();
        let sigma = chart.sigma().expect("baseline");
        let first = chart.limits_at(1).expect("baseline");
        let later = chart.limits_at(25).expect("baseline");
        assert!(
            later.upper_control_limit - later.center_line
                > first.upper_control_limit - first.center_line
        );
        // t = 1: L * sigma * lambda
        assert!((first.upper_control_limit - first.center_line - 3.0 * sigma * 0.2).abs() < 1e-12);

        let far = chart.limits_at(1_000_000).expect("baseline");
        let asymptote = 3.0 * ewma_asymptotic_sigma(sigma, 0.2);
        assert!((far.upper_control_limit - far.center_line - asymptote).abs() < 1e-12);
    }

    #[test]
    fn test_ewma_detects_shift() {
        let mut chart = warmed();
        let sigma = chart.sigma().expect("baseline");
        let target = chart.target().expect("baseline");
        let mut fired_at = None;
        for i in 0..20 {
            let result = chart
                .add_value(target + 2.0 * sigma, ts(25 + i))
                .expect("finite");
            if result
                .violations
                .iter()
                .any(|v| v.rule == WesternElectricRule::BeyondLimits && v.series == Series::Ewma)
            {
                fired_at = Some(i);
                break;
            }
        }
        // Z needs a few steps to cross mu_0 + 3 * 0.333 sigma.
        let steps = fired_at.expect("shift detected");
        assert!(steps >= 2);
    }

    #[test]
    fn test_ewma_lambda_one_tracks_raw_values() {
        let mut chart =
            EwmaChart::with_params(1.0, 3.0, ChartSettings::default()).expect("valid params");
        for i in 0..30 {
            let x = (i % 4) as f64;
            let result = chart.add_value(x, ts(i)).expect("finite");
            if let PointStatistic::Ewma { z: Some(z), .. } = result.statistic {
                assert!((z - x).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn test_quiet_warmup_trips_rule7_on_replay() {
        // Even warm-up: mu_0 = 10 exactly, Z stays inside sigma_z(t).
        let settings = ChartSettings {
            warmup_threshold: 24,
            ..ChartSettings::default()
        };
        let mut chart = EwmaChart::with_params(0.2, 3.0, settings).expect("valid params");
        for i in 0..23 {
            let x = if i % 2 == 0 { 9.5 } else { 10.5 };
            let result = chart.add_value(x, ts(i)).expect("finite");
            assert!(result.violations.is_empty());
        }
        let result = chart.add_value(10.5, ts(23)).expect("finite");
        let rule7: Vec<usize> = result
            .violations
            .iter()
            .filter(|v| v.rule == WesternElectricRule::FifteenWithin1Sigma)
            .map(|v| v.point_index)
            .collect();
        assert_eq!(rule7, (14..=23).collect::<Vec<_>>());
        assert!(result.violations.iter().all(|v| v.point_index <= 23));
        assert!(!chart.is_in_control());
    }

    #[test]
    fn test_steady_state_reuses_rule_buffer() {
        let mut chart = warmed();
        for i in 25..100 {
            let x = if i % 2 == 0 { 9.0 } else { 11.0 };
            chart.add_value(x, ts(i)).expect("finite");
        }
        let capacity = chart.scratch.capacity();
        for i in 100..3_000 {
            let x = if i % 2 == 0 { 9.0 } else { 11.0 };
            chart.add_value(x, ts(i)).expect("finite");
        }
        assert_eq!(chart.scratch.capacity(), capacity);
        assert_eq!(chart.scratch.len(), 50);
        assert_eq!(chart.status().window_len, 1000);
    }

    #[test]
    fn test_ewma_reset() {
        let mut chart = warmed();
        chart.reset();
        assert!(chart.z().is_none());
        assert!(chart.target().is_none());
        let status = chart.status();
        assert_eq!(status.observations, 0);
        assert!(status.limits.is_none());
        assert_eq!(status.total_violations, 0);
    }

    #[test]
    fn test_ewma_error_leaves_chart_unchanged() {
        let mut chart = warmed();
        let before = chart.status();
        let z = chart.z();
        assert!(chart.add_value(f64::NAN, ts(50)).is_err());
        assert_eq!(chart.status(), before);
        assert_eq!(chart.z(), z);
    }
}
