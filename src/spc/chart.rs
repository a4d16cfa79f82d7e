//! Core control chart types and trait.
//!
//! Defines the building blocks shared by every chart: control limits, the
//! eight Western Electric rules with their severities and recommended
//! actions, violation records, per-update results, chart status, and the
//! [`ControlChart`] trait that all chart variants implement.
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.
//! - Western Electric (1956). *Statistical Quality Control Handbook*.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::rules::{Band, RuleHit, RulePoint, RuleSet, RunRule};
use crate::error::SpcError;
use crate::window::SampleWindow;

/// Wall-clock time attached to every observation.
pub type Timestamp = DateTime<Utc>;

/// One raw observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: Timestamp,
    /// Subgroup the observation belongs to, when it was collected as part of one.
    pub subgroup_index: Option<usize>,
}

impl Sample {
    pub fn new(value: f64, timestamp: Timestamp) -> Self {
        Self {
            value,
            timestamp,
            subgroup_index: None,
        }
    }
}

/// Chart type. Fixed for a metric at first registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartMethod {
    /// Shewhart X-bar and Range chart over subgroups.
    #[serde(rename = "xbar_r")]
    XBarR,
    /// Proportion nonconforming with variable sample size.
    P,
    /// Tabular two-sided CUSUM.
    Cusum,
    /// Exponentially weighted moving average.
    Ewma,
}

impl ChartMethod {
    /// The payload shape this chart type ingests.
    pub fn payload_kind(self) -> PayloadKind {
        match self {
            ChartMethod::XBarR => PayloadKind::Subgroup,
            ChartMethod::P => PayloadKind::Proportion,
            ChartMethod::Cusum | ChartMethod::Ewma => PayloadKind::Value,
        }
    }
}

impl fmt::Display for ChartMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartMethod::XBarR => "X-bar-R",
            ChartMethod::P => "p",
            ChartMethod::Cusum => "CUSUM",
            ChartMethod::Ewma => "EWMA",
        };
        f.write_str(name)
    }
}

/// Shape of an incoming observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A single measurement.
    Value,
    /// A batch of simultaneous measurements.
    Subgroup,
    /// A `(defective, sample_size)` count.
    Proportion,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Value => "value",
            PayloadKind::Subgroup => "subgroup",
            PayloadKind::Proportion => "proportion",
        };
        f.write_str(name)
    }
}

/// The plotted series a violation was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    /// Subgroup means of an X-bar-R chart.
    XBar,
    /// Subgroup ranges of an X-bar-R chart.
    Range,
    /// Sample proportions of a p chart.
    Proportion,
    /// Signed CUSUM statistic (`S_high`, or `-S_low` when it dominates).
    Cusum,
    /// EWMA statistic `z`.
    Ewma,
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Series::XBar => "X-bar",
            Series::Range => "R",
            Series::Proportion => "p",
            Series::Cusum => "CUSUM",
            Series::Ewma => "EWMA",
        };
        f.write_str(name)
    }
}

/// Control limits for a chart.
///
/// # Invariants
///
/// - `lower_control_limit <= center_line <= upper_control_limit`
/// - p-chart limits are clamped to `[0, 1]`
/// - All values are finite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlLimits {
    /// Center line (process mean, average range, p-bar, or target).
    pub center_line: f64,
    /// Upper control limit (CL + 3 sigma of the plotted statistic).
    pub upper_control_limit: f64,
    /// Lower control limit (CL - 3 sigma of the plotted statistic).
    pub lower_control_limit: f64,
    /// The n used to derive the limits: subgroup size, the sample's own size
    /// for p charts, or the baseline length for CUSUM/EWMA.
    pub sample_size_basis: u32,
    pub method: ChartMethod,
}

impl ControlLimits {
    pub(crate) fn new(
        method: ChartMethod,
        center_line: f64,
        upper_control_limit: f64,
        lower_control_limit: f64,
        sample_size_basis: u32,
    ) -> Self {
        Self {
            center_line,
            upper_control_limit,
            lower_control_limit,
            sample_size_basis,
            method,
        }
    }

    /// Whether `value` lies within `[LCL, UCL]` (boundaries included).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower_control_limit && value <= self.upper_control_limit
    }

    /// One sigma of the plotted statistic, `(UCL - CL) / 3`.
    pub fn sigma(&self) -> f64 {
        (self.upper_control_limit - self.center_line) / 3.0
    }

    pub(crate) fn band(&self) -> Band {
        Band::new(
            self.upper_control_limit,
            self.center_line,
            self.lower_control_limit,
        )
    }
}

/// The eight Western Electric tests for special causes.
///
/// Variant order follows the rule numbering 1–8.
///
/// # Reference
///
/// Nelson, L.S. (1984). "The Shewhart Control Chart — Tests for Special Causes",
/// *Journal of Quality Technology* 16(4), pp. 237-239.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WesternElectricRule {
    /// Rule 1: a point beyond the 3-sigma control limits.
    BeyondLimits,
    /// Rule 2: 9 points in a row on the same side of the center line.
    NineOneSide,
    /// Rule 3: 6 points in a row steadily increasing or decreasing.
    SixTrend,
    /// Rule 4: 14 points in a row alternating up and down.
    FourteenAlternating,
    /// Rule 5: 2 of 3 consecutive points beyond 2 sigma, same side.
    TwoOfThreeBeyond2Sigma,
    /// Rule 6: 4 of 5 consecutive points beyond 1 sigma, same side.
    FourOfFiveBeyond1Sigma,
    /// Rule 7: 15 points in a row within 1 sigma of the center line.
    FifteenWithin1Sigma,
    /// Rule 8: 8 points in a row beyond 1 sigma, either side.
    EightBeyond1Sigma,
}

impl WesternElectricRule {
    /// All rules, in rule-number order.
    pub const ALL: [WesternElectricRule; 8] = [
        WesternElectricRule::BeyondLimits,
        WesternElectricRule::NineOneSide,
        WesternElectricRule::SixTrend,
        WesternElectricRule::FourteenAlternating,
        WesternElectricRule::TwoOfThreeBeyond2Sigma,
        WesternElectricRule::FourOfFiveBeyond1Sigma,
        WesternElectricRule::FifteenWithin1Sigma,
        WesternElectricRule::EightBeyond1Sigma,
    ];

    /// Rule number, 1 through 8.
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    /// Look up a rule by its number (1 through 8).
    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    /// Severity from 1 (informational) to 5 (critical).
    pub fn severity(self) -> u8 {
        match self {
            WesternElectricRule::BeyondLimits => 5,
            WesternElectricRule::NineOneSide => 4,
            WesternElectricRule::SixTrend => 3,
            WesternElectricRule::FourteenAlternating => 2,
            WesternElectricRule::TwoOfThreeBeyond2Sigma => 3,
            WesternElectricRule::FourOfFiveBeyond1Sigma => 3,
            WesternElectricRule::FifteenWithin1Sigma => 2,
            WesternElectricRule::EightBeyond1Sigma => 3,
        }
    }

    pub fn recommended_action(self) -> ActionTag {
        match self {
            WesternElectricRule::BeyondLimits => ActionTag::StopAndInvestigate,
            WesternElectricRule::NineOneSide => ActionTag::InvestigateShift,
            WesternElectricRule::SixTrend => ActionTag::InvestigateTrend,
            WesternElectricRule::FourteenAlternating => ActionTag::ReviewAdjustments,
            WesternElectricRule::TwoOfThreeBeyond2Sigma
            | WesternElectricRule::FourOfFiveBeyond1Sigma => ActionTag::MonitorClosely,
            WesternElectricRule::FifteenWithin1Sigma => ActionTag::VerifyLimits,
            WesternElectricRule::EightBeyond1Sigma => ActionTag::InvestigateMixture,
        }
    }

    fn summary(self) -> &'static str {
        match self {
            WesternElectricRule::BeyondLimits => "is beyond the control limits",
            WesternElectricRule::NineOneSide => {
                "completes 9 consecutive points on one side of the center line"
            }
            WesternElectricRule::SixTrend => "completes 6 consecutive points trending",
            WesternElectricRule::FourteenAlternating => {
                "completes 14 consecutive points alternating up and down"
            }
            WesternElectricRule::TwoOfThreeBeyond2Sigma => {
                "completes 2 of 3 points beyond 2 sigma on one side"
            }
            WesternElectricRule::FourOfFiveBeyond1Sigma => {
                "completes 4 of 5 points beyond 1 sigma on one side"
            }
            WesternElectricRule::FifteenWithin1Sigma => {
                "completes 15 consecutive points within 1 sigma (over-control)"
            }
            WesternElectricRule::EightBeyond1Sigma => {
                "completes 8 consecutive points beyond 1 sigma on either side"
            }
        }
    }
}

impl fmt::Display for WesternElectricRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}", self.number())
    }
}

/// What an operator should do about a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    /// Stop the process and find the assignable cause.
    StopAndInvestigate,
    /// Look for a sustained shift in the process mean.
    InvestigateShift,
    /// Look for drift such as tool wear or temperature.
    InvestigateTrend,
    /// Look for over-adjustment or two alternating sources.
    ReviewAdjustments,
    /// Early warning; watch the next points.
    MonitorClosely,
    /// Variation is suspiciously low; check the limits and data collection.
    VerifyLimits,
    /// Points avoid the center; look for mixed streams.
    InvestigateMixture,
}

/// A rule violation at a specific historical point. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: WesternElectricRule,
    pub series: Series,
    /// Position of the point in the chart's overall sequence (not the window).
    pub point_index: usize,
    pub value: f64,
    pub timestamp: Timestamp,
    /// 1 (low) to 5 (critical).
    pub severity: u8,
    pub description: String,
    pub recommended_action: ActionTag,
}

impl Violation {
    fn new(rule: WesternElectricRule, series: Series, point: &RulePoint) -> Self {
        let band = point.band;
        Self {
            rule,
            series,
            point_index: point.index,
            value: point.value,
            timestamp: point.timestamp,
            severity: rule.severity(),
            description: format!(
                "{series} point {} = {:.6} {} (CL {:.6}, UCL {:.6}, LCL {:.6})",
                point.index,
                point.value,
                rule.summary(),
                band.cl,
                band.ucl,
                band.lcl
            ),
            recommended_action: rule.recommended_action(),
        }
    }
}

/// Statistic(s) computed for the point added by one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointStatistic {
    Subgroup {
        mean: f64,
        range: f64,
    },
    Proportion {
        proportion: f64,
        defective: u64,
        sample_size: u64,
    },
    /// Sums are `None` until the baseline has been estimated.
    Cusum {
        value: f64,
        s_high: Option<f64>,
        s_low: Option<f64>,
    },
    /// `z` is `None` until the baseline has been estimated.
    Ewma {
        value: f64,
        z: Option<f64>,
    },
}

/// Outcome of a single ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Sequence position of the new point.
    pub index: usize,
    pub statistic: PointStatistic,
    /// Limits of the primary series, or `None` before warm-up.
    pub limits: Option<ControlLimits>,
    /// R-chart limits (X-bar-R only).
    pub range_limits: Option<ControlLimits>,
    /// Violations surfaced by this call, possibly at earlier points.
    pub violations: Vec<Violation>,
    /// `true` iff `violations` is empty.
    pub in_control: bool,
}

impl UpdateResult {
    pub(crate) fn new(
        index: usize,
        statistic: PointStatistic,
        limits: Option<ControlLimits>,
        range_limits: Option<ControlLimits>,
        violations: Vec<Violation>,
    ) -> Self {
        let in_control = violations.is_empty();
        Self {
            index,
            statistic,
            limits,
            range_limits,
            violations,
            in_control,
        }
    }
}

/// Read-only snapshot of a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartStatus {
    pub method: ChartMethod,
    pub limits: Option<ControlLimits>,
    pub range_limits: Option<ControlLimits>,
    pub window_len: usize,
    pub window_capacity: usize,
    /// Points ever added since creation or the last reset.
    pub observations: usize,
    /// Violations ever recorded.
    pub total_violations: u64,
    /// Violations evicted from the bounded log before being drained.
    pub dropped_violations: u64,
    /// Violations whose point is still inside the rule lookback.
    pub active_violations: usize,
    /// No violation inside the rule lookback.
    pub in_control: bool,
}

/// Behavior shared by every chart variant.
///
/// Ingestion methods differ per chart type (`add_subgroup`, `add_sample`,
/// `add_value`) and are therefore inherent methods.
pub trait ControlChart {
    fn method(&self) -> ChartMethod;

    /// Current snapshot. Reading has no side effects.
    fn status(&self) -> ChartStatus;

    /// Limits of the primary series, or `None` before warm-up.
    fn control_limits(&self) -> Option<ControlLimits>;

    /// `true` when no violation lies inside the rule lookback.
    fn is_in_control(&self) -> bool;

    /// Retained violation log, oldest first.
    fn violations(&self) -> Vec<Violation>;

    /// Remove and return the retained violation log.
    fn drain_violations(&mut self) -> Vec<Violation>;

    /// Discard all history, limits and baselines.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Shared chart plumbing
// ---------------------------------------------------------------------------

/// Bounded violation log plus the set of facts already reported inside the
/// current lookback.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ViolationTracker {
    log: SampleWindow<Violation>,
    active: HashSet<(Series, WesternElectricRule, usize)>,
    total: u64,
    dropped: u64,
    /// Rule hits of the scan in progress; kept to reuse its allocation.
    hits: Vec<RuleHit>,
}

impl ViolationTracker {
    pub(crate) fn new(capacity: usize) -> Result<Self, SpcError> {
        Ok(Self {
            log: SampleWindow::new(capacity)?,
            active: HashSet::new(),
            total: 0,
            dropped: 0,
            hits: Vec::new(),
        })
    }

    /// Turn rule hits into violations, skipping facts already reported.
    pub(crate) fn record(
        &mut self,
        series: Series,
        points: &[RulePoint],
        hits: &[RuleHit],
    ) -> Vec<Violation> {
        let mut fresh = Vec::new();
        for &(index, rule) in hits {
            let Some(point) = points.iter().find(|p| p.index == index) else {
                continue;
            };
            if !self.active.insert((series, rule, index)) {
                continue;
            }
            let violation = Violation::new(rule, series, point);
            debug!(
                %series,
                rule = rule.number(),
                index,
                value = point.value,
                severity = violation.severity,
                "control chart violation"
            );
            self.total += 1;
            if self.log.push(violation.clone()).is_some() {
                self.dropped += 1;
            }
            fresh.push(violation);
        }
        fresh
    }

    /// Scan one series (oldest point first) with the enabled rules and
    /// record the new hits.
    pub(crate) fn evaluate(
        &mut self,
        series: Series,
        rules: RuleSet,
        points: &[RulePoint],
    ) -> Vec<Violation> {
        let Some(oldest) = points.first() else {
            return Vec::new();
        };
        self.retire_before(oldest.index);
        let mut hits = std::mem::take(&mut self.hits);
        hits.clear();
        rules.check_into(points, &mut hits);
        let fresh = self.record(series, points, &hits);
        self.hits = hits;
        fresh
    }

    /// Forget reported facts for points that have left the lookback.
    pub(crate) fn retire_before(&mut self, oldest_index: usize) {
        self.active.retain(|&(_, _, index)| index >= oldest_index);
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn snapshot(&self) -> Vec<Violation> {
        self.log.iter().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Violation> {
        self.log.take_all()
    }

    pub(crate) fn clear(&mut self) {
        self.log.clear();
        self.active.clear();
        self.total = 0;
        self.dropped = 0;
    }
}

/// Remember the latest timestamp, warning when a caller submits out of order.
pub(crate) fn note_timestamp(
    last: &mut Option<Timestamp>,
    timestamp: Timestamp,
    method: ChartMethod,
) {
    if let Some(previous) = *last {
        if timestamp < previous {
            warn!(
                %method,
                %previous,
                %timestamp,
                "observation is older than its predecessor; keeping submission order"
            );
        }
    }
    *last = Some(timestamp);
}

/// Saturating conversion for [`ControlLimits::sample_size_basis`].
pub(crate) fn size_basis(n: impl TryInto<u32>) -> u32 {
    n.try_into().unwrap_or(u32::MAX)
}
