//! Western Electric run rules for detecting non-random patterns.
//!
//! All eight rules are evaluated independently over a bounded slice of the
//! most recent chart points. Every rule slides over every valid starting
//! offset, so one evaluation can flag several historical points.
//!
//! Each [`RulePoint`] carries its own [`Band`]. Fixed-limit charts (X-bar-R,
//! CUSUM) give every point the same band; the p chart and the EWMA chart
//! give each point the band for its own sample size or time index.
//!
//! # Sigma zones
//!
//! Zones are measured in the band's `sigma`, normally `(UCL - CL) / 3`. A
//! point whose band has zero width (for example after constant data) has no
//! zones and never counts toward rules 5–8.
//!
//! Evaluation writes hits into a caller-owned buffer and keeps no per-call
//! state, so a chart that reuses its buffers scans without allocating.
//!
//! # References
//!
//! - Western Electric (1956). *Statistical Quality Control Handbook*.
//! - Nelson, L.S. (1984). "The Shewhart Control Chart — Tests for Special Causes",
//!   *Journal of Quality Technology* 16(4), pp. 237-239.
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::chart::{Timestamp, WesternElectricRule};

/// Center line, control limits and zone width applying to one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub ucl: f64,
    pub cl: f64,
    pub lcl: f64,
    /// One sigma of the plotted statistic. Zones for rules 5–8 are measured
    /// in this unit, so a limit clamped to the statistic's range (the p
    /// chart's `[0, 1]`) does not narrow them.
    pub sigma: f64,
}

impl Band {
    /// Band whose sigma is derived from the limits, `(UCL - CL) / 3`.
    pub fn new(ucl: f64, cl: f64, lcl: f64) -> Self {
        Self {
            ucl,
            cl,
            lcl,
            sigma: (ucl - cl) / 3.0,
        }
    }

    /// Zone width, or `None` for a zero-width band.
    fn zone(&self) -> Option<f64> {
        (self.sigma > 0.0).then_some(self.sigma)
    }
}

/// A chart point prepared for rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RulePoint {
    /// Position in the chart's overall sequence.
    pub index: usize,
    pub value: f64,
    pub timestamp: Timestamp,
    pub band: Band,
}

/// A rule hit: `(point_index, rule)`.
pub type RuleHit = (usize, WesternElectricRule);

/// Trait for applying run rules to chart data.
pub trait RunRule {
    /// Append hits for `points` (oldest first) to `hits`. The appended hits
    /// are sorted by point index; a point appears once per rule it triggers.
    fn check_into(&self, points: &[RulePoint], hits: &mut Vec<RuleHit>);

    /// Collect hits into a fresh vector.
    fn check(&self, points: &[RulePoint]) -> Vec<RuleHit> {
        let mut hits = Vec::new();
        self.check_into(points, &mut hits);
        hits
    }
}

/// The set of enabled rules. Defaults to all eight.
///
/// Serialized as a list of rule numbers, e.g. `[1, 2, 5, 6]`.
///
/// # Examples
///
/// ```
/// use u_spc::spc::{RuleSet, WesternElectricRule};
///
/// let rules = RuleSet::all().without(WesternElectricRule::FifteenWithin1Sigma);
/// assert!(rules.contains(WesternElectricRule::BeyondLimits));
/// assert!(!rules.contains(WesternElectricRule::FifteenWithin1Sigma));
/// assert_eq!(rules.iter().count(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct RuleSet(u8);

impl RuleSet {
    pub fn all() -> Self {
        Self(u8::MAX)
    }

    pub fn none() -> Self {
        Self(0)
    }

    fn bit(rule: WesternElectricRule) -> u8 {
        1 << (rule.number() - 1)
    }

    pub fn with(self, rule: WesternElectricRule) -> Self {
        Self(self.0 | Self::bit(rule))
    }

    pub fn without(self, rule: WesternElectricRule) -> Self {
        Self(self.0 & !Self::bit(rule))
    }

    pub fn contains(self, rule: WesternElectricRule) -> bool {
        self.0 & Self::bit(rule) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Enabled rules in rule-number order.
    pub fn iter(self) -> impl Iterator<Item = WesternElectricRule> {
        WesternElectricRule::ALL
            .into_iter()
            .filter(move |&rule| self.contains(rule))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<WesternElectricRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = WesternElectricRule>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), RuleSet::with)
    }
}

/// Error for a rule number outside 1..=8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRuleNumber(pub u8);

impl fmt::Display for InvalidRuleNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule number must be 1..=8, got {}", self.0)
    }
}

impl std::error::Error for InvalidRuleNumber {}

impl TryFrom<Vec<u8>> for RuleSet {
    type Error = InvalidRuleNumber;

    fn try_from(numbers: Vec<u8>) -> Result<Self, Self::Error> {
        numbers.into_iter().try_fold(Self::none(), |set, n| {
            WesternElectricRule::from_number(n)
                .map(|rule| set.with(rule))
                .ok_or(InvalidRuleNumber(n))
        })
    }
}

impl From<RuleSet> for Vec<u8> {
    fn from(set: RuleSet) -> Self {
        set.iter().map(WesternElectricRule::number).collect()
    }
}

impl RunRule for RuleSet {
    fn check_into(&self, points: &[RulePoint], hits: &mut Vec<RuleHit>) {
        let start = hits.len();
        for rule in self.iter() {
            match rule {
                WesternElectricRule::BeyondLimits => check_rule1(points, hits),
                WesternElectricRule::NineOneSide => check_rule2(points, hits),
                WesternElectricRule::SixTrend => check_rule3(points, hits),
                WesternElectricRule::FourteenAlternating => check_rule4(points, hits),
                WesternElectricRule::TwoOfThreeBeyond2Sigma => check_rule5(points, hits),
                WesternElectricRule::FourOfFiveBeyond1Sigma => check_rule6(points, hits),
                WesternElectricRule::FifteenWithin1Sigma => check_rule7(points, hits),
                WesternElectricRule::EightBeyond1Sigma => check_rule8(points, hits),
            }
        }
        // Rules are visited in number order, so (index, rule) order is the
        // order a stable sort by index would give.
        hits[start..].sort_unstable();
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Side of the center line: +1 above, -1 below, 0 on it.
fn side(point: &RulePoint) -> i8 {
    if point.value > point.band.cl {
        1
    } else if point.value < point.band.cl {
        -1
    } else {
        0
    }
}

/// Direction from `a` to `b`: +1 up, -1 down, 0 flat.
fn direction(a: &RulePoint, b: &RulePoint) -> i8 {
    if b.value > a.value {
        1
    } else if b.value < a.value {
        -1
    } else {
        0
    }
}

/// Zone side beyond `multiple` sigma: +1 above, -1 below, 0 inside or unzoned.
fn beyond(point: &RulePoint, multiple: f64) -> i8 {
    let Some(sigma) = point.band.zone() else {
        return 0;
    };
    if point.value > point.band.cl + multiple * sigma {
        1
    } else if point.value < point.band.cl - multiple * sigma {
        -1
    } else {
        0
    }
}

/// Rule 1: point beyond the control limits (strict inequality).
fn check_rule1(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    hits.extend(
        points
            .iter()
            .filter(|p| p.value > p.band.ucl || p.value < p.band.lcl)
            .map(|p| (p.index, WesternElectricRule::BeyondLimits)),
    );
}

/// Rule 2: 9 consecutive points on the same side of the center line.
///
/// A point exactly on the center line belongs to neither side.
fn check_rule2(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    if points.len() < 9 {
        return;
    }

    let mut run_length = 0_usize;
    let mut run_side = 0_i8;
    for point in points {
        let s = side(point);
        if s != 0 && s == run_side {
            run_length += 1;
        } else {
            run_side = s;
            run_length = usize::from(s != 0);
        }
        if run_length >= 9 {
            hits.push((point.index, WesternElectricRule::NineOneSide));
        }
    }
}

/// Rule 3: 6 consecutive points strictly increasing or decreasing.
fn check_rule3(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    if points.len() < 6 {
        return;
    }

    let mut run_length = 0_usize;
    let mut previous = 0_i8;
    for pair in points.windows(2) {
        let dir = direction(&pair[0], &pair[1]);
        if dir != 0 && dir == previous {
            run_length += 1;
        } else {
            run_length = usize::from(dir != 0);
        }
        previous = dir;
        // 5 same-direction steps span 6 points.
        if run_length >= 5 {
            hits.push((pair[1].index, WesternElectricRule::SixTrend));
        }
    }
}

/// Rule 4: 14 consecutive points alternating up and down.
fn check_rule4(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    if points.len() < 14 {
        return;
    }

    let mut alt_length = 0_usize;
    let mut previous = 0_i8;
    for pair in points.windows(2) {
        let dir = direction(&pair[0], &pair[1]);
        if dir != 0 && previous != 0 && dir == -previous {
            alt_length += 1;
        } else {
            alt_length = usize::from(dir != 0);
        }
        previous = dir;
        // 13 alternating steps span 14 points.
        if alt_length >= 13 {
            hits.push((pair[1].index, WesternElectricRule::FourteenAlternating));
        }
    }
}

/// Rules 5 and 6 share this shape: `needed` of `span` points beyond
/// `multiple` sigma on the same side.
fn check_k_of_n(
    points: &[RulePoint],
    needed: usize,
    span: usize,
    multiple: f64,
    rule: WesternElectricRule,
    hits: &mut Vec<RuleHit>,
) {
    if points.len() < span {
        return;
    }

    // Counts over the sliding window points[end + 1 - span..=end].
    let (mut above, mut below) = (0_usize, 0_usize);
    for (end, point) in points.iter().enumerate() {
        match beyond(point, multiple) {
            1 => above += 1,
            -1 => below += 1,
            _ => {}
        }
        if end >= span {
            match beyond(&points[end - span], multiple) {
                1 => above -= 1,
                -1 => below -= 1,
                _ => {}
            }
        }
        if end + 1 >= span && (above >= needed || below >= needed) {
            hits.push((point.index, rule));
        }
    }
}

/// Rule 5: 2 of 3 consecutive points beyond 2 sigma, same side.
fn check_rule5(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    check_k_of_n(points, 2, 3, 2.0, WesternElectricRule::TwoOfThreeBeyond2Sigma, hits);
}

/// Rule 6: 4 of 5 consecutive points beyond 1 sigma, same side.
fn check_rule6(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    check_k_of_n(points, 4, 5, 1.0, WesternElectricRule::FourOfFiveBeyond1Sigma, hits);
}

/// Rule 7: 15 consecutive points within 1 sigma of the center line.
fn check_rule7(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    if points.len() < 15 {
        return;
    }

    let mut run_length = 0_usize;
    for point in points {
        let within = point.band.zone().is_some_and(|sigma| {
            point.value >= point.band.cl - sigma && point.value <= point.band.cl + sigma
        });
        if within {
            run_length += 1;
        } else {
            run_length = 0;
        }
        if run_length >= 15 {
            hits.push((point.index, WesternElectricRule::FifteenWithin1Sigma));
        }
    }
}

/// Rule 8: 8 consecutive points beyond 1 sigma, either side.
fn check_rule8(points: &[RulePoint], hits: &mut Vec<RuleHit>) {
    if points.len() < 8 {
        return;
    }

    let mut run_length = 0_usize;
    for point in points {
        if beyond(point, 1.0) != 0 {
            run_length += 1;
        } else {
            run_length = 0;
        }
        if run_length >= 8 {
            hits.push((point.index, WesternElectricRule::EightBeyond1Sigma));
        }
    }
}
