//! Statistical Process Control (SPC) charts.
//!
//! Core chart types, control limit estimation, and the Western Electric
//! run rules shared by every chart.
//!
//! # Variables Charts
//!
//! - [`XBarRChart`] — X-bar and Range chart for subgroup data (n=2..10)
//!
//! # Attributes Charts
//!
//! - [`PChart`] — Proportion nonconforming (variable sample size)
//!
//! CUSUM and EWMA live in [`crate::detection`] and implement the same
//! [`ControlChart`] trait.
//!
//! # Run Rules
//!
//! - [`RuleSet`] — any subset of the 8 Western Electric rules (default: all)
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.
//! - ASTM E2587 — Standard Practice for Use of Control Charts
//! - Nelson, L.S. (1984). "The Shewhart Control Chart — Tests for Special Causes",
//!   *Journal of Quality Technology* 16(4), pp. 237-239.

mod attributes;
pub(crate) mod chart;
pub(crate) mod limits;
pub(crate) mod rules;
mod variables;

pub use attributes::PChart;
pub use chart::{
    ActionTag, ChartMethod, ChartStatus, ControlChart, ControlLimits, PayloadKind,
    PointStatistic, Sample, Series, Timestamp, UpdateResult, Violation, WesternElectricRule,
};
pub use limits::{
    cusum_limits, estimate_baseline, ewma_asymptotic_sigma, ewma_limits, ewma_sigma_z,
    p_limits, p_sigma, xbar_r_factors, xbar_r_limits, Baseline, XBarRFactors, MAX_SUBGROUP_SIZE,
    MIN_SUBGROUP_SIZE,
};
pub use rules::{Band, InvalidRuleNumber, RuleHit, RulePoint, RuleSet, RunRule};
pub use variables::{subgroup_stats, XBarRChart};
