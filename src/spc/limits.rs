//! Control limit estimation for every chart type.
//!
//! Pure functions from window statistics to [`ControlLimits`]. Charts call
//! these on every accepted observation once their warm-up is satisfied, so
//! limits adapt as the window moves.
//!
//! # Control Chart Factors
//!
//! The X-bar-R constants A2, D3, D4 for n = 2..=10 follow the ANSI/ASQ
//! Z1.4 / ASTM E2587 factor table.
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.
//! - ASTM E2587 — Standard Practice for Use of Control Charts
//! - Lucas, J.M. & Saccucci, M.S. (1990). "Exponentially Weighted Moving Average
//!   Control Schemes", *Technometrics* 32(1), pp. 1-12.

use u_numflow::stats;

use super::chart::{size_basis, ChartMethod, ControlLimits};
use super::rules::Band;
use crate::error::SpcError;

// ---------------------------------------------------------------------------
// Control chart factor tables, indexed by subgroup size n=2..10
// Index 0 corresponds to n=2.
// ---------------------------------------------------------------------------

/// A2 factors: UCL = X-double-bar + A2 * R-bar.
const A2: [f64; 9] = [1.880, 1.023, 0.729, 0.577, 0.483, 0.419, 0.373, 0.337, 0.308];

/// D3 factors: LCL_R = D3 * R-bar.
const D3: [f64; 9] = [0.0, 0.0, 0.0, 0.0, 0.0, 0.076, 0.136, 0.184, 0.223];

/// D4 factors: UCL_R = D4 * R-bar.
const D4: [f64; 9] = [3.267, 2.574, 2.282, 2.114, 2.004, 1.924, 1.864, 1.816, 1.777];

/// Smallest tabulated subgroup size.
pub const MIN_SUBGROUP_SIZE: usize = 2;

/// Largest tabulated subgroup size.
pub const MAX_SUBGROUP_SIZE: usize = 10;

/// X-bar-R factors for one subgroup size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XBarRFactors {
    pub a2: f64,
    pub d3: f64,
    pub d4: f64,
}

/// Look up the X-bar-R factors for subgroup size `n`.
///
/// Returns `None` outside 2..=10.
///
/// # Examples
///
/// ```
/// use u_spc::spc::xbar_r_factors;
///
/// let f = xbar_r_factors(5).unwrap();
/// assert_eq!(f.a2, 0.577);
/// assert_eq!(f.d4, 2.114);
/// assert!(xbar_r_factors(11).is_none());
/// ```
pub fn xbar_r_factors(n: usize) -> Option<XBarRFactors> {
    let i = n.checked_sub(MIN_SUBGROUP_SIZE)?;
    Some(XBarRFactors {
        a2: *A2.get(i)?,
        d3: *D3.get(i)?,
        d4: *D4.get(i)?,
    })
}

/// X-bar and R limits from the grand mean and average range.
///
/// Returns `(xbar_limits, r_limits)`, or `None` for an untabulated `n`.
pub fn xbar_r_limits(
    grand_mean: f64,
    mean_range: f64,
    n: usize,
) -> Option<(ControlLimits, ControlLimits)> {
    let f = xbar_r_factors(n)?;
    let basis = size_basis(n);
    let xbar = ControlLimits::new(
        ChartMethod::XBarR,
        grand_mean,
        grand_mean + f.a2 * mean_range,
        grand_mean - f.a2 * mean_range,
        basis,
    );
    let range = ControlLimits::new(
        ChartMethod::XBarR,
        mean_range,
        f.d4 * mean_range,
        f.d3 * mean_range,
        basis,
    );
    Some((xbar, range))
}

/// p-chart limits for one sample of size `n`.
///
/// ```text
/// sigma_i = sqrt(p_bar * (1 - p_bar) / n)
/// UCL_i   = min(1, p_bar + 3 sigma_i)
/// LCL_i   = max(0, p_bar - 3 sigma_i)
/// ```
///
/// Returns `None` when `n == 0`.
///
/// # Examples
///
/// ```
/// use u_spc::spc::p_limits;
///
/// let wide = p_limits(0.1, 50).unwrap();
/// let narrow = p_limits(0.1, 500).unwrap();
/// assert!(wide.upper_control_limit > narrow.upper_control_limit);
/// assert_eq!(wide.lower_control_limit, 0.0);
/// ```
pub fn p_limits(p_bar: f64, n: u64) -> Option<ControlLimits> {
    let sigma = p_sigma(p_bar, n)?;
    Some(ControlLimits::new(
        ChartMethod::P,
        p_bar,
        (p_bar + 3.0 * sigma).min(1.0),
        (p_bar - 3.0 * sigma).max(0.0),
        size_basis(n),
    ))
}

/// Standard deviation of a sample proportion, `sqrt(p_bar (1 - p_bar) / n)`.
///
/// Returns `None` when `n == 0`.
pub fn p_sigma(p_bar: f64, n: u64) -> Option<f64> {
    (n > 0).then(|| (p_bar * (1.0 - p_bar) / n as f64).sqrt())
}

/// Rule band for one p-chart point. Carries the unclamped sigma so zones
/// keep their width when a limit is clamped to `[0, 1]`.
pub(crate) fn p_band(p_bar: f64, n: u64) -> Option<Band> {
    let sigma = p_sigma(p_bar, n)?;
    let limits = p_limits(p_bar, n)?;
    Some(Band {
        sigma,
        ..limits.band()
    })
}

/// Process mean and standard deviation frozen from the warm-up window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    /// Number of observations the estimate came from.
    pub count: usize,
}

/// Estimate a [`Baseline`] from warm-up observations (sample standard deviation).
///
/// # Errors
///
/// [`SpcError::Config`] with fewer than two observations.
pub fn estimate_baseline(values: &[f64]) -> Result<Baseline, SpcError> {
    let too_few = || {
        SpcError::Config(format!(
            "baseline needs at least 2 observations, got {}",
            values.len()
        ))
    };
    if values.len() < 2 {
        return Err(too_few());
    }
    let mean = stats::mean(values).ok_or_else(too_few)?;
    let std_dev = stats::std_dev(values).ok_or_else(too_few)?;
    Ok(Baseline {
        mean,
        std_dev,
        count: values.len(),
    })
}

/// Fixed band for the signed CUSUM statistic: `CL = 0`, `UCL = h`, `LCL = -h`.
pub fn cusum_limits(h: f64, baseline_count: usize) -> ControlLimits {
    ControlLimits::new(ChartMethod::Cusum, 0.0, h, -h, size_basis(baseline_count))
}

/// Standard deviation of the EWMA statistic at time index `t` (1-based).
///
/// ```text
/// sigma_z(t) = sigma * sqrt(lambda * (1 - (1 - lambda)^(2t)) / (2 - lambda))
/// ```
///
/// Uses `powf`, so very large `t` converges to the asymptote instead of
/// overflowing the exponent.
pub fn ewma_sigma_z(sigma: f64, lambda: f64, t: u64) -> f64 {
    let decay = (1.0 - lambda).powf(2.0 * t as f64);
    sigma * (lambda * (1.0 - decay) / (2.0 - lambda)).sqrt()
}

/// Limiting value of [`ewma_sigma_z`] as `t -> infinity`.
pub fn ewma_asymptotic_sigma(sigma: f64, lambda: f64) -> f64 {
    sigma * (lambda / (2.0 - lambda)).sqrt()
}

/// EWMA band at time index `t`: `mu_0 +/- L * sigma_z(t)`.
pub fn ewma_limits(baseline: &Baseline, lambda: f64, limit_width: f64, t: u64) -> ControlLimits {
    let half_width = limit_width * ewma_sigma_z(baseline.std_dev, lambda, t);
    ControlLimits::new(
        ChartMethod::Ewma,
        baseline.mean,
        baseline.mean + half_width,
        baseline.mean - half_width,
        size_basis(baseline.count),
    )
}
