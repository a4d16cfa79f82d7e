//! Chart and registry configuration.
//!
//! Every type here is `serde`-derived so a whole registry can be described
//! in TOML:
//!
//! ```toml
//! default_value_chart = { type = "cusum", k_factor = 0.5, h_factor = 4.0 }
//!
//! [defaults]
//! warmup_threshold = 25
//! lookback = 50
//!
//! [metrics.fill_weight]
//! chart = { type = "xbar_r", subgroup_size = 5 }
//!
//! [metrics.reject_rate]
//! chart = { type = "p", target_sample_size = 200 }
//! labels = { line = "A", phase = "production" }
//! ```
//!
//! Defaults mirror the textbook reference values: warm-up 25 points, rule
//! lookback 50, CUSUM `K = 0.5, H = 5.0`, EWMA `lambda = 0.2, L = 3.0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SpcError;
use crate::spc::{ChartMethod, PayloadKind, RuleSet, MAX_SUBGROUP_SIZE, MIN_SUBGROUP_SIZE};
use crate::window::{RAW_WINDOW_CAPACITY, SUBGROUP_WINDOW_CAPACITY};

fn default_k_factor() -> f64 {
    0.5
}

fn default_h_factor() -> f64 {
    5.0
}

fn default_lambda_factor() -> f64 {
    0.2
}

fn default_limit_width() -> f64 {
    3.0
}

fn default_warmup_threshold() -> usize {
    25
}

fn default_lookback() -> usize {
    50
}

fn default_violation_capacity() -> usize {
    1000
}

/// Chart type plus its type-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartConfig {
    #[serde(rename = "xbar_r")]
    XBarR {
        /// Observations per subgroup, 2..=10.
        subgroup_size: usize,
    },
    P {
        /// Sample size used by [`PChart::quoted_limits`](crate::spc::PChart::quoted_limits).
        #[serde(default)]
        target_sample_size: Option<u64>,
    },
    Cusum {
        /// Allowance in units of sigma.
        #[serde(default = "default_k_factor")]
        k_factor: f64,
        /// Decision interval in units of sigma.
        #[serde(default = "default_h_factor")]
        h_factor: f64,
    },
    Ewma {
        /// Smoothing constant in (0, 1].
        #[serde(default = "default_lambda_factor")]
        lambda_factor: f64,
        /// Band half-width in units of sigma_z.
        #[serde(default = "default_limit_width")]
        limit_width: f64,
    },
}

impl ChartConfig {
    pub fn xbar_r(subgroup_size: usize) -> Self {
        ChartConfig::XBarR { subgroup_size }
    }

    pub fn p() -> Self {
        ChartConfig::P {
            target_sample_size: None,
        }
    }

    pub fn cusum() -> Self {
        ChartConfig::Cusum {
            k_factor: default_k_factor(),
            h_factor: default_h_factor(),
        }
    }

    pub fn ewma() -> Self {
        ChartConfig::Ewma {
            lambda_factor: default_lambda_factor(),
            limit_width: default_limit_width(),
        }
    }

    pub fn method(&self) -> ChartMethod {
        match self {
            ChartConfig::XBarR { .. } => ChartMethod::XBarR,
            ChartConfig::P { .. } => ChartMethod::P,
            ChartConfig::Cusum { .. } => ChartMethod::Cusum,
            ChartConfig::Ewma { .. } => ChartMethod::Ewma,
        }
    }

    /// Check the type-specific parameters.
    ///
    /// # Errors
    ///
    /// [`SpcError::Numeric`] for non-finite parameters, [`SpcError::Config`]
    /// for out-of-range ones.
    pub fn validate(&self) -> Result<(), SpcError> {
        match *self {
            ChartConfig::XBarR { subgroup_size } => {
                if !(MIN_SUBGROUP_SIZE..=MAX_SUBGROUP_SIZE).contains(&subgroup_size) {
                    return Err(SpcError::Config(format!(
                        "subgroup_size must be {MIN_SUBGROUP_SIZE}..={MAX_SUBGROUP_SIZE}, got {subgroup_size}"
                    )));
                }
            }
            ChartConfig::P { target_sample_size } => {
                if target_sample_size == Some(0) {
                    return Err(SpcError::Config(
                        "target_sample_size must be positive".to_string(),
                    ));
                }
            }
            ChartConfig::Cusum { k_factor, h_factor } => {
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
            }
            ChartConfig::Ewma {
                lambda_factor,
                limit_width,
            } => {
                SpcError::ensure_finite("lambda_factor", lambda_factor)?;
                SpcError::ensure_finite("limit_width", limit_width)?;
                if lambda_factor <= 0.0 || lambda_factor > 1.0 {
                    return Err(SpcError::Config(format!(
                        "lambda_factor must be in (0, 1], got {lambda_factor}"
                    )));
                }
                if limit_width <= 0.0 {
                    return Err(SpcError::Config(format!(
                        "limit_width must be positive, got {limit_width}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Tunables shared by every chart type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    /// Points required before limits exist (and, for CUSUM/EWMA, the size
    /// of the baseline estimate).
    pub warmup_threshold: usize,
    /// Most recent points scanned by the rule evaluator.
    pub lookback: usize,
    /// Window capacity override. `None` uses 1000 for raw charts and 200
    /// for X-bar-R.
    pub window_capacity: Option<usize>,
    /// Retained violation log entries before the oldest are dropped.
    pub violation_capacity: usize,
    /// Enabled Western Electric rules, as rule numbers.
    pub rules: RuleSet,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            warmup_threshold: default_warmup_threshold(),
            lookback: default_lookback(),
            window_capacity: None,
            violation_capacity: default_violation_capacity(),
            rules: RuleSet::all(),
        }
    }
}

impl ChartSettings {
    /// Window capacity to use, given the chart type's default.
    pub fn window_capacity_or(&self, default: usize) -> usize {
        self.window_capacity.unwrap_or(default)
    }

    /// # Errors
    ///
    /// [`SpcError::Config`] when any tunable is zero, the warm-up is below
    /// two points, or the window could never reach the warm-up threshold.
    pub fn validate(&self, default_window_capacity: usize) -> Result<(), SpcError> {
        if self.warmup_threshold < 2 {
            return Err(SpcError::Config(format!(
                "warmup_threshold must be at least 2, got {}",
                self.warmup_threshold
            )));
        }
        if self.lookback == 0 {
            return Err(SpcError::Config("lookback must be at least 1".to_string()));
        }
        if self.violation_capacity == 0 {
            return Err(SpcError::Config(
                "violation_capacity must be at least 1".to_string(),
            ));
        }
        let capacity = self.window_capacity_or(default_window_capacity);
        if capacity < self.warmup_threshold {
            return Err(SpcError::Config(format!(
                "window capacity {capacity} is below warmup_threshold {}",
                self.warmup_threshold
            )));
        }
        Ok(())
    }
}

/// Full description of one metric's chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart: ChartConfig,
    /// Per-metric override of the registry defaults.
    #[serde(default)]
    pub settings: Option<ChartSettings>,
    /// Opaque labels (symbol, phase, line, ...) copied onto every event.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ChartSpec {
    pub fn new(chart: ChartConfig) -> Self {
        Self {
            chart,
            settings: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: ChartSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Registry-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Settings for charts whose spec carries none.
    #[serde(default)]
    pub defaults: ChartSettings,
    /// Chart created for an unconfigured metric first seen with a single value.
    #[serde(default = "ChartConfig::ewma")]
    pub default_value_chart: ChartConfig,
    /// Pre-declared metrics, created lazily on first record.
    #[serde(default)]
    pub metrics: BTreeMap<String, ChartSpec>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            defaults: ChartSettings::default(),
            default_value_chart: ChartConfig::ewma(),
            metrics: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// [`SpcError::Parse`] for malformed TOML, or any error from [`validate`](Self::validate).
    pub fn from_toml_str(toml_str: &str) -> Result<Self, SpcError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// [`SpcError::Config`] if the default value chart is not a value chart,
    /// or any chart or settings block is invalid.
    pub fn validate(&self) -> Result<(), SpcError> {
        let method = self.default_value_chart.method();
        if method.payload_kind() != PayloadKind::Value {
            return Err(SpcError::Config(format!(
                "default_value_chart must be cusum or ewma, got {method}"
            )));
        }
        self.default_value_chart.validate()?;
        // Defaults must fit every chart type, so check against the smallest window.
        self.defaults.validate(SUBGROUP_WINDOW_CAPACITY)?;
        for (name, spec) in &self.metrics {
            spec.chart.validate().map_err(|e| with_metric(name, e))?;
            if let Some(settings) = &spec.settings {
                settings
                    .validate(default_window_capacity(spec.chart.method()))
                    .map_err(|e| with_metric(name, e))?;
            }
        }
        Ok(())
    }
}

/// Default window capacity for a chart type.
pub fn default_window_capacity(method: ChartMethod) -> usize {
    match method {
        ChartMethod::XBarR => SUBGROUP_WINDOW_CAPACITY,
        ChartMethod::P | ChartMethod::Cusum | ChartMethod::Ewma => RAW_WINDOW_CAPACITY,
    }
}

fn with_metric(name: &str, err: SpcError) -> SpcError {
    match err {
        SpcError::Config(msg) => SpcError::Config(format!("metric `{name}`: {msg}")),
        SpcError::Numeric(msg) => SpcError::Numeric(format!("metric `{name}`: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spc::WesternElectricRule;

    #[test]
    fn test_defaults() {
        let settings = ChartSettings::default();
        assert_eq!(settings.warmup_threshold, 25);
        assert_eq!(settings.lookback, 50);
        assert_eq!(settings.violation_capacity, 1000);
        assert_eq!(settings.rules, RuleSet::all());
        assert_eq!(settings.window_capacity_or(200), 200);

        let config = RegistryConfig::default();
        assert_eq!(config.default_value_chart.method(), ChartMethod::Ewma);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chart_config_validation() {
        assert!(ChartConfig::xbar_r(5).validate().is_ok());
        assert!(matches!(
            ChartConfig::xbar_r(1).validate(),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            ChartConfig::xbar_r(11).validate(),
            Err(SpcError::Config(_))
        ));
        assert!(matches!(
            ChartConfig::Ewma {
                lambda_factor: 0.0,
                limit_width: 3.0
            }
            .validate(),
            Err(SpcError::Config(_))
        ));
        assert!(ChartConfig::Ewma {
            lambda_factor: 1.0,
            limit_width: 3.0
        }
        .validate()
        .is_ok());
        assert!(matches!(
            ChartConfig::Cusum {
                k_factor: f64::NAN,
                h_factor: 5.0
            }
            .validate(),
            Err(SpcError::Numeric(_))
        ));
        assert!(matches!(
            ChartConfig::P {
                target_sample_size: Some(0)
            }
            .validate(),
            Err(SpcError::Config(_))
        ));
    }

    #[test]
    fn test_settings_validation() {
        let too_small = ChartSettings {
            window_capacity: Some(10),
            ..ChartSettings::default()
        };
        assert!(matches!(too_small.validate(1000), Err(SpcError::Config(_))));

        let no_lookback = ChartSettings {
            lookback: 0,
            ..ChartSettings::default()
        };
        assert!(no_lookback.validate(1000).is_err());
        assert!(ChartSettings::default().validate(200).is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            default_value_chart = { type = "cusum", h_factor = 4.0 }

            [defaults]
            lookback = 40
            rules = [1, 2, 3, 4, 5, 6, 8]

            [metrics.fill_weight]
            chart = { type = "xbar_r", subgroup_size = 5 }

            [metrics.reject_rate]
            chart = { type = "p", target_sample_size = 200 }
            labels = { line = "A", phase = "production" }

            [metrics.spread]
            chart = { type = "ewma", lambda_factor = 0.1 }
            settings = { warmup_threshold = 30 }
        "#;
        let config = RegistryConfig::from_toml_str(toml_str).expect("valid config");

        assert_eq!(
            config.default_value_chart,
            ChartConfig::Cusum {
                k_factor: 0.5,
                h_factor: 4.0
            }
        );
        assert_eq!(config.defaults.lookback, 40);
        assert_eq!(config.defaults.warmup_threshold, 25);
        assert!(!config
            .defaults
            .rules
            .contains(WesternElectricRule::FifteenWithin1Sigma));

        assert_eq!(config.metrics["fill_weight"].chart, ChartConfig::xbar_r(5));
        let reject = &config.metrics["reject_rate"];
        assert_eq!(
            reject.chart,
            ChartConfig::P {
                target_sample_size: Some(200)
            }
        );
        assert_eq!(reject.labels["phase"], "production");

        let spread = &config.metrics["spread"];
        assert_eq!(
            spread.chart,
            ChartConfig::Ewma {
                lambda_factor: 0.1,
                limit_width: 3.0
            }
        );
        let settings = spread.settings.expect("override present");
        assert_eq!(settings.warmup_threshold, 30);
        assert_eq!(settings.lookback, 50);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let bad_size = r#"
            [metrics.m]
            chart = { type = "xbar_r", subgroup_size = 12 }
        "#;
        match RegistryConfig::from_toml_str(bad_size) {
            Err(SpcError::Config(msg)) => assert!(msg.contains("metric `m`")),
            other => panic!("expected config error, got {other:?}"),
        }

        let bad_rule = r#"
            [defaults]
            rules = [9]
        "#;
        assert!(matches!(
            RegistryConfig::from_toml_str(bad_rule),
            Err(SpcError::Parse(_))
        ));

        let subgroup_default = r#"
            default_value_chart = { type = "xbar_r", subgroup_size = 4 }
        "#;
        assert!(matches!(
            RegistryConfig::from_toml_str(subgroup_default),
            Err(SpcError::Config(_))
        ));

        assert!(matches!(
            RegistryConfig::from_toml_str("metrics = 3"),
            Err(SpcError::Parse(_))
        ));
    }

    #[test]
    fn test_spec_builder() {
        let spec = ChartSpec::new(ChartConfig::cusum())
            .with_label("symbol", "ES")
            .with_settings(ChartSettings {
                lookback: 20,
                ..ChartSettings::default()
            });
        assert_eq!(spec.labels["symbol"], "ES");
        assert_eq!(spec.settings.map(|s| s.lookback), Some(20));
    }
}
