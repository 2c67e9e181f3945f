//! Controller tuning, loaded from TOML.
//!
//! Every field of [`SraConfigInput`] is optional; [`SraConfigInput::resolve`]
//! fills in defaults and validates the result.
//!
//! ```toml
//! monitoring_interval_ms = 10000
//! crc_error_threshold = 10
//! traffic_threshold_mbps = 50.0
//!
//! [diagnostics]
//! estimated_distance_m = 450.0
//!
//! [conservative.very_poor]
//! snr_margin_target_db = 12.0
//! latency_profile = "stable"
//! retransmission_level = 2
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use copperline_channel::diagnostics::{DEFAULT_HLOG_THRESHOLD_DB, DEFAULT_QLN_MARGIN_DB};
use serde::Deserialize;

use crate::error::SraError;
use crate::state::{LatencyProfile, LineQuality};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SraConfigInput {
    pub monitoring_interval_ms: Option<u64>,
    pub crc_error_threshold: Option<u64>,
    pub snr_increase_step_db: Option<f64>,
    pub snr_decrease_step_db: Option<f64>,
    pub power_boost_step_db: Option<f64>,
    pub max_power_boost_db: Option<f64>,
    pub stable_time_for_optimization_ms: Option<u64>,
    pub traffic_threshold_mbps: Option<f64>,
    pub low_traffic_threshold_mbps: Option<f64>,
    pub latency_error_threshold: Option<u64>,
    pub initial_latency_profile: Option<LatencyProfile>,
    pub force_retrain_on_optimize: Option<bool>,
    pub cooldown_intervals: Option<u32>,
    pub diagnostics: DiagnosticsConfigInput,
    pub conservative: BTreeMap<LineQuality, ConservativeProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfigInput {
    pub qln_margin_db: Option<f64>,
    pub qln_anomaly_limit: Option<usize>,
    pub hlog_threshold_db: Option<f64>,
    pub hlog_anomaly_limit: Option<usize>,
    pub estimated_distance_m: Option<f64>,
}

/// Settings forced onto a degraded line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConservativeProfile {
    pub snr_margin_target_db: Option<f64>,
    pub latency_profile: Option<LatencyProfile>,
    /// INP level.
    pub retransmission_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsConfig {
    pub qln_margin_db: f64,
    /// More flagged QLN tones than this classifies the line as Poor.
    pub qln_anomaly_limit: usize,
    pub hlog_threshold_db: f64,
    pub hlog_anomaly_limit: usize,
    /// Hlog is only analysed when the loop length is known.
    pub estimated_distance_m: Option<f64>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            qln_margin_db: DEFAULT_QLN_MARGIN_DB,
            qln_anomaly_limit: 64,
            hlog_threshold_db: DEFAULT_HLOG_THRESHOLD_DB,
            hlog_anomaly_limit: 64,
            estimated_distance_m: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SraConfig {
    pub monitoring_interval: Duration,
    /// New CRC errors per interval above which the line is Poor (2× → VeryPoor).
    pub crc_error_threshold: u64,
    pub snr_increase_step_db: f64,
    /// Probing step when optimizing for rate.
    pub snr_decrease_step_db: f64,
    pub power_boost_step_db: f64,
    pub max_power_boost_db: f64,
    pub stable_time_for_optimization: Duration,
    pub traffic_threshold_mbps: f64,
    pub low_traffic_threshold_mbps: f64,
    /// New CRC errors per interval that force the `stable` latency profile.
    pub latency_error_threshold: u64,
    pub initial_latency_profile: LatencyProfile,
    pub force_retrain_on_optimize: bool,
    /// Ticks skipped after a link drop, in monitoring intervals.
    pub cooldown_intervals: u32,
    pub diagnostics: DiagnosticsConfig,
    pub conservative: BTreeMap<LineQuality, ConservativeProfile>,
}

impl Default for SraConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(10),
            crc_error_threshold: 10,
            snr_increase_step_db: 0.5,
            snr_decrease_step_db: 0.1,
            power_boost_step_db: 1.0,
            max_power_boost_db: 5.0,
            stable_time_for_optimization: Duration::from_secs(60),
            traffic_threshold_mbps: 50.0,
            low_traffic_threshold_mbps: 5.0,
            latency_error_threshold: 5,
            initial_latency_profile: LatencyProfile::Stable,
            force_retrain_on_optimize: true,
            cooldown_intervals: 2,
            diagnostics: DiagnosticsConfig::default(),
            conservative: BTreeMap::new(),
        }
    }
}

impl SraConfigInput {
    pub fn resolve(self) -> Result<SraConfig, SraError> {
        let d = SraConfig::default();
        let dd = DiagnosticsConfig::default();

        let monitoring_interval = self
            .monitoring_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(d.monitoring_interval);
        if monitoring_interval.is_zero() {
            return Err(SraError::Config("monitoring_interval_ms must be > 0".into()));
        }

        let snr_increase_step_db = positive(
            "snr_increase_step_db",
            self.snr_increase_step_db.unwrap_or(d.snr_increase_step_db),
        )?;
        let snr_decrease_step_db = positive(
            "snr_decrease_step_db",
            self.snr_decrease_step_db.unwrap_or(d.snr_decrease_step_db),
        )?;
        let power_boost_step_db = positive(
            "power_boost_step_db",
            self.power_boost_step_db.unwrap_or(d.power_boost_step_db),
        )?;
        let max_power_boost_db = self.max_power_boost_db.unwrap_or(d.max_power_boost_db);
        if !max_power_boost_db.is_finite() || max_power_boost_db < 0.0 {
            return Err(SraError::Config("max_power_boost_db must be >= 0".into()));
        }

        let traffic_threshold_mbps = self.traffic_threshold_mbps.unwrap_or(d.traffic_threshold_mbps);
        let low_traffic_threshold_mbps = self
            .low_traffic_threshold_mbps
            .unwrap_or(d.low_traffic_threshold_mbps);
        if !low_traffic_threshold_mbps.is_finite()
            || !traffic_threshold_mbps.is_finite()
            || low_traffic_threshold_mbps >= traffic_threshold_mbps
        {
            return Err(SraError::Config(format!(
                "low_traffic_threshold_mbps ({low_traffic_threshold_mbps}) must be below \
                 traffic_threshold_mbps ({traffic_threshold_mbps})"
            )));
        }

        let estimated_distance_m = match self.diagnostics.estimated_distance_m {
            Some(m) if !m.is_finite() || m < 0.0 => {
                return Err(SraError::Config("estimated_distance_m must be >= 0".into()));
            }
            other => other,
        };

        for (quality, profile) in &self.conservative {
            if !quality.is_degraded() {
                return Err(SraError::Config(format!(
                    "conservative profile for {quality:?}: only poor and very_poor lines are stabilised"
                )));
            }
            if let Some(target) = profile.snr_margin_target_db
                && (!target.is_finite() || target < 0.0)
            {
                return Err(SraError::Config(format!(
                    "conservative profile for {quality:?}: snr_margin_target_db must be >= 0"
                )));
            }
        }

        Ok(SraConfig {
            monitoring_interval,
            crc_error_threshold: self.crc_error_threshold.unwrap_or(d.crc_error_threshold),
            snr_increase_step_db,
            snr_decrease_step_db,
            power_boost_step_db,
            max_power_boost_db,
            stable_time_for_optimization: self
                .stable_time_for_optimization_ms
                .map(Duration::from_millis)
                .unwrap_or(d.stable_time_for_optimization),
            traffic_threshold_mbps,
            low_traffic_threshold_mbps,
            latency_error_threshold: self
                .latency_error_threshold
                .unwrap_or(d.latency_error_threshold),
            initial_latency_profile: self
                .initial_latency_profile
                .unwrap_or(d.initial_latency_profile),
            force_retrain_on_optimize: self
                .force_retrain_on_optimize
                .unwrap_or(d.force_retrain_on_optimize),
            cooldown_intervals: self.cooldown_intervals.unwrap_or(d.cooldown_intervals),
            diagnostics: DiagnosticsConfig {
                qln_margin_db: self.diagnostics.qln_margin_db.unwrap_or(dd.qln_margin_db),
                qln_anomaly_limit: self
                    .diagnostics
                    .qln_anomaly_limit
                    .unwrap_or(dd.qln_anomaly_limit),
                hlog_threshold_db: self
                    .diagnostics
                    .hlog_threshold_db
                    .unwrap_or(dd.hlog_threshold_db),
                hlog_anomaly_limit: self
                    .diagnostics
                    .hlog_anomaly_limit
                    .unwrap_or(dd.hlog_anomaly_limit),
                estimated_distance_m,
            },
            conservative: self.conservative,
        })
    }
}

fn positive(name: &str, value: f64) -> Result<f64, SraError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SraError::Config(format!("{name} must be > 0, got {value}")))
    }
}

impl SraConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, SraError> {
        if input.trim().is_empty() {
            return Ok(SraConfig::default());
        }
        let parsed: SraConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// How long ticks are suppressed after a link drop.
    pub fn cooldown(&self) -> Duration {
        self.monitoring_interval * self.cooldown_intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_defaults() {
        let cfg = SraConfig::from_toml_str("  \n").unwrap();
        assert_eq!(cfg, SraConfig::default());
        assert_eq!(cfg.monitoring_interval, Duration::from_secs(10));
        assert_eq!(cfg.cooldown(), Duration::from_secs(20));
        assert_eq!(cfg.crc_error_threshold, 10);
        assert_eq!(cfg.snr_increase_step_db, 0.5);
        assert_eq!(cfg.snr_decrease_step_db, 0.1);
        assert_eq!(cfg.stable_time_for_optimization, Duration::from_secs(60));
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            monitoring_interval_ms = 5000
            crc_error_threshold = 20
            max_power_boost_db = 3.0
            initial_latency_profile = "gaming"

            [diagnostics]
            estimated_distance_m = 450.0
            qln_anomaly_limit = 10

            [conservative.poor]
            snr_margin_target_db = 9.0

            [conservative.very_poor]
            snr_margin_target_db = 12.0
            latency_profile = "stable"
            retransmission_level = 2
        "#;
        let cfg = SraConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.monitoring_interval, Duration::from_secs(5));
        assert_eq!(cfg.crc_error_threshold, 20);
        assert_eq!(cfg.max_power_boost_db, 3.0);
        assert_eq!(cfg.initial_latency_profile, LatencyProfile::Gaming);
        assert_eq!(cfg.diagnostics.estimated_distance_m, Some(450.0));
        assert_eq!(cfg.diagnostics.qln_anomaly_limit, 10);
        assert_eq!(cfg.diagnostics.hlog_anomaly_limit, 64);
        assert_eq!(cfg.conservative.len(), 2);
        let vp = cfg.conservative[&LineQuality::VeryPoor];
        assert_eq!(vp.latency_profile, Some(LatencyProfile::Stable));
        assert_eq!(vp.retransmission_level, Some(2));
        assert_eq!(cfg.conservative[&LineQuality::Poor].latency_profile, None);
    }

    #[test]
    fn rejects_inverted_traffic_thresholds() {
        let err = SraConfig::from_toml_str(
            "traffic_threshold_mbps = 5.0\nlow_traffic_threshold_mbps = 10.0",
        )
        .unwrap_err();
        assert!(matches!(err, SraError::Config(_)));
    }

    #[test]
    fn rejects_zero_interval_and_bad_steps() {
        assert!(SraConfig::from_toml_str("monitoring_interval_ms = 0").is_err());
        assert!(SraConfig::from_toml_str("snr_decrease_step_db = 0.0").is_err());
        assert!(SraConfig::from_toml_str("max_power_boost_db = -1.0").is_err());
    }

    #[test]
    fn rejects_profile_for_healthy_line() {
        let err = SraConfig::from_toml_str("[conservative.good]\nsnr_margin_target_db = 6.0")
            .unwrap_err();
        assert!(err.to_string().contains("only poor and very_poor"));
    }

    #[test]
    fn rejects_unknown_latency_profile() {
        assert!(matches!(
            SraConfig::from_toml_str("initial_latency_profile = \"turbo\""),
            Err(SraError::Toml(_))
        ));
    }
}
