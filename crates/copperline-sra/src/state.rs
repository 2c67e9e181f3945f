//! Controller state vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SraError;

/// Operating state of the rate adaptation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SraState {
    Stable,
    Unstable,
    /// High traffic on a quiet line: probing for a higher rate.
    OptimizingUp,
    /// Low traffic on a quiet line: trading rate for margin and power.
    PowerSaving,
}

impl SraState {
    pub fn is_optimizing(self) -> bool {
        matches!(self, SraState::OptimizingUp | SraState::PowerSaving)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SraState::Stable => "stable",
            SraState::Unstable => "unstable",
            SraState::OptimizingUp => "optimizing_up",
            SraState::PowerSaving => "power_saving",
        }
    }
}

impl fmt::Display for SraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tick classification of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineQuality {
    Excellent,
    Good,
    Poor,
    VeryPoor,
}

impl LineQuality {
    pub fn is_degraded(self) -> bool {
        matches!(self, LineQuality::Poor | LineQuality::VeryPoor)
    }
}

/// Framing trade-off between latency and impulse noise robustness. The
/// lowercase names are what the modem receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyProfile {
    /// Interleaving off, INP 0.
    Fast,
    /// Fast path for interactive traffic, INP 0.
    Gaming,
    /// Interleaving on, INP 2.
    Stable,
}

impl LatencyProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            LatencyProfile::Fast => "fast",
            LatencyProfile::Gaming => "gaming",
            LatencyProfile::Stable => "stable",
        }
    }

    pub fn interleaving(self) -> bool {
        matches!(self, LatencyProfile::Stable)
    }

    /// Impulse noise protection, in DMT symbols.
    pub fn inp(self) -> u8 {
        match self {
            LatencyProfile::Fast | LatencyProfile::Gaming => 0,
            LatencyProfile::Stable => 2,
        }
    }
}

impl fmt::Display for LatencyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LatencyProfile {
    type Err = SraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(LatencyProfile::Fast),
            "gaming" => Ok(LatencyProfile::Gaming),
            "stable" => Ok(LatencyProfile::Stable),
            _ => Err(SraError::UnknownLatencyProfile(s.to_string())),
        }
    }
}

/// Known-good settings captured before an optimization step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfigSnapshot {
    /// `None` when the modem did not report a margin at capture time.
    pub snr_margin_db: Option<f64>,
    pub latency_profile: LatencyProfile,
    pub power_boost_db: f64,
}
