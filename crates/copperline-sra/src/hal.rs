//! # Modem Hardware Abstraction
//!
//! The controller talks to the modem only through [`DslHal`]. Mandatory
//! calls (line stats, link status, SNR margin, latency profile) must be
//! implemented; optional capabilities default to
//! [`HalError::NotSupported`] and are advertised through
//! [`DslHal::supports`] so the controller can skip them up front.

use std::fmt;

use copperline_channel::Measurement;
use serde::{Deserialize, Serialize};

use crate::error::HalError;
use crate::state::LatencyProfile;

/// Optional modem features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Bitswap,
    PowerBoost,
    Renegotiation,
    Retransmission,
    Qln,
    Hlog,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Bitswap,
        Capability::PowerBoost,
        Capability::Renegotiation,
        Capability::Retransmission,
        Capability::Qln,
        Capability::Hlog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Bitswap => "bitswap",
            Capability::PowerBoost => "power_boost",
            Capability::Renegotiation => "renegotiation",
            Capability::Retransmission => "retransmission",
            Capability::Qln => "qln",
            Capability::Hlog => "hlog",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line counters reported by the modem.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LineStats {
    /// Monotonic CRC error counter; resets on retrain.
    pub crc_errors: u64,
    pub downstream_attenuation_db: Option<f64>,
    pub upstream_attenuation_db: Option<f64>,
}

/// Status strings that mean the line is in showtime.
pub fn is_link_up(status: &str) -> bool {
    let status = status.trim();
    ["up", "showtime", "connected"]
        .iter()
        .any(|s| status.eq_ignore_ascii_case(s))
}

/// Synchronous modem control surface.
pub trait DslHal: Send + Sync {
    /// Whether an optional capability is available. Callers still handle
    /// `NotSupported` from the call itself.
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn get_line_stats(&self) -> Result<LineStats, HalError>;

    /// Raw status string, see [`is_link_up`].
    fn get_link_status(&self) -> Result<String, HalError>;

    /// Current downstream SNR margin in dB.
    fn get_snr_margin(&self) -> Result<Option<f64>, HalError>;

    /// Target SNR margin in tenths of a dB.
    fn set_snr_margin(&self, tenths_db: i32) -> Result<bool, HalError>;

    fn set_latency_profile(&self, profile: LatencyProfile) -> Result<bool, HalError>;

    fn control_bitswap(&self, _enabled: bool) -> Result<bool, HalError> {
        Err(HalError::NotSupported(Capability::Bitswap))
    }

    fn set_upstream_power_boost(&self, _db: f64) -> Result<bool, HalError> {
        Err(HalError::NotSupported(Capability::PowerBoost))
    }

    /// Retrains the line. Training restarts the modem's error counters.
    fn force_renegotiation(&self) -> Result<bool, HalError> {
        Err(HalError::NotSupported(Capability::Renegotiation))
    }

    /// Impulse noise protection (INP) level.
    fn set_retransmission_level(&self, _inp: u8) -> Result<bool, HalError> {
        Err(HalError::NotSupported(Capability::Retransmission))
    }

    fn get_qln_data(&self) -> Result<Option<Measurement>, HalError> {
        Err(HalError::NotSupported(Capability::Qln))
    }

    fn get_hlog_data(&self) -> Result<Option<Measurement>, HalError> {
        Err(HalError::NotSupported(Capability::Hlog))
    }
}

/// Source of the current user traffic rate.
pub trait TrafficMonitor: Send + Sync {
    fn traffic_mbps(&self) -> f64;
}

impl<F> TrafficMonitor for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn traffic_mbps(&self) -> f64 {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl DslHal for Minimal {
        fn get_line_stats(&self) -> Result<LineStats, HalError> {
            Ok(LineStats::default())
        }
        fn get_link_status(&self) -> Result<String, HalError> {
            Ok("Showtime".into())
        }
        fn get_snr_margin(&self) -> Result<Option<f64>, HalError> {
            Ok(Some(6.0))
        }
        fn set_snr_margin(&self, _tenths_db: i32) -> Result<bool, HalError> {
            Ok(true)
        }
        fn set_latency_profile(&self, _profile: LatencyProfile) -> Result<bool, HalError> {
            Ok(true)
        }
    }

    #[test]
    fn link_status_strings() {
        assert!(is_link_up("up"));
        assert!(is_link_up(" Showtime\n"));
        assert!(is_link_up("CONNECTED"));
        assert!(!is_link_up("down"));
        assert!(!is_link_up("training"));
        assert!(!is_link_up(""));
    }

    #[test]
    fn optional_calls_default_to_not_supported() {
        let hal = Minimal;
        assert!(matches!(
            hal.control_bitswap(true),
            Err(HalError::NotSupported(Capability::Bitswap))
        ));
        assert!(hal.force_renegotiation().unwrap_err().is_not_supported());
        assert!(hal.set_retransmission_level(2).unwrap_err().is_not_supported());
        assert!(hal.get_qln_data().unwrap_err().is_not_supported());
        assert!(is_link_up(&hal.get_link_status().unwrap()));
    }

    #[test]
    fn capability_names() {
        let names: Vec<_> = Capability::ALL.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            names,
            ["bitswap", "power_boost", "renegotiation", "retransmission", "qln", "hlog"]
        );
    }
}
