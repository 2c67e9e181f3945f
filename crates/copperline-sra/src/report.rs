//! Per-tick record of what the controller saw and did, plus the helpers
//! that issue modem calls and log their outcome into it.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HalError;
use crate::hal::{Capability, DslHal};
use crate::state::{LatencyProfile, LineQuality, SraState};

/// A modem call the controller issued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SetSnrMargin { tenths_db: i32 },
    SetLatencyProfile { profile: LatencyProfile },
    SetPowerBoost { db: f64 },
    EnableBitswap,
    ForceRenegotiation,
    SetRetransmissionLevel { inp: u8 },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SetSnrMargin { .. } => "set_snr_margin",
            Action::SetLatencyProfile { .. } => "set_latency_profile",
            Action::SetPowerBoost { .. } => "set_upstream_power_boost",
            Action::EnableBitswap => "control_bitswap",
            Action::ForceRenegotiation => "force_renegotiation",
            Action::SetRetransmissionLevel { .. } => "set_retransmission_level",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub state: SraState,
    pub line_quality: LineQuality,
    pub new_crc_errors: u64,
    /// Calls the modem accepted, in issue order.
    pub actions: Vec<Action>,
    /// Optional capabilities the modem lacks.
    pub skipped: Vec<Capability>,
    /// Calls that were rejected or errored.
    pub failures: Vec<String>,
    pub link_down: bool,
    /// The tick fell inside a post-disconnect cooldown and did nothing.
    pub in_cooldown: bool,
    pub disconnect_events: u64,
    pub power_boost_db: f64,
    pub latency_profile: LatencyProfile,
    pub qln_anomalies: Option<usize>,
    pub hlog_anomalies: Option<usize>,
}

impl TickReport {
    pub(crate) fn new(
        tick: u64,
        state: SraState,
        line_quality: LineQuality,
        latency_profile: LatencyProfile,
    ) -> Self {
        TickReport {
            tick,
            state,
            line_quality,
            new_crc_errors: 0,
            actions: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            link_down: false,
            in_cooldown: false,
            disconnect_events: 0,
            power_boost_db: 0.0,
            latency_profile,
            qln_anomalies: None,
            hlog_anomalies: None,
        }
    }

    pub fn took(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a.name() == name)
    }

    pub(crate) fn skip(&mut self, capability: Capability) {
        if !self.skipped.contains(&capability) {
            self.skipped.push(capability);
        }
    }

    pub(crate) fn fail(&mut self, what: String) {
        self.failures.push(what);
    }
}

/// Records the outcome of a modem call. Returns whether it was accepted.
pub(crate) fn record(
    report: &mut TickReport,
    action: Action,
    result: Result<bool, HalError>,
) -> bool {
    match result {
        Ok(true) => {
            debug!(?action, "modem accepted");
            report.actions.push(action);
            true
        }
        Ok(false) => {
            warn!(?action, "modem rejected command");
            report.fail(format!("{} rejected", action.name()));
            false
        }
        Err(HalError::NotSupported(capability)) => {
            warn!(%capability, "capability not supported, skipping");
            report.skip(capability);
            false
        }
        Err(e) => {
            warn!(?action, error = %e, "modem command failed");
            report.fail(format!("{}: {e}", action.name()));
            false
        }
    }
}

/// Issues an optional call only when the modem advertises `capability`.
pub(crate) fn optional(
    hal: &dyn DslHal,
    report: &mut TickReport,
    capability: Capability,
    action: Action,
    call: impl FnOnce(&dyn DslHal) -> Result<bool, HalError>,
) -> bool {
    if !hal.supports(capability) {
        debug!(%capability, "capability not advertised, skipping");
        report.skip(capability);
        return false;
    }
    record(report, action, call(hal))
}

/// Converts dB to the modem's tenths-of-dB set-point.
pub fn tenths_db(db: f64) -> i32 {
    (db * 10.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> TickReport {
        TickReport::new(1, SraState::Stable, LineQuality::Good, LatencyProfile::Stable)
    }

    #[test]
    fn tenths_are_rounded() {
        assert_eq!(tenths_db(15.5), 155);
        assert_eq!(tenths_db(6.04), 60);
        assert_eq!(tenths_db(6.06), 61);
        assert_eq!(tenths_db(5.9 - 0.1), 58);
        assert_eq!(tenths_db(-0.25), -3);
    }

    #[test]
    fn outcomes_land_in_the_right_bucket() {
        let mut r = report();
        assert!(record(&mut r, Action::EnableBitswap, Ok(true)));
        assert!(!record(&mut r, Action::ForceRenegotiation, Ok(false)));
        assert!(!record(
            &mut r,
            Action::SetPowerBoost { db: 1.0 },
            Err(HalError::NotSupported(Capability::PowerBoost))
        ));
        assert!(!record(
            &mut r,
            Action::SetSnrMargin { tenths_db: 60 },
            Err(HalError::Command("timeout".into()))
        ));
        assert_eq!(r.actions, vec![Action::EnableBitswap]);
        assert!(r.took("control_bitswap"));
        assert_eq!(r.skipped, vec![Capability::PowerBoost]);
        assert_eq!(r.failures.len(), 2);
        assert!(r.failures[1].contains("timeout"));
    }

    #[test]
    fn skips_are_deduplicated() {
        let mut r = report();
        r.skip(Capability::Qln);
        r.skip(Capability::Qln);
        assert_eq!(r.skipped.len(), 1);
    }

    #[test]
    fn actions_serialize_tagged() {
        let json = serde_json::to_value(Action::SetSnrMargin { tenths_db: 155 }).unwrap();
        assert_eq!(json["action"], "set_snr_margin");
        assert_eq!(json["tenths_db"], 155);
        let json = serde_json::to_value(Action::SetLatencyProfile {
            profile: LatencyProfile::Fast,
        })
        .unwrap();
        assert_eq!(json["profile"], "fast");
    }
}
