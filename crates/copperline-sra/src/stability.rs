//! Recovery policy for an unstable line.
//!
//! A degraded line with a configured [`ConservativeProfile`] gets that
//! profile applied; anything else gets its SNR margin raised by one step.

use std::collections::BTreeMap;

use tracing::{info, info_span, warn, Span};

use crate::config::ConservativeProfile;
use crate::hal::{Capability, DslHal};
use crate::report::{optional, record, tenths_db, Action, TickReport};
use crate::state::{LatencyProfile, LineQuality};

pub struct StabilityManager {
    conservative: BTreeMap<LineQuality, ConservativeProfile>,
    snr_increase_step_db: f64,
    span: Span,
}

impl StabilityManager {
    pub fn new(
        conservative: BTreeMap<LineQuality, ConservativeProfile>,
        snr_increase_step_db: f64,
    ) -> Self {
        StabilityManager {
            conservative,
            snr_increase_step_db,
            span: info_span!("stability"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn profile_for(&self, quality: LineQuality) -> Option<&ConservativeProfile> {
        if quality.is_degraded() {
            self.conservative.get(&quality)
        } else {
            None
        }
    }

    /// Pushes the line towards stability. `latency` is the controller's
    /// current profile and is updated when a new one is accepted.
    pub fn stabilize(
        &self,
        hal: &dyn DslHal,
        quality: LineQuality,
        latency: &mut LatencyProfile,
        report: &mut TickReport,
    ) {
        let _enter = self.span.enter();
        match self.profile_for(quality) {
            Some(profile) => self.apply_conservative(hal, quality, profile, latency, report),
            None => self.raise_margin(hal, report),
        }
    }

    fn apply_conservative(
        &self,
        hal: &dyn DslHal,
        quality: LineQuality,
        profile: &ConservativeProfile,
        latency: &mut LatencyProfile,
        report: &mut TickReport,
    ) {
        warn!(?quality, ?profile, "applying conservative profile");

        if let Some(target_db) = profile.snr_margin_target_db {
            let tenths = tenths_db(target_db);
            record(
                report,
                Action::SetSnrMargin { tenths_db: tenths },
                hal.set_snr_margin(tenths),
            );
        }

        if let Some(wanted) = profile.latency_profile
            && wanted != *latency
            && record(
                report,
                Action::SetLatencyProfile { profile: wanted },
                hal.set_latency_profile(wanted),
            )
        {
            *latency = wanted;
        }

        if let Some(inp) = profile.retransmission_level {
            optional(
                hal,
                report,
                Capability::Retransmission,
                Action::SetRetransmissionLevel { inp },
                |h| h.set_retransmission_level(inp),
            );
        }
    }

    fn raise_margin(&self, hal: &dyn DslHal, report: &mut TickReport) {
        match hal.get_snr_margin() {
            Ok(Some(current)) => {
                let target = current + self.snr_increase_step_db;
                info!(current_db = current, target_db = target, "raising SNR margin");
                let tenths = tenths_db(target);
                record(
                    report,
                    Action::SetSnrMargin { tenths_db: tenths },
                    hal.set_snr_margin(tenths),
                );
            }
            Ok(None) => warn!("modem reported no SNR margin, cannot stabilise"),
            Err(e) => {
                warn!(error = %e, "failed to read SNR margin");
                report.fail(format!("get_snr_margin: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::HalError;
    use crate::hal::LineStats;
    use crate::state::SraState;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        no_inp: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DslHal for Recorder {
        fn supports(&self, capability: Capability) -> bool {
            !(self.no_inp && capability == Capability::Retransmission)
        }
        fn get_line_stats(&self) -> Result<LineStats, HalError> {
            Ok(LineStats::default())
        }
        fn get_link_status(&self) -> Result<String, HalError> {
            Ok("up".into())
        }
        fn get_snr_margin(&self) -> Result<Option<f64>, HalError> {
            Ok(Some(8.0))
        }
        fn set_snr_margin(&self, tenths_db: i32) -> Result<bool, HalError> {
            self.calls.lock().unwrap().push(format!("snr {tenths_db}"));
            Ok(true)
        }
        fn set_latency_profile(&self, profile: LatencyProfile) -> Result<bool, HalError> {
            self.calls.lock().unwrap().push(format!("latency {profile}"));
            Ok(true)
        }
        fn set_retransmission_level(&self, inp: u8) -> Result<bool, HalError> {
            self.calls.lock().unwrap().push(format!("inp {inp}"));
            Ok(true)
        }
    }

    fn report() -> TickReport {
        TickReport::new(1, SraState::Unstable, LineQuality::Poor, LatencyProfile::Fast)
    }

    fn manager() -> StabilityManager {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            LineQuality::VeryPoor,
            ConservativeProfile {
                snr_margin_target_db: Some(12.0),
                latency_profile: Some(LatencyProfile::Stable),
                retransmission_level: Some(2),
            },
        );
        StabilityManager::new(profiles, 0.5)
    }

    #[test]
    fn conservative_profile_applied_for_configured_quality() {
        let hal = Recorder::default();
        let mut latency = LatencyProfile::Fast;
        let mut r = report();
        manager().stabilize(&hal, LineQuality::VeryPoor, &mut latency, &mut r);
        assert_eq!(hal.calls(), vec!["snr 120", "latency stable", "inp 2"]);
        assert_eq!(latency, LatencyProfile::Stable);
        assert_eq!(r.actions.len(), 3);
    }

    #[test]
    fn latency_left_alone_when_already_current() {
        let hal = Recorder::default();
        let mut latency = LatencyProfile::Stable;
        let mut r = report();
        manager().stabilize(&hal, LineQuality::VeryPoor, &mut latency, &mut r);
        assert_eq!(hal.calls(), vec!["snr 120", "inp 2"]);
    }

    #[test]
    fn falls_back_to_margin_step() {
        let hal = Recorder::default();
        let mut latency = LatencyProfile::Fast;
        let mut r = report();
        manager().stabilize(&hal, LineQuality::Poor, &mut latency, &mut r);
        assert_eq!(hal.calls(), vec!["snr 85"]);
        assert_eq!(latency, LatencyProfile::Fast);
    }

    #[test]
    fn missing_inp_is_skipped_not_fatal() {
        let hal = Recorder {
            no_inp: true,
            ..Default::default()
        };
        let mut latency = LatencyProfile::Fast;
        let mut r = report();
        manager().stabilize(&hal, LineQuality::VeryPoor, &mut latency, &mut r);
        assert_eq!(hal.calls(), vec!["snr 120", "latency stable"]);
        assert_eq!(r.skipped, vec![Capability::Retransmission]);
    }

    #[test]
    fn healthy_quality_never_maps_to_profile() {
        let mut profiles = BTreeMap::new();
        profiles.insert(LineQuality::Good, ConservativeProfile::default());
        let m = StabilityManager::new(profiles, 0.5);
        assert!(m.profile_for(LineQuality::Good).is_none());
    }
}
