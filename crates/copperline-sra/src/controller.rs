//! # SRA Controller
//!
//! Ticked state machine that keeps a DSL line in showtime while trading
//! margin for rate (or power) when the line allows it.
//!
//! Each [`SraController::tick`] runs one sequential pass:
//!
//! 1. **Cooldown**: ticks shortly after a link drop only produce a report.
//! 2. **Link**: a down line counts a disconnect, reverts to the last stable
//!    snapshot, forces `Stable` and starts a cooldown.
//! 3. **Telemetry**: new CRC errors since the previous tick and, if
//!    configured, QLN/Hlog anomaly counts. A counter that went backwards was
//!    reset by a retrain, so its whole value is new.
//! 4. **Classify** into a [`LineQuality`] and decide the next [`SraState`].
//! 5. **Latency**: `stable` under errors, `fast` once every tick for longer
//!    than the optimization window was error free; pushed only on change.
//! 6. **Act** for the state: stabilise, probe for rate, or save power.
//!
//! ```text
//!            degraded                     clean > window, traffic high
//!   Stable ───────────▶ Unstable          Stable ──────────────▶ OptimizingUp
//!     ▲                    │              Stable ──────────────▶ PowerSaving
//!     └────── recovered ───┘                   clean > window, traffic low
//! ```
//!
//! No single failed modem call aborts a tick; every outcome lands in the
//! returned [`TickReport`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use copperline_channel::capacity::safe_power_boost_limit;
use copperline_channel::{LineDiagnostics, Measurement};
use quanta::{Clock, Instant};
use tracing::{debug, info, info_span, warn, Span};

use crate::config::SraConfig;
use crate::error::HalError;
use crate::hal::{is_link_up, Capability, DslHal, LineStats, TrafficMonitor};
use crate::report::{optional, record, tenths_db, Action, TickReport};
use crate::stability::StabilityManager;
use crate::state::{ConfigSnapshot, LatencyProfile, LineQuality, SraState};

/// Longest uninterrupted sleep inside [`SraController::run_for`].
const WAIT_SLICE: Duration = Duration::from_millis(50);

pub struct SraController {
    hal: Arc<dyn DslHal>,
    traffic: Option<Arc<dyn TrafficMonitor>>,
    diagnostics: Option<LineDiagnostics>,
    stability: StabilityManager,
    config: SraConfig,
    clock: Clock,
    span: Span,

    state: SraState,
    line_quality: LineQuality,
    stable_since: Instant,
    /// Start of the current run of error-free ticks.
    clean_since: Instant,
    last_crc_errors: Option<u64>,
    power_boost_db: f64,
    latency_profile: LatencyProfile,
    snapshot: Option<ConfigSnapshot>,
    disconnect_events: u64,
    cooldown_until: Option<Instant>,
    attenuation_db: Option<f64>,
    ticks: u64,
}

impl SraController {
    pub fn new(hal: Arc<dyn DslHal>, config: SraConfig) -> Self {
        let clock = Clock::new();
        let stable_since = clock.now();
        let stability =
            StabilityManager::new(config.conservative.clone(), config.snr_increase_step_db);
        SraController {
            hal,
            traffic: None,
            diagnostics: None,
            stability,
            clock,
            span: info_span!("sra"),
            state: SraState::Stable,
            line_quality: LineQuality::Good,
            stable_since,
            clean_since: stable_since,
            last_crc_errors: None,
            power_boost_db: 0.0,
            latency_profile: config.initial_latency_profile,
            snapshot: None,
            disconnect_events: 0,
            cooldown_until: None,
            attenuation_db: None,
            ticks: 0,
            config,
        }
    }

    pub fn with_traffic_monitor(mut self, monitor: Arc<dyn TrafficMonitor>) -> Self {
        self.traffic = Some(monitor);
        self
    }

    /// Enables QLN (and, with a known loop length, Hlog) checks each tick.
    pub fn with_diagnostics(mut self, diagnostics: LineDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Replaces the time source; the stable timer restarts on it.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.stable_since = clock.now();
        self.clean_since = self.stable_since;
        self.clock = clock;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.stability = self.stability.with_span(span.clone());
        self.span = span;
        self
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn state(&self) -> SraState {
        self.state
    }

    pub fn line_quality(&self) -> LineQuality {
        self.line_quality
    }

    pub fn stable_since(&self) -> Instant {
        self.stable_since
    }

    pub fn power_boost_db(&self) -> f64 {
        self.power_boost_db
    }

    pub fn latency_profile(&self) -> LatencyProfile {
        self.latency_profile
    }

    pub fn snapshot(&self) -> Option<&ConfigSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn disconnect_events(&self) -> u64 {
        self.disconnect_events
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn config(&self) -> &SraConfig {
        &self.config
    }

    // ─── Loop ───────────────────────────────────────────────────────────

    /// Ticks every monitoring interval until `duration` has passed or
    /// `cancel` is set. Cancellation is observed before each tick and
    /// throughout each wait.
    pub fn run_for(&mut self, duration: Duration, cancel: &AtomicBool) -> Vec<TickReport> {
        let deadline = Instant::now() + duration;
        let mut reports = Vec::new();
        self.span.in_scope(|| info!(?duration, "starting SRA loop"));

        while !cancel.load(Ordering::Relaxed) && Instant::now() < deadline {
            reports.push(self.tick());
            let wake = (Instant::now() + self.config.monitoring_interval).min(deadline);
            loop {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let now = Instant::now();
                if now >= wake {
                    break;
                }
                thread::sleep(wake.saturating_duration_since(now).min(WAIT_SLICE));
            }
        }

        self.span
            .in_scope(|| info!(ticks = reports.len(), "SRA loop finished"));
        reports
    }

    /// One read → decide → act pass.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let span = self.span.clone();
        let _enter = span.enter();
        let now = self.clock.now();
        let mut report = TickReport::new(
            self.ticks,
            self.state,
            self.line_quality,
            self.latency_profile,
        );

        if let Some(until) = self.cooldown_until {
            if now < until {
                debug!("post-disconnect cooldown, skipping tick");
                report.in_cooldown = true;
                return self.finish(report);
            }
            self.cooldown_until = None;
        }

        match self.hal.get_link_status() {
            Ok(status) if is_link_up(&status) => {}
            Ok(status) => {
                self.on_link_down(now, &status, &mut report);
                return self.finish(report);
            }
            Err(e) => {
                warn!(error = %e, "link status unavailable, skipping tick");
                report.fail(format!("get_link_status: {e}"));
                return self.finish(report);
            }
        }

        let stats = match self.hal.get_line_stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "line stats unavailable, assuming unstable");
                report.fail(format!("get_line_stats: {e}"));
                None
            }
        };

        let quality = match stats {
            Some(stats) => {
                report.new_crc_errors = self.observe(&stats);
                self.run_diagnostics(&mut report);
                self.classify(&report)
            }
            None => LineQuality::Poor,
        };
        self.line_quality = quality;

        let previous = self.state;
        self.state = self.next_state(previous, quality, now);
        if self.state != previous {
            info!(from = %previous, to = %self.state, ?quality, "state transition");
        }
        if self.state.is_optimizing() && !previous.is_optimizing() {
            self.take_snapshot();
        }

        self.update_latency(report.new_crc_errors, now, &mut report);
        self.act(&mut report);
        self.finish(report)
    }

    fn finish(&self, mut report: TickReport) -> TickReport {
        report.state = self.state;
        report.line_quality = self.line_quality;
        report.disconnect_events = self.disconnect_events;
        report.power_boost_db = self.power_boost_db;
        report.latency_profile = self.latency_profile;
        debug!(
            tick = report.tick,
            state = %report.state,
            quality = ?report.line_quality,
            new_crc_errors = report.new_crc_errors,
            actions = report.actions.len(),
            "tick complete"
        );
        report
    }

    // ─── Decide ─────────────────────────────────────────────────────────

    /// New CRC errors since the previous observation.
    fn observe(&mut self, stats: &LineStats) -> u64 {
        let new_errors = match self.last_crc_errors {
            Some(previous) if stats.crc_errors >= previous => stats.crc_errors - previous,
            Some(previous) => {
                debug!(previous, current = stats.crc_errors, "CRC counter reset");
                stats.crc_errors
            }
            None => 0,
        };
        self.last_crc_errors = Some(stats.crc_errors);
        if let Some(att) = stats
            .upstream_attenuation_db
            .or(stats.downstream_attenuation_db)
        {
            self.attenuation_db = Some(att);
        }
        new_errors
    }

    fn run_diagnostics(&self, report: &mut TickReport) {
        let Some(diagnostics) = &self.diagnostics else {
            return;
        };
        let cfg = &self.config.diagnostics;

        if let Some(qln) = self.fetch(Capability::Qln, report, |h| h.get_qln_data()) {
            match diagnostics.analyze_qln(&qln, cfg.qln_margin_db) {
                Ok(result) => report.qln_anomalies = Some(result.anomaly_count),
                Err(e) => debug!(error = %e, "QLN analysis skipped"),
            }
        }

        let Some(distance_m) = cfg.estimated_distance_m else {
            return;
        };
        if let Some(hlog) = self.fetch(Capability::Hlog, report, |h| h.get_hlog_data()) {
            match diagnostics.analyze_hlog(&hlog, distance_m, cfg.hlog_threshold_db) {
                Ok(result) => report.hlog_anomalies = Some(result.anomaly_count),
                Err(e) => debug!(error = %e, "Hlog analysis skipped"),
            }
        }
    }

    fn fetch(
        &self,
        capability: Capability,
        report: &mut TickReport,
        read: impl FnOnce(&dyn DslHal) -> Result<Option<Measurement>, HalError>,
    ) -> Option<Measurement> {
        if !self.hal.supports(capability) {
            report.skip(capability);
            return None;
        }
        match read(&*self.hal) {
            Ok(data) => data,
            Err(HalError::NotSupported(c)) => {
                report.skip(c);
                None
            }
            Err(e) => {
                warn!(%capability, error = %e, "measurement read failed");
                report.fail(format!("{capability}: {e}"));
                None
            }
        }
    }

    fn classify(&self, report: &TickReport) -> LineQuality {
        let threshold = self.config.crc_error_threshold;
        let limits = &self.config.diagnostics;
        let new_errors = report.new_crc_errors;
        let anomalous = report
            .qln_anomalies
            .is_some_and(|n| n > limits.qln_anomaly_limit)
            || report
                .hlog_anomalies
                .is_some_and(|n| n > limits.hlog_anomaly_limit);

        if new_errors > threshold.saturating_mul(2) {
            LineQuality::VeryPoor
        } else if new_errors > threshold || anomalous {
            LineQuality::Poor
        } else if new_errors == 0 {
            LineQuality::Excellent
        } else {
            LineQuality::Good
        }
    }

    fn next_state(&mut self, previous: SraState, quality: LineQuality, now: Instant) -> SraState {
        if quality.is_degraded() {
            if previous != SraState::Unstable {
                warn!(?quality, "line has become unstable");
            }
            self.stable_since = now;
            return SraState::Unstable;
        }

        if previous == SraState::Unstable {
            info!("line has stabilised");
            self.stable_since = now;
        }

        if self.stable_for(now) <= self.config.stable_time_for_optimization {
            return SraState::Stable;
        }

        let Some(traffic) = &self.traffic else {
            return SraState::Stable;
        };
        let mbps = traffic.traffic_mbps();
        if mbps > self.config.traffic_threshold_mbps {
            SraState::OptimizingUp
        } else if mbps < self.config.low_traffic_threshold_mbps {
            SraState::PowerSaving
        } else {
            SraState::Stable
        }
    }

    fn stable_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stable_since)
    }

    fn take_snapshot(&mut self) {
        let snr_margin_db = match self.hal.get_snr_margin() {
            Ok(margin) => margin,
            Err(e) => {
                warn!(error = %e, "SNR margin unreadable while snapshotting");
                None
            }
        };
        let snapshot = ConfigSnapshot {
            snr_margin_db,
            latency_profile: self.latency_profile,
            power_boost_db: self.power_boost_db,
        };
        info!(?snapshot, "saved last stable configuration");
        self.snapshot = Some(snapshot);
    }

    fn update_latency(&mut self, new_errors: u64, now: Instant, report: &mut TickReport) {
        if new_errors > 0 || self.state == SraState::Unstable {
            self.clean_since = now;
        }
        let window = self.config.stable_time_for_optimization;
        let wanted = if self.state == SraState::Unstable
            || new_errors > self.config.latency_error_threshold
        {
            LatencyProfile::Stable
        } else if now.saturating_duration_since(self.clean_since) > window
            && self.stable_for(now) > window
        {
            LatencyProfile::Fast
        } else {
            return;
        };

        if wanted != self.latency_profile {
            info!(from = %self.latency_profile, to = %wanted, "switching latency profile");
            if record(
                report,
                Action::SetLatencyProfile { profile: wanted },
                self.hal.set_latency_profile(wanted),
            ) {
                self.latency_profile = wanted;
            }
        }
    }

    // ─── Act ────────────────────────────────────────────────────────────

    fn act(&mut self, report: &mut TickReport) {
        if self.state == SraState::Unstable {
            self.stability.stabilize(
                &*self.hal,
                self.line_quality,
                &mut self.latency_profile,
                report,
            );
            return;
        }

        optional(
            &*self.hal,
            report,
            Capability::Bitswap,
            Action::EnableBitswap,
            |h| h.control_bitswap(true),
        );

        match self.state {
            SraState::OptimizingUp => {
                self.step_margin(-self.config.snr_decrease_step_db, report);
                self.set_power_boost(self.power_boost_db + self.config.power_boost_step_db, report);
            }
            SraState::PowerSaving => {
                self.step_margin(self.config.snr_increase_step_db, report);
                self.set_power_boost(self.power_boost_db - self.config.power_boost_step_db, report);
            }
            SraState::Stable | SraState::Unstable => debug!("no adjustment"),
        }
    }

    /// Moves the SNR margin by `delta_db`; a successful downward probe may
    /// force a retrain so the new rate takes effect.
    fn step_margin(&mut self, delta_db: f64, report: &mut TickReport) {
        let current = match self.hal.get_snr_margin() {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!("modem reported no SNR margin");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read SNR margin");
                report.fail(format!("get_snr_margin: {e}"));
                return;
            }
        };

        let target = (current + delta_db).max(0.0);
        info!(current_db = current, target_db = target, "adjusting SNR margin");
        let tenths = tenths_db(target);
        let accepted = record(
            report,
            Action::SetSnrMargin { tenths_db: tenths },
            self.hal.set_snr_margin(tenths),
        );

        if accepted
            && delta_db < 0.0
            && self.config.force_retrain_on_optimize
            && optional(
                &*self.hal,
                report,
                Capability::Renegotiation,
                Action::ForceRenegotiation,
                |h| h.force_renegotiation(),
            )
        {
            // Training restarts the counter; count from zero.
            self.last_crc_errors = Some(0);
        }
    }

    /// Upper bound for the upstream power boost on this line.
    pub fn power_boost_ceiling(&self) -> f64 {
        match self.attenuation_db {
            Some(att) => self.config.max_power_boost_db.min(safe_power_boost_limit(att)),
            None => self.config.max_power_boost_db,
        }
    }

    fn set_power_boost(&mut self, requested_db: f64, report: &mut TickReport) {
        let target = requested_db.clamp(0.0, self.power_boost_ceiling());
        if (target - self.power_boost_db).abs() < 1e-9 {
            return;
        }
        info!(from_db = self.power_boost_db, to_db = target, "adjusting upstream power boost");
        if optional(
            &*self.hal,
            report,
            Capability::PowerBoost,
            Action::SetPowerBoost { db: target },
            |h| h.set_upstream_power_boost(target),
        ) {
            self.power_boost_db = target;
        }
    }

    // ─── Link loss ──────────────────────────────────────────────────────

    fn on_link_down(&mut self, now: Instant, status: &str, report: &mut TickReport) {
        self.disconnect_events += 1;
        warn!(
            status,
            disconnect_events = self.disconnect_events,
            "link down, reverting to last stable configuration"
        );
        report.link_down = true;

        self.revert(report);
        self.state = SraState::Stable;
        self.stable_since = now;
        self.clean_since = now;
        // Counters restart with the next training.
        self.last_crc_errors = Some(0);
        self.cooldown_until = Some(now + self.config.cooldown());
    }

    fn revert(&mut self, report: &mut TickReport) {
        let Some(snapshot) = self.snapshot else {
            debug!("no stable snapshot, nothing to revert");
            return;
        };

        if let Some(margin_db) = snapshot.snr_margin_db {
            let tenths = tenths_db(margin_db);
            record(
                report,
                Action::SetSnrMargin { tenths_db: tenths },
                self.hal.set_snr_margin(tenths),
            );
        }

        let profile = snapshot.latency_profile;
        if record(
            report,
            Action::SetLatencyProfile { profile },
            self.hal.set_latency_profile(profile),
        ) {
            self.latency_profile = profile;
        }

        let boost = snapshot.power_boost_db.clamp(0.0, self.power_boost_ceiling());
        if optional(
            &*self.hal,
            report,
            Capability::PowerBoost,
            Action::SetPowerBoost { db: boost },
            |h| h.set_upstream_power_boost(boost),
        ) {
            self.power_boost_db = boost;
        }
    }
}
