//! # copperline-sim
//!
//! Closed-loop simulation of the SRA controller against a modelled line.
//!
//! ## Crate structure
//!
//! - [`line`] — [`SimulatedLine`], a HAL backed by the capacity engine
//! - [`scenario`] — Seeded CRC errors, link drops and traffic
//! - [`config`] — TOML configuration for engine, line, noise and controller
//!
//! A [`Simulation`] runs on a mocked clock: each step applies one scenario
//! tick to the line, ticks the controller and advances time by one
//! monitoring interval, so hours of line time run in milliseconds.

pub mod config;
pub mod line;
pub mod scenario;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use copperline_channel::capacity::LineConditions;
use copperline_channel::diagnostics::{BridgedTapReport, LoadingCoilReport};
use copperline_channel::LineDiagnostics;
use copperline_sra::{SraController, TickReport};
use quanta::{Clock, Mock};
use serde::Serialize;
use tracing::{info, info_span};

pub use config::SimConfig;
pub use line::{HalCall, LineModel, SimulatedLine};
pub use scenario::{LineScenario, ScenarioConfig, TickEvents};

/// Upper bound on the steps reserved up front by [`Simulation::run`].
const MAX_PREALLOCATED_STEPS: u64 = 4096;

/// Static picture of the line before the controller starts.
#[derive(Debug, Clone, Serialize)]
pub struct LineSummary {
    pub profile: &'static str,
    pub cable: &'static str,
    pub distance_m: f64,
    pub disturbers: u32,
    pub predicted_bitrate_mbps: f64,
    pub noise_sources: Vec<&'static str>,
    pub loading_coils: LoadingCoilReport,
    pub bridged_taps: BridgedTapReport,
}

/// One simulated tick: what the line did, and what the controller did.
#[derive(Debug, Clone, Serialize)]
pub struct SimStep {
    pub events: TickEvents,
    pub report: TickReport,
    pub model: LineModel,
}

pub struct Simulation {
    line: Arc<SimulatedLine>,
    diagnostics: LineDiagnostics,
    scenario: LineScenario,
    controller: SraController,
    mock: Arc<Mock>,
    interval: Duration,
    disturbers: u32,
    temperature_c: f64,
}

impl Simulation {
    pub fn new(config: &SimConfig) -> Result<Self> {
        let engine = Arc::new(config.build_engine()?);
        let line = Arc::new(SimulatedLine::new(engine.clone(), &config.line));
        let diagnostics = LineDiagnostics::new(engine);

        let (clock, mock) = Clock::mock();
        let controller = SraController::new(line.clone(), config.sra.clone())
            .with_clock(clock)
            .with_traffic_monitor(line.clone())
            .with_diagnostics(diagnostics.clone())
            .with_span(info_span!("sra", distance_m = config.line.distance_m));

        Ok(Simulation {
            line,
            diagnostics,
            scenario: LineScenario::new(config.scenario.clone()),
            controller,
            mock,
            interval: config.sra.monitoring_interval,
            disturbers: config.line.disturbers,
            temperature_c: config.line.temperature_c,
        })
    }

    pub fn line(&self) -> &Arc<SimulatedLine> {
        &self.line
    }

    pub fn controller(&self) -> &SraController {
        &self.controller
    }

    /// Predicted bitrate and physical-layer checks on the modelled Hlog.
    pub fn summary(&self) -> Result<LineSummary> {
        let engine = self.line.engine();
        let distance_m = self.line.distance_m();
        let conditions = LineConditions::new(distance_m)
            .disturbers(self.disturbers)
            .temperature(self.temperature_c)
            .duration(self.interval.as_secs_f64());
        let hlog = self.line.hlog();

        Ok(LineSummary {
            profile: engine.profile().name,
            cable: engine.cable().name,
            distance_m,
            disturbers: self.disturbers,
            predicted_bitrate_mbps: engine.calculate_max_bitrate(&conditions),
            noise_sources: engine.noise_source_names(),
            loading_coils: self.diagnostics.detect_loading_coils(&hlog)?,
            bridged_taps: self.diagnostics.detect_bridged_taps(&hlog)?,
        })
    }

    /// Applies one scenario tick, ticks the controller, advances the clock.
    pub fn step(&mut self) -> SimStep {
        let events = self.scenario.apply(&self.line);
        let report = self.controller.tick();
        self.mock.increment(self.interval);
        SimStep {
            events,
            report,
            model: self.line.model(),
        }
    }

    /// Runs up to `ticks` steps, stopping early once `cancel` is set.
    pub fn run(&mut self, ticks: u64, cancel: &AtomicBool) -> Vec<SimStep> {
        let mut steps = Vec::with_capacity(ticks.min(MAX_PREALLOCATED_STEPS) as usize);
        for _ in 0..ticks {
            if cancel.load(Ordering::Relaxed) {
                info!(completed = steps.len(), "simulation cancelled");
                break;
            }
            steps.push(self.step());
        }
        steps
    }
}
