use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::line::SimulatedLine;

/// Margin at which the line sees exactly `crc_errors_per_tick`.
pub const REFERENCE_MARGIN_DB: f64 = 6.0;
/// Each dB of margin below the reference doubles the error rate.
pub const ERROR_RATE_DOUBLING_DB: f64 = 1.0;
const MAX_ERROR_RATE: f64 = 1.0e6;

/// Statistics of a reproducible line scenario.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub seed: u64,
    /// Mean CRC errors per tick at [`REFERENCE_MARGIN_DB`].
    pub crc_errors_per_tick: f64,
    pub burst_probability: f64,
    pub burst_errors: u64,
    pub drop_probability: f64,
    /// Ticks the link stays down after a drop.
    pub drop_ticks: u32,
    pub traffic_mbps: f64,
    pub traffic_jitter_mbps: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            seed: 1,
            crc_errors_per_tick: 0.5,
            burst_probability: 0.02,
            burst_errors: 40,
            drop_probability: 0.0,
            drop_ticks: 2,
            traffic_mbps: 2.0,
            traffic_jitter_mbps: 1.0,
        }
    }
}

/// What happened on the line during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickEvents {
    pub tick: u64,
    pub crc_increment: u64,
    pub link_up: bool,
    /// The link came back this tick after a drop.
    pub retrained: bool,
    pub traffic_mbps: f64,
}

/// Deterministic generator of CRC errors, link drops and traffic.
///
/// The error rate follows the line's SNR margin, so a controller that
/// trades margin for rate sees the consequence a few ticks later.
#[derive(Debug)]
pub struct LineScenario {
    cfg: ScenarioConfig,
    rng: StdRng,
    tick: u64,
    down_remaining: u32,
}

impl LineScenario {
    pub fn new(cfg: ScenarioConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng,
            tick: 0,
            down_remaining: 0,
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.cfg
    }

    /// Mean CRC errors per tick at the given margin.
    pub fn error_rate(&self, snr_margin_db: f64) -> f64 {
        let base = self.cfg.crc_errors_per_tick.max(0.0);
        let exponent = (REFERENCE_MARGIN_DB - snr_margin_db) / ERROR_RATE_DOUBLING_DB;
        (base * exponent.exp2()).min(MAX_ERROR_RATE)
    }

    /// Draws the next tick's events for a line at `snr_margin_db`.
    pub fn next_events(&mut self, snr_margin_db: f64) -> TickEvents {
        self.tick += 1;
        let traffic_mbps = self.draw_traffic();

        if self.down_remaining > 0 {
            self.down_remaining -= 1;
            let link_up = self.down_remaining == 0;
            return TickEvents {
                tick: self.tick,
                crc_increment: 0,
                link_up,
                retrained: link_up,
                traffic_mbps,
            };
        }

        if self.cfg.drop_ticks > 0 && self.chance(self.cfg.drop_probability) {
            self.down_remaining = self.cfg.drop_ticks;
            info!(tick = self.tick, ticks = self.cfg.drop_ticks, "simulated link drop");
            return TickEvents {
                tick: self.tick,
                crc_increment: 0,
                link_up: false,
                retrained: false,
                traffic_mbps,
            };
        }

        let mut crc_increment = self.draw_errors(self.error_rate(snr_margin_db));
        if self.chance(self.cfg.burst_probability) {
            debug!(tick = self.tick, errors = self.cfg.burst_errors, "error burst");
            crc_increment += self.cfg.burst_errors;
        }

        TickEvents {
            tick: self.tick,
            crc_increment,
            link_up: true,
            retrained: false,
            traffic_mbps,
        }
    }

    /// Advances the scenario by one tick and applies it to `line`.
    pub fn apply(&mut self, line: &SimulatedLine) -> TickEvents {
        let margin = line.with_model(|m| m.snr_margin_db);
        let events = self.next_events(margin);
        line.with_model(|m| {
            m.link_up = events.link_up;
            m.traffic_mbps = events.traffic_mbps;
            if events.retrained {
                m.crc_errors = 0;
                m.retrains += 1;
            }
            m.crc_errors = m.crc_errors.saturating_add(events.crc_increment);
        });
        events
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random::<f64>() < p
    }

    fn draw_errors(&mut self, lambda: f64) -> u64 {
        if lambda.is_nan() || lambda <= 0.0 {
            return 0;
        }
        match Poisson::new(lambda) {
            Ok(poisson) => poisson.sample(&mut self.rng) as u64,
            Err(e) => {
                warn!(lambda, error = %e, "error rate rejected");
                0
            }
        }
    }

    fn draw_traffic(&mut self) -> f64 {
        let jitter = self.cfg.traffic_jitter_mbps;
        let offset = if jitter > 0.0 {
            self.rng.random_range(-jitter..=jitter)
        } else {
            0.0
        };
        (self.cfg.traffic_mbps + offset).max(0.0)
    }
}
