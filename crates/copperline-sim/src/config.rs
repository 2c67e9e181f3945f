//! Simulation configuration, loaded from TOML.
//!
//! ```toml
//! ticks = 120
//!
//! [engine]
//! profile = "17a"
//! cable = "etsi_05mm"
//!
//! [line]
//! distance_m = 450.0
//! disturbers = 10
//! disabled_capabilities = ["power_boost"]
//!
//! [[noise.am_stations]]
//! frequency_hz = 1_000_000.0
//! power_dbm = -60.0
//! bandwidth_hz = 10_000.0
//!
//! [scenario]
//! seed = 7
//! traffic_mbps = 80.0
//!
//! [sra]
//! crc_error_threshold = 20
//! ```

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use copperline_channel::noise::{
    AmRadioInterference, AmStation, ImpulseNoise, ImpulseNoiseConfig, Rein,
};
use copperline_channel::{CapacityEngine, NoiseSource};
use copperline_sra::{Capability, SraConfig, SraConfigInput};
use serde::Deserialize;

use crate::scenario::ScenarioConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfigInput {
    pub ticks: Option<u64>,
    pub engine: EngineConfigInput,
    pub line: LineConfigInput,
    pub noise: NoiseConfigInput,
    pub scenario: ScenarioConfig,
    pub sra: SraConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfigInput {
    pub profile: Option<String>,
    pub cable: Option<String>,
    pub snr_gap_db: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LineConfigInput {
    pub distance_m: Option<f64>,
    pub disturbers: Option<u32>,
    pub temperature_c: Option<f64>,
    pub initial_snr_margin_db: Option<f64>,
    pub disabled_capabilities: Vec<Capability>,
    /// Tones whose QLN reads at a fixed level (dBm/Hz).
    pub qln_overrides: Vec<ToneValue>,
    /// Tones with extra Hlog attenuation (dB).
    pub hlog_offsets: Vec<ToneValue>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ToneValue {
    pub tone: u32,
    pub db: f64,
}

fn tone_map(values: Vec<ToneValue>) -> BTreeMap<u32, f64> {
    values.into_iter().map(|v| (v.tone, v.db)).collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NoiseConfigInput {
    pub am_stations: Vec<AmStationInput>,
    pub rein: Option<ReinInput>,
    pub impulse: Option<ImpulseInput>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AmStationInput {
    pub frequency_hz: f64,
    pub power_dbm: f64,
    pub bandwidth_hz: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReinInput {
    pub fundamental_hz: f64,
    pub power_dbm: f64,
    pub bandwidth_hz: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ImpulseInput {
    pub arrival_rate_per_sec: f64,
    pub min_amplitude_mv: f64,
    pub max_amplitude_mv: f64,
    pub min_duration_us: f64,
    pub max_duration_us: f64,
}

// ─── Resolved ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub profile: String,
    pub cable: String,
    pub snr_gap_db: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            profile: "17a".into(),
            cable: "etsi_05mm".into(),
            snr_gap_db: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineConfig {
    pub distance_m: f64,
    pub disturbers: u32,
    pub temperature_c: f64,
    pub initial_snr_margin_db: f64,
    pub disabled_capabilities: Vec<Capability>,
    pub qln_overrides: BTreeMap<u32, f64>,
    pub hlog_offsets: BTreeMap<u32, f64>,
}

impl Default for LineConfig {
    fn default() -> Self {
        LineConfig {
            distance_m: 300.0,
            disturbers: 10,
            temperature_c: 20.0,
            initial_snr_margin_db: 9.0,
            disabled_capabilities: Vec::new(),
            qln_overrides: BTreeMap::new(),
            hlog_offsets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub ticks: u64,
    pub engine: EngineConfig,
    pub line: LineConfig,
    pub noise: NoiseConfigInput,
    pub scenario: ScenarioConfig,
    pub sra: SraConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            ticks: 60,
            engine: EngineConfig::default(),
            line: LineConfig::default(),
            noise: NoiseConfigInput::default(),
            scenario: ScenarioConfig::default(),
            sra: SraConfig::default(),
        }
    }
}

impl SimConfigInput {
    pub fn resolve(self) -> Result<SimConfig> {
        let d = SimConfig::default();

        let line = LineConfig {
            distance_m: self.line.distance_m.unwrap_or(d.line.distance_m),
            disturbers: self.line.disturbers.unwrap_or(d.line.disturbers),
            temperature_c: self.line.temperature_c.unwrap_or(d.line.temperature_c),
            initial_snr_margin_db: self
                .line
                .initial_snr_margin_db
                .unwrap_or(d.line.initial_snr_margin_db),
            disabled_capabilities: self.line.disabled_capabilities,
            qln_overrides: tone_map(self.line.qln_overrides),
            hlog_offsets: tone_map(self.line.hlog_offsets),
        };
        if !line.distance_m.is_finite() || line.distance_m < 0.0 {
            bail!("line.distance_m must be >= 0, got {}", line.distance_m);
        }
        if !line.temperature_c.is_finite() {
            bail!("line.temperature_c must be finite");
        }

        let s = &self.scenario;
        for (name, p) in [
            ("burst_probability", s.burst_probability),
            ("drop_probability", s.drop_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                bail!("scenario.{name} must be within [0, 1], got {p}");
            }
        }

        let sra = self.sra.resolve().context("invalid [sra] section")?;

        Ok(SimConfig {
            ticks: self.ticks.unwrap_or(d.ticks),
            engine: EngineConfig {
                profile: self.engine.profile.unwrap_or(d.engine.profile),
                cable: self.engine.cable.unwrap_or(d.engine.cable),
                snr_gap_db: self.engine.snr_gap_db,
            },
            line,
            noise: self.noise,
            scenario: self.scenario,
            sra,
        })
    }
}

impl SimConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(SimConfig::default());
        }
        let parsed: SimConfigInput = toml::from_str(input).context("malformed simulation TOML")?;
        parsed.resolve()
    }

    /// Builds the capacity engine with every configured noise source.
    pub fn build_engine(&self) -> Result<CapacityEngine> {
        let mut engine = CapacityEngine::new(&self.engine.profile, &self.engine.cable)
            .context("unknown profile or cable")?;
        if let Some(gap) = self.engine.snr_gap_db {
            engine = engine.with_snr_gap(gap);
        }

        if !self.noise.am_stations.is_empty() {
            let stations = self
                .noise
                .am_stations
                .iter()
                .map(|s| AmStation {
                    frequency_hz: s.frequency_hz,
                    power_dbm: s.power_dbm,
                    bandwidth_hz: s.bandwidth_hz,
                })
                .collect();
            engine
                .register_noise_source(NoiseSource::narrowband(AmRadioInterference::new(stations)))
                .context("registering AM ingress")?;
        }

        if let Some(r) = self.noise.rein {
            let defaults = Rein::default();
            let rein = Rein {
                fundamental_hz: r.fundamental_hz,
                power_dbm: r.power_dbm,
                bandwidth_hz: r.bandwidth_hz.unwrap_or(defaults.bandwidth_hz),
            };
            engine
                .register_noise_source(NoiseSource::narrowband(rein))
                .context("registering REIN")?;
        }

        if let Some(i) = self.noise.impulse {
            let cfg = ImpulseNoiseConfig {
                arrival_rate_per_sec: i.arrival_rate_per_sec,
                min_amplitude_mv: i.min_amplitude_mv,
                max_amplitude_mv: i.max_amplitude_mv,
                min_duration_us: i.min_duration_us,
                max_duration_us: i.max_duration_us,
            };
            let impulse = ImpulseNoise::with_seed(cfg, self.scenario.seed);
            engine
                .register_noise_source(NoiseSource::wideband(impulse))
                .context("registering impulse noise")?;
        }

        Ok(engine)
    }
}
