//! # Simulated Line
//!
//! A [`DslHal`] backed by the channel model instead of a modem. The line
//! state lives behind one mutex so a scenario can inject CRC errors, link
//! drops and traffic while the controller drives it. Every HAL call is
//! recorded for inspection.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use copperline_channel::{CapacityEngine, Measurement};
use copperline_sra::{Capability, DslHal, HalError, LatencyProfile, LineStats, TrafficMonitor};
use serde::Serialize;
use tracing::debug;

use crate::config::LineConfig;

/// Mutable modem state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineModel {
    pub link_up: bool,
    pub crc_errors: u64,
    pub snr_margin_db: f64,
    pub latency_profile: LatencyProfile,
    pub power_boost_db: f64,
    pub bitswap: bool,
    pub interleaving: bool,
    /// Impulse noise protection, in DMT symbols.
    pub inp: u8,
    pub traffic_mbps: f64,
    pub retrains: u64,
}

/// One HAL call as the simulated modem saw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HalCall {
    pub method: &'static str,
    pub argument: Option<String>,
}

impl HalCall {
    fn new(method: &'static str, argument: impl ToString) -> Self {
        HalCall {
            method,
            argument: Some(argument.to_string()),
        }
    }

    fn bare(method: &'static str) -> Self {
        HalCall {
            method,
            argument: None,
        }
    }
}

pub struct SimulatedLine {
    engine: Arc<CapacityEngine>,
    distance_m: f64,
    temperature_c: f64,
    disabled: HashSet<Capability>,
    /// QLN levels (dBm/Hz) that replace the modelled floor on given tones.
    qln_overrides: BTreeMap<u32, f64>,
    /// Extra attenuation (dB) added to the modelled Hlog on given tones.
    hlog_offsets: BTreeMap<u32, f64>,
    model: Mutex<LineModel>,
    calls: Mutex<Vec<HalCall>>,
}

impl SimulatedLine {
    pub fn new(engine: Arc<CapacityEngine>, config: &LineConfig) -> Self {
        SimulatedLine {
            engine,
            distance_m: config.distance_m,
            temperature_c: config.temperature_c,
            disabled: config.disabled_capabilities.iter().copied().collect(),
            qln_overrides: config.qln_overrides.clone(),
            hlog_offsets: config.hlog_offsets.clone(),
            model: Mutex::new(LineModel {
                link_up: true,
                crc_errors: 0,
                snr_margin_db: config.initial_snr_margin_db,
                latency_profile: LatencyProfile::Stable,
                power_boost_db: 0.0,
                bitswap: false,
                interleaving: LatencyProfile::Stable.interleaving(),
                inp: LatencyProfile::Stable.inp(),
                traffic_mbps: 0.0,
                retrains: 0,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &Arc<CapacityEngine> {
        &self.engine
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    /// Runs `f` with exclusive access to the line state.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut LineModel) -> R) -> R {
        f(&mut self.lock_model())
    }

    pub fn model(&self) -> LineModel {
        self.lock_model().clone()
    }

    /// Drains the recorded HAL calls.
    pub fn take_calls(&self) -> Vec<HalCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Modelled Hlog (positive dB attenuation) for every active tone.
    pub fn hlog(&self) -> Measurement {
        let att = self
            .engine
            .model_attenuation_per_tone(self.distance_m, self.temperature_c);
        self.engine
            .tone_grid()
            .indices()
            .iter()
            .zip(att)
            .map(|(&tone, db)| (tone, db + self.hlog_offsets.get(&tone).copied().unwrap_or(0.0)))
            .collect()
    }

    /// Quiet line noise: the engine's background profile with overrides.
    pub fn qln(&self) -> Measurement {
        let background = self.engine.background_noise();
        self.engine
            .tone_grid()
            .indices()
            .iter()
            .zip(background.iter())
            .map(|(&tone, &db)| (tone, self.qln_overrides.get(&tone).copied().unwrap_or(db)))
            .collect()
    }

    /// Mean modelled attenuation over the grid, as a modem reports LATN.
    pub fn loop_attenuation_db(&self) -> f64 {
        let att = self
            .engine
            .model_attenuation_per_tone(self.distance_m, self.temperature_c);
        if att.is_empty() {
            return 0.0;
        }
        att.iter().sum::<f64>() / att.len() as f64
    }

    fn lock_model(&self) -> MutexGuard<'_, LineModel> {
        self.model.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log(&self, call: HalCall) {
        debug!(method = call.method, argument = ?call.argument, "HAL call");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn gate(&self, capability: Capability) -> Result<(), HalError> {
        if self.disabled.contains(&capability) {
            Err(HalError::NotSupported(capability))
        } else {
            Ok(())
        }
    }
}

impl DslHal for SimulatedLine {
    fn supports(&self, capability: Capability) -> bool {
        !self.disabled.contains(&capability)
    }

    fn get_line_stats(&self) -> Result<LineStats, HalError> {
        let crc_errors = self.lock_model().crc_errors;
        let att = self.loop_attenuation_db();
        Ok(LineStats {
            crc_errors,
            downstream_attenuation_db: Some(att),
            upstream_attenuation_db: None,
        })
    }

    fn get_link_status(&self) -> Result<String, HalError> {
        let up = self.lock_model().link_up;
        Ok(if up { "Showtime" } else { "Down" }.to_string())
    }

    fn get_snr_margin(&self) -> Result<Option<f64>, HalError> {
        let m = self.lock_model();
        Ok(m.link_up.then_some(m.snr_margin_db))
    }

    fn set_snr_margin(&self, tenths_db: i32) -> Result<bool, HalError> {
        self.log(HalCall::new("set_snr_margin", tenths_db));
        self.lock_model().snr_margin_db = tenths_db as f64 / 10.0;
        Ok(true)
    }

    fn set_latency_profile(&self, profile: LatencyProfile) -> Result<bool, HalError> {
        self.log(HalCall::new("set_latency_profile", profile));
        let mut m = self.lock_model();
        m.latency_profile = profile;
        m.interleaving = profile.interleaving();
        m.inp = profile.inp();
        Ok(true)
    }

    fn control_bitswap(&self, enabled: bool) -> Result<bool, HalError> {
        self.gate(Capability::Bitswap)?;
        self.log(HalCall::new("control_bitswap", enabled));
        self.lock_model().bitswap = enabled;
        Ok(true)
    }

    fn set_upstream_power_boost(&self, db: f64) -> Result<bool, HalError> {
        self.gate(Capability::PowerBoost)?;
        self.log(HalCall::new("set_upstream_power_boost", db));
        self.lock_model().power_boost_db = db;
        Ok(true)
    }

    fn force_renegotiation(&self) -> Result<bool, HalError> {
        self.gate(Capability::Renegotiation)?;
        self.log(HalCall::bare("force_renegotiation"));
        let mut m = self.lock_model();
        m.retrains += 1;
        // A retrain clears the modem's counters.
        m.crc_errors = 0;
        Ok(true)
    }

    fn set_retransmission_level(&self, inp: u8) -> Result<bool, HalError> {
        self.gate(Capability::Retransmission)?;
        self.log(HalCall::new("set_retransmission_level", inp));
        self.lock_model().inp = inp;
        Ok(true)
    }

    fn get_qln_data(&self) -> Result<Option<Measurement>, HalError> {
        self.gate(Capability::Qln)?;
        Ok(self.lock_model().link_up.then(|| self.qln()))
    }

    fn get_hlog_data(&self) -> Result<Option<Measurement>, HalError> {
        self.gate(Capability::Hlog)?;
        Ok(self.lock_model().link_up.then(|| self.hlog()))
    }
}

impl TrafficMonitor for SimulatedLine {
    fn traffic_mbps(&self) -> f64 {
        self.lock_model().traffic_mbps
    }
}
