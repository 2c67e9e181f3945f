//! # Channel & Capacity Engine
//!
//! Per-tone line model for a VDSL2 profile on a given cable:
//!
//! 1. **Attenuation** from the RLCG propagation constant
//!    $\gamma = \sqrt{(R + j\omega L)(G + j\omega C)}$, $\alpha = \Re(\gamma)$.
//! 2. **FEXT** from the 1 % worst-case, 49-disturber model scaled by
//!    $(n/49)^{0.6}$, loop length, $|H(f)|^2$ and $f^2$.
//! 3. **SNR** with background, FEXT and every registered noise source summed
//!    in the linear domain.
//! 4. **Bit-loading** with an SNR gap, capped at 15 bits per tone.
//!
//! The tone grid and cable constants are fixed at construction. The only
//! mutable state is the background noise profile, which is swapped
//! atomically so readers always see a complete vector.

use std::sync::Arc;

use arc_swap::ArcSwap;
use num_complex::Complex64;
use serde::Serialize;
use tracing::{debug, info, info_span, Span};

use crate::cable::CableParameters;
use crate::error::ChannelError;
use crate::noise::{NoiseSource, NoiseWindow};
use crate::numeric::{db_to_linear, linear_to_db, EPSILON};
use crate::profile::{Profile, ToneGrid};

/// Thermal background noise (dBm/Hz).
pub const FLAT_NOISE_FLOOR_DBM_HZ: f64 = -140.0;
/// Implementation loss plus target-BER margin (dB).
pub const DEFAULT_SNR_GAP_DB: f64 = 12.8;
/// VDSL2 constellation cap.
pub const MAX_BITS_PER_TONE: f64 = 15.0;
/// Relative attenuation change per °C away from 20 °C.
pub const TEMP_ATTENUATION_COEFF_PER_C: f64 = 0.002;
pub const REFERENCE_TEMPERATURE_C: f64 = 20.0;
/// Nepers to decibels.
pub const NEPER_TO_DB: f64 = 8.686;
/// 1 % worst-case FEXT coupling for 49 disturbers, per meter and Hz².
pub const FEXT_COUPLING_K: f64 = 5.0e-20;
pub const FEXT_REFERENCE_DISTURBERS: f64 = 49.0;
pub const FEXT_DISTURBER_EXPONENT: f64 = 0.6;
/// Flat NEXT level for a single disturber (dBm/Hz).
pub const NEXT_LEVEL_DBM_HZ: f64 = -80.0;
/// Loops shorter than this favour the upper bands.
pub const SHORT_LOOP_THRESHOLD_M: f64 = 500.0;

/// Operating point the SNR and bitrate calculations are evaluated at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineConditions {
    /// Loop length in meters.
    pub distance_m: f64,
    /// Crosstalking lines in the same binder.
    pub n_disturbers: u32,
    /// Ambient temperature in °C.
    pub temperature_c: f64,
    /// Observation window for impulsive noise, seconds.
    pub duration_sec: f64,
}

impl LineConditions {
    pub fn new(distance_m: f64) -> Self {
        LineConditions {
            distance_m,
            ..Default::default()
        }
    }

    pub fn disturbers(mut self, n: u32) -> Self {
        self.n_disturbers = n;
        self
    }

    pub fn temperature(mut self, celsius: f64) -> Self {
        self.temperature_c = celsius;
        self
    }

    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration_sec = seconds;
        self
    }
}

impl Default for LineConditions {
    fn default() -> Self {
        LineConditions {
            distance_m: 300.0,
            n_disturbers: 0,
            temperature_c: REFERENCE_TEMPERATURE_C,
            duration_sec: 1.0,
        }
    }
}

/// Which end of the spectrum a PSD shape favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    HighFrequency,
    LowFrequency,
}

/// Requested PSD level for one band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandPsd {
    pub start_hz: f64,
    pub end_hz: f64,
    pub psd_dbm_hz: f64,
}

/// Per-band PSD recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PsdShape {
    pub emphasis: Emphasis,
    /// Rate achievable with the flat mask at the requested distance (Mbps).
    pub achievable_rate_mbps: f64,
    pub bands: Vec<BandPsd>,
}

/// Conservative upstream power-boost ceiling for a line with the given
/// attenuation. Callers must never request more than this.
pub fn safe_power_boost_limit(attenuation_db: f64) -> f64 {
    if attenuation_db > 40.0 {
        5.0
    } else if attenuation_db > 20.0 {
        3.0
    } else {
        1.0
    }
}

/// Per-tone channel model for one profile on one cable.
pub struct CapacityEngine {
    profile: &'static Profile,
    cable: &'static CableParameters,
    grid: ToneGrid,
    background: ArcSwap<Vec<f64>>,
    sources: ArcSwap<Vec<NoiseSource>>,
    snr_gap_db: f64,
    span: Span,
}

impl CapacityEngine {
    /// Builds the engine for a profile ("17a") and cable model ("etsi_05mm").
    pub fn new(profile: &str, cable: &str) -> Result<Self, ChannelError> {
        let profile = Profile::by_name(profile)?;
        let cable = CableParameters::by_name(cable)?;
        let grid = ToneGrid::from_profile(profile);
        let span = info_span!("capacity", profile = profile.name, cable = cable.name);

        span.in_scope(|| {
            info!(tones = grid.len(), "initialized channel model");
        });

        Ok(CapacityEngine {
            profile,
            cable,
            background: ArcSwap::from_pointee(vec![FLAT_NOISE_FLOOR_DBM_HZ; grid.len()]),
            sources: ArcSwap::from_pointee(Vec::new()),
            grid,
            snr_gap_db: DEFAULT_SNR_GAP_DB,
            span,
        })
    }

    /// Routes this engine's events through `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_snr_gap(mut self, gap_db: f64) -> Self {
        if gap_db.is_finite() {
            self.snr_gap_db = gap_db;
        }
        self
    }

    pub fn profile(&self) -> &'static Profile {
        self.profile
    }

    pub fn cable(&self) -> &'static CableParameters {
        self.cable
    }

    pub fn tone_grid(&self) -> &ToneGrid {
        &self.grid
    }

    pub fn snr_gap_db(&self) -> f64 {
        self.snr_gap_db
    }

    /// Current background noise profile (dBm/Hz per tone).
    pub fn background_noise(&self) -> Arc<Vec<f64>> {
        self.background.load_full()
    }

    // ─── Noise state ────────────────────────────────────────────────────

    /// Replaces the background noise profile. A vector of the wrong length
    /// is rejected and the previous profile stays in place.
    pub fn update_background_noise(&self, new_profile: Vec<f64>) -> Result<(), ChannelError> {
        if new_profile.len() != self.grid.len() {
            return Err(ChannelError::ShapeMismatch {
                expected: self.grid.len(),
                actual: new_profile.len(),
            });
        }
        let sanitized = new_profile
            .into_iter()
            .map(|v| if v.is_finite() { v } else { FLAT_NOISE_FLOOR_DBM_HZ })
            .collect();
        self.background.store(Arc::new(sanitized));
        self.span.in_scope(|| debug!("background noise profile replaced"));
        Ok(())
    }

    /// Adds a noise source to every subsequent SNR evaluation.
    pub fn register_noise_source(&self, source: NoiseSource) -> Result<(), ChannelError> {
        source.check_grid(&self.grid)?;
        let name = source.name();
        self.sources.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(source.clone());
            next
        });
        self.span.in_scope(|| info!(source = name, "registered noise source"));
        Ok(())
    }

    /// Snapshot of the registered noise sources.
    pub fn noise_sources(&self) -> Arc<Vec<NoiseSource>> {
        self.sources.load_full()
    }

    pub fn noise_source_names(&self) -> Vec<&'static str> {
        self.sources.load().iter().map(|s| s.name()).collect()
    }

    // ─── Channel model ──────────────────────────────────────────────────

    /// Insertion loss per tone in dB.
    pub fn model_attenuation_per_tone(&self, distance_m: f64, temperature_c: f64) -> Vec<f64> {
        let distance = non_negative(distance_m);
        let temperature = if temperature_c.is_finite() {
            temperature_c
        } else {
            REFERENCE_TEMPERATURE_C
        };
        // Flat, frequency-independent temperature coupling.
        let temp_factor =
            (1.0 + TEMP_ATTENUATION_COEFF_PER_C * (temperature - REFERENCE_TEMPERATURE_C)).max(0.0);

        self.grid
            .frequencies()
            .iter()
            .map(|&f| self.attenuation_db_per_m(f) * distance * temp_factor)
            .collect()
    }

    /// α(f) in dB/m from the complex propagation constant.
    fn attenuation_db_per_m(&self, freq_hz: f64) -> f64 {
        let omega = 2.0 * std::f64::consts::PI * freq_hz;
        let series = Complex64::new(
            self.cable.resistance(freq_hz),
            omega * self.cable.inductance_h_per_m,
        );
        let shunt = Complex64::new(
            self.cable.conductance(freq_hz),
            omega * self.cable.capacitance_f_per_m,
        );
        let gamma = (series * shunt).sqrt();
        gamma.re.max(0.0) * NEPER_TO_DB
    }

    /// Far-end crosstalk PSD per tone in dBm/Hz.
    pub fn model_fext_noise_psd(&self, n_disturbers: u32, distance_m: f64) -> Vec<f64> {
        let attenuation = self.model_attenuation_per_tone(distance_m, REFERENCE_TEMPERATURE_C);
        self.fext_from_attenuation(n_disturbers, distance_m, &attenuation)
    }

    fn fext_from_attenuation(
        &self,
        n_disturbers: u32,
        distance_m: f64,
        attenuation_db: &[f64],
    ) -> Vec<f64> {
        let distance = non_negative(distance_m);
        let scale = FEXT_COUPLING_K
            * (n_disturbers as f64 / FEXT_REFERENCE_DISTURBERS).powf(FEXT_DISTURBER_EXPONENT)
            * distance;
        let mask = self.profile.psd_mask_dbm_hz;

        self.grid
            .frequencies()
            .iter()
            .zip(attenuation_db)
            .map(|(&f, &att)| {
                let h_squared = db_to_linear(-att);
                let coupling = scale * h_squared * f * f;
                mask + 10.0 * (coupling.max(0.0) + EPSILON).log10()
            })
            .collect()
    }

    /// Near-end crosstalk PSD per tone in dBm/Hz. Flat in frequency; the
    /// FDD band plan keeps it out of the SNR budget.
    pub fn model_next_noise_psd(&self, n_disturbers: u32) -> Vec<f64> {
        let level_mw = db_to_linear(NEXT_LEVEL_DBM_HZ)
            * (n_disturbers as f64).powf(FEXT_DISTURBER_EXPONENT);
        vec![linear_to_db(level_mw); self.grid.len()]
    }

    /// SNR per tone in dB.
    pub fn calculate_snr_per_tone(&self, conditions: &LineConditions) -> Vec<f64> {
        let spacing = self.grid.spacing_hz();
        let tx_dbm_per_tone = self.profile.psd_mask_dbm_hz + linear_to_db(spacing);

        let attenuation =
            self.model_attenuation_per_tone(conditions.distance_m, conditions.temperature_c);
        let fext =
            self.fext_from_attenuation(conditions.n_disturbers, conditions.distance_m, &attenuation);
        let background = self.background.load();

        // Total noise in mW/Hz, accumulated in the linear domain.
        let mut noise_mw_hz: Vec<f64> = background
            .iter()
            .zip(&fext)
            .map(|(&bg, &fx)| db_to_linear(bg) + db_to_linear(fx))
            .collect();

        let window = NoiseWindow {
            symbol_rate: self.profile.symbol_rate,
            duration_sec: non_negative(conditions.duration_sec),
        };
        for source in self.sources.load().iter() {
            let contribution = source.contribution(&self.grid, window);
            for (acc, psd) in noise_mw_hz.iter_mut().zip(contribution) {
                *acc += db_to_linear(psd);
            }
        }

        attenuation
            .iter()
            .zip(&noise_mw_hz)
            .map(|(&att, &noise)| {
                let rx_dbm = tx_dbm_per_tone - att;
                let noise_dbm = linear_to_db(noise * spacing);
                rx_dbm - noise_dbm
            })
            .collect()
    }

    /// Shannon bit-loading with the SNR gap, one entry per active tone.
    pub fn bits_per_tone(&self, conditions: &LineConditions) -> Vec<f64> {
        let gap_linear = db_to_linear(self.snr_gap_db);
        self.calculate_snr_per_tone(conditions)
            .into_iter()
            .map(|snr_db| {
                let effective = db_to_linear(snr_db) / gap_linear;
                if effective > 0.0 {
                    (1.0 + effective).log2().clamp(0.0, MAX_BITS_PER_TONE)
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Maximum attainable net rate in Mbps, rounded to two decimals.
    pub fn calculate_max_bitrate(&self, conditions: &LineConditions) -> f64 {
        let total_bits: f64 = self.bits_per_tone(conditions).iter().sum();
        let mbps = total_bits * self.grid.spacing_hz() / 1_000_000.0;
        let rounded = (mbps * 100.0).round() / 100.0;
        self.span.in_scope(|| {
            debug!(
                distance_m = conditions.distance_m,
                disturbers = conditions.n_disturbers,
                mbps = rounded,
                "computed max bitrate"
            );
        });
        rounded
    }

    /// See [`safe_power_boost_limit`].
    pub fn get_safe_power_boost_limit(&self, attenuation_db: f64) -> f64 {
        safe_power_boost_limit(attenuation_db)
    }

    /// Heuristic per-band PSD recommendation.
    ///
    /// Short loops (< 500 m) keep the upper bands at the mask and back off
    /// the lower ones; long loops do the opposite. The back-off is 6 dB when
    /// the flat mask already reaches `target_rate_mbps`, otherwise 3 dB.
    pub fn generate_optimal_psd_shape(&self, target_rate_mbps: f64, distance_m: f64) -> PsdShape {
        let achievable = self.calculate_max_bitrate(&LineConditions::new(distance_m));
        let depth_db = if achievable >= target_rate_mbps { 6.0 } else { 3.0 };
        let emphasis = if non_negative(distance_m) < SHORT_LOOP_THRESHOLD_M {
            Emphasis::HighFrequency
        } else {
            Emphasis::LowFrequency
        };

        let bands = self.shaping_bands();
        let last = bands.len().saturating_sub(1).max(1) as f64;
        let mask = self.profile.psd_mask_dbm_hz;
        let shaped: Vec<BandPsd> = bands
            .iter()
            .enumerate()
            .map(|(i, &(start_hz, end_hz))| {
                let position = i as f64 / last;
                let backoff = match emphasis {
                    Emphasis::HighFrequency => depth_db * (1.0 - position),
                    Emphasis::LowFrequency => depth_db * position,
                };
                BandPsd {
                    start_hz,
                    end_hz,
                    psd_dbm_hz: mask - backoff,
                }
            })
            .collect();

        self.span.in_scope(|| {
            info!(
                target_mbps = target_rate_mbps,
                achievable_mbps = achievable,
                ?emphasis,
                "generated PSD shape"
            );
        });

        PsdShape {
            emphasis,
            achievable_rate_mbps: achievable,
            bands: shaped,
        }
    }

    /// Profile bands, with a single wide band split into three.
    fn shaping_bands(&self) -> Vec<(f64, f64)> {
        let bands = self.profile.frequency_bands;
        match bands {
            [(start, end)] => {
                let width = (end - start) / 3.0;
                (0..3)
                    .map(|i| (start + width * i as f64, start + width * (i + 1) as f64))
                    .collect()
            }
            _ => bands.to_vec(),
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::{AmRadioInterference, AmStation};

    fn engine() -> CapacityEngine {
        CapacityEngine::new("17a", "etsi_05mm").unwrap()
    }

    // ─── Construction ───────────────────────────────────────────────────

    #[test]
    fn rejects_unknown_names() {
        assert!(matches!(
            CapacityEngine::new("8b", "etsi_05mm"),
            Err(ChannelError::Configuration { kind: "profile", .. })
        ));
        assert!(matches!(
            CapacityEngine::new("17a", "copper"),
            Err(ChannelError::Configuration {
                kind: "cable model",
                ..
            })
        ));
    }

    #[test]
    fn background_starts_flat_and_sized_to_grid() {
        let e = engine();
        let bg = e.background_noise();
        assert_eq!(bg.len(), e.tone_grid().len());
        assert!(bg.iter().all(|&v| v == FLAT_NOISE_FLOOR_DBM_HZ));
    }

    // ─── Attenuation ────────────────────────────────────────────────────

    #[test]
    fn attenuation_increases_with_distance() {
        let e = engine();
        let near = e.model_attenuation_per_tone(200.0, 20.0);
        let far = e.model_attenuation_per_tone(800.0, 20.0);
        assert!(near.iter().zip(&far).all(|(a, b)| a < b));
    }

    #[test]
    fn attenuation_increases_with_frequency() {
        let att = engine().model_attenuation_per_tone(500.0, 20.0);
        assert!(att.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn attenuation_at_top_of_17a_is_realistic() {
        let att = engine().model_attenuation_per_tone(300.0, 20.0);
        let top = *att.last().unwrap();
        assert!(top > 15.0 && top < 30.0, "got {top}");
    }

    #[test]
    fn warmer_cable_loses_more() {
        let e = engine();
        let cold = e.model_attenuation_per_tone(400.0, 0.0);
        let hot = e.model_attenuation_per_tone(400.0, 40.0);
        for (c, h) in cold.iter().zip(&hot) {
            // Same ratio on every tone: the coupling is frequency independent.
            assert!((h / c - 1.04 / 0.96).abs() < 1e-9);
        }
    }

    #[test]
    fn negative_distance_is_clamped() {
        let att = engine().model_attenuation_per_tone(-10.0, 20.0);
        assert!(att.iter().all(|&a| a == 0.0));
    }

    // ─── Crosstalk ──────────────────────────────────────────────────────

    #[test]
    fn fext_grows_with_disturbers() {
        let e = engine();
        let few = e.model_fext_noise_psd(2, 300.0);
        let many = e.model_fext_noise_psd(20, 300.0);
        assert!(few.iter().zip(&many).all(|(a, b)| a < b));
    }

    #[test]
    fn fext_without_disturbers_is_epsilon_floor() {
        let fext = engine().model_fext_noise_psd(0, 300.0);
        assert!(fext.iter().all(|v| v.is_finite() && *v < -200.0));
    }

    #[test]
    fn next_scales_with_disturbers() {
        let e = engine();
        let one = e.model_next_noise_psd(1)[0];
        assert!((one - NEXT_LEVEL_DBM_HZ).abs() < 1e-9);
        assert!(e.model_next_noise_psd(10)[0] > one);
    }

    // ─── SNR and bit-loading ────────────────────────────────────────────

    #[test]
    fn bits_stay_within_bounds() {
        let e = engine();
        for &d in &[50.0, 300.0, 1500.0, 5000.0] {
            let bits = e.bits_per_tone(&LineConditions::new(d).disturbers(25));
            assert_eq!(bits.len(), e.tone_grid().len());
            assert!(bits.iter().all(|&b| (0.0..=MAX_BITS_PER_TONE).contains(&b)));
        }
    }

    #[test]
    fn reference_loop_rate_in_expected_range() {
        let rate = engine().calculate_max_bitrate(&LineConditions::new(300.0).disturbers(10));
        assert!(rate > 85.0 && rate < 110.0, "got {rate} Mbps");
    }

    #[test]
    fn rate_is_rounded_to_two_decimals() {
        let rate = engine().calculate_max_bitrate(&LineConditions::new(450.0).disturbers(3));
        assert!(((rate * 100.0).round() - rate * 100.0).abs() < 1e-6);
    }

    #[test]
    fn rate_non_increasing_in_disturbers_and_distance() {
        let e = engine();
        let mut prev = f64::INFINITY;
        for n in [0, 1, 5, 10, 30, 49] {
            let r = e.calculate_max_bitrate(&LineConditions::new(400.0).disturbers(n));
            assert!(r <= prev, "n={n}: {r} > {prev}");
            prev = r;
        }
        let mut prev = f64::INFINITY;
        for d in [100.0, 300.0, 600.0, 1000.0, 2000.0] {
            let r = e.calculate_max_bitrate(&LineConditions::new(d).disturbers(10));
            assert!(r <= prev, "d={d}: {r} > {prev}");
            prev = r;
        }
    }

    #[test]
    fn higher_gap_lowers_rate() {
        let cond = LineConditions::new(300.0).disturbers(10);
        let base = engine().calculate_max_bitrate(&cond);
        let strict = engine().with_snr_gap(15.8).calculate_max_bitrate(&cond);
        assert!(strict < base);
    }

    #[test]
    fn noise_source_lowers_snr_on_affected_tones() {
        let e = engine();
        let cond = LineConditions::new(300.0).disturbers(5);
        let before = e.calculate_snr_per_tone(&cond);
        e.register_noise_source(
            AmRadioInterference::new(vec![AmStation {
                frequency_hz: 1_500_000.0,
                power_dbm: -30.0,
                bandwidth_hz: 9_000.0,
            }])
            .into(),
        )
        .unwrap();
        assert_eq!(e.noise_source_names(), vec!["am_radio"]);
        let after = e.calculate_snr_per_tone(&cond);
        let pos = e.tone_grid().nearest_position(1_500_000.0).unwrap();
        assert!(after[pos] < before[pos] - 10.0);
        assert!((after[0] - before[0]).abs() < 1e-3);
    }

    // ─── Background noise updates ───────────────────────────────────────

    #[test]
    fn mismatched_background_is_rejected_and_kept() {
        let e = engine();
        let original = e.background_noise();
        let err = e.update_background_noise(vec![-120.0; 10]).unwrap_err();
        assert_eq!(
            err,
            ChannelError::ShapeMismatch {
                expected: e.tone_grid().len(),
                actual: 10
            }
        );
        assert_eq!(*e.background_noise(), *original);
    }

    #[test]
    fn raised_background_lowers_rate() {
        let e = engine();
        let cond = LineConditions::new(300.0).disturbers(10);
        let before = e.calculate_max_bitrate(&cond);
        e.update_background_noise(vec![-100.0; e.tone_grid().len()])
            .unwrap();
        assert!(e.calculate_max_bitrate(&cond) < before);
    }

    // ─── Power boost and PSD shaping ────────────────────────────────────

    #[test]
    fn power_boost_tiers() {
        assert_eq!(safe_power_boost_limit(45.0), 5.0);
        assert_eq!(safe_power_boost_limit(40.0), 3.0);
        assert_eq!(safe_power_boost_limit(25.0), 3.0);
        assert_eq!(safe_power_boost_limit(20.0), 1.0);
        assert_eq!(safe_power_boost_limit(f64::NAN), 1.0);
    }

    #[test]
    fn short_loop_favours_high_bands() {
        let shape = engine().generate_optimal_psd_shape(100.0, 300.0);
        assert_eq!(shape.emphasis, Emphasis::HighFrequency);
        assert_eq!(shape.bands.len(), 3);
        assert!(shape.bands[0].psd_dbm_hz < shape.bands[2].psd_dbm_hz);
        assert_eq!(shape.bands[2].psd_dbm_hz, -40.0);
    }

    #[test]
    fn long_loop_favours_low_bands() {
        let shape = engine().generate_optimal_psd_shape(20.0, 1200.0);
        assert_eq!(shape.emphasis, Emphasis::LowFrequency);
        assert_eq!(shape.bands[0].psd_dbm_hz, -40.0);
        assert!(shape.bands[2].psd_dbm_hz < shape.bands[0].psd_dbm_hz);
    }

    #[test]
    fn single_band_profile_is_split() {
        let e = CapacityEngine::new("35b", "awg24").unwrap();
        let shape = e.generate_optimal_psd_shape(150.0, 200.0);
        assert_eq!(shape.bands.len(), 3);
        assert!((shape.bands[2].end_hz - 35_328e3).abs() < 1.0);
    }
}
