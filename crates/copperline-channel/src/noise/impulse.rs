//! Impulsive noise: Poisson-arriving rectangular bursts, and SHINE (a
//! stationary floor with impulse noise on top).

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use tracing::{debug, warn};

use super::{NoiseWindow, WidebandNoise};
use crate::error::ChannelError;
use crate::numeric::{db_to_linear, guarded_div, linear_to_db, SILENT_PSD_DBM_HZ};
use crate::profile::ToneGrid;

/// Statistics of the impulse process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseNoiseConfig {
    /// Mean number of impulses per second.
    pub arrival_rate_per_sec: f64,
    pub min_amplitude_mv: f64,
    pub max_amplitude_mv: f64,
    pub min_duration_us: f64,
    pub max_duration_us: f64,
}

impl Default for ImpulseNoiseConfig {
    fn default() -> Self {
        ImpulseNoiseConfig {
            arrival_rate_per_sec: 0.1,
            min_amplitude_mv: 5.0,
            max_amplitude_mv: 50.0,
            min_duration_us: 10.0,
            max_duration_us: 100.0,
        }
    }
}

impl ImpulseNoiseConfig {
    /// Orders the min/max pairs and clamps negatives to zero.
    fn normalized(mut self) -> Self {
        self.arrival_rate_per_sec = self.arrival_rate_per_sec.max(0.0);
        let (lo, hi) = ordered(self.min_amplitude_mv, self.max_amplitude_mv);
        self.min_amplitude_mv = lo;
        self.max_amplitude_mv = hi;
        let (lo, hi) = ordered(self.min_duration_us, self.max_duration_us);
        self.min_duration_us = lo;
        self.max_duration_us = hi;
        self
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    let (a, b) = (a.max(0.0), b.max(0.0));
    if a <= b { (a, b) } else { (b, a) }
}

/// Impulse noise with Poisson arrivals and uniformly drawn amplitude and
/// duration per burst. The energy of all bursts in a window is spread
/// evenly over the window and the occupied bandwidth (flat spectrum).
#[derive(Debug)]
pub struct ImpulseNoise {
    config: ImpulseNoiseConfig,
    rng: Mutex<StdRng>,
}

impl ImpulseNoise {
    pub fn new(config: ImpulseNoiseConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Reproducible impulse sequence.
    pub fn with_seed(config: ImpulseNoiseConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ImpulseNoiseConfig, rng: StdRng) -> Self {
        ImpulseNoise {
            config: config.normalized(),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &ImpulseNoiseConfig {
        &self.config
    }

    /// Flat impulse PSD (dBm/Hz) over `bandwidth_hz` for one window draw.
    fn draw_psd_dbm_hz(&self, bandwidth_hz: f64, window: NoiseWindow) -> Option<f64> {
        let cfg = &self.config;
        let lambda = cfg.arrival_rate_per_sec * window.duration_sec.max(0.0);
        if lambda <= 0.0 {
            return None;
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let drawn = match Poisson::new(lambda) {
            Ok(poisson) => poisson.sample(&mut *rng) as u64,
            Err(e) => {
                warn!(lambda, error = %e, "impulse arrival rate rejected");
                return None;
            }
        };
        // At most one burst per DMT symbol.
        let count = drawn.min(window.symbols());
        if count == 0 {
            return None;
        }

        let mut energy_mj = 0.0;
        for _ in 0..count {
            let amplitude_v =
                rng.random_range(cfg.min_amplitude_mv..=cfg.max_amplitude_mv) / 1000.0;
            let duration_s = rng.random_range(cfg.min_duration_us..=cfg.max_duration_us) / 1e6;
            // Rectangular pulse into 1 Ω.
            energy_mj += amplitude_v * amplitude_v * duration_s * 1000.0;
        }

        let avg_power_mw = guarded_div(energy_mj, window.duration_sec);
        let psd = linear_to_db(guarded_div(avg_power_mw, bandwidth_hz));
        debug!(impulses = count, psd_dbm_hz = psd, "impulse noise drawn");
        Some(psd)
    }
}

impl WidebandNoise for ImpulseNoise {
    fn name(&self) -> &'static str {
        "impulse"
    }

    fn noise_psd(&self, grid: &ToneGrid, window: NoiseWindow) -> Vec<f64> {
        let level = self
            .draw_psd_dbm_hz(grid.span_hz(), window)
            .unwrap_or(SILENT_PSD_DBM_HZ);
        vec![level; grid.len()]
    }
}

/// Stationary and non-stationary hybrid impulse noise.
#[derive(Debug)]
pub struct Shine {
    stationary_psd_dbm_hz: Vec<f64>,
    impulse: ImpulseNoise,
}

impl Shine {
    pub fn new(stationary_psd_dbm_hz: Vec<f64>, impulse: ImpulseNoise) -> Self {
        Shine {
            stationary_psd_dbm_hz,
            impulse,
        }
    }

    pub fn stationary_psd(&self) -> &[f64] {
        &self.stationary_psd_dbm_hz
    }
}

impl WidebandNoise for Shine {
    fn name(&self) -> &'static str {
        "shine"
    }

    fn check_grid(&self, grid: &ToneGrid) -> Result<(), ChannelError> {
        if self.stationary_psd_dbm_hz.len() != grid.len() {
            return Err(ChannelError::ShapeMismatch {
                expected: grid.len(),
                actual: self.stationary_psd_dbm_hz.len(),
            });
        }
        Ok(())
    }

    fn noise_psd(&self, grid: &ToneGrid, window: NoiseWindow) -> Vec<f64> {
        let impulse_mw = self
            .impulse
            .draw_psd_dbm_hz(grid.span_hz(), window)
            .map(db_to_linear)
            .unwrap_or(0.0);

        (0..grid.len())
            .map(|i| {
                let stationary = self
                    .stationary_psd_dbm_hz
                    .get(i)
                    .copied()
                    .unwrap_or(SILENT_PSD_DBM_HZ);
                linear_to_db(db_to_linear(stationary) + impulse_mw)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;

    fn grid() -> ToneGrid {
        ToneGrid::from_profile(Profile::by_name("17a").unwrap())
    }

    fn window(duration_sec: f64) -> NoiseWindow {
        NoiseWindow {
            symbol_rate: 4000.0,
            duration_sec,
        }
    }

    #[test]
    fn zero_rate_is_silent() {
        let cfg = ImpulseNoiseConfig {
            arrival_rate_per_sec: 0.0,
            ..Default::default()
        };
        let noise = ImpulseNoise::with_seed(cfg, 1);
        let psd = noise.noise_psd(&grid(), window(10.0));
        assert!(psd.iter().all(|&v| v == SILENT_PSD_DBM_HZ));
    }

    #[test]
    fn busy_line_produces_flat_finite_psd() {
        let cfg = ImpulseNoiseConfig {
            arrival_rate_per_sec: 50.0,
            ..Default::default()
        };
        let noise = ImpulseNoise::with_seed(cfg, 42);
        let psd = noise.noise_psd(&grid(), window(10.0));
        assert!(psd[0] > SILENT_PSD_DBM_HZ);
        assert!(psd[0].is_finite());
        assert!(psd.iter().all(|&v| v == psd[0]));
    }

    #[test]
    fn same_seed_same_draw() {
        let cfg = ImpulseNoiseConfig {
            arrival_rate_per_sec: 5.0,
            ..Default::default()
        };
        let a = ImpulseNoise::with_seed(cfg, 9).noise_psd(&grid(), window(4.0));
        let b = ImpulseNoise::with_seed(cfg, 9).noise_psd(&grid(), window(4.0));
        assert_eq!(a, b);
    }

    #[test]
    fn bursts_capped_by_symbol_count() {
        // 1 ms window holds 4 symbols; a huge arrival rate cannot exceed that.
        let cfg = ImpulseNoiseConfig {
            arrival_rate_per_sec: 1e6,
            min_amplitude_mv: 10.0,
            max_amplitude_mv: 10.0,
            min_duration_us: 100.0,
            max_duration_us: 100.0,
        };
        let noise = ImpulseNoise::with_seed(cfg, 3);
        let g = grid();
        let psd = noise.noise_psd(&g, window(0.001));
        // 4 bursts × (0.01 V)² × 100 µs × 1000 = 4e-5 mJ over 1 ms → 0.04 mW
        let expected = linear_to_db(0.04 / g.span_hz());
        assert!((psd[0] - expected).abs() < 1e-9, "{} vs {}", psd[0], expected);
    }

    #[test]
    fn inverted_bounds_are_reordered() {
        let cfg = ImpulseNoiseConfig {
            min_amplitude_mv: 50.0,
            max_amplitude_mv: 5.0,
            ..Default::default()
        }
        .normalized();
        assert!(cfg.min_amplitude_mv <= cfg.max_amplitude_mv);
    }

    #[test]
    fn shine_never_below_stationary_floor() {
        let g = grid();
        let stationary = vec![-120.0; g.len()];
        let cfg = ImpulseNoiseConfig {
            arrival_rate_per_sec: 20.0,
            ..Default::default()
        };
        let shine = Shine::new(stationary, ImpulseNoise::with_seed(cfg, 5));
        shine.check_grid(&g).unwrap();
        let psd = shine.noise_psd(&g, window(5.0));
        assert_eq!(psd.len(), g.len());
        assert!(psd.iter().all(|&v| v >= -120.0 - 1e-9));
    }

    #[test]
    fn shine_rejects_wrong_length() {
        let g = grid();
        let shine = Shine::new(vec![-120.0; 3], ImpulseNoise::with_seed(Default::default(), 1));
        assert!(matches!(
            shine.check_grid(&g),
            Err(ChannelError::ShapeMismatch { actual: 3, .. })
        ));
    }
}
