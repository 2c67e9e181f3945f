//! Continuous narrowband interference: AM broadcast ingress and REIN
//! (repetitive electrical impulse noise at mains harmonics).

use tracing::debug;

use super::NarrowbandNoise;
use crate::numeric::{db_to_linear, guarded_div, linear_to_db, SILENT_PSD_DBM_HZ};
use crate::profile::ToneGrid;

/// One interfering broadcast station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmStation {
    pub frequency_hz: f64,
    /// Total power coupled into the loop (dBm).
    pub power_dbm: f64,
    /// Occupied bandwidth of the station (Hz).
    pub bandwidth_hz: f64,
}

/// Radio-frequency ingress from one or more AM stations.
#[derive(Debug, Clone, Default)]
pub struct AmRadioInterference {
    stations: Vec<AmStation>,
}

impl AmRadioInterference {
    pub fn new(stations: Vec<AmStation>) -> Self {
        AmRadioInterference { stations }
    }

    pub fn stations(&self) -> &[AmStation] {
        &self.stations
    }
}

impl NarrowbandNoise for AmRadioInterference {
    fn name(&self) -> &'static str {
        "am_radio"
    }

    fn noise_psd(&self, grid: &ToneGrid) -> Vec<f64> {
        let freqs = grid.frequencies();
        let mut psd_mw_hz = vec![0.0; freqs.len()];

        for station in &self.stations {
            let density = guarded_div(db_to_linear(station.power_dbm), station.bandwidth_hz);
            let half = station.bandwidth_hz.abs() / 2.0;
            let (lo, hi) = (station.frequency_hz - half, station.frequency_hz + half);

            let start = freqs.partition_point(|&f| f < lo);
            let end = freqs.partition_point(|&f| f <= hi);
            for slot in &mut psd_mw_hz[start..end] {
                *slot += density;
            }
            debug!(
                freq_hz = station.frequency_hz,
                tones = end - start,
                "applied AM station"
            );
        }

        to_dbm_hz(psd_mw_hz)
    }
}

/// Repetitive electrical impulse noise.
///
/// The impulse train repeats at `fundamental_hz`, so its spectrum is a comb
/// of lines at every harmonic up to the highest tone. Each line carries the
/// density `power_dbm / bandwidth_hz` integrated over one tone spacing and is
/// deposited on the tone closest to it; harmonics below the grid land on the
/// first tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rein {
    pub fundamental_hz: f64,
    pub power_dbm: f64,
    pub bandwidth_hz: f64,
}

impl Default for Rein {
    fn default() -> Self {
        Rein {
            fundamental_hz: 50.0,
            power_dbm: -60.0,
            bandwidth_hz: 1_000.0,
        }
    }
}

impl NarrowbandNoise for Rein {
    fn name(&self) -> &'static str {
        "rein"
    }

    fn noise_psd(&self, grid: &ToneGrid) -> Vec<f64> {
        let freqs = grid.frequencies();
        let mut psd_mw_hz = vec![0.0; freqs.len()];
        let Some(&top) = freqs.last() else {
            return psd_mw_hz;
        };
        if !self.fundamental_hz.is_finite() || self.fundamental_hz <= 0.0 {
            return to_dbm_hz(psd_mw_hz);
        }

        let line_mw_hz =
            guarded_div(db_to_linear(self.power_dbm), self.bandwidth_hz) * grid.spacing_hz();
        let harmonics = (top / self.fundamental_hz).floor() as u64;
        for h in 1..=harmonics {
            if let Some(pos) = grid.nearest_position(h as f64 * self.fundamental_hz) {
                psd_mw_hz[pos] += line_mw_hz;
            }
        }
        debug!(harmonics, "generated REIN comb");

        to_dbm_hz(psd_mw_hz)
    }
}

fn to_dbm_hz(psd_mw_hz: Vec<f64>) -> Vec<f64> {
    psd_mw_hz
        .into_iter()
        .map(|mw| if mw > 0.0 { linear_to_db(mw) } else { SILENT_PSD_DBM_HZ })
        .collect()
}
