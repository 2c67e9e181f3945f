//! # Noise Source Models
//!
//! Pluggable generators that contribute a per-tone noise PSD (dBm/Hz) on top
//! of the background noise profile. Sources come in two capability shapes:
//!
//! | Shape       | Inputs                          | Models                 |
//! |-------------|---------------------------------|------------------------|
//! | Wideband    | tone grid + observation window  | [`ImpulseNoise`], [`Shine`] |
//! | Narrowband  | tone grid only                  | [`AmRadioInterference`], [`Rein`] |
//!
//! The capacity engine holds a list of [`NoiseSource`] values and dispatches
//! on the variant; it never needs to know the concrete model.

mod impulse;
mod narrowband;

use std::fmt;
use std::sync::Arc;

use crate::error::ChannelError;
use crate::profile::ToneGrid;

pub use impulse::{ImpulseNoise, ImpulseNoiseConfig, Shine};
pub use narrowband::{AmRadioInterference, AmStation, Rein};

/// Observation window handed to wideband sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseWindow {
    /// DMT symbols per second.
    pub symbol_rate: f64,
    /// Length of the observation in seconds.
    pub duration_sec: f64,
}

impl NoiseWindow {
    /// Number of whole DMT symbols inside the window.
    pub fn symbols(&self) -> u64 {
        (self.duration_sec.max(0.0) * self.symbol_rate.max(0.0)) as u64
    }
}

/// Noise whose level depends on how long the line is observed.
pub trait WidebandNoise: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Rejects a source that cannot produce a vector for `grid`.
    fn check_grid(&self, _grid: &ToneGrid) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Per-tone PSD in dBm/Hz over `window`.
    fn noise_psd(&self, grid: &ToneGrid, window: NoiseWindow) -> Vec<f64>;
}

/// Continuous interference that only depends on frequency.
pub trait NarrowbandNoise: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Per-tone PSD in dBm/Hz.
    fn noise_psd(&self, grid: &ToneGrid) -> Vec<f64>;
}

/// A registered noise contribution.
#[derive(Debug, Clone)]
pub enum NoiseSource {
    Wideband(Arc<dyn WidebandNoise>),
    Narrowband(Arc<dyn NarrowbandNoise>),
}

impl NoiseSource {
    pub fn wideband(source: impl WidebandNoise + 'static) -> Self {
        NoiseSource::Wideband(Arc::new(source))
    }

    pub fn narrowband(source: impl NarrowbandNoise + 'static) -> Self {
        NoiseSource::Narrowband(Arc::new(source))
    }

    pub fn name(&self) -> &'static str {
        match self {
            NoiseSource::Wideband(s) => s.name(),
            NoiseSource::Narrowband(s) => s.name(),
        }
    }

    pub fn check_grid(&self, grid: &ToneGrid) -> Result<(), ChannelError> {
        match self {
            NoiseSource::Wideband(s) => s.check_grid(grid),
            NoiseSource::Narrowband(_) => Ok(()),
        }
    }

    /// Per-tone contribution in dBm/Hz for `grid`.
    pub fn contribution(&self, grid: &ToneGrid, window: NoiseWindow) -> Vec<f64> {
        match self {
            NoiseSource::Wideband(s) => s.noise_psd(grid, window),
            NoiseSource::Narrowband(s) => s.noise_psd(grid),
        }
    }
}

impl From<ImpulseNoise> for NoiseSource {
    fn from(source: ImpulseNoise) -> Self {
        NoiseSource::wideband(source)
    }
}

impl From<Shine> for NoiseSource {
    fn from(source: Shine) -> Self {
        NoiseSource::wideband(source)
    }
}

impl From<AmRadioInterference> for NoiseSource {
    fn from(source: AmRadioInterference) -> Self {
        NoiseSource::narrowband(source)
    }
}

impl From<Rein> for NoiseSource {
    fn from(source: Rein) -> Self {
        NoiseSource::narrowband(source)
    }
}
