//! # VDSL2 Profiles and Tone Grid
//!
//! Each profile fixes the usable frequency bands, the DMT tone spacing and a
//! (flat, simplified) transmit PSD mask. The [`ToneGrid`] built from it is the
//! frequency axis every per-tone vector in this crate is indexed by.
//!
//! | Profile | Bands (MHz)                          | Mask (dBm/Hz) | Tones |
//! |---------|--------------------------------------|---------------|-------|
//! | 17a     | 0.138–3.75, 5.2–8.5, 12.0–17.4       | −40           | 4096  |
//! | 35b     | 0.138–35.328                         | −50           | 8192  |

use std::fmt;

use crate::error::ChannelError;

/// DMT subcarrier spacing shared by the 17a and 35b profiles.
pub const TONE_SPACING_HZ: f64 = 4312.5;

/// DMT symbol rate (symbols per second).
pub const SYMBOL_RATE: f64 = 4000.0;

/// Static description of a VDSL2 profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    /// Profile name as used on the CLI and in configuration ("17a").
    pub name: &'static str,
    /// Active frequency bands `(start_hz, end_hz)`, ascending.
    pub frequency_bands: &'static [(f64, f64)],
    /// Tone spacing in Hz.
    pub tone_spacing_hz: f64,
    /// Size of the IFFT tone space; no active tone index reaches it.
    pub total_tones: u32,
    /// Flat transmit PSD mask in dBm/Hz.
    pub psd_mask_dbm_hz: f64,
    /// DMT symbols per second.
    pub symbol_rate: f64,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bands, {:.1} dBm/Hz)",
            self.name,
            self.frequency_bands.len(),
            self.psd_mask_dbm_hz
        )
    }
}

pub const VDSL2_PROFILES: &[Profile] = &[
    Profile {
        name: "17a",
        frequency_bands: &[(138e3, 3750e3), (5200e3, 8500e3), (12000e3, 17400e3)],
        tone_spacing_hz: TONE_SPACING_HZ,
        total_tones: 4096,
        psd_mask_dbm_hz: -40.0,
        symbol_rate: SYMBOL_RATE,
    },
    Profile {
        name: "35b",
        frequency_bands: &[(138e3, 35328e3)],
        tone_spacing_hz: TONE_SPACING_HZ,
        total_tones: 8192,
        psd_mask_dbm_hz: -50.0,
        symbol_rate: SYMBOL_RATE,
    },
];

impl Profile {
    /// Looks up a profile by name.
    pub fn by_name(name: &str) -> Result<&'static Profile, ChannelError> {
        VDSL2_PROFILES
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ChannelError::Configuration {
                kind: "profile",
                name: name.to_string(),
                valid: Self::names(),
            })
    }

    /// Names of every supported profile.
    pub fn names() -> Vec<&'static str> {
        VDSL2_PROFILES.iter().map(|p| p.name).collect()
    }
}

/// Ordered, immutable set of active subcarriers for a profile.
///
/// Tone index `i` sits at `i × spacing` Hz. Index 0 (DC) is never active.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneGrid {
    indices: Vec<u32>,
    frequencies: Vec<f64>,
    spacing_hz: f64,
}

impl ToneGrid {
    pub fn from_profile(profile: &Profile) -> Self {
        let spacing = profile.tone_spacing_hz;
        let mut indices: Vec<u32> = Vec::new();
        for &(start_hz, end_hz) in profile.frequency_bands {
            let first = (start_hz / spacing).floor().max(1.0) as u32;
            let last = ((end_hz / spacing).floor() as u32).min(profile.total_tones - 1);
            indices.extend(first..=last);
        }
        indices.sort_unstable();
        indices.dedup();

        let frequencies = indices.iter().map(|&i| i as f64 * spacing).collect();
        ToneGrid {
            indices,
            frequencies,
            spacing_hz: spacing,
        }
    }

    /// Number of active tones.
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Active tone frequencies in Hz, ascending.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Active tone indices, ascending and parallel to [`frequencies`](Self::frequencies).
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn spacing_hz(&self) -> f64 {
        self.spacing_hz
    }

    /// Position of a tone index within the grid.
    pub fn position_of(&self, tone: u32) -> Option<usize> {
        self.indices.binary_search(&tone).ok()
    }

    /// Position of the active tone closest to `freq_hz`.
    pub fn nearest_position(&self, freq_hz: f64) -> Option<usize> {
        if self.frequencies.is_empty() {
            return None;
        }
        let idx = self.frequencies.partition_point(|&f| f < freq_hz);
        let candidates = [idx.checked_sub(1), (idx < self.frequencies.len()).then_some(idx)];
        candidates.into_iter().flatten().min_by(|&a, &b| {
            let da = (self.frequencies[a] - freq_hz).abs();
            let db = (self.frequencies[b] - freq_hz).abs();
            da.total_cmp(&db)
        })
    }

    /// Occupied bandwidth from the lowest to the highest active tone.
    pub fn span_hz(&self) -> f64 {
        match (self.frequencies.first(), self.frequencies.last()) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_lists_valid_names() {
        let err = Profile::by_name("99z").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("17a") && msg.contains("35b"), "{msg}");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(Profile::by_name("35B").unwrap().name, "35b");
    }

    #[test]
    fn grid_17a_has_three_bands() {
        let grid = ToneGrid::from_profile(Profile::by_name("17a").unwrap());
        // 32..=869, 1205..=1971, 2782..=4034
        assert_eq!(grid.len(), 838 + 767 + 1253);
        assert_eq!(grid.frequencies()[0], 138_000.0);
        assert!(grid.frequencies().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn grid_never_contains_dc() {
        for profile in VDSL2_PROFILES {
            let grid = ToneGrid::from_profile(profile);
            assert!(grid.frequencies().iter().all(|&f| f > 0.0));
            assert!(grid.indices().iter().all(|&i| i < profile.total_tones));
        }
    }

    #[test]
    fn nearest_position_picks_closest_tone() {
        let grid = ToneGrid::from_profile(Profile::by_name("17a").unwrap());
        let pos = grid.nearest_position(5_000_000.0).unwrap();
        // 5 MHz sits in the gap between bands; the 5.2 MHz edge is closer
        assert_eq!(grid.indices()[pos], 1205);
        let pos = grid.nearest_position(138_000.0 + 4312.5 * 3.4).unwrap();
        assert_eq!(grid.indices()[pos], 35);
    }
}
