//! # Diagnostics Engine
//!
//! Read-only analysis of the measurements a modem reports in showtime:
//!
//! - **QLN** (quiet line noise, dBm/Hz per tone): tones sitting well above
//!   the thermal floor point at ingress or crosstalk.
//! - **Hlog** (channel attenuation, positive dB per tone): large deviations
//!   from the modelled cable point at a wrong length estimate or damage.
//! - **Loading coils**: heavy attenuation already at 80 kHz.
//! - **Bridged taps**: regularly spaced attenuation spikes whose spacing
//!   gives the length of the open stub.
//!
//! Every function takes a [`Measurement`] keyed by tone index and never
//! mutates the capacity engine it compares against.

mod peaks;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Span};

use crate::capacity::{CapacityEngine, FLAT_NOISE_FLOOR_DBM_HZ, REFERENCE_TEMPERATURE_C};
use crate::error::ChannelError;
use crate::numeric::guarded_div;

pub use peaks::{find_peaks, Peak};

/// Per-tone measurement in dB, keyed by tone index.
pub type Measurement = BTreeMap<u32, f64>;

pub const DEFAULT_QLN_MARGIN_DB: f64 = 6.0;
pub const DEFAULT_HLOG_THRESHOLD_DB: f64 = 10.0;
/// Loading coils act as a low-pass filter with a knee below this frequency.
pub const LOADING_COIL_PROBE_HZ: f64 = 80_000.0;
pub const LOADING_COIL_ATTENUATION_DB: f64 = 20.0;
pub const BRIDGED_TAP_MIN_PROMINENCE_DB: f64 = 3.0;
pub const BRIDGED_TAP_MIN_WIDTH_TONES: f64 = 5.0;
/// Velocity of propagation in twisted pair, relative to c.
pub const VELOCITY_FACTOR: f64 = 0.66;
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Which measurement a [`DiagnosticsResult`] was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Qln,
    Hlog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsStatus {
    /// Every measured tone was evaluated.
    Complete,
    /// Some measured tones lie outside the tone grid and were skipped.
    Partial,
}

/// A flagged tone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToneAnomaly {
    pub measured_db: f64,
    /// Thermal floor (QLN) or modelled attenuation (Hlog).
    pub reference_db: f64,
    /// measured − reference; signed for Hlog.
    pub deviation_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsResult {
    pub kind: DiagnosticKind,
    pub status: DiagnosticsStatus,
    pub anomaly_count: usize,
    pub anomalous_tones: BTreeMap<u32, ToneAnomaly>,
    /// Mean of the evaluated measurement values.
    pub average_db: f64,
    pub skipped_tones: usize,
    pub raw: Measurement,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadingCoilReport {
    pub detected: bool,
    /// Measured tone closest to 80 kHz.
    pub probe_tone: u32,
    pub probe_frequency_hz: f64,
    pub attenuation_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgedTapReport {
    pub detected: bool,
    /// Tones where an attenuation spike was found, ascending.
    pub null_tones: Vec<u32>,
    pub mean_spacing_hz: Option<f64>,
    /// Stub length; only present with two or more spikes.
    pub estimated_length_m: Option<f64>,
}

/// Diagnostics against one capacity engine's line model.
#[derive(Clone)]
pub struct LineDiagnostics {
    engine: Arc<CapacityEngine>,
    span: Span,
}

impl LineDiagnostics {
    pub fn new(engine: Arc<CapacityEngine>) -> Self {
        let span = info_span!("diagnostics", profile = engine.profile().name);
        LineDiagnostics { engine, span }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn engine(&self) -> &Arc<CapacityEngine> {
        &self.engine
    }

    // ─── Noise ──────────────────────────────────────────────────────────

    /// Flags tones whose quiet line noise exceeds the thermal floor by more
    /// than `margin_db`.
    pub fn analyze_qln(
        &self,
        measured: &Measurement,
        margin_db: f64,
    ) -> Result<DiagnosticsResult, ChannelError> {
        require("QLN", measured)?;
        let floor = FLAT_NOISE_FLOOR_DBM_HZ;
        let threshold = floor + margin_db;

        let anomalous_tones: BTreeMap<u32, ToneAnomaly> = measured
            .iter()
            .filter(|&(_, &db)| db > threshold)
            .map(|(&tone, &db)| {
                let anomaly = ToneAnomaly {
                    measured_db: db,
                    reference_db: floor,
                    deviation_db: db - floor,
                };
                (tone, anomaly)
            })
            .collect();

        let result = DiagnosticsResult {
            kind: DiagnosticKind::Qln,
            status: DiagnosticsStatus::Complete,
            anomaly_count: anomalous_tones.len(),
            anomalous_tones,
            average_db: mean(measured.values().copied()),
            skipped_tones: 0,
            raw: measured.clone(),
        };
        self.span.in_scope(|| {
            debug!(
                tones = measured.len(),
                anomalies = result.anomaly_count,
                average_db = result.average_db,
                "QLN analysed"
            );
        });
        Ok(result)
    }

    // ─── Attenuation ────────────────────────────────────────────────────

    /// Compares measured attenuation with the cable model at
    /// `estimated_distance_m`. Tones outside the grid are skipped.
    pub fn analyze_hlog(
        &self,
        measured: &Measurement,
        estimated_distance_m: f64,
        deviation_threshold_db: f64,
    ) -> Result<DiagnosticsResult, ChannelError> {
        require("Hlog", measured)?;
        let grid = self.engine.tone_grid();
        let theoretical = self
            .engine
            .model_attenuation_per_tone(estimated_distance_m, REFERENCE_TEMPERATURE_C);

        let mut evaluated = Vec::with_capacity(measured.len());
        let mut anomalous_tones = BTreeMap::new();
        let mut skipped = 0;
        for (&tone, &db) in measured {
            let Some(pos) = grid.position_of(tone) else {
                skipped += 1;
                continue;
            };
            evaluated.push(db);
            let deviation = db - theoretical[pos];
            if deviation.abs() > deviation_threshold_db {
                anomalous_tones.insert(
                    tone,
                    ToneAnomaly {
                        measured_db: db,
                        reference_db: theoretical[pos],
                        deviation_db: deviation,
                    },
                );
            }
        }

        if evaluated.is_empty() {
            self.span
                .in_scope(|| warn!(tones = measured.len(), "no Hlog tone lies on the grid"));
            return Err(ChannelError::DiagnosticsUnavailable("Hlog"));
        }

        let result = DiagnosticsResult {
            kind: DiagnosticKind::Hlog,
            status: if skipped == 0 {
                DiagnosticsStatus::Complete
            } else {
                DiagnosticsStatus::Partial
            },
            anomaly_count: anomalous_tones.len(),
            anomalous_tones,
            average_db: mean(evaluated),
            skipped_tones: skipped,
            raw: measured.clone(),
        };
        self.span.in_scope(|| {
            debug!(
                distance_m = estimated_distance_m,
                anomalies = result.anomaly_count,
                skipped,
                "Hlog analysed"
            );
        });
        Ok(result)
    }

    /// Loading coil check on the measured tone nearest 80 kHz.
    pub fn detect_loading_coils(
        &self,
        measured: &Measurement,
    ) -> Result<LoadingCoilReport, ChannelError> {
        require("Hlog", measured)?;
        let spacing = self.engine.tone_grid().spacing_hz();
        let (probe_tone, attenuation_db) = measured
            .iter()
            .map(|(&tone, &db)| (tone, db))
            .min_by(|a, b| {
                let da = (a.0 as f64 * spacing - LOADING_COIL_PROBE_HZ).abs();
                let db = (b.0 as f64 * spacing - LOADING_COIL_PROBE_HZ).abs();
                da.total_cmp(&db)
            })
            .ok_or(ChannelError::DiagnosticsUnavailable("Hlog"))?;

        let report = LoadingCoilReport {
            detected: attenuation_db > LOADING_COIL_ATTENUATION_DB,
            probe_tone,
            probe_frequency_hz: probe_tone as f64 * spacing,
            attenuation_db,
        };
        if report.detected {
            self.span.in_scope(|| {
                warn!(
                    tone = probe_tone,
                    attenuation_db, "loading coil signature detected"
                );
            });
        }
        Ok(report)
    }

    /// Looks for the periodic attenuation spikes of an open stub.
    pub fn detect_bridged_taps(
        &self,
        measured: &Measurement,
    ) -> Result<BridgedTapReport, ChannelError> {
        require("Hlog", measured)?;
        let tones: Vec<u32> = measured.keys().copied().collect();
        let values: Vec<f64> = measured.values().copied().collect();

        let null_tones: Vec<u32> = find_peaks(
            &values,
            BRIDGED_TAP_MIN_PROMINENCE_DB,
            BRIDGED_TAP_MIN_WIDTH_TONES,
        )
        .into_iter()
        .map(|p| tones[p.index])
        .collect();

        if null_tones.len() < 2 {
            self.span
                .in_scope(|| debug!(nulls = null_tones.len(), "no bridged tap pattern"));
            return Ok(BridgedTapReport {
                detected: false,
                null_tones,
                mean_spacing_hz: None,
                estimated_length_m: None,
            });
        }

        let spacing = self.engine.tone_grid().spacing_hz();
        let first = null_tones[0] as f64 * spacing;
        let last = null_tones[null_tones.len() - 1] as f64 * spacing;
        let mean_spacing_hz = (last - first) / (null_tones.len() - 1) as f64;
        let length_m = guarded_div(SPEED_OF_LIGHT_M_S * VELOCITY_FACTOR, 2.0 * mean_spacing_hz);

        self.span.in_scope(|| {
            info!(
                nulls = null_tones.len(),
                mean_spacing_hz,
                length_m,
                "bridged tap detected"
            );
        });
        Ok(BridgedTapReport {
            detected: true,
            null_tones,
            mean_spacing_hz: Some(mean_spacing_hz),
            estimated_length_m: Some(length_m),
        })
    }
}

fn require(kind: &'static str, measured: &Measurement) -> Result<(), ChannelError> {
    if measured.is_empty() {
        return Err(ChannelError::DiagnosticsUnavailable(kind));
    }
    Ok(())
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}
