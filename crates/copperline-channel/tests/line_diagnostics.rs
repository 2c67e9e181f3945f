//! End-to-end diagnostics over measurements synthesised from the channel
//! model: a clean loop, a loop with a bridged tap, and a loaded loop.

use std::sync::Arc;

use copperline_channel::capacity::REFERENCE_TEMPERATURE_C;
use copperline_channel::diagnostics::{DiagnosticKind, DEFAULT_HLOG_THRESHOLD_DB, DEFAULT_QLN_MARGIN_DB};
use copperline_channel::{CapacityEngine, LineDiagnostics, Measurement};

fn setup() -> LineDiagnostics {
    let engine = CapacityEngine::new("17a", "etsi_05mm").unwrap();
    LineDiagnostics::new(Arc::new(engine))
}

/// Hlog for the first 17a band at `distance_m`, with an optional notch
/// pattern layered on top.
fn hlog(d: &LineDiagnostics, distance_m: f64, spikes: &[u32]) -> Measurement {
    let engine = d.engine();
    let att = engine.model_attenuation_per_tone(distance_m, REFERENCE_TEMPERATURE_C);
    engine
        .tone_grid()
        .indices()
        .iter()
        .zip(att)
        .filter(|(tone, _)| **tone < 869)
        .map(|(&tone, a)| {
            let bump: f64 = spikes
                .iter()
                .map(|&c| 6.0 * (-((tone as f64 - c as f64).powi(2)) / 18.0).exp())
                .sum();
            (tone, a + bump)
        })
        .collect()
}

#[test]
fn clean_loop_reports_nothing() {
    let d = setup();
    let measured = hlog(&d, 500.0, &[]);

    let hlog = d
        .analyze_hlog(&measured, 500.0, DEFAULT_HLOG_THRESHOLD_DB)
        .unwrap();
    assert_eq!(hlog.kind, DiagnosticKind::Hlog);
    assert_eq!(hlog.anomaly_count, 0);
    assert!(!d.detect_bridged_taps(&measured).unwrap().detected);
    assert!(!d.detect_loading_coils(&measured).unwrap().detected);
}

#[test]
fn bridged_tap_on_modelled_loop() {
    let d = setup();
    // Three spikes 60 tones apart → Δf = 258.75 kHz → ≈ 382 m stub.
    let measured = hlog(&d, 500.0, &[200, 260, 320]);
    let report = d.detect_bridged_taps(&measured).unwrap();
    assert!(report.detected);
    assert_eq!(report.null_tones, vec![200, 260, 320]);
    let spacing = report.mean_spacing_hz.unwrap();
    assert!((spacing - 258_750.0).abs() < 1.0);
    let length = report.estimated_length_m.unwrap();
    assert!((length - 382.3).abs() < 1.0, "{length}");

    // A wrong length estimate shows up in the Hlog comparison.
    let wrong = d
        .analyze_hlog(&measured, 100.0, DEFAULT_HLOG_THRESHOLD_DB)
        .unwrap();
    assert!(wrong.anomaly_count > 0);
}

#[test]
fn loaded_loop_is_flagged() {
    let d = setup();
    let measured: Measurement = (32..200u32)
        .map(|t| (t, 28.0 + t as f64 * 0.05))
        .collect();
    // The lowest measured tone (32 ≈ 138 kHz) is the closest to 80 kHz.
    let report = d.detect_loading_coils(&measured).unwrap();
    assert_eq!(report.probe_tone, 32);
    assert!(report.detected);
}

#[test]
fn qln_with_am_ingress() {
    let d = setup();
    let mut qln: Measurement = (32..869u32).map(|t| (t, -138.0)).collect();
    for t in 330..336 {
        qln.insert(t, -95.0);
    }
    let result = d.analyze_qln(&qln, DEFAULT_QLN_MARGIN_DB).unwrap();
    assert_eq!(result.anomaly_count, 6);
    let flagged: Vec<u32> = result.anomalous_tones.keys().copied().collect();
    assert_eq!(flagged, (330..336).collect::<Vec<_>>());
}

#[test]
fn results_serialize_to_json() {
    let d = setup();
    let measured = hlog(&d, 400.0, &[300, 346]);
    let report = d.detect_bridged_taps(&measured).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["detected"], true);
    assert_eq!(json["null_tones"][1], 346);

    let qln: Measurement = [(40, -100.0)].into_iter().collect();
    let result = d.analyze_qln(&qln, 6.0).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["kind"], "qln");
    assert_eq!(json["anomaly_count"], 1);
}
