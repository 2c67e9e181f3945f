//! Property-based tests for the channel model.
//!
//! Monotonicity of attenuation, crosstalk and bitrate over the operating
//! range, bit-loading bounds, and background-noise shape enforcement.

use proptest::prelude::*;

use copperline_channel::capacity::{LineConditions, MAX_BITS_PER_TONE};
use copperline_channel::{CapacityEngine, ChannelError};

fn engine_for(profile: &str, cable: &str) -> CapacityEngine {
    CapacityEngine::new(profile, cable).unwrap()
}

fn cable() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("etsi_05mm"),
        Just("etsi_04mm"),
        Just("awg24"),
        Just("awg26"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn attenuation_strictly_increasing_in_distance(
        cable in cable(),
        d in 1.0f64..3000.0,
        extra in 1.0f64..1000.0,
    ) {
        let e = engine_for("17a", cable);
        let near = e.model_attenuation_per_tone(d, 20.0);
        let far = e.model_attenuation_per_tone(d + extra, 20.0);
        prop_assert!(near.iter().zip(&far).all(|(a, b)| a < b));
    }

    #[test]
    fn fext_strictly_increasing_in_disturbers(
        n in 1u32..48,
        extra in 1u32..20,
        d in 50.0f64..2000.0,
    ) {
        let e = engine_for("17a", "etsi_05mm");
        let few = e.model_fext_noise_psd(n, d);
        let many = e.model_fext_noise_psd(n + extra, d);
        prop_assert!(few.iter().zip(&many).all(|(a, b)| a < b));
    }

    #[test]
    fn bitrate_non_increasing_in_disturbers(
        n in 0u32..40,
        extra in 1u32..20,
        d in 50.0f64..2000.0,
    ) {
        let e = engine_for("17a", "etsi_05mm");
        let a = e.calculate_max_bitrate(&LineConditions::new(d).disturbers(n));
        let b = e.calculate_max_bitrate(&LineConditions::new(d).disturbers(n + extra));
        prop_assert!(b <= a, "{} disturbers: {} > {}", n + extra, b, a);
    }

    #[test]
    fn bitrate_non_increasing_in_distance(
        cable in cable(),
        d in 10.0f64..2500.0,
        extra in 1.0f64..1000.0,
        n in 0u32..30,
    ) {
        let e = engine_for("17a", cable);
        let a = e.calculate_max_bitrate(&LineConditions::new(d).disturbers(n));
        let b = e.calculate_max_bitrate(&LineConditions::new(d + extra).disturbers(n));
        prop_assert!(b <= a);
    }

    #[test]
    fn bits_bounded(d in 0.0f64..6000.0, n in 0u32..60, t in -20.0f64..60.0) {
        let e = engine_for("35b", "awg26");
        let bits = e.bits_per_tone(&LineConditions::new(d).disturbers(n).temperature(t));
        prop_assert_eq!(bits.len(), e.tone_grid().len());
        prop_assert!(bits.iter().all(|&b| (0.0..=MAX_BITS_PER_TONE).contains(&b)));
    }

    #[test]
    fn wrong_length_background_never_lands(len in 0usize..5000) {
        let e = engine_for("17a", "etsi_05mm");
        prop_assume!(len != e.tone_grid().len());
        let before = e.background_noise();
        let result = e.update_background_noise(vec![-90.0; len]);
        let is_shape_mismatch = matches!(result, Err(ChannelError::ShapeMismatch { .. }));
        prop_assert!(is_shape_mismatch);
        prop_assert_eq!(&*e.background_noise(), &*before);
    }
}
