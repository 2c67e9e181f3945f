//! # Cable Models
//!
//! Per-meter RLCG primary constants for common twisted-pair gauges. The
//! frequency dependence is reduced to two terms:
//!
//! $$R(f) = R_0 + R_{skin}\sqrt{f} \qquad G(f) = G_{coeff} \cdot f$$
//!
//! with inductance and capacitance held constant over the VDSL2 band.

use crate::error::ChannelError;

/// RLCG constants for one cable model. All values are per meter of loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CableParameters {
    /// Catalogue name ("etsi_05mm").
    pub name: &'static str,
    /// DC loop resistance in Ω/m.
    pub r0_ohm_per_m: f64,
    /// Skin-effect coefficient in Ω/(m·√Hz).
    pub skin_effect_coeff: f64,
    /// Series inductance in H/m.
    pub inductance_h_per_m: f64,
    /// Dielectric-loss coefficient in S/(m·Hz).
    pub dielectric_loss_coeff: f64,
    /// Shunt capacitance in F/m.
    pub capacitance_f_per_m: f64,
}

pub const CABLE_MODELS: &[CableParameters] = &[
    CableParameters {
        name: "etsi_05mm",
        r0_ohm_per_m: 0.180,
        skin_effect_coeff: 3.5e-4,
        inductance_h_per_m: 0.55e-6,
        dielectric_loss_coeff: 1.0e-13,
        capacitance_f_per_m: 50e-12,
    },
    CableParameters {
        name: "etsi_04mm",
        r0_ohm_per_m: 0.280,
        skin_effect_coeff: 4.4e-4,
        inductance_h_per_m: 0.58e-6,
        dielectric_loss_coeff: 1.2e-13,
        capacitance_f_per_m: 48e-12,
    },
    CableParameters {
        name: "awg24",
        r0_ohm_per_m: 0.168,
        skin_effect_coeff: 3.3e-4,
        inductance_h_per_m: 0.53e-6,
        dielectric_loss_coeff: 1.0e-13,
        capacitance_f_per_m: 51e-12,
    },
    CableParameters {
        name: "awg26",
        r0_ohm_per_m: 0.266,
        skin_effect_coeff: 4.2e-4,
        inductance_h_per_m: 0.57e-6,
        dielectric_loss_coeff: 1.1e-13,
        capacitance_f_per_m: 49e-12,
    },
];

impl CableParameters {
    /// Looks up a cable model by name.
    pub fn by_name(name: &str) -> Result<&'static CableParameters, ChannelError> {
        CABLE_MODELS
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ChannelError::Configuration {
                kind: "cable model",
                name: name.to_string(),
                valid: Self::names(),
            })
    }

    pub fn names() -> Vec<&'static str> {
        CABLE_MODELS.iter().map(|c| c.name).collect()
    }

    /// Series resistance at `freq_hz` (Ω/m).
    pub fn resistance(&self, freq_hz: f64) -> f64 {
        self.r0_ohm_per_m + self.skin_effect_coeff * freq_hz.max(0.0).sqrt()
    }

    /// Shunt conductance at `freq_hz` (S/m).
    pub fn conductance(&self, freq_hz: f64) -> f64 {
        self.dielectric_loss_coeff * freq_hz.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_cable_is_configuration_error() {
        match CableParameters::by_name("cat5e") {
            Err(ChannelError::Configuration { kind, valid, .. }) => {
                assert_eq!(kind, "cable model");
                assert!(valid.contains(&"etsi_05mm"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn thinner_gauge_has_more_resistance() {
        let thick = CableParameters::by_name("etsi_05mm").unwrap();
        let thin = CableParameters::by_name("etsi_04mm").unwrap();
        assert!(thin.resistance(1e6) > thick.resistance(1e6));
    }

    #[test]
    fn skin_effect_grows_with_frequency() {
        let cable = CableParameters::by_name("awg24").unwrap();
        assert!(cable.resistance(17e6) > cable.resistance(1e6));
        assert_eq!(cable.resistance(0.0), cable.r0_ohm_per_m);
    }
}
