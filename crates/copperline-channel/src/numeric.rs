//! Epsilon-guarded conversions between the log and linear power domains.

/// Substituted for zero or negative arguments before any `log10` or division.
pub const EPSILON: f64 = 1e-20;

/// PSD reported for tones a narrowband source leaves untouched (dBm/Hz).
pub const SILENT_PSD_DBM_HZ: f64 = -200.0;

/// dBm (or dBm/Hz) to mW (or mW/Hz).
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    if db.is_finite() { 10f64.powf(db / 10.0) } else { 0.0 }
}

/// mW (or mW/Hz) to dBm (or dBm/Hz), guarded against non-positive input.
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    let value = if linear.is_finite() && linear > 0.0 { linear } else { 0.0 };
    10.0 * (value + EPSILON).log10()
}

/// Division that returns `numerator / EPSILON` instead of infinity.
#[inline]
pub fn guarded_div(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < EPSILON || !denominator.is_finite() {
        numerator / EPSILON.copysign(denominator)
    } else {
        numerator / denominator
    }
}
