//! # copperline-channel
//!
//! Per-tone physical layer models for VDSL2 copper loops.
//!
//! ## Crate structure
//!
//! - [`profile`] — VDSL2 profile catalogue and the immutable [`ToneGrid`]
//! - [`cable`] — RLCG cable parameter catalogue
//! - [`capacity`] — Attenuation, crosstalk, SNR and Shannon bit-loading
//! - [`noise`] — Pluggable impulsive and narrowband noise sources
//! - [`diagnostics`] — QLN / Hlog analysis, loading-coil and bridged-tap detection
//! - [`numeric`] — Epsilon-guarded dB conversions shared by every model

pub mod cable;
pub mod capacity;
pub mod diagnostics;
pub mod error;
pub mod noise;
pub mod numeric;
pub mod profile;

pub use cable::CableParameters;
pub use capacity::{CapacityEngine, PsdShape};
pub use diagnostics::{DiagnosticsResult, LineDiagnostics, Measurement};
pub use error::ChannelError;
pub use noise::NoiseSource;
pub use profile::{Profile, ToneGrid};
