//! # copperline-sra
//!
//! Seamless rate adaptation for VDSL2 modems: a ticked controller that
//! watches CRC errors, link state and optional QLN/Hlog diagnostics, then
//! trades SNR margin against rate or power through a [`DslHal`].
//!
//! ## Crate structure
//!
//! - [`hal`] — Modem abstraction and optional capabilities
//! - [`state`] — Controller states, line quality and latency profiles
//! - [`config`] — TOML configuration with validated defaults
//! - [`controller`] — The per-tick state machine
//! - [`stability`] — Recovery policy for unstable lines
//! - [`report`] — Structured per-tick outcome
//! - [`runtime`] — Background worker thread around a controller

pub mod config;
pub mod controller;
pub mod error;
pub mod hal;
pub mod report;
pub mod runtime;
pub mod stability;
pub mod state;

pub use config::{ConservativeProfile, DiagnosticsConfig, SraConfig, SraConfigInput};
pub use controller::SraController;
pub use error::{HalError, SraError};
pub use hal::{Capability, DslHal, LineStats, TrafficMonitor};
pub use report::{Action, TickReport};
pub use runtime::SraRuntime;
pub use stability::StabilityManager;
pub use state::{ConfigSnapshot, LatencyProfile, LineQuality, SraState};
