use thiserror::Error;

use crate::hal::Capability;

/// Failure of a single modem call.
#[derive(Debug, Error)]
pub enum HalError {
    /// The modem or driver does not implement this capability.
    #[error("{0} is not supported by this modem")]
    NotSupported(Capability),
    #[error("modem command failed: {0}")]
    Command(String),
    #[error("modem I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HalError {
    pub fn is_not_supported(&self) -> bool {
        matches!(self, HalError::NotSupported(_))
    }
}

/// Errors raised while building or starting the controller.
#[derive(Debug, Error)]
pub enum SraError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid SRA configuration: {0}")]
    Config(String),
    #[error("unknown latency profile '{0}', valid values: fast, gaming, stable")]
    UnknownLatencyProfile(String),
    #[error("failed to spawn SRA worker: {0}")]
    Spawn(std::io::Error),
}
