use thiserror::Error;

/// Errors surfaced by the channel models.
///
/// Numeric edge cases (log of zero, division by a vanishing bandwidth) never
/// show up here: they are absorbed with an epsilon substitution instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("unknown {kind} '{name}', valid values: {}", .valid.join(", "))]
    Configuration {
        kind: &'static str,
        name: String,
        valid: Vec<&'static str>,
    },
    #[error("noise profile has {actual} entries, tone grid has {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("{0} measurement unavailable")]
    DiagnosticsUnavailable(&'static str),
}
