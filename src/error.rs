//! Error types for the clock-synchronization core.

/// Errors surfaced by the core. Sample rejection inside `ClockPairing::update`
/// is *not* represented here — that path returns `bool`, per the design (see
/// module docs on [`crate::pairing::ClockPairing::update`]).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClockSyncError {
    /// Raised by the clock factory when asked for a tag it doesn't know.
    #[error("unsupported clock type: {0}")]
    UnsupportedClockType(String),

    /// Raised by `predict_peer`/`predict_base` when the pairing has no
    /// observations yet (`n == 0`).
    #[error("pairing has no observations yet")]
    EmptyPairing,
}

pub type Result<T> = std::result::Result<T, ClockSyncError>;
