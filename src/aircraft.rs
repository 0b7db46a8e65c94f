//! Capability trait standing in for the per-aircraft update context.
//!
//! `spec.md` §6 describes this as an object exposing `sync_good`,
//! `sync_bad` (mutable counters) and `sync_dont_use` (read-only). As with
//! [`crate::receiver::ReceiverHandle`], the aircraft tracker that owns this
//! state stays external to the core; `update` only borrows it for the
//! duration of one call.
#[cfg_attr(test, mockall::automock)]
pub trait AircraftContext {
    /// Credit one sync classified as good for this aircraft.
    fn sync_good(&mut self);

    /// Credit one sync classified as bad (outlier) for this aircraft.
    fn sync_bad(&mut self);

    /// True if the surrounding system has already decided not to use syncs
    /// from this aircraft (e.g. known-bad transponder, opted-out track).
    fn sync_dont_use(&self) -> bool;
}
