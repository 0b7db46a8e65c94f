//! Capability trait standing in for the receiver-session layer.
//!
//! `spec.md` describes receiver session objects informally, as plain fields
//! the core reads and mutates (`num_syncs`, `num_outliers`, `focus`, `user`,
//! `clock`, `incrementJumps()`). Embedding a reference to such an object
//! inside [`crate::pairing::ClockPairing`] would tie the pairing's lifetime
//! to the receiver's and invite the exact cyclic-ownership problem
//! `spec.md` §9 warns against (receiver owns pairings, pairings reference
//! receivers). `ReceiverHandle` is a narrow capability passed by mutable
//! reference into `update` instead.

use crate::clock::Clock;

/// Per-receiver counters and metadata that `ClockPairing::update` reads and
/// mutates while processing one observation.
#[cfg_attr(test, mockall::automock)]
pub trait ReceiverHandle {
    /// This receiver's local clock descriptor. `Clock` is small and `Copy`,
    /// so the capability returns it by value rather than by reference.
    fn clock(&self) -> Clock;

    /// Fraction (0..1) of this receiver's syncs recently flagged bad.
    fn bad_syncs(&self) -> f64;

    /// Verbose-logging selector for this receiver.
    fn focus(&self) -> bool;

    /// Display name used in diagnostic log lines.
    fn user(&self) -> String;

    /// Count one attempted sync (called unconditionally per `update`).
    fn increment_num_syncs(&mut self);

    /// Count one sync classified as an outlier.
    fn increment_num_outliers(&mut self);

    /// Count one clock jump (a reset triggered by a catastrophic step).
    fn increment_jumps(&mut self);
}
