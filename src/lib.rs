//! Pairwise clock-synchronization core for a Mode-S multilateration server.
//!
//! This crate tracks, for each ordered pair of receivers that hear a common
//! aircraft, the relative frequency drift and time-varying offset between
//! their local clocks. Downstream multilateration geometry code uses these
//! pairings to translate a reception timestamp from one receiver's clock
//! into another's, which is the basis for time-difference-of-arrival
//! positioning.
//!
//! The crate is deliberately narrow: it has no knowledge of sockets, wire
//! formats, or aircraft tracking. Callers drive [`pairing::ClockPairing`]
//! with timestamps they've already decoded, and supply the receiver- and
//! aircraft-side bookkeeping through the [`receiver::ReceiverHandle`] and
//! [`aircraft::AircraftContext`] capability traits.

pub mod aircraft;
pub mod clock;
pub mod error;
pub mod pairing;
pub mod receiver;

pub use aircraft::AircraftContext;
pub use clock::Clock;
pub use error::{ClockSyncError, Result};
pub use pairing::{ClockPairing, PairingDiagnostics};
pub use receiver::ReceiverHandle;
