//! Clock descriptor and the receiver-type preset factory.

use serde::{Deserialize, Serialize};

use crate::error::{ClockSyncError, Result};

/// Speed of light in air, m/s. Used only to derive [`Clock::delay_factor`];
/// higher-level multilateration geometry code reads that factor, not `C_AIR`
/// directly.
pub const C_AIR: f64 = 299_702_547.0;

/// Immutable description of one receiver's local timebase.
///
/// `Clock` values are cheap to copy and are cached by value inside
/// [`crate::pairing::ClockPairing`] rather than referenced, since a
/// `Clock` never changes after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    /// Clock frequency in Hz.
    pub freq: f64,
    /// Maximum relative frequency error (e.g. 1e-6 = 1 ppm).
    pub max_freq_error: f64,
    /// Standard deviation of a single reading, in seconds.
    pub jitter: f64,
    /// `freq / C_AIR`, precomputed for downstream geometry code.
    pub delay_factor: f64,
}

impl Clock {
    /// Construct a `Clock` from its three free parameters, deriving
    /// `delay_factor`.
    pub fn new(freq: f64, max_freq_error: f64, jitter: f64) -> Self {
        Clock {
            freq,
            max_freq_error,
            jitter,
            delay_factor: freq / C_AIR,
        }
    }

    /// Look up the preset `Clock` for a named receiver type.
    ///
    /// Recognized tags: `radarcape_gps`, `beast`, `radarcape_12mhz`, `sbs`,
    /// `dump1090`, `unknown`. Any other tag is a configuration error.
    pub fn for_tag(tag: &str) -> Result<Clock> {
        let clock = match tag {
            "radarcape_gps" => Clock::new(1e9, 1e-6, 15e-9),
            "beast" | "radarcape_12mhz" => Clock::new(1.2e7, 5e-6, 8.3e-8),
            "sbs" => Clock::new(2e7, 1e-4, 5e-7),
            "dump1090" | "unknown" => Clock::new(1.2e7, 1e-4, 5e-7),
            other => return Err(ClockSyncError::UnsupportedClockType(other.to_string())),
        };
        Ok(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_resolve() {
        for tag in ["radarcape_gps", "beast", "radarcape_12mhz", "sbs", "dump1090", "unknown"] {
            assert!(Clock::for_tag(tag).is_ok(), "tag {tag} should resolve");
        }
    }

    #[test]
    fn unknown_tag_errors() {
        let err = Clock::for_tag("nonexistent").unwrap_err();
        assert_eq!(err, ClockSyncError::UnsupportedClockType("nonexistent".to_string()));
    }

    #[test]
    fn radarcape_gps_preset_values() {
        let c = Clock::for_tag("radarcape_gps").unwrap();
        assert_eq!(c.freq, 1e9);
        assert_eq!(c.max_freq_error, 1e-6);
        assert_eq!(c.jitter, 15e-9);
        assert!((c.delay_factor - 1e9 / C_AIR).abs() < 1e-9);
    }

    #[test]
    fn beast_and_radarcape_12mhz_share_preset() {
        let a = Clock::for_tag("beast").unwrap();
        let b = Clock::for_tag("radarcape_12mhz").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dump1090_and_unknown_share_preset() {
        let a = Clock::for_tag("dump1090").unwrap();
        let b = Clock::for_tag("unknown").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn delay_factor_derivation() {
        let c = Clock::new(1.2e7, 5e-6, 8.3e-8);
        assert!((c.delay_factor - 1.2e7 / C_AIR).abs() < 1e-12);
    }
}
