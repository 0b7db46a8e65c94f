//! Pairwise clock-synchronization estimator.
//!
//! `ClockPairing` is a Kalman-like estimator specialized for piecewise-linear
//! timebases: given a stream of synchronized observations between two
//! receivers, it tracks the relative frequency drift and a time-varying
//! offset that lets a caller map a timestamp from one receiver's clock to
//! the other's, to sub-microsecond accuracy.
//!
//! The estimator is built from four pieces that interact through a single
//! `update` call: a bounded 32-sample history ring (used both for variance
//! tracking and piecewise-linear interpolation/extrapolation), a PI control
//! loop over drift, an outlier classifier with hysteresis and a cooldown,
//! and a sync-point smoothing step that bends incoming samples toward the
//! current prediction before they're committed to the ring.

use crate::aircraft::AircraftContext;
use crate::clock::Clock;
use crate::error::{ClockSyncError, Result};
use crate::receiver::ReceiverHandle;

/// History ring capacity.
const RING_CAPACITY: usize = 32;
/// Floor the ring is pruned down to when it approaches capacity (cap − 12).
const PRUNE_FLOOR: usize = RING_CAPACITY - 12;
/// Eager-prune trigger: age (in seconds of base-clock ticks) at which
/// `update` prunes before inserting, rather than waiting for the next
/// scheduled prune.
const PRUNE_EAGER_AGE_SECS: f64 = 50.0;
/// Retention age bound enforced by `prune_old_data`.
const PRUNE_RETAIN_AGE_SECS: f64 = 45.0;
/// Distance (in seconds of query-clock ticks) from the newest anchor within
/// which `predict` treats the query as "near/past the tail" and extrapolates
/// instead of interpolating.
const TAIL_EXTRAPOLATION_WINDOW_SECS: f64 = 10.0;

/// Proportional gain of the drift PI loop.
const KP: f64 = 0.03;
/// Integral gain of the drift PI loop.
const KI: f64 = 0.008;
/// Below this many integrated drift samples, KP is boosted so a fresh
/// pairing converges faster.
const DRIFT_N_STABLE: u32 = 12;
/// Consecutive drift-delta rejections above which a hard drift reset fires.
const DRIFT_OUTLIER_RESET_TRIGGER: u32 = 30;

/// Per-sample outlier-error threshold once the ring has enough history
/// (`n >= 4`), in seconds. Doubled below that.
const OUTLIER_THRESHOLD_BASE_SECS: f64 = 0.9e-6;
/// Outlier score credited for a "clocks crossed" monotonicity violation.
const OUTLIER_SCORE_CROSSED: f64 = 10.0;
/// Outlier score credited for `|error| > 2 * threshold`.
const OUTLIER_SCORE_SEVERE: f64 = 20.0;
/// Outlier score credited for `threshold < |error| <= 2 * threshold`.
const OUTLIER_SCORE_MILD: f64 = 8.0;
/// Outlier score decayed off on every update.
const OUTLIER_SCORE_DECAY: f64 = 18.0;
/// Outlier score above which a reset is allowed to proceed rather than
/// silently dropping the sample.
const OUTLIER_SCORE_RESET_GATE: f64 = 77.0;

/// Initial outlier-reset cooldown set at construction.
const INITIAL_RESET_COOLDOWN: i32 = 5;
/// Cooldown set after a forced (outlier-triggered) reset.
const FORCED_RESET_COOLDOWN: i32 = 15;

/// Clamp applied to the integrated offset prediction error.
const CUMULATIVE_ERROR_CLAMP_SECS: f64 = 5e-5;

/// Sentinel value for `variance`/`error` meaning "not yet computed".
const UNDEFINED_STAT: f64 = -1e-6;

/// `update_total` starts at this non-zero sentinel so `outlier_total /
/// update_total` is always a defined ratio, never a `0/0`.
const UPDATE_TOTAL_SEED: f64 = 1e-3;
/// `update_total` above this is halved during pruning, to keep the
/// diagnostic outlier-percentage recent rather than averaged over the
/// pairing's whole lifetime.
const UPDATE_TOTAL_DECAY_THRESHOLD: f64 = 256.0;

/// Smoothing weight applied once the pairing is well-established
/// (`n >= 4 && drift_n > 12`). Chosen empirically to converge without
/// ringing; deliberately not `0.5`, which was observed to oscillate.
const SYNC_SMOOTHING_WEIGHT_MATURE: f64 = 0.38;
/// Smoothing weight used before the pairing is well-established.
const SYNC_SMOOTHING_WEIGHT_YOUNG: f64 = 0.15;

/// Validity gate: standard error must be below `sqrt(this)` (~4µs) for the
/// pairing to be usable by downstream multilateration. Looser than the
/// per-sample outlier threshold (0.9µs) by design — this reflects recent
/// *aggregate* quality, not per-sample quality.
const VALIDITY_VARIANCE_THRESHOLD: f64 = 1.6e-11;
/// Validity gate: the pairing is considered stale if it hasn't been
/// successfully updated more recently than this.
const VALIDITY_FRESHNESS_SECS: f64 = 35.0;

/// Diagnostic snapshot of a pairing's health, for status/telemetry
/// consumers that shouldn't reach into `ClockPairing`'s private state
/// directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairingDiagnostics {
    pub valid: bool,
    pub n: usize,
    pub variance: f64,
    pub error: f64,
    pub drift_ppm: f64,
    pub outlier_percent: f64,
}

/// Estimator for one ordered `(base, peer)` receiver pair observing a common
/// set of aircraft.
///
/// `ClockPairing` does not store receiver references: `spec.md`'s "non-
/// owning references to two receiver session objects" would tie this
/// struct's lifetime to its receivers', inviting a cyclic-ownership
/// relationship (receivers own pairings, pairings reference receivers).
/// Instead, `Clock` — immutable and cheap to copy — is cached by value at
/// construction, and the mutable receiver/aircraft bookkeeping is passed
/// into [`ClockPairing::update`] as short-lived capability borrows.
///
/// Every mutating method runs to completion without suspension on whatever
/// thread the caller uses. `ClockPairing` is not internally synchronized:
/// a caller sharing a pairing across worker threads must serialize access
/// (a `Mutex` per pairing, or partitioning pairings across workers), since
/// reads like `predict_peer` touch multiple fields that are not updated
/// atomically with respect to `update`.
#[derive(Debug, Clone)]
pub struct ClockPairing<Id = u64> {
    base_id: Id,
    peer_id: Id,
    category: i64,

    base_clock: Clock,
    peer_clock: Clock,
    relative_freq: f64,
    i_relative_freq: f64,

    ts_base: [f64; RING_CAPACITY],
    ts_peer: [f64; RING_CAPACITY],
    var: [f64; RING_CAPACITY],
    var_sum: f64,
    n: usize,

    raw_drift: f64,
    drift: f64,
    i_drift: f64,
    drift_n: u32,
    drift_outliers: u32,
    drift_max: f64,
    drift_max_delta: f64,
    cumulative_error: f64,

    outliers: f64,
    outlier_reset_cooldown: i32,
    outlier_total: f64,
    update_total: f64,
    jumped: bool,
    valid: bool,
    updated: f64,
    update_attempted: f64,
    variance: f64,
    error: f64,
}

impl<Id: Clone> ClockPairing<Id> {
    /// Construct a pairing with an empty history ring.
    pub fn new(base_id: Id, peer_id: Id, category: i64, base_clock: Clock, peer_clock: Clock) -> Self {
        let relative_freq = peer_clock.freq / base_clock.freq;
        let drift_max = 0.75 * (base_clock.max_freq_error + peer_clock.max_freq_error);
        ClockPairing {
            base_id,
            peer_id,
            category,
            base_clock,
            peer_clock,
            relative_freq,
            i_relative_freq: 1.0 / relative_freq,
            ts_base: [0.0; RING_CAPACITY],
            ts_peer: [0.0; RING_CAPACITY],
            var: [0.0; RING_CAPACITY],
            var_sum: 0.0,
            n: 0,
            raw_drift: 0.0,
            drift: 0.0,
            i_drift: 0.0,
            drift_n: 0,
            drift_outliers: 0,
            drift_max,
            drift_max_delta: drift_max / 10.0,
            cumulative_error: 0.0,
            outliers: 0.0,
            outlier_reset_cooldown: INITIAL_RESET_COOLDOWN,
            outlier_total: 0.0,
            update_total: UPDATE_TOTAL_SEED,
            jumped: false,
            valid: false,
            updated: 0.0,
            update_attempted: 0.0,
            variance: UNDEFINED_STAT,
            error: UNDEFINED_STAT,
        }
    }

    pub fn base_id(&self) -> &Id {
        &self.base_id
    }

    pub fn peer_id(&self) -> &Id {
        &self.peer_id
    }

    pub fn category(&self) -> i64 {
        self.category
    }

    pub fn base_clock(&self) -> Clock {
        self.base_clock
    }

    pub fn peer_clock(&self) -> Clock {
        self.peer_clock
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn updated(&self) -> f64 {
        self.updated
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn drift(&self) -> f64 {
        self.drift
    }

    pub fn raw_drift(&self) -> f64 {
        self.raw_drift
    }

    pub fn i_drift(&self) -> f64 {
        self.i_drift
    }

    pub fn drift_n(&self) -> u32 {
        self.drift_n
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn outliers(&self) -> f64 {
        self.outliers
    }

    pub fn outlier_reset_cooldown(&self) -> i32 {
        self.outlier_reset_cooldown
    }

    pub fn outlier_total(&self) -> f64 {
        self.outlier_total
    }

    pub fn update_total(&self) -> f64 {
        self.update_total
    }

    pub fn jumped(&self) -> bool {
        self.jumped
    }

    /// Snapshot of the pairing's health, for telemetry.
    pub fn diagnostics(&self) -> PairingDiagnostics {
        PairingDiagnostics {
            valid: self.valid,
            n: self.n,
            variance: self.variance,
            error: self.error,
            drift_ppm: self.drift * 1e6,
            outlier_percent: self.outlier_total / self.update_total * 100.0,
        }
    }

    /// Ingest one synchronized observation.
    ///
    /// `base_ts`/`peer_ts` are the absolute timestamps of the sync event on
    /// each clock, in that clock's native ticks. `base_interval`/
    /// `peer_interval` are the native-tick lengths of the interval between
    /// this sync event and the previous one observed for the same aircraft
    /// pair, used for drift estimation independent of absolute offset.
    /// `now` is wall-clock seconds. `address` is the aircraft's address,
    /// used only for logging.
    ///
    /// Returns `true` iff the sample was accepted into the offset ring.
    /// Rejection is the dominant path here and is not exceptional: it
    /// reflects transient clock jitter, a classified outlier, or an
    /// aircraft the caller has already opted out of syncing against.
    #[allow(clippy::too_many_arguments)]
    pub fn update<B, P, A>(
        &mut self,
        address: u32,
        base: &mut B,
        peer: &mut P,
        base_ts: f64,
        peer_ts: f64,
        base_interval: f64,
        peer_interval: f64,
        now: f64,
        ac: &mut A,
    ) -> bool
    where
        B: ReceiverHandle,
        P: ReceiverHandle,
        A: AircraftContext,
    {
        let mut base_ts = base_ts;
        let mut peer_ts = peer_ts;

        // Step 1: eager prune.
        if self.n > RING_CAPACITY - 1
            || (self.n > 0
                && self.ts_base[self.n - 1] - self.ts_base[0]
                    > PRUNE_EAGER_AGE_SECS * self.base_clock.freq)
        {
            self.prune_old_data(now);
        }
        self.update_total += 1.0;
        self.update_attempted = now;

        // Step 2: monotonicity guard.
        let mut do_reset = false;
        if self.n > 0 {
            let last_peer = self.ts_peer[self.n - 1];
            let last_base = self.ts_base[self.n - 1];
            if peer_ts <= last_peer || base_ts <= last_base {
                let both_decreasing = peer_ts < last_peer && base_ts < last_base;
                let either_equal = peer_ts == last_peer || base_ts == last_base;
                if both_decreasing || either_equal {
                    return false;
                }
                // Clocks crossed: one axis decreased while the other increased.
                self.valid = false;
                self.outliers += OUTLIER_SCORE_CROSSED;
                self.outlier_total += 1.0;
                if self.outliers <= OUTLIER_SCORE_CROSSED {
                    return false;
                }
                do_reset = true;
            }
        }

        // Step 3: prediction and outlier classification.
        let mut prediction_error = 0.0;
        let mut prediction = 0.0;
        if !do_reset {
            if self.n > 0 {
                prediction = self.predict_nonempty(
                    base_ts,
                    &self.ts_base[..self.n],
                    &self.ts_peer[..self.n],
                    self.base_clock.freq,
                    self.relative_freq,
                    self.drift,
                );
                prediction_error = (prediction - peer_ts) / self.peer_clock.freq;
                let threshold = if self.n >= 4 {
                    OUTLIER_THRESHOLD_BASE_SECS
                } else {
                    2.0 * OUTLIER_THRESHOLD_BASE_SECS
                };

                base.increment_num_syncs();
                peer.increment_num_syncs();

                if prediction_error.abs() > threshold {
                    if base.bad_syncs() < 0.01 && peer.bad_syncs() < 0.01 {
                        ac.sync_bad();
                    }
                    if ac.sync_dont_use() {
                        return false;
                    }
                    if peer.bad_syncs() < 0.01 {
                        base.increment_num_outliers();
                    }
                    if base.bad_syncs() < 0.01 {
                        peer.increment_num_outliers();
                    }
                    self.outlier_total += 1.0;
                    if prediction_error.abs() > 2.0 * threshold {
                        self.outliers += OUTLIER_SCORE_SEVERE;
                        do_reset = true;
                    } else {
                        self.outliers += OUTLIER_SCORE_MILD;
                    }
                    if self.outliers <= OUTLIER_SCORE_RESET_GATE {
                        return false;
                    }
                    if do_reset && !self.jumped {
                        if base.bad_syncs() < 0.01 {
                            peer.increment_jumps();
                        }
                        if peer.bad_syncs() < 0.01 {
                            base.increment_jumps();
                        }
                        self.jumped = true;
                    }
                } else {
                    ac.sync_good();
                }
            } else {
                base.increment_num_syncs();
                peer.increment_num_syncs();
            }
        }

        // Step 4: sync-point smoothing.
        if self.n >= 2 && !do_reset {
            let prediction_base = self.predict_nonempty(
                peer_ts,
                &self.ts_peer[..self.n],
                &self.ts_base[..self.n],
                self.peer_clock.freq,
                self.i_relative_freq,
                self.i_drift,
            );
            let weight = if self.n >= 4 && self.drift_n > DRIFT_N_STABLE {
                SYNC_SMOOTHING_WEIGHT_MATURE
            } else {
                SYNC_SMOOTHING_WEIGHT_YOUNG
            };
            peer_ts += weight * (prediction - peer_ts);
            base_ts += weight * (prediction_base - base_ts);
        }

        // Step 5: final gate for aircraft opted out.
        if ac.sync_dont_use() {
            return false;
        }

        // Step 6: reset branch.
        if do_reset {
            let should_log = (base.focus() && peer.bad_syncs() < 0.01)
                || (peer.focus() && base.bad_syncs() < 0.01);
            if should_log {
                log::warn!(
                    target: "clocksync",
                    "ac {:06X} step_us {:.1} drift_ppm {:.1} outlier_percent {:.3} pair: {}:{}",
                    address,
                    prediction_error * 1e6,
                    self.drift * 1e6,
                    self.outlier_total / self.update_total * 100.0,
                    base.user(),
                    peer.user(),
                );
            }
            self.reset_offsets();
            self.outlier_reset_cooldown = FORCED_RESET_COOLDOWN;
            prediction_error = 0.0;
        }

        // Step 7: decay.
        self.outliers = (self.outliers - OUTLIER_SCORE_DECAY).max(0.0);
        self.cumulative_error = (self.cumulative_error + prediction_error)
            .clamp(-CUMULATIVE_ERROR_CLAMP_SECS, CUMULATIVE_ERROR_CLAMP_SECS);
        self.outlier_reset_cooldown = (self.outlier_reset_cooldown - 1).max(0);

        // Step 8: drift update.
        if !self.update_drift(base, peer, base_interval, peer_interval) {
            self.check_valid(now);
            return false;
        }

        // Step 9: offset update.
        self.ts_base[self.n] = base_ts;
        self.ts_peer[self.n] = peer_ts;
        let var_sample = prediction_error * prediction_error;
        self.var[self.n] = var_sample;
        self.n += 1;
        self.var_sum += var_sample;
        self.updated = now;
        self.check_valid(now);
        true
    }

    /// Drift PI control loop. Returns `false` if the sample was rejected
    /// (too large in magnitude, or too large a delta from the current
    /// estimate), in which case no drift state besides `drift_outliers`
    /// changed.
    fn update_drift<B, P>(&mut self, base: &B, peer: &P, base_interval: f64, peer_interval: f64) -> bool
    where
        B: ReceiverHandle,
        P: ReceiverHandle,
    {
        // Rescaled to avoid catastrophic cancellation near zero drift.
        let adjusted = base_interval * self.relative_freq;
        let new_drift = (peer_interval - adjusted) / adjusted;

        if new_drift.abs() > self.drift_max {
            return false;
        }

        if self.drift_n == 0 || self.drift_outliers > DRIFT_OUTLIER_RESET_TRIGGER {
            self.raw_drift = new_drift;
            self.drift = new_drift;
            self.i_drift = -self.drift / (1.0 + self.drift);
            self.drift_n = 0;
            self.cumulative_error = 0.0;
            self.drift_outliers = 0;
        }

        if self.drift_n == 0 {
            self.drift_n = 2;
            return true;
        }

        let drift_error = new_drift - self.raw_drift;
        if drift_error.abs() > self.drift_max_delta {
            self.drift_outliers += 1;
            if base.focus() || peer.focus() {
                log::warn!(
                    target: "clocksync",
                    "{}:{}: drift_error_ppm out of limits: {:.1}",
                    base.user(),
                    peer.user(),
                    drift_error * 1e6,
                );
            }
            return false;
        }
        self.drift_outliers = self.drift_outliers.saturating_sub(2);

        let mut kp = KP;
        if self.drift_n < DRIFT_N_STABLE {
            kp *= 1.0 + (0.3 / KP) * ((DRIFT_N_STABLE - self.drift_n) as f64 / DRIFT_N_STABLE as f64);
        }
        self.drift_n = self.drift_n.saturating_add(1);

        self.raw_drift += kp * drift_error;
        self.drift = self.raw_drift - KI * self.cumulative_error;
        self.i_drift = -self.drift / (1.0 + self.drift);
        true
    }

    /// Map a `base` timestamp to the corresponding `peer` timestamp.
    pub fn predict_peer(&self, base_ts: f64) -> Result<f64> {
        if self.n == 0 {
            return Err(ClockSyncError::EmptyPairing);
        }
        Ok(self.predict_nonempty(
            base_ts,
            &self.ts_base[..self.n],
            &self.ts_peer[..self.n],
            self.base_clock.freq,
            self.relative_freq,
            self.drift,
        ))
    }

    /// Map a `peer` timestamp to the corresponding `base` timestamp.
    pub fn predict_base(&self, peer_ts: f64) -> Result<f64> {
        if self.n == 0 {
            return Err(ClockSyncError::EmptyPairing);
        }
        Ok(self.predict_nonempty(
            peer_ts,
            &self.ts_peer[..self.n],
            &self.ts_base[..self.n],
            self.peer_clock.freq,
            self.i_relative_freq,
            self.i_drift,
        ))
    }

    /// Shared interpolation/extrapolation core for `predict_peer` and
    /// `predict_base`, and for `update`'s internal prediction/smoothing
    /// steps where the ring is already known to be non-empty. `query`/
    /// `target` are the ring's two axes (in query order), `query_freq` is
    /// the native frequency of the `query` axis's clock (used to size the
    /// tail-extrapolation window).
    ///
    /// Callers must pass a non-empty `query` slice; emptiness is a caller
    /// contract, not something this helper checks, since `update` already
    /// knows `n > 0`/`n >= 2` at its call sites and the public
    /// `predict_peer`/`predict_base` check it before delegating here.
    fn predict_nonempty(
        &self,
        query_ts: f64,
        query: &[f64],
        target: &[f64],
        query_freq: f64,
        rel_freq: f64,
        drift: f64,
    ) -> f64 {
        let n = query.len();
        debug_assert!(n > 0, "predict_nonempty requires a non-empty query slice");

        if query_ts < query[0] || n == 1 {
            return target[0] + (query_ts - query[0]) * rel_freq * (1.0 + drift);
        }

        let last = n - 1;
        if query_ts > query[last] - TAIL_EXTRAPOLATION_WINDOW_SECS * query_freq {
            let extrap_last = target[last] + (query_ts - query[last]) * rel_freq * (1.0 + drift);
            let gap = query[last] - query[last - 1];
            if gap > TAIL_EXTRAPOLATION_WINDOW_SECS * query_freq {
                return extrap_last;
            }
            let extrap_prev = target[last - 1] + (query_ts - query[last - 1]) * rel_freq * (1.0 + drift);
            return (extrap_last + extrap_prev) / 2.0;
        }

        // Linear scan for the first anchor at or past query_ts. The ring is
        // small enough (<= 32 elements) that this beats a branchy binary
        // search in practice.
        let mut i = 1;
        while i < n && query[i] < query_ts {
            i += 1;
        }
        let (t0, t1) = (query[i - 1], query[i]);
        let (v0, v1) = (target[i - 1], target[i]);
        v0 + (v1 - v0) * (query_ts - t0) / (t1 - t0)
    }

    /// Clear the offset ring and validity flag. Drift state is preserved.
    pub fn reset_offsets(&mut self) {
        self.n = 0;
        self.var_sum = 0.0;
        self.valid = false;
    }

    /// Recompute `variance`, `error`, and `valid` from current state.
    pub fn check_valid(&mut self, now: f64) -> bool {
        if self.n < 2 || self.drift_n < 2 {
            self.variance = UNDEFINED_STAT;
            self.error = UNDEFINED_STAT;
            self.valid = false;
            return false;
        }

        self.variance = self.var_sum / self.n as f64;
        self.error = self.variance.sqrt();
        self.valid = self.outlier_reset_cooldown < 1
            && self.n > 4
            && self.drift_n > 4
            && self.variance < VALIDITY_VARIANCE_THRESHOLD
            && (now - self.updated) < VALIDITY_FRESHNESS_SECS;
        self.valid
    }

    /// Drop ring entries older than `PRUNE_RETAIN_AGE_SECS`, keeping at
    /// most `PRUNE_FLOOR` of the newest entries regardless of age, and
    /// halve the diagnostic counters so they track recent behavior.
    fn prune_old_data(&mut self, now: f64) {
        if self.outlier_total > 0.0 || self.update_total > UPDATE_TOTAL_DECAY_THRESHOLD {
            self.outlier_total /= 2.0;
            self.update_total /= 2.0;
        }

        if self.n == 0 {
            self.check_valid(now);
            return;
        }

        let mut i = self.n.saturating_sub(PRUNE_FLOOR);
        while i < self.n
            && self.ts_base[self.n - 1] - self.ts_base[i] > PRUNE_RETAIN_AGE_SECS * self.base_clock.freq
        {
            i += 1;
        }

        if i > 0 {
            let retained = self.n - i;
            for j in 0..retained {
                self.ts_base[j] = self.ts_base[j + i];
                self.ts_peer[j] = self.ts_peer[j + i];
                self.var[j] = self.var[j + i];
            }
            self.n = retained;
            self.var_sum = self.var[..self.n].iter().sum();
        }

        self.check_valid(now);
    }
}
