//! Clock synchronization between the server's loop time and the local clock.
//!
//! The server stamps every audio frame with its own monotonic "loop time"
//! (microseconds since the server process started). To play a frame at the
//! right instant, the client estimates `server_time - local_time` from
//! NTP-style round trips and keeps the estimate current with a fixed-gain
//! filter over offset and drift.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::time::now_us;

/// Samples with a round trip above this are discarded outright (congested
/// network, too noisy to trust).
const MAX_RTT_US: i64 = 100_000;

/// A residual beyond this is presumed to be a clock jump, not drift.
const MAX_RESIDUAL_US: f64 = 50_000.0;

/// Congestion gate: a sample whose rtt exceeds this multiple of the recent
/// best rtt carries too much queueing delay to be useful, even when it is
/// under the absolute cap.
const RTT_OUTLIER_FACTOR: i64 = 5;

/// Number of recent accepted rtts kept for the congestion gate.
const RTT_WINDOW: usize = 10;

/// Estimate goes stale when no sample is accepted for this long.
const STALE_AFTER: Duration = Duration::from_secs(5);

/// RTT bound for `Good` quality.
const GOOD_RTT_US: i64 = 50_000;

/// Synchronization quality, consulted by higher layers. Quality never gates
/// scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQuality {
    /// Last accepted round trip under 50 ms.
    Good,
    /// Last accepted round trip between 50 ms and 100 ms.
    Degraded,
    /// No sample accepted recently (or ever).
    Lost,
}

/// Fixed-gain offset/drift estimator.
#[derive(Debug)]
pub struct ClockSync {
    /// Filter gain applied to offset residuals.
    gain: f64,
    /// Local microsecond at which this instance was created; anchors the
    /// loop-time origin before the first sample arrives.
    client_start_us: i64,
    /// Estimated `server_time - local_time` in microseconds.
    offset_us: f64,
    /// Estimated offset change per microsecond of local time.
    drift: f64,
    /// Local receive time (t4) of the last accepted sample.
    last_update_local_us: i64,
    /// Local microsecond corresponding to server loop time zero.
    loop_origin_local_us: i64,
    /// Accepted sample count.
    sample_count: u64,
    /// RTT of the last accepted sample.
    last_rtt_us: Option<i64>,
    /// Recent accepted rtts, for the congestion gate.
    recent_rtts: VecDeque<i64>,
    /// Wall instant of the last accepted sample, for staleness.
    last_accepted_at: Option<Instant>,
}

impl ClockSync {
    /// Creates a fresh synchronizer. Until the first sample is accepted,
    /// conversions assume the server and client started simultaneously.
    #[must_use]
    pub fn new(gain: f64) -> Self {
        let client_start_us = now_us();
        Self {
            gain,
            client_start_us,
            offset_us: 0.0,
            drift: 0.0,
            last_update_local_us: client_start_us,
            loop_origin_local_us: client_start_us,
            sample_count: 0,
            last_rtt_us: None,
            recent_rtts: VecDeque::with_capacity(RTT_WINDOW),
            last_accepted_at: None,
        }
    }

    /// Processes one sync round trip.
    ///
    /// `t1` = client transmit, `t2` = server receive, `t3` = server transmit
    /// (server loop time), `t4` = client receive. Returns whether the sample
    /// was accepted into the filter.
    pub fn process(&mut self, t1: i64, t2: i64, t3: i64, t4: i64) -> bool {
        let rtt = (t4 - t1) - (t3 - t2);
        if rtt < 0 || rtt > MAX_RTT_US {
            tracing::debug!(rtt_us = rtt, "discarding sync sample: rtt out of range");
            return false;
        }
        if let Some(best) = self.recent_rtts.iter().min() {
            if rtt > best.saturating_mul(RTT_OUTLIER_FACTOR) {
                tracing::debug!(
                    rtt_us = rtt,
                    best_rtt_us = best,
                    "discarding sync sample: congested round trip"
                );
                return false;
            }
        }

        let measured = ((t2 - t1) as f64 + (t3 - t4) as f64) / 2.0;

        match self.sample_count {
            0 => {
                self.offset_us = measured;
                self.drift = 0.0;
            }
            1 => {
                let dt = (t4 - self.last_update_local_us) as f64;
                if dt <= 0.0 {
                    tracing::debug!("discarding sync sample: non-monotonic local clock");
                    return false;
                }
                self.drift = (measured - self.offset_us) / dt;
                self.offset_us = measured;
            }
            _ => {
                let dt = (t4 - self.last_update_local_us) as f64;
                if dt <= 0.0 {
                    tracing::debug!("discarding sync sample: non-monotonic local clock");
                    return false;
                }
                let predicted = self.offset_us + self.drift * dt;
                let residual = measured - predicted;
                if residual.abs() > MAX_RESIDUAL_US {
                    tracing::warn!(
                        residual_us = residual,
                        "discarding sync sample: presumed clock jump"
                    );
                    return false;
                }
                self.offset_us = predicted + self.gain * residual;
                self.drift += self.gain * (residual / dt);
            }
        }

        self.last_update_local_us = t4;
        self.sample_count += 1;
        self.last_rtt_us = Some(rtt);
        self.last_accepted_at = Some(Instant::now());
        if self.recent_rtts.len() == RTT_WINDOW {
            self.recent_rtts.pop_front();
        }
        self.recent_rtts.push_back(rtt);
        self.loop_origin_local_us = self.client_start_us - self.offset_us.round() as i64;
        true
    }

    /// Converts a server loop-time microsecond to the local time base.
    ///
    /// Drift is implicitly absorbed because the loop origin is recomputed on
    /// every accepted sample.
    #[must_use]
    pub fn server_to_local(&self, server_us: i64) -> i64 {
        self.loop_origin_local_us + server_us
    }

    /// Converts a local microsecond to server loop time.
    #[must_use]
    pub fn local_to_server(&self, local_us: i64) -> i64 {
        local_us - self.loop_origin_local_us
    }

    /// Current offset estimate in microseconds.
    #[must_use]
    pub fn offset_us(&self) -> i64 {
        self.offset_us.round() as i64
    }

    /// RTT of the last accepted sample.
    #[must_use]
    pub fn rtt_us(&self) -> Option<i64> {
        self.last_rtt_us
    }

    /// Number of accepted samples since creation or the last reset.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Current synchronization quality.
    #[must_use]
    pub fn quality(&self) -> SyncQuality {
        let stale = self
            .last_accepted_at
            .map_or(true, |at| at.elapsed() > STALE_AFTER);
        if stale {
            return SyncQuality::Lost;
        }
        match self.last_rtt_us {
            Some(rtt) if rtt < GOOD_RTT_US => SyncQuality::Good,
            Some(rtt) if rtt <= MAX_RTT_US => SyncQuality::Degraded,
            _ => SyncQuality::Lost,
        }
    }

    /// Resets all estimator state. The construction-time anchor is retained
    /// only as the fallback origin, not as a valid sync.
    pub fn reset(&mut self) {
        self.offset_us = 0.0;
        self.drift = 0.0;
        self.last_update_local_us = self.client_start_us;
        self.loop_origin_local_us = self.client_start_us;
        self.sample_count = 0;
        self.last_rtt_us = None;
        self.recent_rtts.clear();
        self.last_accepted_at = None;
    }
}
