//! Adaptive rate limiting for outbound sensor samples.
//!
//! The send interval tracks an exponential moving average of observed
//! round-trip latency, so a slow interpretation backend automatically slows
//! the sample stream down instead of piling up requests.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::LinkSettings;
use crate::interpreter::MotionSample;

/// Weight of the previous EMA value when folding in a new latency sample.
const EMA_RETAIN: f64 = 0.7;
/// Headroom factor applied to the EMA when deriving the send interval.
const INTERVAL_HEADROOM: f64 = 1.2;

/// Snapshot of the limiter state for monitoring.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub pending_response: bool,
    pub measured_latency_ema_ms: f64,
    pub adaptive_interval_ms: u64,
    pub has_buffered_sample: bool,
}

/// Adaptive rate limiter with a latest-wins buffered slot.
///
/// All methods take `now` explicitly so the limiter is deterministic under
/// test; callers pass `Instant::now()` in production.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    min_interval: Duration,
    max_interval: Duration,
    request_timeout: Duration,
    latency_ema_ms: f64,
    pending_response: bool,
    last_send_at: Option<Instant>,
    /// Most recent sample that could not be transmitted; superseded samples
    /// are dropped, never queued.
    buffered: Option<MotionSample>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: &LinkSettings) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            latency_ema_ms: 0.0,
            pending_response: false,
            last_send_at: None,
            buffered: None,
        }
    }

    /// Current send interval: `clamp(ema * 1.2, min, max)`.
    pub fn adaptive_interval(&self) -> Duration {
        let target = Duration::from_millis((self.latency_ema_ms * INTERVAL_HEADROOM) as u64);
        target.clamp(self.min_interval, self.max_interval)
    }

    fn eligible(&self, now: Instant) -> bool {
        if self.pending_response {
            return false;
        }
        match self.last_send_at {
            Some(at) => now.duration_since(at) >= self.adaptive_interval(),
            None => true,
        }
    }

    /// Offer a sample for transmission.
    ///
    /// Returns the sample to transmit when eligible, marking the request
    /// pending; otherwise stores it in the latest-wins slot and returns
    /// `None`.
    pub fn offer(&mut self, sample: MotionSample, now: Instant) -> Option<MotionSample> {
        if self.eligible(now) {
            // A fresh eligible sample supersedes anything still in the slot;
            // releasing the older one later would reorder the stream.
            self.buffered = None;
            self.mark_sent(now);
            Some(sample)
        } else {
            self.buffered = Some(sample);
            None
        }
    }

    /// Release the buffered sample if the limiter has become eligible.
    pub fn take_buffered(&mut self, now: Instant) -> Option<MotionSample> {
        if self.buffered.is_some() && self.eligible(now) {
            self.mark_sent(now);
            self.buffered.take()
        } else {
            None
        }
    }

    fn mark_sent(&mut self, now: Instant) {
        self.pending_response = true;
        self.last_send_at = Some(now);
    }

    /// Record a response for the outstanding request.
    pub fn on_response(&mut self, now: Instant) {
        if !self.pending_response {
            return;
        }
        if let Some(at) = self.last_send_at {
            let latency_ms = now.duration_since(at).as_secs_f64() * 1000.0;
            self.fold_latency(latency_ms);
        }
        self.pending_response = false;
    }

    /// Resolve the outstanding request as timed out.
    ///
    /// Clears `pending_response` so the limiter cannot stall permanently, and
    /// folds the timeout bound into the EMA so a stalled backend stretches
    /// the interval.
    pub fn on_timeout(&mut self) {
        if !self.pending_response {
            return;
        }
        self.fold_latency(self.request_timeout.as_secs_f64() * 1000.0);
        self.pending_response = false;
    }

    /// True when the outstanding request has exceeded the timeout bound.
    pub fn request_timed_out(&self, now: Instant) -> bool {
        self.pending_response
            && self
                .last_send_at
                .is_some_and(|at| now.duration_since(at) >= self.request_timeout)
    }

    fn fold_latency(&mut self, latency_ms: f64) {
        if self.latency_ema_ms == 0.0 {
            self.latency_ema_ms = latency_ms;
        } else {
            self.latency_ema_ms =
                self.latency_ema_ms * EMA_RETAIN + latency_ms * (1.0 - EMA_RETAIN);
        }
    }

    pub fn pending_response(&self) -> bool {
        self.pending_response
    }

    pub fn latency_ema_ms(&self) -> f64 {
        self.latency_ema_ms
    }

    /// Drop limiter state, e.g. when the session stops.
    pub fn clear(&mut self) {
        self.pending_response = false;
        self.buffered = None;
        self.last_send_at = None;
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            pending_response: self.pending_response,
            measured_latency_ema_ms: self.latency_ema_ms,
            adaptive_interval_ms: self.adaptive_interval().as_millis() as u64,
            has_buffered_sample: self.buffered.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(min_ms: u64, max_ms: u64) -> LinkSettings {
        LinkSettings {
            min_interval_ms: min_ms,
            max_interval_ms: max_ms,
            ..Default::default()
        }
    }

    fn sample(t: i64) -> MotionSample {
        MotionSample::new(1.0, 0.0, 0.0, t, "test")
    }

    #[test]
    fn test_first_send_is_immediate() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(1000, 10_000));
        let now = Instant::now();
        assert!(limiter.offer(sample(0), now).is_some());
        assert!(limiter.pending_response());
    }

    #[test]
    fn test_burst_coalesces_to_latest_sample() {
        // Sends at t=0, t=300ms, t=600ms with min_interval=1000ms: only t=0
        // transmits; the t=600ms sample sits in the buffered slot and is what
        // goes out once eligible at t=1000ms.
        let mut limiter = AdaptiveRateLimiter::new(&settings(1000, 10_000));
        let t0 = Instant::now();

        assert!(limiter.offer(sample(0), t0).is_some());
        assert!(limiter.offer(sample(300), t0 + Duration::from_millis(300)).is_none());
        assert!(limiter.offer(sample(600), t0 + Duration::from_millis(600)).is_none());

        // Response arrives at t=700ms, clearing the pending flag.
        limiter.on_response(t0 + Duration::from_millis(700));

        // Still inside min_interval at t=900ms.
        assert!(limiter.take_buffered(t0 + Duration::from_millis(900)).is_none());

        let sent = limiter.take_buffered(t0 + Duration::from_millis(1000));
        assert_eq!(sent.map(|s| s.timestamp), Some(600));
    }

    #[test]
    fn test_at_most_one_pending_request() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(0, 10_000));
        let t0 = Instant::now();

        assert!(limiter.offer(sample(0), t0).is_some());
        // min_interval is zero, but the pending response still blocks.
        assert!(limiter
            .offer(sample(1), t0 + Duration::from_millis(50))
            .is_none());

        limiter.on_response(t0 + Duration::from_millis(100));
        assert!(limiter
            .offer(sample(2), t0 + Duration::from_millis(100))
            .is_some());
    }

    #[test]
    fn test_transmissions_never_closer_than_min_interval() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(500, 10_000));
        let t0 = Instant::now();
        let mut sent_at = Vec::new();

        for i in 0..50u64 {
            let now = t0 + Duration::from_millis(i * 100);
            if limiter.offer(sample(i as i64), now).is_some() {
                sent_at.push(now);
                // Immediate response so only the interval gates sending.
                limiter.on_response(now + Duration::from_millis(1));
            }
        }

        for pair in sent_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_latency_ema_stretches_interval() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(100, 60_000));
        let t0 = Instant::now();

        limiter.offer(sample(0), t0);
        limiter.on_response(t0 + Duration::from_secs(2));

        // First observation seeds the EMA directly: 2000ms * 1.2 = 2400ms.
        assert_eq!(limiter.adaptive_interval(), Duration::from_millis(2400));

        // A fast follow-up pulls the EMA back down: 2000*0.7 + 100*0.3 = 1430.
        let t1 = t0 + Duration::from_secs(3);
        limiter.offer(sample(1), t1);
        limiter.on_response(t1 + Duration::from_millis(100));
        assert!((limiter.latency_ema_ms() - 1430.0).abs() < 1.0);
    }

    #[test]
    fn test_interval_clamped_to_bounds() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(1000, 5000));
        let t0 = Instant::now();

        // Huge latency: clamped to max.
        limiter.offer(sample(0), t0);
        limiter.on_response(t0 + Duration::from_secs(60));
        assert_eq!(limiter.adaptive_interval(), Duration::from_millis(5000));
    }

    #[test]
    fn test_timeout_clears_pending_and_stretches_ema() {
        let config = LinkSettings {
            min_interval_ms: 100,
            max_interval_ms: 60_000,
            request_timeout_secs: 30,
            ..Default::default()
        };
        let mut limiter = AdaptiveRateLimiter::new(&config);
        let t0 = Instant::now();

        limiter.offer(sample(0), t0);
        assert!(!limiter.request_timed_out(t0 + Duration::from_secs(29)));
        assert!(limiter.request_timed_out(t0 + Duration::from_secs(30)));

        limiter.on_timeout();
        assert!(!limiter.pending_response());
        // The timeout bound was folded into the EMA.
        assert!(limiter.latency_ema_ms() >= 30_000.0);
    }

    #[test]
    fn test_eligible_send_discards_stale_buffered_sample() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(1000, 10_000));
        let t0 = Instant::now();

        assert!(limiter.offer(sample(0), t0).is_some());
        // Buffered while ineligible.
        assert!(limiter.offer(sample(300), t0 + Duration::from_millis(300)).is_none());
        limiter.on_response(t0 + Duration::from_millis(500));

        // A fresh sample arrives once eligible; it must supersede the slot.
        let sent = limiter.offer(sample(1100), t0 + Duration::from_millis(1100));
        assert_eq!(sent.map(|s| s.timestamp), Some(1100));
        limiter.on_response(t0 + Duration::from_millis(1200));

        // The stale t=300 sample must never go out after t=1100 did.
        assert!(limiter
            .take_buffered(t0 + Duration::from_secs(30))
            .is_none());
        assert!(!limiter.stats().has_buffered_sample);
    }

    #[test]
    fn test_clear_resets_slot_and_pending() {
        let mut limiter = AdaptiveRateLimiter::new(&settings(1000, 10_000));
        let t0 = Instant::now();

        limiter.offer(sample(0), t0);
        limiter.offer(sample(1), t0);
        assert!(limiter.stats().has_buffered_sample);

        limiter.clear();
        assert!(!limiter.pending_response());
        assert!(!limiter.stats().has_buffered_sample);
    }
}
