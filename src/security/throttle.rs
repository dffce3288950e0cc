//! Soft back-pressure ahead of the hard rate limits.
//!
//! Counts requests per identity in a fixed window. Past `delay_after`
//! requests, each further request is held back by `delay` times its distance
//! over the threshold, capped at `max_delay`. The throttle never rejects.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::ThrottleConfig;
use crate::identity::ClientIdentity;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    pub enabled: bool,
    pub window: Duration,
    pub delay_after: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    /// Successful responses give their count back.
    pub skip_successful_requests: bool,
}

impl From<&ThrottleConfig> for ThrottleSettings {
    fn from(config: &ThrottleConfig) -> Self {
        Self {
            enabled: config.enabled,
            window: Duration::from_secs(config.window_secs),
            delay_after: config.delay_after,
            delay: Duration::from_millis(config.delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            skip_successful_requests: config.skip_successful_requests,
        }
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self::from(&ThrottleConfig::default())
    }
}

/// Delay assigned to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleTicket {
    pub delay: Duration,
    window_start: Option<Instant>,
}

impl ThrottleTicket {
    fn untracked() -> Self {
        Self {
            delay: Duration::ZERO,
            window_start: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
pub struct SpeedThrottle {
    settings: ThrottleSettings,
    counters: DashMap<ClientIdentity, WindowCounter>,
    clock: Arc<dyn Clock>,
}

impl SpeedThrottle {
    pub fn new(settings: ThrottleSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            counters: DashMap::new(),
            clock,
        }
    }

    /// Count a request and return how long to hold it.
    pub fn register(&self, identity: &ClientIdentity) -> ThrottleTicket {
        if !self.settings.enabled {
            return ThrottleTicket::untracked();
        }
        let now = self.clock.now();

        let (count, window_start) = {
            let mut counter = self
                .counters
                .entry(identity.clone())
                .or_insert(WindowCounter {
                    count: 0,
                    window_start: now,
                });
            if now.saturating_duration_since(counter.window_start) >= self.settings.window {
                counter.count = 0;
                counter.window_start = now;
            }
            counter.count = counter.count.saturating_add(1);
            (counter.count, counter.window_start)
        };

        let delay = self.delay_for(count);
        if !delay.is_zero() {
            tracing::debug!(
                client = %identity,
                count,
                delay_ms = delay.as_millis() as u64,
                "Throttling client"
            );
            metrics::record_throttle_delay(delay);
        }
        ThrottleTicket {
            delay,
            window_start: Some(window_start),
        }
    }

    /// Report the response status of a registered request.
    pub fn record_outcome(&self, identity: &ClientIdentity, ticket: &ThrottleTicket, success: bool) {
        if !(self.settings.skip_successful_requests && success) {
            return;
        }
        let Some(window_start) = ticket.window_start else {
            return;
        };
        if let Some(mut counter) = self.counters.get_mut(identity) {
            if counter.window_start == window_start && counter.count > 0 {
                counter.count -= 1;
            }
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.settings.window;
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.saturating_duration_since(counter.window_start) < window);
        before.saturating_sub(self.counters.len())
    }

    fn delay_for(&self, count: u32) -> Duration {
        let over = count.saturating_sub(self.settings.delay_after);
        if over == 0 {
            return Duration::ZERO;
        }
        self.settings
            .delay
            .saturating_mul(over)
            .min(self.settings.max_delay)
    }
}
