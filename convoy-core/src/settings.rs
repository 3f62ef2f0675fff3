use std::time::Duration;

/// Tunables for request handling and fan-out
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// How long a request waits for a convoy lock before retrying once
    pub lock_timeout: Duration,
    /// Per-subscriber event buffer; a subscriber that falls this far
    /// behind is dropped and must re-subscribe
    pub subscriber_buffer: usize,
    /// Upper bound for one address lookup
    pub lookup_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            subscriber_buffer: 256,
            lookup_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub interval: Duration,
    /// Records older than this are stale
    pub ttl: Duration,
    /// How long a member may stay without ever reporting a position
    pub grace_period: Duration,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            ttl: Duration::from_secs(30),
            grace_period: Duration::from_secs(30),
        }
    }
}
