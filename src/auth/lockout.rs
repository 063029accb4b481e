//! Brute-force protection for the shared app password
//!
//! Failures are counted per client IP, not per account: there is only one
//! password. Crossing the short threshold blocks the IP for an hour,
//! crossing the long one for a day. A successful login clears the record.

use crate::{config::settings::AuthSettings, types::response::BlockedIp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Failure records idle this long (and not blocked) are dropped by `sweep`
const RECORD_RETENTION: Duration = Duration::from_secs(86400);

/// Thresholds and durations of the two lockout tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub short_after: u32,
    pub short_for: Duration,
    pub long_after: u32,
    pub long_for: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            short_after: 5,
            short_for: Duration::from_secs(3600),
            long_after: 10,
            long_for: Duration::from_secs(86400),
        }
    }
}

impl From<&AuthSettings> for LockoutPolicy {
    fn from(auth: &AuthSettings) -> Self {
        Self {
            short_after: auth.max_failures_short,
            short_for: Duration::from_secs(auth.lockout_short_secs),
            long_after: auth.max_failures_long,
            long_for: Duration::from_secs(auth.lockout_long_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    count: u32,
    blocked_until: Option<Instant>,
    last_failure: Instant,
}

impl FailureRecord {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Per-IP failure accounting
#[derive(Debug, Default)]
pub struct LoginGuard {
    policy: LockoutPolicy,
    failures: Mutex<HashMap<String, FailureRecord>>,
}

impl LoginGuard {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Remaining lockout for `ip`, if it is currently blocked
    pub fn blocked_for(&self, ip: &str) -> Option<Duration> {
        self.failures
            .lock()
            .get(ip)
            .and_then(|r| r.remaining(Instant::now()))
    }

    /// Count a failed attempt and return the new failure count
    pub fn record_failure(&self, ip: &str) -> u32 {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        let record = failures.entry(ip.to_string()).or_insert(FailureRecord {
            count: 0,
            blocked_until: None,
            last_failure: now,
        });
        record.count += 1;
        record.last_failure = now;

        if record.count >= self.policy.long_after {
            record.blocked_until = Some(now + self.policy.long_for);
            warn!("IP {} blocked for {:?} after {} failures", ip, self.policy.long_for, record.count);
        } else if record.count >= self.policy.short_after {
            record.blocked_until = Some(now + self.policy.short_for);
            warn!("IP {} blocked for {:?} after {} failures", ip, self.policy.short_for, record.count);
        }
        record.count
    }

    pub fn clear(&self, ip: &str) {
        self.failures.lock().remove(ip);
    }

    /// Drop records that are unblocked and idle for a day
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        let before = failures.len();
        failures.retain(|_, r| {
            r.remaining(now).is_some() || now.duration_since(r.last_failure) <= RECORD_RETENTION
        });
        let removed = before - failures.len();
        if removed > 0 {
            info!("Cleaned {} old failure entries", removed);
        }
        removed
    }

    /// Failure table for the status endpoint
    pub fn status(&self) -> BTreeMap<String, BlockedIp> {
        let now = Instant::now();
        self.failures
            .lock()
            .iter()
            .map(|(ip, r)| {
                (
                    ip.clone(),
                    BlockedIp {
                        failures: r.count,
                        blocked_for: r.remaining(now).map(|d| d.as_secs()).unwrap_or(0),
                    },
                )
            })
            .collect()
    }
}

/// Human lockout remainder for the login page: `1h 5m` or `4m 10s`
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let minutes = secs / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else {
        format!("{}m {}s", minutes, secs % 60)
    }
}
