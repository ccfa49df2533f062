//! Outbound HTTP rate limiting.
//!
//! Sliding-window request accounting per (guild, plugin) plus an
//! administrative domain blocklist. A rejected request never touches the
//! network: the blocklist is consulted first, then the per-minute and
//! per-hour windows. Accepted requests are recorded as [`HttpLogEntry`]s in
//! a bounded recent window used both for accounting and operator
//! inspection; entries are never persisted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::HttpLimits;
use crate::error::{ExecError, ExecResult};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// One recorded outbound request.
#[derive(Debug, Clone)]
pub struct HttpLogEntry {
    /// When the request started.
    pub at: Instant,
    /// HTTP method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Response status, when one was received.
    pub status: Option<u16>,
    /// Response body size in bytes.
    pub response_bytes: usize,
    /// Wall time the request took.
    pub duration: Duration,
    /// Outcome tag: `ok`, `error`, `too_large`.
    pub outcome: &'static str,
}

#[derive(Default)]
struct Window {
    entries: VecDeque<HttpLogEntry>,
}

/// Sliding-window accounting and domain blocking for sandbox HTTP.
pub struct HttpRateLimiter {
    limits: HttpLimits,
    windows: RwLock<HashMap<(String, String), Window>>,
    blocked_domains: RwLock<HashSet<String>>,
}

impl HttpRateLimiter {
    /// Creates a limiter with the given limits.
    pub fn new(limits: HttpLimits) -> Self {
        Self {
            limits,
            windows: RwLock::new(HashMap::new()),
            blocked_domains: RwLock::new(HashSet::new()),
        }
    }

    /// The configured limits.
    pub fn limits(&self) -> &HttpLimits {
        &self.limits
    }

    /// Administratively blocks a domain. All future requests to it are
    /// rejected immediately, regardless of quota.
    pub fn block_domain(&self, domain: impl Into<String>) {
        let domain: String = domain.into();
        self.blocked_domains.write().insert(domain.to_lowercase());
    }

    /// Lifts a domain block.
    pub fn unblock_domain(&self, domain: &str) {
        self.blocked_domains.write().remove(&domain.to_lowercase());
    }

    /// Whether a domain is currently blocked.
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.blocked_domains.read().contains(&domain.to_lowercase())
    }

    /// Checks whether one more request is allowed right now.
    pub fn check(&self, guild_id: &str, plugin_id: &str, domain: &str) -> ExecResult<()> {
        self.check_at(guild_id, plugin_id, domain, Instant::now())
    }

    /// Checks whether one more request is allowed at `now`.
    pub fn check_at(
        &self,
        guild_id: &str,
        plugin_id: &str,
        domain: &str,
        now: Instant,
    ) -> ExecResult<()> {
        if self.is_blocked(domain) {
            return Err(ExecError::DomainBlocked(domain.to_string()));
        }

        let windows = self.windows.read();
        let Some(window) = windows.get(&(guild_id.to_string(), plugin_id.to_string())) else {
            return Ok(());
        };

        let last_minute = window
            .entries
            .iter()
            .filter(|e| now.duration_since(e.at) < MINUTE)
            .count();
        if last_minute >= self.limits.per_minute as usize {
            return Err(ExecError::HttpQuotaExceeded(format!(
                "{} requests in the last minute (limit {})",
                last_minute, self.limits.per_minute
            )));
        }

        let last_hour = window
            .entries
            .iter()
            .filter(|e| now.duration_since(e.at) < HOUR)
            .count();
        if last_hour >= self.limits.per_hour as usize {
            return Err(ExecError::HttpQuotaExceeded(format!(
                "{} requests in the last hour (limit {})",
                last_hour, self.limits.per_hour
            )));
        }

        Ok(())
    }

    /// Records a completed (or failed) request.
    pub fn record(&self, guild_id: &str, plugin_id: &str, entry: HttpLogEntry) {
        let mut windows = self.windows.write();
        let window = windows
            .entry((guild_id.to_string(), plugin_id.to_string()))
            .or_default();

        let now = entry.at;
        // Only the trailing hour matters for accounting.
        while let Some(front) = window.entries.front() {
            if now.duration_since(front.at) >= HOUR {
                window.entries.pop_front();
            } else {
                break;
            }
        }
        window.entries.push_back(entry);
    }

    /// A snapshot of the recent window for one plugin, newest last.
    pub fn recent(&self, guild_id: &str, plugin_id: &str) -> Vec<HttpLogEntry> {
        self.windows
            .read()
            .get(&(guild_id.to_string(), plugin_id.to_string()))
            .map(|w| w.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops the window for one plugin in one guild. Called on unload.
    pub fn clear_plugin(&self, guild_id: &str, plugin_id: &str) {
        self.windows
            .write()
            .remove(&(guild_id.to_string(), plugin_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, per_hour: u32) -> HttpRateLimiter {
        HttpRateLimiter::new(HttpLimits {
            per_minute,
            per_hour,
            ..HttpLimits::default()
        })
    }

    fn entry(at: Instant) -> HttpLogEntry {
        HttpLogEntry {
            at,
            method: "GET".into(),
            url: "https://api.example.com/data".into(),
            status: Some(200),
            response_bytes: 42,
            duration: Duration::from_millis(10),
            outcome: "ok",
        }
    }

    #[test]
    fn allows_up_to_the_minute_limit() {
        let limiter = limiter(3, 100);
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_at("g", "p", "api.example.com", now).unwrap();
            limiter.record("g", "p", entry(now));
        }
        // The Nth+1 request is rejected without touching the network.
        let err = limiter.check_at("g", "p", "api.example.com", now).unwrap_err();
        assert!(matches!(err, ExecError::HttpQuotaExceeded(_)));
    }

    #[test]
    fn window_slides_after_a_minute() {
        let limiter = limiter(2, 100);
        let start = Instant::now();
        limiter.record("g", "p", entry(start));
        limiter.record("g", "p", entry(start));
        assert!(limiter.check_at("g", "p", "api.example.com", start).is_err());

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at("g", "p", "api.example.com", later).is_ok());
    }

    #[test]
    fn hourly_limit_applies_after_minute_limit() {
        let limiter = limiter(100, 5);
        let start = Instant::now();
        for i in 0..5 {
            // Spread over the hour so the minute window stays clear.
            limiter.record("g", "p", entry(start + Duration::from_secs(i * 120)));
        }
        let now = start + Duration::from_secs(11 * 60);
        let err = limiter.check_at("g", "p", "api.example.com", now).unwrap_err();
        assert!(err.to_string().contains("hour"));
    }

    #[test]
    fn blocked_domain_rejected_regardless_of_quota() {
        let limiter = limiter(100, 100);
        limiter.block_domain("Evil.Example");
        let err = limiter
            .check_at("g", "p", "evil.example", Instant::now())
            .unwrap_err();
        assert!(matches!(err, ExecError::DomainBlocked(_)));

        limiter.unblock_domain("evil.example");
        assert!(limiter.check_at("g", "p", "evil.example", Instant::now()).is_ok());
    }

    #[test]
    fn plugins_have_independent_windows() {
        let limiter = limiter(1, 100);
        let now = Instant::now();
        limiter.record("g", "p1", entry(now));
        assert!(limiter.check_at("g", "p1", "api.example.com", now).is_err());
        assert!(limiter.check_at("g", "p2", "api.example.com", now).is_ok());
    }

    #[test]
    fn recent_returns_the_window() {
        let limiter = limiter(10, 10);
        let now = Instant::now();
        limiter.record("g", "p", entry(now));
        let recent = limiter.recent("g", "p");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, "ok");
    }
}
