use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

use crate::error::{ApiError, ErrorCode};

/// Configurable rate limit values. All read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `RATE_LIMIT_SENDS` — Max envelope sends per window per (device, conversation) (default: 30)
/// - `RATE_LIMIT_SENDS_WINDOW_SECS` — Send quota window (default: 10)
/// - `RATE_LIMIT_SESSION_STARTS` — Max session.start attempts per minute per IP (default: 10)
/// - `RATE_LIMIT_ROOM_OPS` — Max room mutations per hour per user (default: 60)
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Envelope sends per window per (device_id, conv_id)
    pub sends_max: usize,
    pub sends_window_secs: u64,
    /// session.start attempts per minute per IP
    pub session_starts_max: usize,
    pub session_starts_window_secs: u64,
    /// Room create/invite/remove/promote/demote per hour per user
    pub room_ops_max: usize,
    pub room_ops_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sends_max: 30,
            sends_window_secs: 10,
            session_starts_max: 10,
            session_starts_window_secs: 60,
            room_ops_max: 60,
            room_ops_window_secs: 3600,
        }
    }
}

impl RateLimitConfig {
    /// Create a new RateLimitConfig from environment variables, with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_SENDS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.sends_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_SENDS_WINDOW_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.sends_window_secs = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_SESSION_STARTS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.session_starts_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_ROOM_OPS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.room_ops_max = n;
        }

        config
    }
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (i.e. a slot opens).
    /// 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

impl RateLimitInfo {
    /// Wire error for a denied check, carrying the retry hint in the body.
    pub fn into_error(self, what: &str) -> ApiError {
        ApiError::with_details(
            ErrorCode::RateLimited,
            format!("Rate limited: max {} {} per {}s", self.limit, what, self.retry_after_secs.max(1)),
            serde_json::json!({
                "retry_after_secs": self.retry_after_secs,
                "limit": self.limit,
                "remaining": 0,
            }),
        )
    }
}

/// Sliding-window limiter keyed by caller-composed strings such as
/// `send:<device>:<conv>`.
#[derive(Clone)]
pub struct RateLimiter {
    limits: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if a request is allowed. Returns true if allowed, false if rate limited.
    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    /// Check rate limit and return detailed info for response headers.
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        remaining: 0,
                        limit: max,
                        retry_after_secs: 1,
                    }
                }
            };
            let elapsed = now.duration_since(*oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1 // +1 to ensure the slot is actually open
            } else {
                1
            };

            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();

        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }
}

/// Wrapper that adds standard rate limit headers to any JSON response.
/// Headers: X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset
pub struct RateLimited<T> {
    pub inner: Json<T>,
    pub info: RateLimitInfo,
}

impl<T> RateLimited<T> {
    pub fn new(inner: Json<T>, info: RateLimitInfo) -> Self {
        Self { inner, info }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let mut response = Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new(
                "X-RateLimit-Limit",
                self.info.limit.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Remaining",
                self.info.remaining.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.info.retry_after_secs.to_string(),
            ))
            .finalize();

        if !self.info.allowed {
            response.set_header(Header::new(
                "Retry-After",
                self.info.retry_after_secs.to_string(),
            ));
        }

        Ok(response)
    }
}
