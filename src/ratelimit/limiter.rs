//! The limiter facade: one decision per request.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::Result;

use super::keys::{KeyExtractor, SkipPredicate};
use super::request::RequestDescriptor;
use super::store::BucketStore;

/// Response header carrying the configured limit.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// Response header carrying the remaining token count.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Response header carrying the reset time in Unix seconds.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// A structured denial: a policy outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// User-facing message
    pub message: String,
    /// HTTP-style status, too-many-requests class
    pub status: u16,
}

/// The outcome of evaluating one request.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    /// The configured per-window maximum
    pub limit: u64,
    /// Minimum remaining tokens across all evaluated key-sets
    pub remaining: u64,
    /// Latest bucket expiration across all evaluated key-sets, Unix seconds
    pub reset: u64,
    /// Present when `allowed` is false
    pub rejection: Option<Rejection>,
}

impl Decision {
    /// The three rate-limit response headers for the transport to surface.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ]
    }
}

/// The public entry point of the engine.
///
/// Explicitly constructed and passed by the caller; there is no
/// process-wide default instance. Thread-safe and shareable via `Arc`.
pub struct Limiter {
    store: BucketStore,
    extractor: KeyExtractor,
    limit: u64,
    message: String,
    status: u16,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    /// Build a limiter over the wall clock.
    ///
    /// Fails fast on misconfiguration; a zero or negative rate or window
    /// never degrades to "always allow" at request time.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a limiter over an explicit time source.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let limit = config.max_per_window.round() as u64;
        let capacity = limit.max(1);
        let window = config.window();

        // Entry TTL equals the rate window: an identity idle for a full
        // window starts over with a fresh budget.
        let store = BucketStore::new(capacity, window, window, config.max_keys, clock.clone());

        let extractor = KeyExtractor::new(
            &config.lookup_key,
            config.dimensions,
            config.skip_paths,
            config.skip_headers,
        );

        Ok(Self {
            store,
            extractor,
            limit,
            message: config.message,
            status: config.status,
            clock,
        })
    }

    /// Install a custom exemption predicate.
    pub fn set_skip_predicate(&mut self, predicate: SkipPredicate) {
        self.extractor.set_skip_predicate(predicate);
    }

    /// Decide whether a request is admitted.
    ///
    /// Every key-set derived for the request is charged one token, even
    /// after an earlier key-set has already denied it, so the reported
    /// remaining/reset reflect the full policy set and stay consistent
    /// across retries.
    pub fn evaluate(&self, request: &RequestDescriptor) -> Decision {
        if self.extractor.should_skip(request) {
            trace!(path = request.path.as_str(), "Request exempt from rate limiting");
            return Decision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit,
                reset: self.clock.now().as_secs(),
                rejection: None,
            };
        }

        let mut remaining = f64::INFINITY;
        let mut reset = self.clock.now().as_secs();
        let mut denied = false;

        for keys in self.extractor.derive_key_sets(request) {
            let key = keys.join("|");
            let admission = self.store.check(&key);

            trace!(
                key = key.as_str(),
                allowed = admission.allowed,
                remaining = admission.remaining,
                "Checked rate limit key"
            );

            remaining = remaining.min(admission.remaining);
            reset = reset.max(admission.reset);
            denied |= !admission.allowed;
        }

        let remaining = if remaining.is_finite() {
            remaining.max(0.0).floor() as u64
        } else {
            self.limit
        };

        let rejection = if denied {
            debug!(
                path = request.path.as_str(),
                remaining = remaining,
                "Rate limit exceeded"
            );
            Some(Rejection {
                message: self.message.clone(),
                status: self.status,
            })
        } else {
            None
        };

        Decision {
            allowed: !denied,
            limit: self.limit,
            remaining,
            reset,
            rejection,
        }
    }

    /// Number of identity keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}
