//! Fixed-window admission limits for operation submission.
//!
//! Applies before operations reach consensus; the apply path never
//! consults it. Trusted identities are counted on their own, unverified
//! identities share a bucket with their parent's other children, and
//! everyone else shares one global bucket.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::RateLimitConfig;
use crate::error::{EngineError, Result};

/// The bucket shared by identities with neither verification nor parent.
pub const SHARED_BUCKET: &str = "shared";

/// Bucket name for unverified children of `parent`.
pub fn parent_bucket(parent: &str) -> String {
    format!("{SHARED_BUCKET}_{parent}")
}

struct Window {
    counts: HashMap<String, u32>,
    reset_at: i64,
}

/// Counts submissions per bucket within the current window.
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window {
                counts: HashMap::new(),
                reset_at: i64::MIN,
            }),
        }
    }

    /// Count one submission against the first of `buckets` with room left.
    ///
    /// An operation with several senders passes if any of their buckets
    /// still has capacity.
    pub fn admit(&self, buckets: &[String], now: i64) -> Result<()> {
        let mut window = self
            .window
            .lock()
            .map_err(|e| EngineError::Poisoned(e.to_string()))?;

        if now > window.reset_at {
            window.counts.clear();
            window.reset_at = now.saturating_add(self.config.window_ms);
        }

        let shared = [SHARED_BUCKET.to_owned()];
        let buckets = if buckets.is_empty() { &shared[..] } else { buckets };

        for bucket in buckets {
            let count = window.counts.entry(bucket.clone()).or_insert(0);
            *count += 1;
            if *count <= self.config.limit {
                return Ok(());
            }
        }

        tracing::debug!(?buckets, "submission rate limited");
        Err(EngineError::RateLimited(format!(
            "more than {} operations per {}ms",
            self.config.limit, self.config.window_ms
        )))
    }
}
