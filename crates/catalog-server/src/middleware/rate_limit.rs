//! Rate limiting middleware using tower-governor

use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

/// Default requests per minute allowed per client IP.
pub const DEFAULT_REQUESTS_PER_MINUTE: u64 = 100;

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute allowed per client IP; 0 disables the limiter
    pub requests_per_minute: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

impl RateLimitConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        Self {
            requests_per_minute: std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.requests_per_minute > 0
    }
}

/// Wrap `router` in a per-IP rate limiter.
///
/// The key extractor reads the peer address, so the router must be served
/// with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn with_rate_limit(router: Router, config: &RateLimitConfig) -> Router {
    if !config.is_enabled() {
        return router;
    }

    // e.g. 100/min: one token every 600ms, bursts of up to 100
    let replenishment_ms = (60_000 / config.requests_per_minute).max(1);
    let burst_size = u32::try_from(config.requests_per_minute).unwrap_or(u32::MAX);

    match GovernorConfigBuilder::default()
        .per_millisecond(replenishment_ms)
        .burst_size(burst_size)
        .finish()
    {
        Some(governor_conf) => router.layer(GovernorLayer {
            config: Arc::new(governor_conf),
        }),
        None => {
            tracing::warn!(
                requests_per_minute = config.requests_per_minute,
                "Invalid rate limit settings, request rate limiting disabled"
            );
            router
        },
    }
}
