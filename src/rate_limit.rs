/// Request rate limiting
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{PortalError, PortalResult},
};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated_rps: u32,
    unauthenticated_rps: u32,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let auth_quota = Quota::per_second(non_zero(config.authenticated_rps))
            .allow_burst(non_zero(config.burst_size));

        // Anonymous callers get a fifth of the burst
        let unauth_quota = Quota::per_second(non_zero(config.unauthenticated_rps))
            .allow_burst(non_zero(config.burst_size / 5));

        Self {
            enabled: config.enabled,
            authenticated_rps: config.authenticated_rps,
            unauthenticated_rps: config.unauthenticated_rps,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check rate limit for a request carrying credentials
    pub fn check_authenticated(&self) -> PortalResult<()> {
        self.authenticated
            .check()
            .map_err(|_| PortalError::RateLimitExceeded {
                retry_after: Duration::from_secs(1),
            })
    }

    /// Check rate limit for an anonymous request
    pub fn check_unauthenticated(&self) -> PortalResult<()> {
        self.unauthenticated
            .check()
            .map_err(|_| PortalError::RateLimitExceeded {
                retry_after: Duration::from_secs(1),
            })
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, PortalError> {
    let limiter = &ctx.rate_limiter;
    if !limiter.is_enabled() {
        return Ok(next.run(request).await);
    }

    let has_auth_header = request.headers().contains_key("authorization");
    let limit = if has_auth_header {
        limiter.check_authenticated()?;
        limiter.authenticated_rps
    } else {
        if let Err(e) = limiter.check_unauthenticated() {
            tracing::warn!("Rate limit hit on {}", request.uri().path());
            return Err(e);
        }
        limiter.unauthenticated_rps
    };

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("X-RateLimit-Limit", HeaderValue::from(limit));
    Ok(response)
}
