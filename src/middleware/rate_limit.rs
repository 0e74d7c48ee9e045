//! Fixed-window rate limiting per client IP.

use crate::error::AppError;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use std::collections::HashMap;
use std::future::{ready, Ready};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time source for the limiter, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request from `ip`. `false` means over the cap; nothing is
    /// counted in that case.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = entries.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop entries whose window ended; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - entries.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Run [`RateLimiter::sweep`] once per window until the process exits.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep();
                if removed > 0 {
                    debug!(removed, remaining = self.tracked_clients(), "Rate limiter sweep");
                }
            }
        })
    }
}

pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service,
            limiter: Arc::clone(&self.limiter),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // connections without a peer address (unix sockets, tests) share one bucket
        let ip = req
            .peer_addr()
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        if !self.limiter.check(ip) {
            warn!(client_ip = %ip, path = %req.path(), "Rate limit exceeded");
            let response = AppError::TooManyRequests("rate limit exceeded".to_string()).error_response();
            let response = req.into_response(response).map_into_right_body();
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}
