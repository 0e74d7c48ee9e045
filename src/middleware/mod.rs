//! Request gate: logging, CORS, rate limiting and bearer auth.
//!
//! Wrapped in `main` so that logging sees every request first, CORS answers
//! preflights before anything is counted, and auth is applied per resource.

pub mod auth;
pub mod cors;
pub mod logging;
pub mod rate_limit;

pub use auth::BearerAuth;
pub use cors::LoopbackCors;
pub use logging::RequestLogging;
pub use rate_limit::{RateLimit, RateLimiter};
