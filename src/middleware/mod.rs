// Middleware for authentication, CORS, rate limiting and timing

pub mod auth;
pub mod cors;
pub mod rate_limiter;
pub mod timing;

pub use auth::*;
pub use cors::*;
pub use rate_limiter::*;
pub use timing::*;
