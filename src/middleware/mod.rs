/// Middleware module
///
/// Bearer-token gate, per-IP rate limiting and request logging.

mod jwt_middleware;
mod rate_limit;
mod request_logger;

pub use jwt_middleware::{bearer_token, JwtMiddleware};
pub use rate_limit::{RateLimitMiddleware, RateLimiter};
pub use request_logger::{RequestId, RequestLogger};
