//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Audit logger — sees every response, including 401 and 429
//! 2. Rate limiter — reject early, save resources
//! 3. Auth validator — session lookup, injects `AuthUser`

pub mod audit;
pub mod auth;
pub mod rate;
