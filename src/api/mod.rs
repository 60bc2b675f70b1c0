//! REST API.
//!
//! Routes are nested under `/api/` and protected by a middleware stack:
//! Rate Limit → Auth → Access log → Handler. `api_router()` returns a
//! composable `Router`; `server` owns binding and shutdown.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{serve, start_server_on, ApiServer, ApiSession};
pub use types::ApiContext;
