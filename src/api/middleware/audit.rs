//! Request-level access logging.
//!
//! Records `METHOD path` and the response status for every API request,
//! including ones refused by the auth or rate layers. Runs outermost, so
//! the caller is read back from the response, where `require_auth` leaves
//! a [`RequestActor`] once the token checks out.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::api::types::ApiContext;

/// The authenticated user behind a response.
#[derive(Debug, Clone, Copy)]
pub struct RequestActor(pub Uuid);

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let ctx = req.extensions().get::<ApiContext>().cloned();

    let response = next.run(req).await;

    if let Some(ctx) = ctx {
        let user_id = response
            .extensions()
            .get::<RequestActor>()
            .map(|actor| actor.0.to_string());
        let status = response.status().as_u16();
        ctx.core
            .log_access(user_id, &format!("{method} {path}"), &format!("status:{status}"));
    }

    response
}
