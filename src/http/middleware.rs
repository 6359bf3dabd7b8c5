//! Admission middleware for axum routers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::client_key::ClientKeyExtractor;
use crate::ratelimit::AdmissionControl;

/// Body sent with every rejected request.
pub const TOO_MANY_REQUESTS_BODY: &str = "429 - Too Many Requests";

/// Per-client admission check placed in front of a router.
///
/// Every request is keyed by [`ClientKeyExtractor`] and checked against the
/// admission control. Admitted requests continue unchanged; rejected ones get
/// a plain `429` and never reach the wrapped routes.
pub struct Admission<A: AdmissionControl + 'static> {
    /// The admission control instance
    control: Arc<A>,
    /// How the client key is derived
    extractor: ClientKeyExtractor,
}

impl<A: AdmissionControl + 'static> Admission<A> {
    /// Create a new admission layer with the default key extractor.
    pub fn new(control: Arc<A>) -> Self {
        Self {
            control,
            extractor: ClientKeyExtractor::default(),
        }
    }

    /// Replace the key extractor.
    pub fn with_extractor(mut self, extractor: ClientKeyExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Install the admission check on `router`.
    ///
    /// The check runs before every route the router currently has.
    pub fn wrap<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, admit::<A>))
    }

    fn client_key(&self, request: &Request) -> String {
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string());

        self.extractor.extract(request.headers(), remote_addr.as_deref())
    }
}

impl<A: AdmissionControl + 'static> Clone for Admission<A> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware function that admits or rejects a single request.
async fn admit<A: AdmissionControl + 'static>(
    State(admission): State<Admission<A>>,
    request: Request,
    next: Next,
) -> Response {
    let key = admission.client_key(&request);

    if !admission.control.allow(&key, Instant::now()) {
        warn!(key = %key, "Client exceeded the rate limit");
        return too_many_requests();
    }

    trace!(key = %key, "Request admitted");
    next.run(request).await
}

fn too_many_requests() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS_BODY).into_response()
}
