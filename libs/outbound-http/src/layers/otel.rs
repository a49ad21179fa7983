//! Client span per outbound request
//!
//! Enabled with [`options::with_tracing`](crate::options::with_tracing).
//! The span is named `outgoing_http` and its context is what gets
//! propagated to the server.

use http::{Request, Response, Uri};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{Instrument, Level, Span};

/// Wraps dispatch in an [`OtelService`]
#[derive(Clone, Default)]
pub struct OtelLayer;

impl OtelLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for OtelLayer {
    type Service = OtelService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OtelService { inner }
    }
}

/// Opens the request span and writes its trace context into the request
/// headers before dispatching.
#[derive(Clone)]
pub struct OtelService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for OtelService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let span = request_span(&req);

        // The propagated context must be the request span, not its parent
        span.in_scope(|| crate::otel::inject_current_span(req.headers_mut()));

        // Call the instance that was poll_ready'd and leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let result = inner.call(req).instrument(span.clone()).await;
            record_outcome(&span, result.as_ref().ok());
            result
        })
    }
}

fn request_span<B>(req: &Request<B>) -> Span {
    tracing::span!(
        Level::INFO, "outgoing_http",
        http.method = %req.method(),
        http.url = %sanitized_url(req.uri()),
        otel.kind = "client",
        http.status_code = tracing::field::Empty,
        error = tracing::field::Empty,
    )
}

/// `None` is a dispatch error.
fn record_outcome<B>(span: &Span, response: Option<&Response<B>>) {
    match response {
        Some(response) => {
            let status = response.status();
            span.record("http.status_code", status.as_u16());
            if status.is_client_error() || status.is_server_error() {
                span.record("error", true);
            }
        }
        None => {
            span.record("error", true);
        }
    }
}

/// URL recorded on the span: query strings may carry credentials
fn sanitized_url(uri: &Uri) -> String {
    format!(
        "{}://{}{}",
        uri.scheme_str().unwrap_or("http"),
        uri.authority().map_or("", http::uri::Authority::as_str),
        uri.path()
    )
}
