//! Client construction options
//!
//! Each function returns a [`ClientOption`]: a one-shot mutation of the
//! [`HttpClientConfig`] under construction. Options are applied in the
//! order given and the first one that fails aborts construction.
//!
//! ```ignore
//! use outbound_http::{HttpClient, options};
//! use std::time::Duration;
//!
//! let client = HttpClient::with_options([
//!     options::dial_timeout(Duration::from_secs(2)),
//!     options::max_idle_conns(32),
//!     options::log_prefix("[billing] "),
//! ])?;
//! ```

use crate::config::{HttpClientConfig, TlsRootConfig};
use crate::error::{BoxError, HttpError};
use crate::layers::{RedirectPolicy, RedirectRequest};
use crate::response::ResponseBody;
use crate::transport::RoundTripper;
use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

/// A single configuration step applied while building a client
pub type ClientOption = Box<dyn FnOnce(&mut HttpClientConfig) -> Result<(), HttpError> + Send>;

fn infallible(apply: impl FnOnce(&mut HttpClientConfig) + Send + 'static) -> ClientOption {
    Box::new(move |config| {
        apply(config);
        Ok(())
    })
}

fn non_negative(option: &'static str, n: i64) -> Result<usize, HttpError> {
    usize::try_from(n).map_err(|_| HttpError::InvalidOptionValue {
        option,
        reason: format!("must not be negative, got {n}"),
    })
}

/// Wrap an arbitrary fallible configuration step.
///
/// Errors are reported as [`HttpError::Option`] with the original error as
/// source.
pub fn from_fn<F, E>(apply: F) -> ClientOption
where
    F: FnOnce(&mut HttpClientConfig) -> Result<(), E> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move |config| apply(config).map_err(|e| HttpError::Option(e.into())))
}

/// How long to wait for the TCP connection to be established.
#[must_use]
pub fn dial_timeout(timeout: Duration) -> ClientOption {
    infallible(move |c| c.dial_timeout = Some(timeout))
}

/// Interval between TCP keep-alive probes on open connections.
///
/// The operating system may override this value.
#[must_use]
pub fn keep_alive_timeout(timeout: Duration) -> ClientOption {
    infallible(move |c| c.keep_alive_timeout = timeout)
}

/// Disable connection reuse and TCP keep-alive.
#[must_use]
pub fn disable_keep_alive() -> ClientOption {
    infallible(|c| c.keep_alive = false)
}

/// How long an idle pooled connection is kept before it is closed.
#[must_use]
pub fn idle_conn_timeout(timeout: Duration) -> ClientOption {
    infallible(move |c| c.idle_conn_timeout = Some(timeout))
}

/// Limit on the TLS handshake.
#[must_use]
pub fn tls_handshake_timeout(timeout: Duration) -> ClientOption {
    infallible(move |c| c.tls_handshake_timeout = Some(timeout))
}

/// Limit on waiting for response headers once the request is written.
#[must_use]
pub fn response_header_timeout(timeout: Duration) -> ClientOption {
    infallible(move |c| c.response_header_timeout = Some(timeout))
}

/// Maximum number of idle connections kept by the pool.
///
/// 0 means no pool-wide limit. A negative value fails construction with
/// [`HttpError::InvalidOptionValue`].
#[must_use]
pub fn max_idle_conns(n: i64) -> ClientOption {
    Box::new(move |c| {
        c.max_idle_conns = non_negative("max_idle_conns", n)?;
        Ok(())
    })
}

/// Maximum number of idle connections kept for a single host.
///
/// When never set the pool-wide limit is used. A limit that resolves to 0
/// keeps [`DEFAULT_MAX_IDLE_CONNS_PER_HOST`](crate::DEFAULT_MAX_IDLE_CONNS_PER_HOST)
/// connections per host. A negative value fails
/// construction with [`HttpError::InvalidOptionValue`].
#[must_use]
pub fn max_idle_conns_per_host(n: i64) -> ClientOption {
    Box::new(move |c| {
        c.max_idle_conns_per_host = Some(non_negative("max_idle_conns_per_host", n)?);
        Ok(())
    })
}

/// Only offer HTTP/1.1, even to servers that support HTTP/2.
#[must_use]
pub fn disable_http2() -> ClientOption {
    infallible(|c| c.http2 = false)
}

/// Headers sent with every request.
///
/// Each header named in `headers` replaces any earlier default of the same
/// name; other defaults are kept.
#[must_use]
pub fn headers(headers: HeaderMap) -> ClientOption {
    infallible(move |c| {
        for name in headers.keys() {
            c.headers.remove(name);
        }
        for (name, value) in &headers {
            c.headers.append(name.clone(), value.clone());
        }
    })
}

/// Replace the redirect policy.
///
/// See [`RedirectPolicy`] for the calling convention and
/// [`default_redirect_policy`](crate::default_redirect_policy) for the
/// default.
#[must_use]
pub fn redirect_policy<F>(policy: F) -> ClientOption
where
    F: Fn(&mut RedirectRequest, &[RedirectRequest]) -> Result<(), HttpError>
        + Send
        + Sync
        + 'static,
{
    let policy: RedirectPolicy = Arc::new(policy);
    infallible(move |c| c.redirect_policy = policy)
}

/// Dispatch every request through `service` instead of the pooled transport.
///
/// Transport settings (timeouts, pool limits, TLS) do not apply to a custom
/// round-tripper; redirects, default headers and request options still do.
/// Errors that are not already an [`HttpError`] reach the response handler
/// as [`HttpError::Transport`] with the original error as source.
#[must_use]
pub fn round_tripper<S, B>(service: S) -> ClientOption
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let service: RoundTripper = BoxCloneSyncService::new(
        service
            .map_response(|response: Response<B>| {
                response.map(|body| -> ResponseBody { body.map_err(Into::into).boxed() })
            })
            .map_err(|err: S::Error| crate::transport::map_dispatch_error(err.into())),
    );
    infallible(move |c| c.round_tripper = Some(service))
}

/// Send this client's diagnostic events to `dispatch` instead of the
/// subscriber current at the call site.
#[must_use]
pub fn logger(dispatch: tracing::Dispatch) -> ClientOption {
    infallible(move |c| c.log_dispatch = Some(dispatch))
}

/// Prefix attached to this client's diagnostic events.
///
/// Useful to tell apart several clients sharing one subscriber.
#[must_use]
pub fn log_prefix(prefix: impl Into<String>) -> ClientOption {
    let prefix = prefix.into();
    infallible(move |c| c.log_prefix = prefix)
}

/// Maximum response body size read by [`HttpResponse`](crate::HttpResponse) helpers.
#[must_use]
pub fn max_body_size(size: usize) -> ClientOption {
    infallible(move |c| c.max_body_size = size)
}

/// Root certificate source for TLS connections.
#[must_use]
pub fn tls_roots(roots: TlsRootConfig) -> ClientOption {
    infallible(move |c| c.tls_roots = roots)
}

/// Create a tracing span per request and propagate its trace context.
#[must_use]
pub fn with_tracing() -> ClientOption {
    infallible(|c| c.otel = true)
}
