#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Configurable outbound HTTP client
//!
//! This crate provides a hyper-based HTTP client with:
//! - Connection pooling with pool-wide and per-host idle limits
//! - Dial, TLS handshake, response header and idle timeouts
//! - A replaceable redirect policy with a bounded redirect chain
//! - Per-request header and query manipulation
//! - Diagnostic events for every connection dialed and closed
//! - A replaceable dispatch point (round-tripper) for tests and proxies
//! - **Transparent response decompression** (gzip, brotli, deflate)
//! - Optional OpenTelemetry tracing (feature-gated)
//!
//! # Request pipeline
//!
//! Every call builds the request, binds its [`RequestContext`], appends the
//! client's default headers, applies the [`RequestOption`]s in order and
//! dispatches. Failures before dispatch are returned directly. Once
//! dispatched, the response handler is called exactly once with either the
//! response or the dispatch error.
//!
//! # Diagnostics
//!
//! Lifecycle events are `tracing` events under the `outbound_http` target,
//! each carrying the client's `prefix` field. Use [`options::logger`] to
//! route one client's events to a dedicated subscriber.
//!
//! # Example
//!
//! ```ignore
//! use outbound_http::{HttpClient, RequestContext, RequestOption, options};
//! use std::time::Duration;
//!
//! let client = HttpClient::with_options([
//!     options::dial_timeout(Duration::from_secs(2)),
//!     options::max_idle_conns(32),
//!     options::log_prefix("[billing]"),
//! ])?;
//!
//! let invoice: Invoice = client
//!     .get(
//!         RequestContext::new().with_timeout(Duration::from_secs(5)),
//!         |_ctx, outcome| async move { outcome?.json().await },
//!         "https://billing.internal/invoices/42",
//!         [RequestOption::add_headers(auth_headers)],
//!     )
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod context;
mod dialer;
mod error;
mod layers;
mod log;
pub mod options;
pub mod otel;
mod request;
mod response;
mod tls;
mod transport;

pub use builder::HttpClientBuilder;
pub use client::{HttpClient, noop_handler};
pub use config::{
    DEFAULT_LOG_PREFIX, DEFAULT_MAX_IDLE_CONNS_PER_HOST, HttpClientConfig, TlsRootConfig,
};
pub use context::RequestContext;
pub use dialer::{ConnectTimeout, Dialer, TrackedConn};
pub use error::{BoxError, HttpError, InvalidUriKind};
pub use layers::{
    ChainPolicy, MAX_REDIRECTS, OtelLayer, OtelService, RedirectPolicy, RedirectRequest,
    default_redirect_policy,
};
pub use log::LOG_TARGET;
pub use options::ClientOption;
pub use request::RequestOption;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, LimitedBody, ResponseBody};
pub use transport::{PooledClient, RoundTripper};
