use crate::config::HttpClientConfig;
use crate::dialer::Dialer;
use crate::error::{BoxError, HttpError};
use crate::log::{ClientLog, TransportSummary};
use crate::response::ResponseBody;
use crate::tls;
use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{Builder, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tower::util::BoxCloneSyncService;

/// Type-erased dispatch service: turns one request into one response.
///
/// This is both the shape of a custom round-tripper and of every step of
/// the client's middleware stack.
pub type RoundTripper =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

/// Raw pooled hyper client, dialing through the instrumented [`Dialer`]
pub type PooledClient = Client<Dialer, Full<Bytes>>;

/// Connection pool plus the dialer feeding it
///
/// The pool itself lives behind an [`ArcSwap`] so that closing idle
/// connections can swap in an empty pool without locking the request path.
pub struct Transport {
    builder: Builder,
    dialer: Dialer,
    pool: ArcSwap<PooledClient>,
    log: ClientLog,
}

impl Transport {
    /// Build the dialer and connection pool described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Tls` if the TLS connector cannot be created.
    pub fn new(config: &HttpClientConfig, log: ClientLog) -> Result<Self, HttpError> {
        let connector = tls::https_connector(config)?;
        let dialer = Dialer::new(connector, connect_budget(config), log.clone());

        let idle_per_host = config.effective_idle_per_host();
        let mut builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.idle_conn_timeout)
            .pool_max_idle_per_host(idle_per_host)
            .http2_only(false);

        let pool = ArcSwap::from_pointee(builder.build(dialer.clone()));

        log.transport_initialized(&TransportSummary {
            dial_timeout: config.dial_timeout,
            tls_handshake_timeout: config.tls_handshake_timeout,
            response_header_timeout: config.response_header_timeout,
            keep_alive: config.keep_alive,
            idle_conn_timeout: config.idle_conn_timeout,
            max_idle_conns: config.max_idle_conns,
            max_idle_conns_per_host: idle_per_host,
            http2: config.http2,
        });

        Ok(Self {
            builder,
            dialer,
            pool,
            log,
        })
    }

    /// Current pooled client.
    #[must_use]
    pub fn pooled(&self) -> Arc<PooledClient> {
        self.pool.load_full()
    }

    /// Number of physical connections dialed so far.
    #[must_use]
    pub fn connections_dialed(&self) -> u64 {
        self.dialer.dialed()
    }

    /// Drop every idle connection.
    ///
    /// A fresh pool replaces the current one. Requests already in flight
    /// keep the connection they hold; once they finish and the last handle
    /// on the old pool goes away, its idle connections are closed.
    pub fn close_idle(&self) {
        self.log.closing_idle();
        self.pool.store(Arc::new(self.builder.build(self.dialer.clone())));
    }
}

/// Time allowed for TCP connect and TLS handshake together.
fn connect_budget(config: &HttpClientConfig) -> Option<Duration> {
    match (config.dial_timeout, config.tls_handshake_timeout) {
        (None, None) => None,
        (dial, tls) => Some(dial.unwrap_or_default().saturating_add(tls.unwrap_or_default())),
    }
}

/// Dispatch through the connection pool
#[derive(Clone)]
pub struct PooledTransport {
    transport: Arc<Transport>,
}

impl PooledTransport {
    #[must_use]
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

impl Service<Request<Full<Bytes>>> for PooledTransport {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // hyper-util's client is always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let pool = self.transport.pooled();
        Box::pin(async move {
            let response = pool.request(req).await?;
            Ok(response.map(|body| -> ResponseBody { body.map_err(Into::into).boxed() }))
        })
    }
}

/// Map errors raised below the middleware stack to `HttpError`
///
/// Attempts to extract an existing `HttpError` from the boxed error before
/// wrapping it as `Transport`.
pub fn map_dispatch_error(err: BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

/// Map tower middleware errors to `HttpError` with the actual timeout duration
pub fn map_tower_error(err: BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    map_dispatch_error(err)
}
