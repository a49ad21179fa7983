use crate::client::HttpClient;
use crate::config::{HttpClientConfig, TlsRootConfig};
use crate::error::HttpError;
use crate::layers::{ChainPolicy, OtelLayer, RedirectRequest};
use crate::log::ClientLog;
use crate::options::{self, ClientOption};
use crate::response::ResponseBody;
use crate::transport::{PooledTransport, RoundTripper, Transport, map_tower_error};
use bytes::Bytes;
use http::{HeaderMap, Response};
use http_body_util::BodyExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;

/// Builder for constructing an [`HttpClient`] from an ordered list of options.
///
/// Every setter is a [`ClientOption`] applied on the spot. The first option
/// that fails is remembered, every later option is skipped, and
/// [`build()`](Self::build) returns that error.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    error: Option<HttpError>,
}

impl fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("config", &self.config)
            .field("error", &self.error)
            .finish()
    }
}

impl HttpClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            error: None,
        }
    }

    /// Apply one option. `None` is accepted and ignored.
    #[must_use]
    pub fn option(mut self, option: impl Into<Option<ClientOption>>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(apply) = option.into()
            && let Err(err) = apply(&mut self.config)
        {
            self.error = Some(err);
        }
        self
    }

    /// Apply options in order.
    #[must_use]
    pub fn options(self, options: impl IntoIterator<Item = ClientOption>) -> Self {
        options
            .into_iter()
            .fold(self, |builder, option| builder.option(option))
    }

    /// Configuration as built up so far, including options applied before a
    /// failure.
    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    #[must_use]
    pub fn dial_timeout(self, timeout: Duration) -> Self {
        self.option(options::dial_timeout(timeout))
    }

    #[must_use]
    pub fn keep_alive_timeout(self, timeout: Duration) -> Self {
        self.option(options::keep_alive_timeout(timeout))
    }

    #[must_use]
    pub fn disable_keep_alive(self) -> Self {
        self.option(options::disable_keep_alive())
    }

    #[must_use]
    pub fn idle_conn_timeout(self, timeout: Duration) -> Self {
        self.option(options::idle_conn_timeout(timeout))
    }

    #[must_use]
    pub fn tls_handshake_timeout(self, timeout: Duration) -> Self {
        self.option(options::tls_handshake_timeout(timeout))
    }

    #[must_use]
    pub fn response_header_timeout(self, timeout: Duration) -> Self {
        self.option(options::response_header_timeout(timeout))
    }

    /// Pool-wide idle connection limit; negative values fail the build.
    #[must_use]
    pub fn max_idle_conns(self, n: i64) -> Self {
        self.option(options::max_idle_conns(n))
    }

    /// Per-host idle connection limit; negative values fail the build.
    #[must_use]
    pub fn max_idle_conns_per_host(self, n: i64) -> Self {
        self.option(options::max_idle_conns_per_host(n))
    }

    #[must_use]
    pub fn disable_http2(self) -> Self {
        self.option(options::disable_http2())
    }

    #[must_use]
    pub fn headers(self, headers: HeaderMap) -> Self {
        self.option(options::headers(headers))
    }

    #[must_use]
    pub fn redirect_policy<F>(self, policy: F) -> Self
    where
        F: Fn(&mut RedirectRequest, &[RedirectRequest]) -> Result<(), HttpError>
            + Send
            + Sync
            + 'static,
    {
        self.option(options::redirect_policy(policy))
    }

    #[must_use]
    pub fn logger(self, dispatch: tracing::Dispatch) -> Self {
        self.option(options::logger(dispatch))
    }

    #[must_use]
    pub fn log_prefix(self, prefix: impl Into<String>) -> Self {
        self.option(options::log_prefix(prefix))
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(self, size: usize) -> Self {
        self.option(options::max_body_size(size))
    }

    #[must_use]
    pub fn tls_roots(self, roots: TlsRootConfig) -> Self {
        self.option(options::tls_roots(roots))
    }

    /// Enable OpenTelemetry tracing layer
    ///
    /// When enabled, creates spans for outbound requests with HTTP metadata
    /// and injects W3C trace context headers (when `otel` feature is enabled).
    #[must_use]
    pub fn with_otel(self) -> Self {
        self.option(options::with_tracing())
    }

    /// Build the HTTP client with all configured layers
    ///
    /// # Errors
    /// Returns the first option error, or `HttpError::Tls` if the TLS
    /// connector cannot be created.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut config = self.config;
        config.resolve();

        let log = ClientLog::new(&config.log_prefix, config.log_dispatch.clone());
        if config.round_tripper.is_some() {
            log.warn("custom round-tripper configured, transport settings do not apply to it");
        }
        if !config.keep_alive {
            log.warn("keep-alive disabled, every request opens a new connection");
        }

        let transport = Arc::new(Transport::new(&config, log.clone())?);

        // Layer stack (outer to inner):
        //   [Otel] -> Decompression -> FollowRedirect -> [Timeout -> pool | round-tripper]
        //
        // Each redirect hop gets its own response header timeout.
        let dispatch = match &config.round_tripper {
            Some(round_tripper) => round_tripper.clone(),
            None => pooled_dispatch(&transport, config.response_header_timeout),
        };

        let service = ServiceBuilder::new()
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(ChainPolicy::new(
                Arc::clone(&config.redirect_policy),
            )))
            .service(dispatch)
            .map_response(map_decompression_response);
        let mut service: RoundTripper = BoxCloneSyncService::new(service);

        if config.otel {
            let traced = ServiceBuilder::new()
                .layer(OtelLayer::new())
                .service(service);
            service = BoxCloneSyncService::new(traced);
        }

        log.client_initialized(config.round_tripper.is_some(), config.headers.len());

        Ok(HttpClient {
            service,
            transport,
            config: Arc::new(config),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pooled dispatch, bounded by the response header timeout when one is set.
fn pooled_dispatch(transport: &Arc<Transport>, timeout: Option<Duration>) -> RoundTripper {
    let pooled = PooledTransport::new(Arc::clone(transport));
    match timeout {
        Some(timeout) => {
            let bounded = ServiceBuilder::new()
                .layer(TimeoutLayer::new(timeout))
                .service(pooled)
                .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));
            BoxCloneSyncService::new(bounded)
        }
        None => BoxCloneSyncService::new(pooled),
    }
}

/// Map the decompression response to our boxed response body type.
///
/// This converts `Response<DecompressionBody<ResponseBody>>` to
/// `Response<ResponseBody>`.
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::log::testing::EventCapture;
    use http::HeaderValue;

    #[test]
    fn test_builder_default() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config().dial_timeout, Some(Duration::from_secs(10)));
        assert_eq!(builder.config().max_idle_conns, 15);
        assert!(builder.config().max_idle_conns_per_host.is_none());
    }

    #[test]
    fn test_builder_with_config() {
        let builder = HttpClientBuilder::with_config(HttpClientConfig::minimal());
        assert_eq!(builder.config().dial_timeout, Some(Duration::from_secs(5)));
        assert_eq!(builder.config().max_idle_conns, 4);
    }

    #[test]
    fn test_builder_methods_apply_options() {
        let builder = HttpClientBuilder::new()
            .dial_timeout(Duration::from_secs(1))
            .keep_alive_timeout(Duration::from_secs(15))
            .tls_handshake_timeout(Duration::from_secs(2))
            .response_header_timeout(Duration::from_secs(3))
            .idle_conn_timeout(Duration::from_secs(4))
            .max_idle_conns(8)
            .max_idle_conns_per_host(2)
            .disable_http2()
            .max_body_size(1024)
            .log_prefix("[svc]")
            .with_otel();

        let config = builder.config();
        assert_eq!(config.dial_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.keep_alive_timeout, Duration::from_secs(15));
        assert_eq!(config.tls_handshake_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.response_header_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.idle_conn_timeout, Some(Duration::from_secs(4)));
        assert_eq!(config.max_idle_conns, 8);
        assert_eq!(config.max_idle_conns_per_host, Some(2));
        assert!(!config.http2);
        assert_eq!(config.max_body_size, 1024);
        assert_eq!(config.log_prefix, "[svc]");
        assert!(config.otel);
    }

    #[test]
    fn test_none_option_is_ignored() {
        let builder = HttpClientBuilder::new()
            .option(None::<ClientOption>)
            .max_idle_conns(3);
        assert_eq!(builder.config().max_idle_conns, 3);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_first_error_stops_later_options() {
        let builder = HttpClientBuilder::new()
            .max_idle_conns(5)
            .max_idle_conns(-1)
            .max_idle_conns(7);

        // Options before the failure are applied, options after it are not
        assert_eq!(builder.config().max_idle_conns, 5);

        match builder.build() {
            Err(HttpError::InvalidOptionValue { option, .. }) => {
                assert_eq!(option, "max_idle_conns");
            }
            Err(other) => panic!("Expected InvalidOptionValue, got: {other:?}"),
            Ok(_) => panic!("Expected InvalidOptionValue, but build succeeded"),
        }
    }

    #[test]
    fn test_unset_per_host_limit_resolves_to_pool_limit() {
        let client = HttpClientBuilder::new().max_idle_conns(9).build().unwrap();
        assert_eq!(client.config().max_idle_conns_per_host, Some(9));

        let client = HttpClientBuilder::new()
            .max_idle_conns(9)
            .max_idle_conns_per_host(3)
            .build()
            .unwrap();
        assert_eq!(client.config().max_idle_conns_per_host, Some(3));
    }

    #[test]
    fn test_headers_option_replaces_same_name() {
        let mut first = HeaderMap::new();
        first.insert("x-test", HeaderValue::from_static("one"));
        let mut second = HeaderMap::new();
        second.insert("x-test", HeaderValue::from_static("two"));

        let builder = HttpClientBuilder::new().headers(first).headers(second);
        let values: Vec<_> = builder.config().headers.get_all("x-test").iter().collect();
        assert_eq!(values, vec!["two"]);
    }

    #[test]
    fn test_build_logs_realized_configuration() {
        let capture = EventCapture::default();
        let _client = HttpClientBuilder::new()
            .logger(capture.dispatch())
            .log_prefix("[build]")
            .build()
            .unwrap();

        let events = capture.snapshot();
        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["initialized transport", "initialized client"]);
        assert!(events.iter().all(|e| e.prefix.as_deref() == Some("[build]")));
    }

    #[test]
    fn test_build_warns_on_disabled_keep_alive() {
        let capture = EventCapture::default();
        let client = HttpClientBuilder::new()
            .logger(capture.dispatch())
            .disable_keep_alive()
            .build()
            .unwrap();

        assert_eq!(client.config().effective_idle_per_host(), 0);
        let warnings: Vec<_> = capture
            .snapshot()
            .into_iter()
            .filter(|e| e.level == tracing::Level::WARN)
            .map(|e| e.message)
            .collect();
        assert_eq!(
            warnings,
            vec!["keep-alive disabled, every request opens a new connection"]
        );
    }

    #[test]
    fn test_build_warns_on_custom_round_tripper() {
        let capture = EventCapture::default();
        let round_tripper =
            tower::service_fn(|_req: http::Request<http_body_util::Full<Bytes>>| async {
                Ok::<_, HttpError>(Response::new(http_body_util::Empty::<Bytes>::new()))
            });

        let _client = HttpClientBuilder::new()
            .logger(capture.dispatch())
            .option(options::round_tripper(round_tripper))
            .build()
            .unwrap();

        assert!(
            capture
                .snapshot()
                .iter()
                .any(|e| e.level == tracing::Level::WARN && e.message.contains("round-tripper"))
        );
    }
}
