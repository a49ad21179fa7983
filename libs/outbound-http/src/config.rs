use crate::layers::{RedirectPolicy, default_redirect_policy};
use crate::transport::RoundTripper;
use http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default prefix attached to every diagnostic event emitted by a client
pub const DEFAULT_LOG_PREFIX: &str = "outbound-http";

/// Per-host idle limit used when the configured one resolves to 0
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 2;

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Overall HTTP client configuration
///
/// Options mutate this value while the client is being built; afterward it
/// is frozen behind an `Arc` and shared by every clone of the client.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Maximum time to establish a TCP connection (default: 10 seconds)
    ///
    /// `None` waits for the operating system's connect timeout.
    pub dial_timeout: Option<Duration>,

    /// Whether pooled connections are reused and TCP keep-alive probes sent
    /// (default: true)
    pub keep_alive: bool,

    /// Interval between TCP keep-alive probes (default: 90 seconds)
    pub keep_alive_timeout: Duration,

    /// How long an idle pooled connection is kept (default: None, no limit)
    pub idle_conn_timeout: Option<Duration>,

    /// Maximum time for the TLS handshake once TCP is connected
    /// (default: 10 seconds)
    pub tls_handshake_timeout: Option<Duration>,

    /// Maximum time to wait for response headers after the request is
    /// written, per hop (default: 30 seconds)
    pub response_header_timeout: Option<Duration>,

    /// Maximum number of idle connections kept by the pool (default: 15)
    ///
    /// 0 means no pool-wide limit.
    pub max_idle_conns: usize,

    /// Maximum number of idle connections kept per host (default: None)
    ///
    /// `None` means "unset": at build time the value is inherited from
    /// [`max_idle_conns`](Self::max_idle_conns).
    pub max_idle_conns_per_host: Option<usize>,

    /// Negotiate HTTP/2 via ALPN on TLS connections (default: true)
    pub http2: bool,

    /// Headers appended to every request (multi-valued)
    pub headers: HeaderMap,

    /// Decides whether a redirect is followed and which headers it carries
    pub redirect_policy: RedirectPolicy,

    /// Replaces pooled dispatch when set
    pub round_tripper: Option<RoundTripper>,

    /// Prefix attached to every diagnostic event (default: `outbound-http`)
    pub log_prefix: String,

    /// Subscriber that receives this client's diagnostic events
    ///
    /// `None` routes events to whatever subscriber is current at the call
    /// site; with no subscriber installed they are discarded.
    pub log_dispatch: Option<tracing::Dispatch>,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Enable OpenTelemetry tracing layer (default: false)
    /// Creates spans for outbound requests and injects trace context headers.
    pub otel: bool,
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("dial_timeout", &self.dial_timeout)
            .field("keep_alive", &self.keep_alive)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("idle_conn_timeout", &self.idle_conn_timeout)
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .field("response_header_timeout", &self.response_header_timeout)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_idle_conns_per_host", &self.max_idle_conns_per_host)
            .field("http2", &self.http2)
            .field("headers", &self.headers)
            .field("round_tripper", &self.round_tripper.is_some())
            .field("log_prefix", &self.log_prefix)
            .field("log_dispatch", &self.log_dispatch.is_some())
            .field("max_body_size", &self.max_body_size)
            .field("tls_roots", &self.tls_roots)
            .field("otel", &self.otel)
            .finish_non_exhaustive()
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Some(Duration::from_secs(10)),
            keep_alive: true,
            keep_alive_timeout: Duration::from_secs(90),
            idle_conn_timeout: None,
            tls_handshake_timeout: Some(Duration::from_secs(10)),
            response_header_timeout: Some(Duration::from_secs(30)),
            max_idle_conns: 15,
            max_idle_conns_per_host: None,
            http2: true,
            headers: HeaderMap::new(),
            redirect_policy: Arc::new(default_redirect_policy),
            round_tripper: None,
            log_prefix: DEFAULT_LOG_PREFIX.to_owned(),
            log_dispatch: None,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            tls_roots: TlsRootConfig::default(),
            otel: false,
        }
    }
}

impl HttpClientConfig {
    /// Create minimal configuration (tight timeouts, small pool)
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            dial_timeout: Some(Duration::from_secs(5)),
            tls_handshake_timeout: Some(Duration::from_secs(5)),
            response_header_timeout: Some(Duration::from_secs(10)),
            idle_conn_timeout: Some(Duration::from_secs(30)),
            max_idle_conns: 4,
            max_body_size: 1024 * 1024, // 1 MB
            ..Self::default()
        }
    }

    /// Create configuration for testing with local mock servers
    ///
    /// Short timeouts so a misbehaving mock fails the test quickly.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            dial_timeout: Some(Duration::from_secs(2)),
            tls_handshake_timeout: Some(Duration::from_secs(2)),
            response_header_timeout: Some(Duration::from_secs(10)),
            idle_conn_timeout: Some(Duration::from_secs(10)),
            max_idle_conns: 4,
            max_body_size: 1024 * 1024, // 1 MB
            ..Self::default()
        }
    }

    /// Per-host idle limit the pool is actually built with.
    ///
    /// An unset per-host limit inherits the pool-wide limit. A per-host
    /// limit of 0 falls back to [`DEFAULT_MAX_IDLE_CONNS_PER_HOST`]. A
    /// non-zero pool-wide limit caps the per-host one; 0 means no pool-wide
    /// limit. With keep-alive disabled no connection is ever returned to the
    /// pool.
    #[must_use]
    pub fn effective_idle_per_host(&self) -> usize {
        if !self.keep_alive {
            return 0;
        }
        let per_host = match self.max_idle_conns_per_host.unwrap_or(self.max_idle_conns) {
            0 => DEFAULT_MAX_IDLE_CONNS_PER_HOST,
            n => n,
        };
        if self.max_idle_conns == 0 {
            per_host
        } else {
            per_host.min(self.max_idle_conns)
        }
    }

    /// Fill in values that are derived from other settings.
    pub(crate) fn resolve(&mut self) {
        if self.max_idle_conns_per_host.is_none() {
            self.max_idle_conns_per_host = Some(self.max_idle_conns);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_config_defaults() {
        let config = HttpClientConfig::default();
        assert_eq!(config.dial_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.tls_handshake_timeout, Some(Duration::from_secs(10)));
        assert_eq!(
            config.response_header_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.keep_alive_timeout, Duration::from_secs(90));
        assert_eq!(config.idle_conn_timeout, None);
        assert_eq!(config.max_idle_conns, 15);
        assert_eq!(config.max_idle_conns_per_host, None);
        assert!(config.keep_alive);
        assert!(config.http2);
        assert!(config.headers.is_empty());
        assert!(config.round_tripper.is_none());
        assert_eq!(config.log_prefix, DEFAULT_LOG_PREFIX);
        assert_eq!(config.tls_roots, TlsRootConfig::WebPki);
        assert!(!config.otel);
    }

    #[test]
    fn test_http_client_config_minimal() {
        let config = HttpClientConfig::minimal();
        assert_eq!(config.dial_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_idle_conns, 4);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_resolve_inherits_pool_wide_limit() {
        let mut config = HttpClientConfig {
            max_idle_conns: 7,
            ..Default::default()
        };
        config.resolve();
        assert_eq!(config.max_idle_conns_per_host, Some(7));
        assert_eq!(config.effective_idle_per_host(), 7);
    }

    #[test]
    fn test_resolve_keeps_explicit_per_host_limit() {
        let mut config = HttpClientConfig {
            max_idle_conns: 15,
            max_idle_conns_per_host: Some(3),
            ..Default::default()
        };
        config.resolve();
        assert_eq!(config.max_idle_conns_per_host, Some(3));
        assert_eq!(config.effective_idle_per_host(), 3);
    }

    #[test]
    fn test_pool_wide_limit_caps_per_host() {
        let config = HttpClientConfig {
            max_idle_conns: 2,
            max_idle_conns_per_host: Some(50),
            ..Default::default()
        };
        assert_eq!(config.effective_idle_per_host(), 2);
    }

    #[test]
    fn test_zero_limits_fall_back_to_default_per_host() {
        let mut config = HttpClientConfig {
            max_idle_conns: 0,
            ..Default::default()
        };
        config.resolve();
        assert_eq!(config.max_idle_conns_per_host, Some(0));
        assert_eq!(
            config.effective_idle_per_host(),
            DEFAULT_MAX_IDLE_CONNS_PER_HOST
        );

        let config = HttpClientConfig {
            max_idle_conns: 0,
            max_idle_conns_per_host: Some(40),
            ..Default::default()
        };
        assert_eq!(config.effective_idle_per_host(), 40);

        let config = HttpClientConfig {
            max_idle_conns: 1,
            max_idle_conns_per_host: Some(0),
            ..Default::default()
        };
        assert_eq!(config.effective_idle_per_host(), 1);
    }

    #[test]
    fn test_keep_alive_disabled_keeps_no_idle_connections() {
        let config = HttpClientConfig {
            keep_alive: false,
            ..Default::default()
        };
        assert_eq!(config.effective_idle_per_host(), 0);
    }

    #[test]
    fn test_debug_hides_callables() {
        let rendered = format!("{:?}", HttpClientConfig::default());
        assert!(rendered.contains("max_idle_conns: 15"));
        assert!(rendered.contains("round_tripper: false"));
    }
}
