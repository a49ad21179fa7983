//! TLS and TCP connector construction
//!
//! Native root certificates are loaded once per process and cached, since
//! OS certificate store lookups can be slow on some platforms.

use crate::config::{HttpClientConfig, TlsRootConfig};
use crate::error::HttpError;
use hyper_rustls::{ConfigBuilderExt as _, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Cached native root certificates (empty when none were found).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_certs() -> Vec<CertificateDer<'static>> {
    let result = rustls_native_certs::load_native_certs();

    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }

    result.certs
}

/// Native root certificates, loaded on first use.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE.get_or_init(load_native_certs).as_slice()
}

/// Crypto provider for TLS connections.
///
/// Uses the process-wide default provider when one is installed, otherwise
/// a fresh aws-lc-rs provider that is not installed globally.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if added == 0 {
        return Err(HttpError::Tls(
            format!("no valid native root CA certificates parsed ({ignored} failed to parse)")
                .into(),
        ));
    }
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }

    rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map(|builder| {
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        })
        .map_err(|e| HttpError::Tls(Box::new(e)))
}

fn webpki_client_config() -> Result<rustls::ClientConfig, HttpError> {
    rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map(|builder| builder.with_webpki_roots().with_no_client_auth())
        .map_err(|e| HttpError::Tls(Box::new(e)))
}

/// TCP connector honoring the dial timeout and keep-alive settings.
fn tcp_connector(config: &HttpClientConfig) -> HttpConnector {
    let mut http = HttpConnector::new();
    // The TLS layer on top handles https URIs
    http.enforce_http(false);
    http.set_connect_timeout(config.dial_timeout);
    http.set_keepalive(config.keep_alive.then_some(config.keep_alive_timeout));
    http.set_nodelay(true);
    http
}

/// Build the HTTPS-or-HTTP connector described by `config`.
///
/// ALPN advertises h2 and http/1.1 unless HTTP/2 is disabled, in which case
/// only http/1.1 is offered.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the rustls configuration cannot be built or
/// `TlsRootConfig::Native` finds no usable root certificates.
pub fn https_connector(
    config: &HttpClientConfig,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let tls = match config.tls_roots {
        TlsRootConfig::WebPki => webpki_client_config()?,
        TlsRootConfig::Native => native_roots_client_config()?,
    };

    let builder = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http();
    let connector = if config.http2 {
        builder.enable_all_versions().wrap_connector(tcp_connector(config))
    } else {
        builder.enable_http1().wrap_connector(tcp_connector(config))
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_native_roots_cached() {
        let first = native_root_certs();
        let second = native_root_certs();
        assert!(std::ptr::eq(first, second), "should return same slice");
    }

    #[test]
    fn test_webpki_connector_builds() {
        assert!(https_connector(&HttpClientConfig::default()).is_ok());
    }

    #[test]
    fn test_http1_only_connector_builds() {
        let config = HttpClientConfig {
            http2: false,
            ..Default::default()
        };
        assert!(https_connector(&config).is_ok());
    }

    #[test]
    fn test_native_roots_connector() {
        let config = HttpClientConfig {
            tls_roots: TlsRootConfig::Native,
            ..Default::default()
        };
        // Minimal containers may have no OS certificates
        match https_connector(&config) {
            Ok(_) | Err(HttpError::Tls(_)) => {}
            Err(other) => panic!("Unexpected error type: {other:?}"),
        }
    }
}
