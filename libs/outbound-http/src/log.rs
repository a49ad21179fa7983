//! Diagnostic events for connection and client lifecycle
//!
//! Events are regular `tracing` events under the [`LOG_TARGET`] target.
//! Each carries the client's `prefix` field so that several clients sharing
//! one subscriber can be told apart. A client configured with its own
//! [`tracing::Dispatch`] sends its events there instead of the ambient
//! subscriber.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Target of every diagnostic event emitted by the client
pub const LOG_TARGET: &str = "outbound_http";

/// Per-client diagnostic sink
#[derive(Clone)]
pub struct ClientLog {
    prefix: Arc<str>,
    dispatch: Option<tracing::Dispatch>,
}

impl fmt::Debug for ClientLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLog")
            .field("prefix", &self.prefix)
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

impl ClientLog {
    #[must_use]
    pub fn new(prefix: &str, dispatch: Option<tracing::Dispatch>) -> Self {
        Self {
            prefix: Arc::from(prefix),
            dispatch,
        }
    }

    fn emit(&self, event: impl FnOnce(&str)) {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || event(&self.prefix)),
            None => event(&self.prefix),
        }
    }

    pub fn dialing(&self, conn_id: u64, addr: &str) {
        self.emit(|prefix| {
            tracing::debug!(
                target: LOG_TARGET,
                prefix,
                conn_id,
                network = "tcp",
                addr,
                "dialing connection"
            );
        });
    }

    pub fn dial_failed(&self, conn_id: u64, addr: &str, error: &dyn std::error::Error) {
        self.emit(|prefix| {
            tracing::debug!(
                target: LOG_TARGET,
                prefix,
                conn_id,
                network = "tcp",
                addr,
                error = %error,
                "dialing connection failed"
            );
        });
    }

    pub fn conn_closing(&self, conn_id: u64, addr: &str) {
        self.emit(|prefix| {
            tracing::debug!(
                target: LOG_TARGET,
                prefix,
                conn_id,
                network = "tcp",
                addr,
                "closing connection"
            );
        });
    }

    pub fn closing_idle(&self) {
        self.emit(|prefix| {
            tracing::debug!(target: LOG_TARGET, prefix, "closing idle connections");
        });
    }

    pub fn transport_initialized(&self, summary: &TransportSummary) {
        self.emit(|prefix| {
            tracing::debug!(
                target: LOG_TARGET,
                prefix,
                dial_timeout = ?summary.dial_timeout,
                tls_handshake_timeout = ?summary.tls_handshake_timeout,
                response_header_timeout = ?summary.response_header_timeout,
                keep_alive = summary.keep_alive,
                idle_conn_timeout = ?summary.idle_conn_timeout,
                max_idle_conns = summary.max_idle_conns,
                max_idle_conns_per_host = summary.max_idle_conns_per_host,
                http2 = summary.http2,
                "initialized transport"
            );
        });
    }

    pub fn client_initialized(&self, custom_round_tripper: bool, default_headers: usize) {
        self.emit(|prefix| {
            tracing::debug!(
                target: LOG_TARGET,
                prefix,
                custom_round_tripper,
                default_headers,
                "initialized client"
            );
        });
    }

    pub fn warn(&self, message: &str) {
        self.emit(|prefix| {
            tracing::warn!(target: LOG_TARGET, prefix, "{message}");
        });
    }
}

/// Realized transport settings, logged once at build time
#[derive(Debug, Clone, Copy)]
pub struct TransportSummary {
    pub dial_timeout: Option<Duration>,
    pub tls_handshake_timeout: Option<Duration>,
    pub response_header_timeout: Option<Duration>,
    pub keep_alive: bool,
    pub idle_conn_timeout: Option<Duration>,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub http2: bool,
}


#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::testing::EventCapture;
    use super::*;

    #[test]
    fn test_events_carry_prefix() {
        let capture = EventCapture::default();
        let log = ClientLog::new("[billing]", Some(capture.dispatch()));

        log.dialing(1, "example.com:443");
        log.closing_idle();

        let events = capture.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "dialing connection");
        assert_eq!(events[0].conn_id, Some(1));
        assert_eq!(events[0].prefix.as_deref(), Some("[billing]"));
        assert_eq!(events[1].message, "closing idle connections");
    }

    #[test]
    fn test_without_dispatch_uses_ambient_subscriber() {
        let capture = EventCapture::default();
        let log = ClientLog::new("ambient", None);

        tracing::dispatcher::with_default(&capture.dispatch(), || {
            log.conn_closing(3, "localhost:80");
        });

        assert_eq!(capture.messages(), vec!["closing connection"]);
    }

    #[test]
    fn test_without_any_subscriber_is_silent() {
        let log = ClientLog::new("nowhere", None);
        // No subscriber installed: events are dropped
        log.closing_idle();
    }
}
