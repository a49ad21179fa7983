use std::time::Duration;
use thiserror::Error;

/// Boxed error used for caller-supplied and transport-level sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
///
/// # Example
///
/// ```ignore
/// match &err {
///     HttpError::InvalidUri { kind, .. } => match kind {
///         InvalidUriKind::ParseError => println!("Malformed URL syntax"),
///         InvalidUriKind::MissingAuthority => println!("URL needs a host"),
///         InvalidUriKind::MissingScheme => println!("URL needs http:// or https://"),
///         _ => println!("Other URI error"),
///     },
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// A client option was given a value it cannot accept
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOptionValue {
        /// Name of the rejected option
        option: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A caller-supplied client option failed
    #[error("Client option failed: {0}")]
    Option(#[source] BoxError),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// A caller-supplied request option failed
    #[error("Request option failed: {0}")]
    RequestOption(#[source] BoxError),

    /// Response headers did not arrive within the configured timeout
    #[error("Response headers not received within {0:?}")]
    Timeout(Duration),

    /// The request context deadline passed before a response arrived
    #[error("Request context deadline exceeded")]
    DeadlineExceeded,

    /// The request context was cancelled before a response arrived
    #[error("Request cancelled")]
    Cancelled,

    /// Transport error (network, connection, round-tripper, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Redirect chain grew past the allowed length
    #[error("stopped after {limit} redirects")]
    TooManyRedirects {
        /// Maximum number of redirects that were allowed
        limit: usize,
    },

    /// A redirect policy refused to follow a redirect
    #[error("Redirect rejected: {0}")]
    Redirect(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only; do not match on its contents
    /// as the format is unstable and may change between releases.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme other than `http` or `https`
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },
}

impl HttpError {
    /// Wrap an arbitrary error raised by a caller-supplied client option.
    #[must_use]
    pub fn option(err: impl Into<BoxError>) -> Self {
        HttpError::Option(err.into())
    }

    /// Wrap an arbitrary error raised by a custom redirect policy.
    #[must_use]
    pub fn redirect(err: impl Into<BoxError>) -> Self {
        HttpError::Redirect(err.into())
    }

    /// Returns `true` for errors produced while sending the request
    /// (as opposed to configuration or request-construction failures).
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        matches!(
            self,
            HttpError::Transport(_)
                | HttpError::Timeout(_)
                | HttpError::DeadlineExceeded
                | HttpError::Cancelled
                | HttpError::TooManyRedirects { .. }
                | HttpError::Redirect(_)
        )
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().expect("Transport error should have a source");
        let downcast = source
            .downcast_ref::<TestError>()
            .expect("Should be able to downcast to TestError");
        assert_eq!(downcast.0, "connection refused");
    }

    #[test]
    fn test_option_error_preserves_source() {
        let err = HttpError::option(TestError("bad option"));

        assert!(matches!(err, HttpError::Option(_)));
        let source = err.source().unwrap();
        assert_eq!(source.downcast_ref::<TestError>().unwrap().0, "bad option");
    }

    #[test]
    fn test_too_many_redirects_message() {
        let err = HttpError::TooManyRedirects { limit: 10 };
        assert_eq!(err.to_string(), "stopped after 10 redirects");
    }

    #[test]
    fn test_dispatch_classification() {
        assert!(HttpError::Cancelled.is_dispatch());
        assert!(HttpError::TooManyRedirects { limit: 10 }.is_dispatch());
        assert!(!HttpError::option(TestError("x")).is_dispatch());
        assert!(!HttpError::Tls(Box::new(TestError("no roots"))).is_dispatch());
        assert!(
            !HttpError::InvalidOptionValue {
                option: "max_idle_conns",
                reason: "negative".to_owned(),
            }
            .is_dispatch()
        );
    }

    #[test]
    fn test_error_chain_traversal() {
        let err = HttpError::Transport(Box::new(TestError("root cause")));

        let mut count = 0;
        let mut current: Option<&(dyn Error + 'static)> = Some(&err);
        while let Some(e) = current {
            count += 1;
            current = e.source();
        }

        assert_eq!(
            count, 2,
            "Should have 2 errors in chain: HttpError and TestError"
        );
    }
}
