//! OpenTelemetry trace context propagation for outbound requests
//!
//! - With `otel` feature: injects W3C Trace Context from the current span
//!   through the global propagator
//! - Without `otel` feature: no-op

use http::HeaderMap;

/// W3C Trace Context header name
pub const TRACEPARENT: &str = "traceparent";

/// Extract traceparent header value from HTTP headers
#[must_use]
pub fn get_traceparent(headers: &HeaderMap) -> Option<&str> {
    headers.get(TRACEPARENT)?.to_str().ok()
}

#[cfg(feature = "otel")]
mod imp {
    use http::{HeaderMap, HeaderName, HeaderValue};
    use opentelemetry::global;
    use opentelemetry::propagation::Injector;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    struct HeadersInjector<'a>(&'a mut HeaderMap);

    impl Injector for HeadersInjector<'_> {
        fn set(&mut self, key: &str, value: String) {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                self.0.insert(name, val);
            }
        }
    }

    /// Inject the current span's trace context into HTTP headers.
    pub fn inject_current_span(headers: &mut HeaderMap) {
        let cx = tracing::Span::current().context();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&cx, &mut HeadersInjector(headers));
        });
    }
}

#[cfg(not(feature = "otel"))]
mod imp {
    use http::HeaderMap;

    /// No-op: OpenTelemetry is disabled
    pub fn inject_current_span(_headers: &mut HeaderMap) {}
}

pub use imp::inject_current_span;
