//! Tower layers for HTTP client middleware
//!
//! ## Available Layers
//!
//! - [`ChainPolicy`] - Follow-redirect policy driven by a [`RedirectPolicy`] function
//! - [`OtelLayer`] - Adds OpenTelemetry tracing spans to outbound requests

mod otel;
mod redirect;

pub use otel::{OtelLayer, OtelService};
pub use redirect::{
    ChainPolicy, MAX_REDIRECTS, RedirectPolicy, RedirectRequest, default_redirect_policy,
};
