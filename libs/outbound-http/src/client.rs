use crate::builder::HttpClientBuilder;
use crate::config::HttpClientConfig;
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::options::ClientOption;
use crate::request::{RequestOption, build_request};
use crate::response::HttpResponse;
use crate::transport::{PooledClient, RoundTripper, Transport};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tower::ServiceExt;

/// HTTP client with a pooled, instrumented transport
///
/// Every request goes through the same pipeline: build, bind the
/// [`RequestContext`], append the client's default headers, apply the
/// per-request [`RequestOption`]s, dispatch (following redirects), and hand
/// the outcome to a response handler exactly once.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap and every clone
/// shares one connection pool. Callers do NOT need to wrap it in a `Mutex`.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::with_options([
///     options::dial_timeout(Duration::from_secs(2)),
///     options::headers(default_headers),
/// ])?;
///
/// let users: Vec<User> = client
///     .get(
///         RequestContext::new().with_timeout(Duration::from_secs(5)),
///         |_ctx, outcome| async move { outcome?.json().await },
///         "https://api.example.com/users",
///         [RequestOption::add_query(&[("page", "1")])],
///     )
///     .await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: RoundTripper,
    pub(crate) transport: Arc<Transport>,
    pub(crate) config: Arc<HttpClientConfig>,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Create a builder for configuring the HTTP client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Create a client from an ordered list of options.
    ///
    /// # Errors
    /// Returns the first option error; later options are not applied.
    pub fn with_options(options: impl IntoIterator<Item = ClientOption>) -> Result<Self, HttpError> {
        HttpClientBuilder::new().options(options).build()
    }

    /// Send a request and pass the outcome to `handler`.
    ///
    /// Errors raised before dispatch (invalid method or URL, a failing
    /// request option) are returned directly and `handler` is not called.
    /// Once the request is dispatched, `handler` is called exactly once with
    /// either the response or the dispatch error, and its result is
    /// returned.
    ///
    /// # Errors
    /// Returns request construction errors, or whatever `handler` returns.
    pub async fn execute<M, H, Fut, T, E>(
        &self,
        ctx: RequestContext,
        handler: H,
        method: M,
        url: &str,
        body: Option<Bytes>,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<T, E>
    where
        http::Method: TryFrom<M>,
        <http::Method as TryFrom<M>>::Error: Into<http::Error>,
        H: FnOnce(RequestContext, Result<HttpResponse, HttpError>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HttpError>,
    {
        let mut req = build_request(method, url, body)?;

        for (name, value) in &self.config.headers {
            req.headers_mut().append(name.clone(), value.clone());
        }

        for option in options {
            option.apply(&mut req)?;
        }

        let outcome = ctx
            .run(self.service.clone().oneshot(req))
            .await
            .map(|inner| HttpResponse::new(inner, self.config.max_body_size));

        handler(ctx, outcome).await
    }

    /// `GET` through [`execute`](Self::execute).
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn get<H, Fut, T, E>(
        &self,
        ctx: RequestContext,
        handler: H,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<T, E>
    where
        H: FnOnce(RequestContext, Result<HttpResponse, HttpError>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HttpError>,
    {
        self.execute(ctx, handler, http::Method::GET, url, None, options)
            .await
    }

    /// `POST` of `body` through [`execute`](Self::execute).
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn post<H, Fut, T, E>(
        &self,
        ctx: RequestContext,
        handler: H,
        url: &str,
        body: impl Into<Bytes>,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<T, E>
    where
        H: FnOnce(RequestContext, Result<HttpResponse, HttpError>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HttpError>,
    {
        self.execute(
            ctx,
            handler,
            http::Method::POST,
            url,
            Some(body.into()),
            options,
        )
        .await
    }

    /// Send a request and return the response itself.
    ///
    /// # Errors
    /// Returns request construction and dispatch errors.
    pub async fn send<M>(
        &self,
        ctx: RequestContext,
        method: M,
        url: &str,
        body: Option<Bytes>,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<HttpResponse, HttpError>
    where
        http::Method: TryFrom<M>,
        <http::Method as TryFrom<M>>::Error: Into<http::Error>,
    {
        self.execute(
            ctx,
            |_ctx, outcome| std::future::ready(outcome),
            method,
            url,
            body,
            options,
        )
        .await
    }

    /// Close idle pooled connections.
    ///
    /// Requests in flight are not interrupted and the client stays usable;
    /// later requests dial new connections as needed.
    pub fn close(&self) {
        self.transport.close_idle();
    }

    /// Raw pooled hyper client, sharing this client's dialer.
    ///
    /// Requests sent through it skip redirects, decompression, default
    /// headers and request options.
    #[must_use]
    pub fn hyper_client(&self) -> Arc<PooledClient> {
        self.transport.pooled()
    }

    /// Configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Number of physical connections this client has dialed.
    #[must_use]
    pub fn connections_dialed(&self) -> u64 {
        self.transport.connections_dialed()
    }
}

/// Response handler that drops the response and reports only the error.
#[allow(clippy::needless_pass_by_value)]
pub fn noop_handler(
    _ctx: RequestContext,
    outcome: Result<HttpResponse, HttpError>,
) -> std::future::Ready<Result<(), HttpError>> {
    std::future::ready(outcome.map(drop))
}
