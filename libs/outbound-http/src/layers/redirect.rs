//! Redirect policy for the outbound client
//!
//! A [`RedirectPolicy`] is a plain function value: it receives the request
//! about to be issued for a redirect together with every request already
//! issued in the chain (the original first) and either allows the redirect,
//! possibly editing the next request's headers, or rejects it with an error.
//!
//! [`ChainPolicy`] adapts such a function to `tower_http`'s follow-redirect
//! middleware, tracking the chain per logical request.
//!
//! ## Default Behavior
//!
//! [`default_redirect_policy`]:
//! - Allows up to 10 redirects and fails the 11th with
//!   [`HttpError::TooManyRedirects`]
//! - Copies every header of the original request onto the redirect,
//!   overwriting same-named headers

use crate::error::HttpError;
use http::{HeaderMap, Method, Request, StatusCode, Uri, header};
use std::fmt;
use std::sync::Arc;
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Maximum redirects allowed by [`default_redirect_policy`]
pub const MAX_REDIRECTS: usize = 10;

/// Headers describing a request body, removed when a redirect drops the body
const PAYLOAD_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
];

/// Snapshot of one request in a redirect chain
#[derive(Debug, Clone)]
pub struct RedirectRequest {
    /// Request method
    pub method: Method,
    /// Absolute request URI
    pub uri: Uri,
    /// Request headers
    pub headers: HeaderMap,
}

impl RedirectRequest {
    fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        }
    }
}

/// Redirect decision function
///
/// Called before each redirect with the request about to be issued and the
/// chain of requests already issued (`via[0]` is the original). Returning
/// `Err` stops the chain; the error is delivered to the response handler.
///
/// Only header edits on the next request are honored; the target URI and
/// method are decided by the status code and `Location` header.
pub type RedirectPolicy =
    Arc<dyn Fn(&mut RedirectRequest, &[RedirectRequest]) -> Result<(), HttpError> + Send + Sync>;

/// Default redirect policy
///
/// Rejects the redirect once more than [`MAX_REDIRECTS`] requests have
/// been issued, otherwise copies the original request's headers onto `req`.
///
/// # Errors
///
/// Returns [`HttpError::TooManyRedirects`] when `via` holds more than
/// [`MAX_REDIRECTS`] requests.
pub fn default_redirect_policy(
    req: &mut RedirectRequest,
    via: &[RedirectRequest],
) -> Result<(), HttpError> {
    if via.len() > MAX_REDIRECTS {
        return Err(HttpError::TooManyRedirects {
            limit: MAX_REDIRECTS,
        });
    }

    if let Some(original) = via.first() {
        copy_headers(&original.headers, &mut req.headers);
    }

    Ok(())
}

/// Replace every header named in `from` on `to` with all of `from`'s values.
fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for name in from.keys() {
        to.remove(name);
        for value in from.get_all(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Method used for the next hop of a redirect
fn next_method(status: StatusCode, previous: &Method) -> Method {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if *previous == Method::POST => {
            Method::GET
        }
        StatusCode::SEE_OTHER if *previous != Method::HEAD => Method::GET,
        _ => previous.clone(),
    }
}

/// Adapts a [`RedirectPolicy`] to `tower_http`'s follow-redirect middleware
///
/// The middleware clones the policy for every logical request, so each
/// chain starts empty. Every request that goes out (the original one
/// included) is recorded, and headers chosen by the policy are installed on
/// the next hop before it is sent.
#[derive(Clone)]
pub struct ChainPolicy {
    decide: RedirectPolicy,
    via: Vec<RedirectRequest>,
    pending: Option<HeaderMap>,
}

impl ChainPolicy {
    /// Wrap a redirect decision function
    #[must_use]
    pub fn new(decide: RedirectPolicy) -> Self {
        Self {
            decide,
            via: Vec::new(),
            pending: None,
        }
    }

    /// Run the decision function for a redirect to `location`.
    fn follow(&mut self, status: StatusCode, location: &Uri) -> Result<Action, HttpError> {
        let Some(previous) = self.via.last() else {
            // on_request always runs before the first response
            return Ok(Action::Stop);
        };

        let method = next_method(status, &previous.method);
        let drops_body = status == StatusCode::SEE_OTHER || method != previous.method;
        let mut next = RedirectRequest {
            method,
            uri: location.clone(),
            headers: previous.headers.clone(),
        };

        if let Err(err) = (self.decide)(&mut next, &self.via) {
            tracing::debug!(
                hops = self.via.len(),
                target = %location,
                error = %err,
                "redirect rejected by policy"
            );
            return Err(err);
        }

        if drops_body {
            for name in PAYLOAD_HEADERS {
                next.headers.remove(name);
            }
        }

        self.pending = Some(next.headers);
        Ok(Action::Follow)
    }
}

impl fmt::Debug for ChainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainPolicy")
            .field("via", &self.via.len())
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl<B: Clone> Policy<B, HttpError> for ChainPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, HttpError> {
        self.follow(attempt.status(), attempt.location())
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if let Some(headers) = self.pending.take() {
            *request.headers_mut() = headers;
        }
        self.via.push(RedirectRequest::from_request(request));
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        // 307/308 redirects replay the body
        Some(body.clone())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn hop(uri: &str, headers: &[(&'static str, &'static str)]) -> RedirectRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        RedirectRequest {
            method: Method::GET,
            uri: uri.parse().unwrap(),
            headers: map,
        }
    }

    fn chain(len: usize) -> Vec<RedirectRequest> {
        (0..len)
            .map(|i| {
                if i == 0 {
                    hop("http://origin/start", &[("x-test", "TestClient")])
                } else {
                    hop("http://origin/hop", &[])
                }
            })
            .collect()
    }

    #[test]
    fn test_default_policy_allows_ten_hops() {
        let via = chain(10);
        let mut next = hop("http://origin/next", &[]);

        default_redirect_policy(&mut next, &via).unwrap();

        assert_eq!(next.headers.get("x-test").unwrap(), "TestClient");
    }

    #[test]
    fn test_default_policy_rejects_eleventh_hop() {
        let via = chain(11);
        let mut next = hop("http://origin/next", &[]);

        let err = default_redirect_policy(&mut next, &via).unwrap_err();

        assert!(
            matches!(err, HttpError::TooManyRedirects { limit: 10 }),
            "expected TooManyRedirects, got: {err:?}"
        );
    }

    #[test]
    fn test_default_policy_original_headers_win() {
        let via = vec![hop(
            "http://origin/start",
            &[("x-test", "Original"), ("accept", "a"), ("accept", "b")],
        )];
        let mut next = hop(
            "http://origin/next",
            &[("x-test", "Changed"), ("x-extra", "kept")],
        );

        default_redirect_policy(&mut next, &via).unwrap();

        let values: Vec<_> = next.headers.get_all("x-test").iter().collect();
        assert_eq!(values, vec!["Original"]);
        let accept: Vec<_> = next.headers.get_all("accept").iter().collect();
        assert_eq!(accept, vec!["a", "b"]);
        assert_eq!(next.headers.get("x-extra").unwrap(), "kept");
    }

    #[test]
    fn test_default_policy_empty_chain_is_noop() {
        let mut next = hop("http://origin/next", &[("x-own", "1")]);
        default_redirect_policy(&mut next, &[]).unwrap();
        assert_eq!(next.headers.len(), 1);
    }

    #[test]
    fn test_next_method_rules() {
        assert_eq!(next_method(StatusCode::FOUND, &Method::POST), Method::GET);
        assert_eq!(
            next_method(StatusCode::MOVED_PERMANENTLY, &Method::PUT),
            Method::PUT
        );
        assert_eq!(
            next_method(StatusCode::SEE_OTHER, &Method::DELETE),
            Method::GET
        );
        assert_eq!(
            next_method(StatusCode::SEE_OTHER, &Method::HEAD),
            Method::HEAD
        );
        assert_eq!(
            next_method(StatusCode::TEMPORARY_REDIRECT, &Method::POST),
            Method::POST
        );
    }

    #[test]
    fn test_chain_policy_records_requests_and_applies_headers() {
        let policy: RedirectPolicy = Arc::new(
            |req: &mut RedirectRequest, via: &[RedirectRequest]| -> Result<(), HttpError> {
                req.headers.insert("x-hop", HeaderValue::from(via.len()));
                Ok(())
            },
        );
        let mut chain = ChainPolicy::new(policy);

        let mut first = Request::builder()
            .uri("http://origin/start")
            .body(())
            .unwrap();
        Policy::<(), HttpError>::on_request(&mut chain, &mut first);
        assert_eq!(chain.via.len(), 1);

        let location: Uri = "http://origin/next".parse().unwrap();
        let action = chain.follow(StatusCode::FOUND, &location).unwrap();
        assert!(action.is_follow());

        let mut second = Request::builder().uri(location).body(()).unwrap();
        Policy::<(), HttpError>::on_request(&mut chain, &mut second);

        assert_eq!(second.headers().get("x-hop").unwrap(), "1");
        assert_eq!(chain.via.len(), 2);
    }

    #[test]
    fn test_chain_policy_strips_payload_headers_when_body_dropped() {
        let mut chain = ChainPolicy::new(Arc::new(default_redirect_policy));

        let mut first = Request::builder()
            .method(Method::POST)
            .uri("http://origin/submit")
            .header("content-type", "application/json")
            .header("x-test", "TestClient")
            .body(())
            .unwrap();
        Policy::<(), HttpError>::on_request(&mut chain, &mut first);

        let location: Uri = "http://origin/done".parse().unwrap();
        chain.follow(StatusCode::SEE_OTHER, &location).unwrap();

        let headers = chain.pending.as_ref().unwrap();
        assert!(headers.get("content-type").is_none());
        assert_eq!(headers.get("x-test").unwrap(), "TestClient");
    }

    #[test]
    fn test_chain_policy_propagates_policy_error() {
        let reject: RedirectPolicy = Arc::new(
            |_req: &mut RedirectRequest, _via: &[RedirectRequest]| -> Result<(), HttpError> {
                Err(HttpError::redirect("blocked"))
            },
        );
        let mut chain = ChainPolicy::new(reject);
        let mut first = Request::builder().uri("http://origin/a").body(()).unwrap();
        Policy::<(), HttpError>::on_request(&mut chain, &mut first);

        let location: Uri = "http://elsewhere/b".parse().unwrap();
        let err = chain.follow(StatusCode::FOUND, &location).unwrap_err();

        assert!(matches!(err, HttpError::Redirect(_)), "got: {err:?}");
        assert!(chain.pending.is_none());
    }
}
