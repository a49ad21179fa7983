use crate::error::{BoxError, HttpError, InvalidUriKind};
use bytes::Bytes;
use http::header::{AsHeaderName, CONTENT_TYPE};
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderValue, Method, Request, Uri};
use http_body_util::Full;
use serde::Serialize;
use std::fmt;

type ApplyFn = Box<dyn FnOnce(&mut Request<Full<Bytes>>) -> Result<(), HttpError> + Send>;

/// A transformation applied to one outgoing request after the client's
/// default headers and before dispatch
///
/// Options run in the order given. The first one that fails stops the call:
/// nothing is dispatched and the response handler is not invoked.
///
/// ```ignore
/// use outbound_http::RequestOption;
///
/// client
///     .get(ctx, handler, "https://api.example.com/users", [
///         RequestOption::set_headers(auth_headers),
///         RequestOption::add_query(&[("page", "2")]),
///     ])
///     .await?;
/// ```
pub struct RequestOption(ApplyFn);

impl fmt::Debug for RequestOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestOption").finish_non_exhaustive()
    }
}

impl RequestOption {
    /// Caller-defined transformation.
    ///
    /// Errors surface as [`HttpError::RequestOption`] with the original
    /// error as source.
    #[must_use]
    pub fn from_fn<F, E>(apply: F) -> Self
    where
        F: FnOnce(&mut Request<Full<Bytes>>) -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self(Box::new(move |req| {
            apply(req).map_err(|e| HttpError::RequestOption(e.into()))
        }))
    }

    fn infallible(apply: impl FnOnce(&mut Request<Full<Bytes>>) + Send + 'static) -> Self {
        Self(Box::new(move |req| {
            apply(req);
            Ok(())
        }))
    }

    /// Append every value in `headers`, keeping values already present.
    #[must_use]
    pub fn add_headers(headers: HeaderMap) -> Self {
        Self::infallible(move |req| {
            for (name, value) in &headers {
                req.headers_mut().append(name.clone(), value.clone());
            }
        })
    }

    /// Remove every value of each named header.
    #[must_use]
    pub fn delete_headers<K>(names: impl IntoIterator<Item = K>) -> Self
    where
        K: AsHeaderName + Send + 'static,
    {
        let names: Vec<K> = names.into_iter().collect();
        Self::infallible(move |req| {
            for name in names {
                req.headers_mut().remove(name);
            }
        })
    }

    /// Replace each named header with exactly the values in `headers`.
    ///
    /// Headers not named in `headers` are left untouched.
    #[must_use]
    pub fn set_headers(headers: HeaderMap) -> Self {
        Self::infallible(move |req| {
            let target = req.headers_mut();
            for name in headers.keys() {
                target.remove(name);
            }
            for (name, value) in &headers {
                target.append(name.clone(), value.clone());
            }
        })
    }

    /// Merge url-encoded `params` into the existing query string.
    ///
    /// Encoding happens immediately; an encoding failure is reported when
    /// the option is applied.
    #[must_use]
    pub fn add_query<T: Serialize + ?Sized>(params: &T) -> Self {
        let encoded = serde_urlencoded::to_string(params);
        Self(Box::new(move |req| {
            let encoded = encoded?;
            let merged = match req.uri().query() {
                Some(existing) if !existing.is_empty() && !encoded.is_empty() => {
                    format!("{existing}&{encoded}")
                }
                Some(existing) if encoded.is_empty() => existing.to_owned(),
                _ => encoded,
            };
            *req.uri_mut() = with_query(req.uri(), &merged)?;
            Ok(())
        }))
    }

    /// Replace the whole query string with url-encoded `params`.
    #[must_use]
    pub fn set_query<T: Serialize + ?Sized>(params: &T) -> Self {
        let encoded = serde_urlencoded::to_string(params);
        Self(Box::new(move |req| {
            let encoded = encoded?;
            *req.uri_mut() = with_query(req.uri(), &encoded)?;
            Ok(())
        }))
    }

    /// Replace the body with the JSON encoding of `value`.
    ///
    /// Sets `content-type: application/json` unless a content type is
    /// already present.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        let encoded = serde_json::to_vec(value);
        Self(Box::new(move |req| {
            let body = encoded?;
            replace_body(req, Bytes::from(body), "application/json");
            Ok(())
        }))
    }

    /// Replace the body with the url-encoded form of `value`.
    ///
    /// Sets `content-type: application/x-www-form-urlencoded` unless a
    /// content type is already present.
    #[must_use]
    pub fn form<T: Serialize + ?Sized>(value: &T) -> Self {
        let encoded = serde_urlencoded::to_string(value);
        Self(Box::new(move |req| {
            let body = encoded?;
            replace_body(req, Bytes::from(body), "application/x-www-form-urlencoded");
            Ok(())
        }))
    }

    pub(crate) fn apply(self, req: &mut Request<Full<Bytes>>) -> Result<(), HttpError> {
        (self.0)(req)
    }
}

fn replace_body(req: &mut Request<Full<Bytes>>, body: Bytes, content_type: &'static str) {
    if !req.headers().contains_key(CONTENT_TYPE) {
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    *req.body_mut() = Full::new(body);
}

/// Same URI with its query replaced; an empty query removes the `?`.
fn with_query(uri: &Uri, query: &str) -> Result<Uri, HttpError> {
    let path_and_query = if query.is_empty() {
        uri.path().to_owned()
    } else {
        format!("{}?{query}", uri.path())
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).map_err(http::Error::from)?);
    Uri::from_parts(parts).map_err(|e| HttpError::RequestBuild(e.into()))
}

/// Parse `url` and require an absolute `http` or `https` URL.
pub fn validate_url(url: &str) -> Result<Uri, HttpError> {
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("http" | "https") => Ok(uri),
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}

/// Build the bare request for `method` and `url`.
///
/// No client headers or options are applied here.
pub fn build_request<M>(
    method: M,
    url: &str,
    body: Option<Bytes>,
) -> Result<Request<Full<Bytes>>, HttpError>
where
    Method: TryFrom<M>,
    <Method as TryFrom<M>>::Error: Into<http::Error>,
{
    let uri = validate_url(url)?;
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(body.unwrap_or_default()))?;
    Ok(request)
}
