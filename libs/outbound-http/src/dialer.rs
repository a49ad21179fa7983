//! Instrumented connection dialer
//!
//! [`Dialer`] wraps the rustls-capable `HttpConnector` used by the pool.
//! Every physical connection it opens gets a client-unique id and is
//! wrapped in a [`TrackedConn`] so that both opening and closing show up in
//! the client's diagnostic log.

use crate::error::BoxError;
use crate::log::ClientLog;
use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_rustls::{HttpsConnector, MaybeHttpsStream};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tower::Service;

/// Stream produced by the rustls connector
pub type HttpsStream = MaybeHttpsStream<TokioIo<TcpStream>>;

/// The whole connect (TCP plus TLS handshake) took longer than allowed
#[derive(Debug, thiserror::Error)]
#[error("connecting to {addr} timed out after {budget:?}")]
pub struct ConnectTimeout {
    pub addr: String,
    pub budget: Duration,
}

/// Connector service handed to the connection pool
#[derive(Clone)]
pub struct Dialer {
    inner: HttpsConnector<HttpConnector>,
    next_id: Arc<AtomicU64>,
    budget: Option<Duration>,
    log: ClientLog,
}

impl Dialer {
    /// `budget` bounds TCP connect and TLS handshake together; `None` is unbounded.
    #[must_use]
    pub fn new(
        inner: HttpsConnector<HttpConnector>,
        budget: Option<Duration>,
        log: ClientLog,
    ) -> Self {
        Self {
            inner,
            next_id: Arc::new(AtomicU64::new(0)),
            budget,
            log,
        }
    }

    /// Number of connection ids handed out so far
    #[must_use]
    pub fn dialed(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

/// `host:port` of the connection target, with the scheme's default port filled in
fn dial_addr(dst: &Uri) -> String {
    let host = dst.host().unwrap_or_default();
    let port = dst
        .port_u16()
        .unwrap_or(if dst.scheme_str() == Some("https") { 443 } else { 80 });
    format!("{host}:{port}")
}

impl Service<Uri> for Dialer {
    type Response = TrackedConn<HttpsStream>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let addr = dial_addr(&dst);
        let log = self.log.clone();
        let budget = self.budget;

        log.dialing(id, &addr);
        let connecting = self.inner.call(dst);

        Box::pin(async move {
            let result = match budget {
                Some(budget) => match tokio::time::timeout(budget, connecting).await {
                    Ok(result) => result,
                    Err(_) => Err(Box::new(ConnectTimeout {
                        addr: addr.clone(),
                        budget,
                    }) as BoxError),
                },
                None => connecting.await,
            };

            match result {
                Ok(stream) => Ok(TrackedConn::new(stream, id, addr, log)),
                Err(err) => {
                    log.dial_failed(id, &addr, err.as_ref());
                    Err(err)
                }
            }
        })
    }
}

/// Connection wrapper that reports its own close
///
/// The close event is logged exactly once per connection, whether the pool
/// shuts it down or simply drops it.
#[derive(Debug)]
pub struct TrackedConn<T> {
    inner: T,
    id: u64,
    addr: String,
    log: ClientLog,
    closed: bool,
}

impl<T> TrackedConn<T> {
    fn new(inner: T, id: u64, addr: String, log: ClientLog) -> Self {
        Self {
            inner,
            id,
            addr,
            log,
            closed: false,
        }
    }

    /// Identity assigned when the connection was dialed
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.conn_closing(self.id, &self.addr);
        }
    }
}

impl<T> Drop for TrackedConn<T> {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

impl<T: Connection> Connection for TrackedConn<T> {
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}

impl<T: Read + Unpin> Read for TrackedConn<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_read(cx, buf)
    }
}

impl<T: Write + Unpin> Write for TrackedConn<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if result.is_ready() {
            this.mark_closed();
        }
        result
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_write_vectored(cx, bufs)
    }
}
