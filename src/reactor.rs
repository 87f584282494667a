//! Event-loop thread: accepts connections, parses requests, and invokes the
//! generic callback described in §4.F. Built on `hyper`'s low-level HTTP/1.1
//! connection primitives plus a dedicated current-thread `tokio` runtime —
//! that thread *is* "the reactor thread" referenced throughout this crate.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

use crate::acl::Acl;
use crate::config::{HttpServerConfig, MAX_HEADERS_SIZE};
use crate::queue::{Job, WorkQueue};
use crate::request::{HttpRequest, ReplyMessage, RequestMethod};
use crate::router::PathRouter;
use crate::trigger::ReactorHandle;

/// Truncated to at most 100 characters, restricted to a safe subset, before
/// it ever reaches a log line (§4.F step 4: "sanitized line").
fn sanitize_uri_for_log(uri: &str) -> String {
    let truncated: String = uri
        .chars()
        .take(100)
        .map(|c| {
            if c.is_ascii_graphic() && c != '%' {
                c
            } else {
                '?'
            }
        })
        .collect();
    truncated
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

/// State shared by every connection accepted by the reactor; one instance
/// per `HttpServer`, cloned (cheaply, via the inner `Arc`s) into each
/// [`CoreService`].
pub(crate) struct Shared {
    pub(crate) config: HttpServerConfig,
    pub(crate) acl: Acl,
    /// A fixed snapshot taken at `Start`: registration is only legal outside
    /// `Running`, so the reactor never needs to re-read this (§5).
    pub(crate) router: Arc<PathRouter>,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) reactor: ReactorHandle,
    /// Flipped by `Interrupt`: every request after this point gets 503
    /// without consulting the ACL or the router (§4.G "Interrupting").
    pub(crate) interrupted: AtomicBool,
}

/// The generic callback of §4.F, realized as a `hyper::service::Service`.
/// One instance is built per accepted connection (cheap: it's a handful of
/// `Arc` clones), carrying the peer address captured at accept time since
/// `hyper`'s `Service::call` has no other way to learn it.
#[derive(Clone)]
pub(crate) struct CoreService {
    pub(crate) shared: Arc<Shared>,
    pub(crate) peer: SocketAddr,
}

impl Service<Request<Incoming>> for CoreService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        let peer = self.peer;
        Box::pin(async move { Ok(handle_request(shared, peer, req).await) })
    }
}

fn plain_reply(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("status/body always produce a valid response")
}

async fn handle_request(
    shared: Arc<Shared>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    // §4.G "Interrupting": a 503-on-everything handler replaces the generic
    // callback, short-circuiting before ACL/router are even consulted.
    if shared.interrupted.load(Ordering::SeqCst) {
        log::debug!(target: "httpserver::reactor", "503: request from {peer} received after interrupt");
        return plain_reply(StatusCode::SERVICE_UNAVAILABLE, Bytes::new());
    }

    let method = RequestMethod::from_http(req.method());
    let uri = req.uri().to_string();
    let trace_enabled = log::log_enabled!(target: "httpserver::trace", log::Level::Trace);

    let (parts, body) = req.into_parts();
    let max_body = shared.config.max_body_size();
    let body = match read_body_bounded(body, max_body).await {
        Ok(bytes) => bytes,
        Err(_) => {
            log::warn!(target: "httpserver::reactor", "body from {peer} exceeded {max_body} bytes");
            return plain_reply(StatusCode::PAYLOAD_TOO_LARGE, Bytes::new());
        }
    };

    if trace_enabled {
        log::trace!(
            target: "httpserver::trace",
            "request from {peer}: {} {} headers={:?} body={}",
            parts.method,
            parts.uri,
            parts.headers,
            hex_encode(&body),
        );
    }

    dispatch(shared, peer, method, uri, parts.headers, body).await
}

async fn read_body_bounded(body: Incoming, limit: u64) -> Result<Bytes, ()> {
    let collected = body.collect().await.map_err(|_| ())?;
    let bytes = collected.to_bytes();
    if (bytes.len() as u64) > limit {
        Err(())
    } else {
        Ok(bytes)
    }
}

/// Steps 3-6 of §4.F's generic callback: ACL, method, sanitized log, route,
/// enqueue (or reply inline for 403/400/404/500).
async fn dispatch(
    shared: Arc<Shared>,
    peer: SocketAddr,
    method: RequestMethod,
    uri: String,
    headers: http::HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    if !shared.acl.allows(peer.ip()) {
        log::warn!(target: "httpserver::reactor", "403: {peer} is not on the allow-list");
        return plain_reply(StatusCode::FORBIDDEN, Bytes::new());
    }
    if method == RequestMethod::Unknown {
        log::warn!(target: "httpserver::reactor", "400: unrecognized method from {peer} for '{}'", sanitize_uri_for_log(&uri));
        return plain_reply(StatusCode::BAD_REQUEST, Bytes::new());
    }

    log::info!(
        target: "httpserver::reactor",
        "{method:?} '{}' from {peer}",
        sanitize_uri_for_log(&uri)
    );

    let Some((handler, path_tail)) = shared.router.route(&uri) else {
        log::debug!(target: "httpserver::reactor", "404: no handler registered for '{}'", sanitize_uri_for_log(&uri));
        return plain_reply(StatusCode::NOT_FOUND, Bytes::new());
    };

    let input_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let (reply_tx, reply_rx) = oneshot::channel();
    let shutting_down = shared.interrupted.load(Ordering::SeqCst);
    let request = HttpRequest::new(
        peer,
        uri.clone(),
        method,
        input_headers,
        body,
        reply_tx,
        shared.reactor.clone(),
        shutting_down,
    );

    let config = shared.config.clone();
    let job: Job = Box::new(move || handler.call(&config, request, path_tail));

    if let Err(_job) = shared.queue.try_enqueue(job) {
        log::warn!(target: "httpserver::reactor", "500: work queue depth exceeded, dropping request from {peer}");
        return plain_reply(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"Work queue depth exceeded"));
    }

    match reply_rx.await {
        Ok(ReplyMessage { status, headers, body }) => {
            let mut builder = Response::builder().status(status);
            if let Some(response_headers) = builder.headers_mut() {
                *response_headers = headers;
            }
            builder
                .body(Full::new(body))
                .unwrap_or_else(|_| plain_reply(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()))
        }
        Err(_) => {
            // The reactor shut down with the reply still in flight.
            plain_reply(StatusCode::SERVICE_UNAVAILABLE, Bytes::new())
        }
    }
}

/// Runs on the reactor thread for the lifetime of one bound listener: accepts
/// connections, spawns a `hyper` HTTP/1.1 connection task per socket, and
/// stops accepting once `shutdown` fires.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    server_timeout: Duration,
) {
    let mut builder = http1::Builder::new();
    // `max_buf_size` bounds the read buffer hyper uses while parsing the
    // request line and headers — the closest hyper 1.x equivalent of the
    // 8 KiB header-block ceiling in §4.F.
    builder.max_buf_size(MAX_HEADERS_SIZE).keep_alive(true);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!(target: "httpserver::reactor", "accept error: {err}");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let svc = CoreService { shared: Arc::clone(&shared), peer };
                let conn = builder.serve_connection(io, svc);
                tokio::spawn(async move {
                    match tokio::time::timeout(server_timeout, conn).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            log::debug!(target: "httpserver::reactor", "connection from {peer} closed with error: {err}");
                        }
                        Err(_elapsed) => {
                            log::debug!(target: "httpserver::reactor", "connection from {peer} idle-timed-out");
                        }
                    }
                });
            }
        }
    }
}
