//! Wraps one in-flight HTTP exchange; exposes headers/body/peer and routes
//! the eventual reply back to the reactor thread — §4.D.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::oneshot;

use crate::trigger::ReactorHandle;

/// `GetRequestMethod()`. Anything outside this set maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Head,
    Put,
    Options,
    Unknown,
}

impl RequestMethod {
    pub(crate) fn from_http(method: &http::Method) -> Self {
        match *method {
            http::Method::GET => RequestMethod::Get,
            http::Method::POST => RequestMethod::Post,
            http::Method::HEAD => RequestMethod::Head,
            http::Method::PUT => RequestMethod::Put,
            http::Method::OPTIONS => RequestMethod::Options,
            _ => RequestMethod::Unknown,
        }
    }
}

/// The finished reply, handed across the reactor-thread boundary via the
/// cross-thread trigger and turned into a real `hyper::Response` by the
/// connection task that's still waiting on it.
pub(crate) struct ReplyMessage {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Single-owner wrapper around one in-flight request. Lives on the reactor
/// thread until enqueued, then moves to whichever worker thread dequeues it,
/// and is consumed by `write_reply` (which hands the reply back to the
/// reactor and clears the owning handle).
pub struct HttpRequest {
    peer: SocketAddr,
    uri: String,
    method: RequestMethod,
    input_headers: Vec<(String, String)>,
    body: Bytes,
    output_headers: HeaderMap,
    reply_sent: bool,
    reply_tx: Option<oneshot::Sender<ReplyMessage>>,
    reactor: ReactorHandle,
    shutting_down: bool,
}

impl HttpRequest {
    pub(crate) fn new(
        peer: SocketAddr,
        uri: String,
        method: RequestMethod,
        input_headers: Vec<(String, String)>,
        body: Bytes,
        reply_tx: oneshot::Sender<ReplyMessage>,
        reactor: ReactorHandle,
        shutting_down: bool,
    ) -> Self {
        HttpRequest {
            peer,
            uri,
            method,
            input_headers,
            body,
            output_headers: HeaderMap::new(),
            reply_sent: false,
            reply_tx: Some(reply_tx),
            reactor,
            shutting_down,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Case-insensitive header lookup, per HTTP.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.input_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Ordered sequence of input headers, preserving wire order.
    pub fn all_input_headers(&self) -> &[(String, String)] {
        &self.input_headers
    }

    /// Ordered sequence of output headers queued so far.
    pub fn all_output_headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.output_headers.iter()
    }

    /// Returns the whole body. If `drain` is true, the internal buffer is
    /// emptied — a second call after a drain returns an empty body.
    pub fn read_body(&mut self, drain: bool) -> Bytes {
        if drain {
            std::mem::take(&mut self.body)
        } else {
            self.body.clone()
        }
    }

    /// Must be called before `write_reply`.
    pub fn write_header(&mut self, name: HeaderName, value: HeaderValue) {
        assert!(
            !self.reply_sent,
            "write_header called after write_reply (contract violation)"
        );
        self.output_headers.append(name, value);
    }

    /// Schedules the reply: copies `body` into the reply message on the
    /// calling (worker) thread, then posts a one-shot cross-thread trigger
    /// so the reactor thread performs the actual send. After this returns,
    /// the request's handle is considered transferred to the reactor —
    /// calling any other operation on this object is a contract violation.
    pub fn write_reply(mut self, status: StatusCode, body: impl Into<Bytes>) {
        assert!(
            !self.reply_sent,
            "write_reply called twice on the same request (contract violation)"
        );
        if self.shutting_down {
            self.output_headers
                .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        }
        let message = ReplyMessage {
            status,
            headers: std::mem::take(&mut self.output_headers),
            body: body.into(),
        };
        let tx = self.reply_tx.take().expect("reply_tx present until sent");
        self.reply_sent = true;
        // Armed for immediate delivery (delay = None), per §4.D.
        self.reactor.schedule_once(None, move || {
            let _ = tx.send(message);
        });
    }
}

impl Drop for HttpRequest {
    /// Safety net for buggy handlers: if nobody called `write_reply`, emit a
    /// synthetic 500 so the connection doesn't hang forever.
    fn drop(&mut self) {
        if self.reply_sent {
            return;
        }
        self.reply_sent = true;
        if let Some(tx) = self.reply_tx.take() {
            log::warn!(
                target: "httpserver::request",
                "request to '{}' from {} destroyed without a reply; emitting synthetic 500",
                self.uri, self.peer
            );
            let message = ReplyMessage {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                headers: std::mem::take(&mut self.output_headers),
                body: Bytes::from_static(b"Unhandled request"),
            };
            self.reactor.schedule_once(None, move || {
                let _ = tx.send(message);
            });
        }
    }
}
