//! Embedded HTTP front-end for a cryptocurrency full-node process.
//!
//! Terminates HTTP/1.1 on one or more TCP endpoints, authorizes callers by
//! network address, dispatches matched requests onto a bounded pool of
//! worker threads, and marshals replies back to the reactor thread that owns
//! the socket. See `SPEC_FULL.md` for the full design; in short, this crate
//! couples:
//!
//! - a single-threaded, event-driven reactor ([`reactor`]) with
//! - a multi-threaded work queue ([`queue`]) whose worker-produced replies
//!   must be serialized back through the reactor via a cross-thread
//!   [`trigger`],
//! - an ACL subsystem ([`acl`]) applied at request admission, and
//! - a lifecycle state machine ([`lifecycle`]) with Init/Start/Interrupt/Stop
//!   phases.
//!
//! The JSON-RPC method dispatcher, REST endpoint handlers, the node's
//! argument parser, and the logging facility's sink configuration are all
//! external collaborators — they are never part of this crate.

pub mod acl;
pub mod config;
pub mod error;
pub mod queue;
mod reactor;
pub mod request;
pub mod router;
pub mod trigger;

mod lifecycle;

pub use config::{BindEndpoint, HttpServerConfig, DEFAULT_RPC_SERVER_TIMEOUT, MAX_HEADERS_SIZE, MIN_SUPPORTED_BODY_SIZE};
pub use error::{AclError, InitError, LifecycleError};
pub use lifecycle::HttpServer;
pub use request::{HttpRequest, RequestMethod};
pub use router::Handler;
pub use trigger::{ReactorHandle, Trigger};
