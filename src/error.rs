//! Error taxonomy for this crate.
//!
//! Configuration and lifecycle errors are modeled as `Result`s (§7 items 1
//! and 5 of the requirements); per-request admission errors are not errors
//! at all from the crate's point of view — they are terminal HTTP responses
//! written directly by the reactor (§7 item 2).

/// Failure while parsing or applying the allow-list.
#[derive(thiserror::Error, Debug)]
pub enum AclError {
    #[error("invalid allow-list entry '{entry}': not a valid address or CIDR network")]
    InvalidEntry { entry: String },
}

/// Failure during `HttpServer::init`.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("invalid -rpcallowip configuration: {0}")]
    Acl(#[from] AclError),
    #[error("no endpoint could be bound (port {port})")]
    NoBindableEndpoint { port: u16 },
}

/// Calling the lifecycle API out of sequence, or mutating the router while
/// the server is not quiescent.
#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("HttpServer::init called twice, or called after start")]
    AlreadyInitialized,
    #[error("HttpServer::start called before init, or more than once")]
    NotInitialized,
    #[error("HttpServer is not in a quiescent state (Uninitialized/Initialized/Stopped)")]
    NotQuiescent,
    #[error("HttpServer::interrupt called before start, or more than once")]
    NotRunning,
}
