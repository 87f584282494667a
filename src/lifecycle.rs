//! Init → Start → Interrupt → Stop state machine that stitches components
//! A–F together into one owned aggregate — §4.G and Design Note "Module-global
//! state". This crate exposes no free-function façade: `HttpServer` is the
//! only entry point (Open Question resolved in `SPEC_FULL.md` §9.3).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use tokio::sync::watch;

use crate::acl::Acl;
use crate::config::HttpServerConfig;
use crate::error::{InitError, LifecycleError};
use crate::queue::WorkQueue;
use crate::reactor::{accept_loop, Shared};
use crate::router::{Handler, PathRouter};
use crate::trigger::ReactorHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Interrupting,
    Stopped,
}

/// A bound, not-yet-served listener produced by `bind_addresses` (§4.F).
struct BoundListener {
    std_listener: StdTcpListener,
    addr: SocketAddr,
}

/// The single owned aggregate this crate's Design Note calls for: the
/// reactor, the HTTP objects, the router, the ACL, the work queue, the set
/// of bound sockets, the reactor thread and the worker pool all live here.
pub struct HttpServer {
    state: LifecycleState,
    config: HttpServerConfig,
    acl: Option<Acl>,
    router: RwLock<Arc<PathRouter>>,
    queue: Option<Arc<WorkQueue>>,
    listeners: Vec<BoundListener>,
    bound_addrs: Vec<SocketAddr>,
    interrupted: Arc<AtomicBool>,
    reactor_handle: Option<ReactorHandle>,
    reactor_shutdown: Option<watch::Sender<bool>>,
    reactor_thread: Option<JoinHandle<()>>,
    worker_threads: Vec<JoinHandle<()>>,
}

impl HttpServer {
    /// Construct in the `Uninitialized` state. Call `init` before anything else.
    pub fn new(config: HttpServerConfig) -> Self {
        HttpServer {
            state: LifecycleState::Uninitialized,
            config,
            acl: None,
            router: RwLock::new(Arc::new(PathRouter::new())),
            queue: None,
            listeners: Vec::new(),
            bound_addrs: Vec::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            reactor_handle: None,
            reactor_shutdown: None,
            reactor_thread: None,
            worker_threads: Vec::new(),
        }
    }

    /// Builds the ACL, binds endpoints per §4.F's rule table, and creates the
    /// work queue. No threads are started yet. Failure leaves the server
    /// `Uninitialized` with no sockets left bound.
    pub fn init(&mut self) -> Result<(), InitError> {
        // Calling `init` twice, or after `start`, is a programmer error —
        // §7 item 5 resolves lifecycle violations by failing fast rather
        // than folding them into the configuration-error taxonomy.
        assert_eq!(
            self.state,
            LifecycleState::Uninitialized,
            "HttpServer::init called outside the Uninitialized state"
        );

        let acl = Acl::new(&self.config.rpc_allow_ip)?;
        let listeners = bind_addresses(&self.config)?;

        log::info!(
            target: "httpserver::lifecycle",
            "bound {} endpoint(s) for the HTTP front-end",
            listeners.len()
        );

        self.bound_addrs = listeners.iter().map(|b| b.addr).collect();
        self.acl = Some(acl);
        self.listeners = listeners;
        self.queue = Some(Arc::new(WorkQueue::new(self.config.queue_depth())));
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// The concrete addresses bound during `init` — in particular useful for
    /// tests that bind to port 0 and need to learn which port the OS chose.
    pub fn bound_addrs(&self) -> &[SocketAddr] {
        &self.bound_addrs
    }

    /// Launches the reactor thread and the fixed-size worker pool. Requires
    /// `Initialized`.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state == LifecycleState::Uninitialized {
            return Err(LifecycleError::NotInitialized);
        }
        if self.state != LifecycleState::Initialized {
            return Err(LifecycleError::AlreadyInitialized);
        }
        let acl = self.acl.take().expect("Initialized implies acl is Some");
        let queue = Arc::clone(self.queue.as_ref().expect("Initialized implies queue is Some"));
        let listeners = std::mem::take(&mut self.listeners);

        // One job channel shared by every in-flight request's `write_reply`
        // *and* by `event_handle()` callers outside this crate: both post
        // onto the same reactor-thread-drained queue (§4.E / §6 `EventBase`).
        let (job_tx, job_rx) = tokio::sync::mpsc::unbounded_channel();
        let external_job_tx = job_tx.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Snapshot the router now: registration is only legal outside
        // `Running`, so this Arc is exactly the one the reactor will read
        // for the whole Running phase (§5 "conceptually immutable").
        let router_snapshot = Arc::clone(&*self.router.read().unwrap());
        let config = self.config.clone();
        let interrupted = Arc::clone(&self.interrupted);
        let timeout = config.rpc_server_timeout;

        // The reactor thread owns a current-thread tokio runtime; it is the
        // only thread that ever touches a connection's I/O state, per §5.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<tokio::runtime::Handle>();
        let reactor_thread = std::thread::Builder::new()
            .name("httpserver-reactor".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build reactor runtime");
                let _ = ready_tx.send(runtime.handle().clone());
                runtime.block_on(async move {
                    let reactor = ReactorHandle::new(job_tx, tokio::runtime::Handle::current());
                    let shared = Arc::new(Shared {
                        config,
                        acl,
                        router: router_snapshot,
                        queue,
                        reactor,
                        interrupted,
                    });
                    tokio::spawn(ReactorHandle::drain(job_rx));
                    let mut tasks = Vec::new();
                    for bound in listeners {
                        let tokio_listener = tokio::net::TcpListener::from_std(bound.std_listener)
                            .expect("std listener was already set non-blocking by bind_addresses");
                        let shared = Arc::clone(&shared);
                        let shutdown_rx = shutdown_rx.clone();
                        tasks.push(tokio::spawn(accept_loop(tokio_listener, shared, shutdown_rx, timeout)));
                    }
                    for task in tasks {
                        let _ = task.await;
                    }
                });
            })
            .expect("failed to spawn reactor thread");

        let runtime_handle = ready_rx
            .recv()
            .expect("reactor thread sends its runtime handle before doing anything else");
        self.reactor_handle = Some(ReactorHandle::new(external_job_tx, runtime_handle));
        self.reactor_shutdown = Some(shutdown_tx);
        self.reactor_thread = Some(reactor_thread);

        let worker_count = self.config.worker_count();
        let queue_for_workers = Arc::clone(self.queue.as_ref().expect("queue set in init"));
        self.worker_threads = (0..worker_count)
            .map(|i| {
                let queue = Arc::clone(&queue_for_workers);
                std::thread::Builder::new()
                    .name(format!("httpserver-worker-{i}"))
                    .spawn(move || queue.run())
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::info!(target: "httpserver::lifecycle", "started reactor thread and {worker_count} worker thread(s)");
        self.state = LifecycleState::Running;
        Ok(())
    }

    /// Replaces the generic callback with 503-on-everything and drains the
    /// work queue's waiters. In-flight handler bodies are not interrupted;
    /// `Stop` waits for them.
    pub fn interrupt(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Running {
            return Err(LifecycleError::NotRunning);
        }
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(queue) = &self.queue {
            queue.interrupt();
        }
        log::info!(target: "httpserver::lifecycle", "interrupt requested: new requests now receive 503");
        self.state = LifecycleState::Interrupting;
        Ok(())
    }

    /// Joins worker threads, destroys the queue, stops the reactor loop, and
    /// joins the reactor thread. Valid from `Initialized`, `Running`, or
    /// `Interrupting` (the last two via an implicit interrupt first).
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Initialized => {
                // No reactor/worker threads exist yet, but `init` already
                // bound listener sockets; drop them here so a stopped
                // server genuinely holds no listener, per §8 "Shutdown
                // quiescence" (the Running path closes its listeners by way
                // of reactor-thread teardown below). `bound_addrs` is left
                // as a record of what was bound, same as the Running path.
                self.listeners.clear();
                self.state = LifecycleState::Stopped;
                return Ok(());
            }
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Uninitialized => return Err(LifecycleError::NotInitialized),
            LifecycleState::Running => {
                self.interrupt()?;
            }
            LifecycleState::Interrupting => {}
        }

        for worker in self.worker_threads.drain(..) {
            let _ = worker.join();
        }
        // Only after every worker has joined is it sound to drop the queue
        // (§5 "must never be destroyed before all worker threads have
        // joined" — this is a precondition of the queue's own contract).
        self.queue = None;

        if let Some(tx) = self.reactor_shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(reactor_thread) = self.reactor_thread.take() {
            let _ = reactor_thread.join();
        }
        self.reactor_handle = None;

        log::info!(target: "httpserver::lifecycle", "stopped: no worker threads, no bound listeners remain");
        self.state = LifecycleState::Stopped;
        Ok(())
    }

    /// `EventBase()` equivalent: a live handle onto the reactor thread for
    /// modules that need to schedule their own cross-thread triggers.
    /// `None` outside `Running`.
    pub fn event_handle(&self) -> Option<ReactorHandle> {
        self.reactor_handle.clone()
    }

    /// The OS thread ID of the reactor thread, `None` outside `Running`.
    ///
    /// Exists to make the "every reply is sent on the reactor thread"
    /// property (§8) observable from outside the crate without a real
    /// protocol-level shim: a test can capture `thread::current().id()`
    /// from inside a job posted through [`Self::event_handle`] and compare
    /// it against this value.
    pub fn reactor_thread_id(&self) -> Option<std::thread::ThreadId> {
        self.reactor_thread.as_ref().map(|h| h.thread().id())
    }

    /// Registers a path handler. Per §5/§9, callers must not register while
    /// `Running` or `Interrupting` — the crate enforces this as a checked
    /// error rather than leaving it as silent UB (`SPEC_FULL.md` §9.1).
    pub fn register_handler(
        &self,
        prefix: impl Into<String>,
        exact: bool,
        handler: Arc<dyn Handler>,
    ) -> Result<(), LifecycleError> {
        self.guard_quiescent()?;
        let mut guard = self.router.write().unwrap();
        let mut next = (**guard).clone();
        next.register(prefix, exact, handler);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn unregister_handler(&self, prefix: &str, exact: bool) -> Result<bool, LifecycleError> {
        self.guard_quiescent()?;
        let mut guard = self.router.write().unwrap();
        let mut next = (**guard).clone();
        let removed = next.unregister(prefix, exact);
        *guard = Arc::new(next);
        Ok(removed)
    }

    fn guard_quiescent(&self) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Running | LifecycleState::Interrupting => Err(LifecycleError::NotQuiescent),
            _ => Ok(()),
        }
    }
}

impl Drop for HttpServer {
    /// Best-effort safety net so an embedder that forgets to call `stop`
    /// still joins its threads instead of leaking them past process state
    /// that assumed a clean shutdown.
    fn drop(&mut self) {
        if !matches!(self.state, LifecycleState::Stopped | LifecycleState::Uninitialized) {
            let _ = self.stop();
        }
    }
}

/// §4.F's binding rule table, evaluated against the resolved config.
fn bind_addresses(config: &HttpServerConfig) -> Result<Vec<BoundListener>, InitError> {
    let has_allow = !config.rpc_allow_ip.is_empty();
    let has_bind = !config.rpc_bind.is_empty();

    let targets: Vec<(IpAddr, u16)> = if !has_allow && !has_bind {
        loopback_targets(config.rpc_port)
    } else if has_allow && !has_bind {
        log::warn!(
            target: "httpserver::lifecycle",
            "-rpcallowip configured without -rpcbind: binding loopback only"
        );
        loopback_targets(config.rpc_port)
    } else if !has_allow && has_bind {
        log::warn!(
            target: "httpserver::lifecycle",
            "-rpcbind configured without -rpcallowip: ignoring -rpcbind, binding loopback only \
             (refusing to expose the endpoint to the world without an ACL)"
        );
        loopback_targets(config.rpc_port)
    } else {
        let mut targets = Vec::new();
        for endpoint in &config.rpc_bind {
            let port = endpoint.port.unwrap_or(config.rpc_port);
            match endpoint.host.parse::<IpAddr>() {
                Ok(ip) => targets.push((ip, port)),
                Err(_) => {
                    log::warn!(
                        target: "httpserver::lifecycle",
                        "-rpcbind host '{}' is not a literal IP address; skipping",
                        endpoint.host
                    );
                }
            }
        }
        targets
    };

    let mut bound = Vec::new();
    for (ip, port) in targets {
        let addr = SocketAddr::new(ip, port);
        match StdTcpListener::bind(addr) {
            Ok(listener) => {
                listener
                    .set_nonblocking(true)
                    .expect("setting an owned socket non-blocking cannot fail");
                bound.push(BoundListener { std_listener: listener, addr });
            }
            Err(err) => {
                log::warn!(target: "httpserver::lifecycle", "failed to bind {addr}: {err}");
            }
        }
    }

    if bound.is_empty() {
        return Err(InitError::NoBindableEndpoint { port: config.rpc_port });
    }
    Ok(bound)
}

fn loopback_targets(port: u16) -> Vec<(IpAddr, u16)> {
    vec![
        (IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        (IpAddr::V6(Ipv6Addr::LOCALHOST), port),
    ]
}
