//! Cross-thread trigger: a reactor-owned, reactor-thread-delivered callback
//! a worker can use to hand reply sending (or anything else) back to the
//! single thread that owns connection I/O — §4.E.
//!
//! Modeled per Design Note §9: a worker posts a closure onto a
//! single-consumer channel drained by a task running on the reactor's own
//! runtime, so the closure always executes on the reactor thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

/// A job scheduled to run on the reactor thread.
pub type BoxedJob = Box<dyn FnOnce() + Send>;

/// A cheap, cloneable capability to post work onto the reactor thread.
/// Exposed to callers through [`crate::HttpServer::event_handle`], and held
/// internally by every in-flight [`crate::HttpRequest`].
#[derive(Clone)]
pub struct ReactorHandle {
    immediate: mpsc::UnboundedSender<BoxedJob>,
    runtime: tokio::runtime::Handle,
}

impl ReactorHandle {
    pub(crate) fn new(
        immediate: mpsc::UnboundedSender<BoxedJob>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        ReactorHandle { immediate, runtime }
    }

    /// Schedule `job` to run once on the reactor thread. `delay = None`
    /// arms it for immediate delivery (the path `HttpRequest::write_reply`
    /// uses); `Some(d)` arms a timer first.
    pub fn schedule_once(&self, delay: Option<Duration>, job: impl FnOnce() + Send + 'static) {
        match delay {
            None => {
                // The receiver only goes away once the reactor itself has
                // shut down, at which point there's nowhere left to deliver
                // the reply anyway.
                let _ = self.immediate.send(Box::new(job));
            }
            Some(delay) => {
                let tx = self.immediate.clone();
                self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Box::new(job));
                });
            }
        }
    }

    /// Runs on the reactor's own runtime, forever draining jobs posted by
    /// workers. Spawned exactly once, when the reactor starts.
    pub(crate) async fn drain(mut rx: mpsc::UnboundedReceiver<BoxedJob>) {
        while let Some(job) = rx.recv().await {
            job();
        }
    }
}

/// A reusable, reactor-owned trigger. Unlike the one-shot closures
/// `ReactorHandle::schedule_once` takes directly (which are always
/// delete-on-fire), a `Trigger` can be created once and armed repeatedly by
/// whoever holds it — unless `delete_on_fire` was set at creation, in which
/// case it fires at most once and then holds nothing further to run.
pub struct Trigger {
    reactor: ReactorHandle,
    delete_on_fire: bool,
    handler: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Trigger {
    pub fn new(
        reactor: ReactorHandle,
        delete_on_fire: bool,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Trigger {
            reactor,
            delete_on_fire,
            handler: Mutex::new(Some(Arc::new(handler))),
        })
    }

    /// Arm for delivery. If `delay` is `None` the trigger fires as soon as
    /// the reactor thread next polls; otherwise a timer is armed. A no-op
    /// if a delete-on-fire trigger has already fired once.
    pub fn schedule(self: &Arc<Self>, delay: Option<Duration>) {
        let handler = self.handler.lock().unwrap().clone();
        let Some(handler) = handler else {
            return;
        };
        let this = Arc::clone(self);
        self.reactor.schedule_once(delay, move || {
            handler();
            if this.delete_on_fire {
                *this.handler.lock().unwrap() = None;
            }
        });
    }

    /// Whether this trigger can still fire (always `true` for
    /// non-delete-on-fire triggers).
    pub fn is_armed(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}
