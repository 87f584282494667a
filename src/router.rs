//! Linear list of (prefix, exact-match?, handler) entries; first-match wins — §4.C.

use std::sync::Arc;

use crate::config::HttpServerConfig;
use crate::request::HttpRequest;

/// A registered path handler. Must call `HttpRequest::write_reply` exactly once.
pub trait Handler: Send + Sync {
    fn call(&self, config: &HttpServerConfig, request: HttpRequest, path_tail: String);
}

impl<F> Handler for F
where
    F: Fn(&HttpServerConfig, HttpRequest, String) + Send + Sync,
{
    fn call(&self, config: &HttpServerConfig, request: HttpRequest, path_tail: String) {
        self(config, request, path_tail)
    }
}

#[derive(Clone)]
struct Entry {
    prefix: String,
    exact: bool,
    handler: Arc<dyn Handler>,
}

/// Registration happens before `Start`; unregistration after `Stop` or
/// between requests. The router is consulted without locking while running
/// — see `spec.md` §5 for the external-contract precondition this relies on.
#[derive(Clone, Default)]
pub struct PathRouter {
    entries: Vec<Entry>,
}

impl PathRouter {
    pub fn new() -> Self {
        PathRouter {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, prefix: impl Into<String>, exact: bool, handler: Arc<dyn Handler>) {
        self.entries.push(Entry {
            prefix: prefix.into(),
            exact,
            handler,
        });
    }

    /// Removes the first entry whose `(prefix, exact)` matches exactly.
    /// Returns `true` if an entry was removed.
    pub fn unregister(&mut self, prefix: &str, exact: bool) -> bool {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.prefix == prefix && e.exact == exact)
        {
            self.entries.remove(idx);
            true
        } else {
            false
        }
    }

    /// First-match-wins lookup. `exact` entries match only the identical
    /// URI; others match a leading-substring prefix, and the tail is the
    /// remainder of the URI after the prefix.
    pub fn route(&self, uri: &str) -> Option<(Arc<dyn Handler>, String)> {
        for entry in &self.entries {
            let matched = if entry.exact {
                uri == entry.prefix
            } else {
                uri.starts_with(entry.prefix.as_str())
            };
            if matched {
                let tail = if entry.exact {
                    String::new()
                } else {
                    uri[entry.prefix.len()..].to_string()
                };
                return Some((Arc::clone(&entry.handler), tail));
            }
        }
        None
    }
}
