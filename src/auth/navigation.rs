use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use url::Url;

/// Host navigation capability: what the flow handler needs from a browser location
pub trait Navigation: Send + Sync {
    /// The URL the application is currently showing
    fn current_url(&self) -> Url;

    /// Replace the visible location without reloading
    fn replace_history(&self, url: &Url);

    /// Navigate away to `url` (e.g. the identity service)
    fn redirect(&self, url: &Url);
}

/// Whether `url` carries a pending authorization callback
pub fn has_callback_code(url: &Url) -> bool {
    url.query_pairs().any(|(key, _)| key == "code")
}

/// In-process navigation context that records redirects
#[derive(Debug, Clone)]
pub struct MemoryNavigation {
    current: Arc<RwLock<Url>>,
    redirects: Arc<RwLock<Vec<Url>>>,
}

impl MemoryNavigation {
    pub fn new(current: Url) -> Self {
        Self {
            current: Arc::new(RwLock::new(current)),
            redirects: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Simulate the identity service sending the user back to `url`
    pub fn navigate(&self, url: Url) {
        *self.current.write() = url;
    }

    /// All redirects issued so far
    pub fn redirects(&self) -> Vec<Url> {
        self.redirects.read().clone()
    }

    /// The most recent redirect, if any
    pub fn last_redirect(&self) -> Option<Url> {
        self.redirects.read().last().cloned()
    }
}

impl Navigation for MemoryNavigation {
    fn current_url(&self) -> Url {
        self.current.read().clone()
    }

    fn replace_history(&self, url: &Url) {
        debug!(url = %url, "Replacing history entry");
        *self.current.write() = url.clone();
    }

    fn redirect(&self, url: &Url) {
        info!(url = %url, "Redirecting");
        self.redirects.write().push(url.clone());
    }
}
