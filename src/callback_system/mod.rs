//! Observer registration for session notifications
//!
//! Callbacks are registered under a handle and invoked in place on every
//! trigger, so a subscriber sees each notification exactly once and can be
//! removed again with its handle.


use std::{fmt, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, error};
use uuid::Uuid;

/// Type for callback IDs
pub type CallbackId = Uuid;

/// Trait for types that can be used in callbacks
pub trait CallbackData: Clone + Send + Sync + 'static + fmt::Debug {}

impl<T> CallbackData for T where T: Clone + Send + Sync + 'static + fmt::Debug {}

type Callback<T> = Arc<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>;

/// A registry of callbacks sharing one payload type
#[derive(Clone)]
pub struct CallbackRegistry<T: CallbackData> {
    /// Group identifier used in log output
    group: String,
    callbacks: Arc<DashMap<CallbackId, Callback<T>>>,
}

impl<T: CallbackData> CallbackRegistry<T> {
    /// Create a new callback registry with a group identifier
    pub fn with_group(group: &str) -> Self {
        Self {
            group: group.to_string(),
            callbacks: Arc::new(DashMap::new()),
        }
    }

    /// Register a callback function
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.callbacks.insert(id, Arc::new(callback));

        debug!(callback_id = %id, group = %self.group, "Registered callback");
        id
    }

    /// Unregister a callback by ID
    pub fn unregister(&self, id: CallbackId) -> bool {
        let removed = self.callbacks.remove(&id).is_some();

        if removed {
            debug!(callback_id = %id, group = %self.group, "Unregistered callback");
        } else {
            debug!(
                callback_id = %id,
                group = %self.group,
                "Attempted to unregister non-existent callback"
            );
        }

        removed
    }

    /// Invoke every registered callback with `data`.
    ///
    /// A failing callback is logged and does not stop delivery to the others.
    /// Returns the number of callbacks that completed successfully.
    pub fn trigger(&self, data: T) -> usize {
        // Snapshot so callbacks may (un)register without deadlocking the map
        let callbacks: Vec<(CallbackId, Callback<T>)> = self
            .callbacks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match callback(data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    error!(
                        callback_id = %id,
                        group = %self.group,
                        error = %e,
                        "Callback execution failed"
                    );
                }
            }
        }

        debug!(group = %self.group, delivered, "Triggered callbacks");
        delivered
    }

    /// Get the number of registered callbacks
    pub fn count(&self) -> usize {
        self.callbacks.len()
    }

    /// Clear all registered callbacks
    pub fn clear(&self) {
        let count = self.callbacks.len();
        self.callbacks.clear();
        debug!(group = %self.group, count, "Cleared all callbacks");
    }
}

impl<T: CallbackData> fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("group", &self.group)
            .field("count", &self.callbacks.len())
            .finish()
    }
}
