//! Named events an action raises as it works.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

/// Raised by every action when it fails.
pub const FAILURE: &str = "FAILURE";

pub type EventCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks keyed by the events one action declares.
#[derive(Clone, Default)]
pub struct EventHooks {
    handlers: Arc<RwLock<IndexMap<String, Vec<EventCallback>>>>,
}

impl EventHooks {
    /// Hooks for an action that may raise `events` (plus [`FAILURE`]).
    pub fn new(events: &[&str]) -> Self {
        let mut handlers: IndexMap<String, Vec<EventCallback>> =
            events.iter().map(|e| (e.to_string(), Vec::new())).collect();
        handlers.entry(FAILURE.to_string()).or_default();
        Self {
            handlers: Arc::new(RwLock::new(handlers)),
        }
    }

    pub fn is_declared(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    pub fn events(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Attach a callback to a declared event.
    pub fn register(&self, event: &str, callback: EventCallback) -> Result<()> {
        match self.handlers.write().get_mut(event) {
            Some(list) => {
                list.push(callback);
                Ok(())
            }
            None => Err(Error::argument(format!("Unknown event '{}'", event))),
        }
    }

    /// Run the callbacks for `event`.
    pub fn raise(&self, event: &str) -> Result<()> {
        let callbacks = match self.handlers.read().get(event) {
            Some(list) => list.clone(),
            None => return Err(Error::argument(format!("Unknown event '{}'", event))),
        };
        debug!("Raising event {}", event);
        for callback in callbacks {
            callback(event);
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHooks").field("events", &self.events()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_raise_runs_callbacks() {
        let hooks = EventHooks::new(&["BEFORE_ADD", "AFTER_ADD"]);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        hooks
            .register("AFTER_ADD", Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        hooks.raise("BEFORE_ADD").unwrap();
        hooks.raise("AFTER_ADD").unwrap();
        hooks.raise("AFTER_ADD").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_undeclared_event() {
        let hooks = EventHooks::new(&["BEFORE_ADD"]);
        assert!(hooks.is_declared(FAILURE));
        assert!(matches!(hooks.raise("NOPE"), Err(Error::Argument(_))));
        assert!(hooks.register("NOPE", Arc::new(|_| {})).is_err());
    }
}
