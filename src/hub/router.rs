//! Fan-out of server-pushed events to registered callbacks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use chathub_shared::{HubEvent, HubEventKind, HubName};
use serde_json::Value;

use crate::error::{HubError, Result};

/// A subscriber. Identity is the `Arc` allocation: keep a clone of the
/// handle you registered to unregister it later.
pub type EventCallback = Arc<dyn Fn(&HubEvent) + Send + Sync>;

type Key = (HubName, HubEventKind);

#[derive(Default)]
pub struct EventRouter {
    subscriptions: RwLock<HashMap<Key, Vec<EventCallback>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind` on `hub`. Registering the same handle
    /// twice yields two registrations.
    pub fn on(&self, hub: HubName, kind: HubEventKind, callback: EventCallback) -> Result<()> {
        if !kind.arrives_on(hub) {
            return Err(HubError::EventNotOnHub { event: kind, hub });
        }
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry((hub, kind))
            .or_default()
            .push(callback);
        Ok(())
    }

    /// Remove one registration of exactly this handle. Returns whether one
    /// was found; an unknown handle is not an error.
    pub fn off(&self, hub: HubName, kind: HubEventKind, callback: &EventCallback) -> bool {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let Some(callbacks) = subscriptions.get_mut(&(hub, kind)) else {
            return false;
        };
        let Some(index) = callbacks.iter().position(|c| same_callback(c, callback)) else {
            return false;
        };
        callbacks.remove(index);
        if callbacks.is_empty() {
            subscriptions.remove(&(hub, kind));
        }
        true
    }

    pub fn subscriber_count(&self, hub: HubName, kind: HubEventKind) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(hub, kind))
            .map_or(0, Vec::len)
    }

    /// Decode a raw server invocation and fan it out. Unknown targets and
    /// payload mismatches are logged and dropped.
    pub fn dispatch(&self, hub: HubName, target: &str, arguments: Vec<Value>) {
        let kind = match target.parse::<HubEventKind>() {
            Ok(kind) if kind.arrives_on(hub) => kind,
            Ok(kind) => {
                tracing::warn!(%hub, event = %kind, "event arrived on an unexpected hub");
                return;
            }
            Err(_) => {
                tracing::warn!(%hub, target, "unknown hub event");
                return;
            }
        };
        match HubEvent::decode(kind, arguments) {
            Ok(event) => self.emit(hub, &event),
            Err(e) => tracing::warn!(%hub, event = %kind, error = %e, "malformed event payload"),
        }
    }

    /// Invoke every callback registered for this event, in registration
    /// order. A panicking callback does not stop the others.
    pub fn emit(&self, hub: HubName, event: &HubEvent) {
        let kind = event.kind();
        let callbacks = match self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(hub, kind))
        {
            Some(callbacks) => callbacks.clone(),
            None => {
                tracing::debug!(%hub, event = %kind, "no subscribers");
                return;
            }
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(%hub, event = %kind, "event callback panicked");
            }
        }
    }
}

fn same_callback(a: &EventCallback, b: &EventCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total: usize = self
            .subscriptions
            .read()
            .map(|s| s.values().map(Vec::len).sum())
            .unwrap_or(0);
        f.debug_struct("EventRouter")
            .field("subscriptions", &total)
            .finish()
    }
}
