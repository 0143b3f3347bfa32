use crate::handler::DynHandler;
use crate::registry::{Registry, Route, RouteKey};

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Opaque handle to a handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription {}", self.0)
    }
}

/// Tracks active registrations and owns their lifetime.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    registry: Registry,
    active: Mutex<HashSet<SubscriptionId>>,
}

impl SubscriptionManager {
    /// Creates a manager with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler under the key.
    pub fn subscribe(&self, key: RouteKey, handler: Arc<dyn DynHandler>) -> SubscriptionId {
        let id = self.registry.register(key, handler);
        self.active.lock().insert(id);
        id
    }

    /// Removes the registration. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.active.lock().remove(&id);
        self.registry.unregister(id)
    }

    /// Removes every registration, returning how many were removed.
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<_> = self.active.lock().drain().collect();
        let removed = ids
            .into_iter()
            .filter(|id| self.registry.unregister(*id))
            .count();

        debug!("removed {} subscriptions", removed);
        removed
    }

    /// Whether any handler is registered under the key.
    #[must_use]
    pub fn has_subscribers(&self, key: &RouteKey) -> bool {
        self.registry.handler_count(key) > 0
    }

    /// Number of active registrations.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.active.lock().len()
    }

    /// The key's handlers, in registration order.
    #[must_use]
    pub fn resolve(&self, key: &RouteKey) -> Vec<Route> {
        self.registry.resolve(key)
    }
}

/// Unsubscribes its registration when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    id: SubscriptionId,
    manager: Weak<SubscriptionManager>,
}

impl SubscriptionGuard {
    pub(crate) fn new(id: SubscriptionId, manager: &Arc<SubscriptionManager>) -> Self {
        Self {
            id,
            manager: Arc::downgrade(manager),
        }
    }

    /// The guarded registration.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
    }
}
