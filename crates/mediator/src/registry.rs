use crate::handler::DynHandler;
use crate::message::MessageKind;
use crate::subscription::SubscriptionId;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;

/// Where a message is routed: a channel plus the message kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey {
    channel: Arc<str>,
    kind: MessageKind,
}

impl RouteKey {
    /// Creates a route key.
    #[must_use]
    pub const fn new(channel: Arc<str>, kind: MessageKind) -> Self {
        Self { channel, kind }
    }

    /// The channel, empty for the root channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The message kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }
}

/// A registered handler as seen by a dispatch.
#[derive(Clone)]
pub struct Route {
    id: SubscriptionId,
    handler: Arc<dyn DynHandler>,
    active: Arc<AtomicBool>,
}

impl Route {
    /// The registration id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> &dyn DynHandler {
        self.handler.as_ref()
    }

    /// False once the registration has been removed, even for routes resolved
    /// before the removal.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("handler", &self.handler.name())
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    routes: HashMap<RouteKey, Vec<Route>>,
    index: HashMap<SubscriptionId, RouteKey>,
}

/// Maps route keys to their handlers, in registration order.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the key's routes.
    pub fn register(&self, key: RouteKey, handler: Arc<dyn DynHandler>) -> SubscriptionId {
        let id = SubscriptionId::new();
        debug!("registering {} for {} on channel {:?}", handler.name(), key.kind(), key.channel());

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.routes.entry(key.clone()).or_default().push(Route {
            id,
            handler,
            active: Arc::new(AtomicBool::new(true)),
        });
        state.index.insert(id, key);

        id
    }

    /// Removes exactly the registration behind `id`.
    ///
    /// Returns false, doing nothing, if it was already removed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let Some(key) = state.index.remove(&id) else {
            return false;
        };

        if let Some(routes) = state.routes.get_mut(&key) {
            if let Some(position) = routes.iter().position(|route| route.id == id) {
                let route = routes.remove(position);
                route.active.store(false, Ordering::Release);
            }
            if routes.is_empty() {
                state.routes.remove(&key);
            }
        }
        drop(guard);

        debug!("unregistered {} for {}", id, key.kind());
        true
    }

    /// The key's routes, in registration order.
    #[must_use]
    pub fn resolve(&self, key: &RouteKey) -> Vec<Route> {
        self.state
            .read()
            .routes
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for the key.
    #[must_use]
    pub fn handler_count(&self, key: &RouteKey) -> usize {
        self.state.read().routes.get(key).map_or(0, Vec::len)
    }

    /// Number of registrations across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.len())
            .finish()
    }
}
