//! Listener fan-out.
//!
//! Every distinct listener gets its own FIFO queue drained by a dedicated
//! thread, so a slow or panicking listener never blocks the coordination
//! loop or other listeners. A listener subscribed under several keys shares
//! one queue; the queue is torn down when its last subscription goes away.

use crate::metrics::OwnershipMetrics;
use crate::types::{Entity, EntityType, OwnershipChange};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Receives ownership transitions for the local member.
pub trait OwnershipListener: Send + Sync + 'static {
    /// Called on the listener's own thread, in commit order per entity.
    fn ownership_changed(&self, change: &OwnershipChange);
}

impl<F> OwnershipListener for F
where
    F: Fn(&OwnershipChange) + Send + Sync + 'static,
{
    fn ownership_changed(&self, change: &OwnershipChange) {
        self(change)
    }
}

/// Identity of a listener instance.
///
/// Two registrations of the same `Arc` are the same listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    /// Identity of `listener`.
    pub fn of(listener: &Arc<dyn OwnershipListener>) -> Self {
        Self(Arc::as_ptr(listener) as *const () as usize)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// What a listener is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Every entity of a type.
    Type(EntityType),
    /// One entity.
    Entity(Entity),
}

impl SubscriptionKey {
    /// Whether a change to `entity` is covered by this key.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            SubscriptionKey::Type(t) => &entity.entity_type == t,
            SubscriptionKey::Entity(e) => e == entity,
        }
    }
}

struct DeliveryChannel {
    tx: mpsc::UnboundedSender<OwnershipChange>,
    refs: usize,
}

/// Subscriptions and delivery queues of all local listeners.
pub struct ListenerRegistry {
    subscriptions: HashMap<SubscriptionKey, Vec<ListenerId>>,
    channels: HashMap<ListenerId, DeliveryChannel>,
    metrics: Arc<OwnershipMetrics>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new(metrics: Arc<OwnershipMetrics>) -> Self {
        Self {
            subscriptions: HashMap::new(),
            channels: HashMap::new(),
            metrics,
        }
    }

    /// Subscribe `listener` under `key`.
    ///
    /// Every call takes one reference on the listener's channel, including a
    /// repeated subscription under the same key. Returns `true` only for the
    /// first subscription of the listener under `key`.
    pub fn add(&mut self, key: SubscriptionKey, listener: Arc<dyn OwnershipListener>) -> bool {
        let id = ListenerId::of(&listener);
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.refs += 1;
        } else {
            let Some(tx) = spawn_delivery(id, listener, Arc::clone(&self.metrics)) else {
                return false;
            };
            self.channels.insert(id, DeliveryChannel { tx, refs: 1 });
            self.metrics.listener_channels.inc();
        }

        let subscribers = self.subscriptions.entry(key.clone()).or_default();
        let first = !subscribers.contains(&id);
        subscribers.push(id);
        debug!(listener = %id, ?key, first, "Listener subscribed");
        first
    }

    /// Drop one subscription of `id` under `key`.
    ///
    /// Returns `false` if there was no such subscription.
    pub fn remove(&mut self, key: &SubscriptionKey, id: ListenerId) -> bool {
        let Some(subscribers) = self.subscriptions.get_mut(key) else {
            return false;
        };
        let Some(pos) = subscribers.iter().position(|s| *s == id) else {
            return false;
        };
        subscribers.remove(pos);
        if subscribers.is_empty() {
            self.subscriptions.remove(key);
        }

        if let Some(channel) = self.channels.get_mut(&id) {
            channel.refs -= 1;
            if channel.refs == 0 {
                // Dropping the sender ends the delivery thread once the
                // queue is drained.
                self.channels.remove(&id);
                self.metrics.listener_channels.dec();
                debug!(listener = %id, "Listener channel closed");
            }
        }
        true
    }

    /// Queue `change` for every listener subscribed to its entity or type.
    ///
    /// A listener subscribed under both keys is notified once.
    pub fn notify(&self, change: &OwnershipChange) {
        let by_type = SubscriptionKey::Type(change.entity.entity_type.clone());
        let by_entity = SubscriptionKey::Entity(change.entity.clone());

        let mut targets: Vec<ListenerId> = Vec::new();
        for key in [&by_type, &by_entity] {
            for id in self.subscriptions.get(key).into_iter().flatten() {
                if !targets.contains(id) {
                    targets.push(*id);
                }
            }
        }

        for id in targets {
            self.notify_listener(id, change);
        }
    }

    /// Queue `change` for one listener.
    pub fn notify_listener(&self, id: ListenerId, change: &OwnershipChange) {
        let Some(channel) = self.channels.get(&id) else {
            return;
        };
        if channel.tx.send(change.clone()).is_err() {
            warn!(listener = %id, entity = %change.entity, "Listener thread is gone");
        }
    }

    /// Live delivery channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Subscriptions held by `id`.
    pub fn refcount(&self, id: ListenerId) -> usize {
        self.channels.get(&id).map(|c| c.refs).unwrap_or(0)
    }

    /// Close every channel.
    pub fn shutdown(&mut self) {
        let closed = self.channels.len();
        self.subscriptions.clear();
        self.channels.clear();
        self.metrics.listener_channels.set(0);
        debug!(closed, "Listener channels closed");
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("subscriptions", &self.subscriptions)
            .field("channels", &self.channels.len())
            .finish()
    }
}

fn spawn_delivery(
    id: ListenerId,
    listener: Arc<dyn OwnershipListener>,
    metrics: Arc<OwnershipMetrics>,
) -> Option<mpsc::UnboundedSender<OwnershipChange>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OwnershipChange>();

    let spawned = std::thread::Builder::new()
        .name(format!("eos-listener-{id}"))
        .spawn(move || {
            while let Some(change) = rx.blocking_recv() {
                let result = catch_unwind(AssertUnwindSafe(|| listener.ownership_changed(&change)));
                match result {
                    Ok(()) => metrics.notifications_delivered.inc(),
                    Err(_) => {
                        metrics.listener_failures.inc();
                        error!(listener = %id, entity = %change.entity, "Listener panicked");
                    }
                }
            }
        });

    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            error!(listener = %id, error = %e, "Failed to start listener thread");
            None
        }
    }
}
