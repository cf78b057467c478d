use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::outcome::UpdateOutcome;

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Identifies one registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription<A> {
    id: SubscriptionId,
    once: bool,
    handler: Handler<A>,
}

/// Synchronous publish/subscribe registry keyed by event name.
///
/// `publish` snapshots the handler list before invoking anything, so handlers
/// may subscribe or unsubscribe (including themselves) while being called.
pub struct EventBus<K, A> {
    subscriptions: Mutex<HashMap<K, Vec<Subscription<A>>>>,
    next_id: AtomicU64,
}

impl<K, A> Default for EventBus<K, A>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<K, A> EventBus<K, A>
where
    K: Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event: K, handler: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.insert(event, false, Arc::new(handler))
    }

    /// Register a handler that is removed right before its first invocation.
    pub fn subscribe_once<F>(&self, event: K, handler: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.insert(event, true, Arc::new(handler))
    }

    /// Remove one handler, or every handler of `event` when `id` is `None`.
    ///
    /// Returns whether anything was removed; removing twice is harmless.
    pub fn unsubscribe(&self, event: &K, id: Option<SubscriptionId>) -> bool {
        let mut subscriptions = self.lock();
        let Some(entries) = subscriptions.get_mut(event) else {
            return false;
        };

        let before = entries.len();
        match id {
            Some(id) => entries.retain(|entry| entry.id != id),
            None => entries.clear(),
        }
        entries.len() != before
    }

    /// Invoke every handler of `event` in subscription order.
    ///
    /// Returns how many handlers ran; zero means nobody was listening.
    pub fn publish(&self, event: &K, args: &A) -> usize {
        let snapshot: Vec<Handler<A>> = {
            let mut subscriptions = self.lock();
            let Some(entries) = subscriptions.get_mut(event) else {
                return 0;
            };
            let snapshot = entries
                .iter()
                .map(|entry| Arc::clone(&entry.handler))
                .collect();
            entries.retain(|entry| !entry.once);
            snapshot
        };

        for handler in &snapshot {
            handler(args);
        }
        snapshot.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, event: &K) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    fn insert(&self, event: K, once: bool, handler: Handler<A>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(event).or_default().push(Subscription { id, once, handler });
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Vec<Subscription<A>>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lifecycle events published by [`crate::UpdateClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateEvent {
    InitSuccess,
    InitFail,
    StartGetUpdate,
    NativeUpdateRequired,
    WgtUpdateRequired,
    NoUpdate,
    UpdateRequestFalse,
    UpdateRequestFail,
    UpdateRequestFailUnknown,
}

impl UpdateEvent {
    pub const ALL: [UpdateEvent; 9] = [
        UpdateEvent::InitSuccess,
        UpdateEvent::InitFail,
        UpdateEvent::StartGetUpdate,
        UpdateEvent::NativeUpdateRequired,
        UpdateEvent::WgtUpdateRequired,
        UpdateEvent::NoUpdate,
        UpdateEvent::UpdateRequestFalse,
        UpdateEvent::UpdateRequestFail,
        UpdateEvent::UpdateRequestFailUnknown,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            UpdateEvent::InitSuccess => "onInitSuccess",
            UpdateEvent::InitFail => "onInitFail",
            UpdateEvent::StartGetUpdate => "onStartGetUpdate",
            UpdateEvent::NativeUpdateRequired => "onNativeUpdateRequired",
            UpdateEvent::WgtUpdateRequired => "onWgtUpdateRequired",
            UpdateEvent::NoUpdate => "onNoUpdate",
            UpdateEvent::UpdateRequestFalse => "onUpdateRequestFalse",
            UpdateEvent::UpdateRequestFail => "onUpdateRequestFail",
            UpdateEvent::UpdateRequestFailUnknown => "onUpdateRequestFailUnknown",
        }
    }
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown update event: {0}")]
pub struct UnknownEventError(pub String);

impl FromStr for UpdateEvent {
    type Err = UnknownEventError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        // older hosts subscribe to the init event under its former name
        if name == "onInitFinish" {
            return Ok(UpdateEvent::InitSuccess);
        }
        UpdateEvent::ALL
            .into_iter()
            .find(|event| event.name() == name)
            .ok_or_else(|| UnknownEventError(name.to_string()))
    }
}

/// Argument handed to event handlers.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Empty,
    Outcome(UpdateOutcome),
    Error(String),
}

impl EventPayload {
    #[must_use]
    pub fn outcome(&self) -> Option<&UpdateOutcome> {
        match self {
            EventPayload::Outcome(outcome) => Some(outcome),
            _ => None,
        }
    }
}
