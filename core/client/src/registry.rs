//! Asynchronous result registry.
//!
//! Maps a caller-chosen response identifier to the outcome of the most
//! recently *resolved* operation dispatched under it. Reads never block; an
//! identifier reads as [`ResultState::Unset`] until its first operation
//! resolves, and then keeps returning that outcome until a later resolution
//! under the same identifier replaces it.
//!
//! Hosts observe outcomes in three ways: polling [`AsyncResultRegistry::get`],
//! registering callbacks with [`AsyncResultRegistry::subscribe`], or awaiting
//! [`AsyncResultRegistry::wait`]. [`AsyncResultRegistry::inputs`] renders the
//! whole registry as a JSON object keyed by identifier.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use skybucket_common::{Error, ResponseId, Result};

use crate::operation::PendingOperation;

/// Callback invoked with every resolution of a subscribed identifier.
pub type Observer = Arc<dyn Fn(&ResponseId, &PendingOperation) + Send + Sync>;

/// Handle returned by [`AsyncResultRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What a read of the registry yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultState {
    /// Never used, or nothing resolved yet.
    Unset,
    /// Terminal record of the latest resolved operation.
    Resolved(PendingOperation),
}

impl ResultState {
    pub fn is_unset(&self) -> bool {
        matches!(self, ResultState::Unset)
    }

    pub fn resolution(&self) -> Option<&PendingOperation> {
        match self {
            ResultState::Unset => None,
            ResultState::Resolved(op) => Some(op),
        }
    }
}

struct Slot {
    latest: Option<PendingOperation>,
    observers: Vec<(SubscriptionId, Observer)>,
    // Bumped on every resolution.
    generation: watch::Sender<u64>,
}

impl Slot {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            latest: None,
            observers: Vec::new(),
            generation,
        }
    }

    /// Nothing recorded and nobody listening.
    fn is_idle(&self) -> bool {
        self.latest.is_none()
            && self.observers.is_empty()
            && self.generation.receiver_count() == 0
    }
}

/// Outstanding wait on a slot. Dropping it releases the slot again if the
/// wait ends without anything left to keep.
struct Waiter<'a> {
    registry: &'a AsyncResultRegistry,
    id: ResponseId,
    rx: Option<watch::Receiver<u64>>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.rx.take();
        self.registry.prune(&self.id);
    }
}

struct Inner {
    slots: Mutex<HashMap<ResponseId, Slot>>,
    next_subscription: AtomicU64,
}

/// Shared registry of operation outcomes. Cloning yields another handle to
/// the same registry.
#[derive(Clone)]
pub struct AsyncResultRegistry {
    inner: Arc<Inner>,
}

impl AsyncResultRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ResponseId, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of `response_id`.
    ///
    /// Blank identifiers can never be written and always read as unset.
    pub fn get(&self, response_id: &str) -> ResultState {
        let Ok(id) = ResponseId::new(response_id) else {
            return ResultState::Unset;
        };
        match self.slots().get(&id).and_then(|slot| slot.latest.clone()) {
            Some(op) => ResultState::Resolved(op),
            None => ResultState::Unset,
        }
    }

    /// Call `observer` on every future resolution of `response_id`.
    ///
    /// # Errors
    /// - `InvalidInput` for a blank identifier
    pub fn subscribe<F>(&self, response_id: &str, observer: F) -> Result<SubscriptionId>
    where
        F: Fn(&ResponseId, &PendingOperation) + Send + Sync + 'static,
    {
        let id = ResponseId::new(response_id)?;
        let subscription =
            SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));

        self.slots()
            .entry(id)
            .or_insert_with(Slot::new)
            .observers
            .push((subscription, Arc::new(observer)));

        Ok(subscription)
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut slots = self.slots();
        let Some((id, slot)) = slots
            .iter_mut()
            .find(|(_, slot)| slot.observers.iter().any(|(s, _)| *s == subscription))
        else {
            return false;
        };

        slot.observers.retain(|(s, _)| *s != subscription);
        if slot.is_idle() {
            let id = id.clone();
            slots.remove(&id);
        }
        true
    }

    /// Wait for the next resolution of `response_id`, ignoring any outcome
    /// already recorded.
    ///
    /// # Errors
    /// - `InvalidInput` for a blank identifier
    pub async fn wait(&self, response_id: &str) -> Result<PendingOperation> {
        let id = ResponseId::new(response_id)?;
        let rx = self
            .slots()
            .entry(id.clone())
            .or_insert_with(Slot::new)
            .generation
            .subscribe();
        self.next_resolution(id, rx).await
    }

    /// The recorded outcome of `response_id`, or the next one if unset.
    ///
    /// # Errors
    /// - `InvalidInput` for a blank identifier
    pub async fn resolved(&self, response_id: &str) -> Result<PendingOperation> {
        let id = ResponseId::new(response_id)?;
        let rx = {
            let mut slots = self.slots();
            let slot = slots.entry(id.clone()).or_insert_with(Slot::new);
            if let Some(op) = &slot.latest {
                return Ok(op.clone());
            }
            slot.generation.subscribe()
        };
        self.next_resolution(id, rx).await
    }

    async fn next_resolution(
        &self,
        id: ResponseId,
        rx: watch::Receiver<u64>,
    ) -> Result<PendingOperation> {
        let mut waiter = Waiter {
            registry: self,
            id,
            rx: Some(rx),
        };
        if let Some(rx) = waiter.rx.as_mut() {
            rx.changed()
                .await
                .map_err(|_| Error::Storage("Result registry was dropped".to_string()))?;
        }

        let latest = self
            .slots()
            .get(&waiter.id)
            .and_then(|slot| slot.latest.clone());
        latest.ok_or_else(|| Error::Storage(format!("No outcome recorded for '{}'", waiter.id)))
    }

    /// Forget the slot of `id` if it holds nothing and nobody listens.
    fn prune(&self, id: &ResponseId) {
        let mut slots = self.slots();
        if slots.get(id).is_some_and(Slot::is_idle) {
            slots.remove(id);
        }
    }

    /// Identifiers that currently hold an outcome, sorted.
    pub fn response_ids(&self) -> Vec<ResponseId> {
        let mut ids: Vec<ResponseId> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.latest.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of identifiers holding an outcome.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.latest.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every recorded outcome as a JSON object keyed by identifier.
    pub fn inputs(&self) -> Value {
        let slots = self.slots();
        let mut inputs = Map::new();
        for (id, slot) in slots.iter() {
            let Some(op) = &slot.latest else { continue };
            match serde_json::to_value(op) {
                Ok(value) => {
                    inputs.insert(id.to_string(), value);
                }
                Err(e) => warn!("Cannot render outcome of '{}': {}", id, e),
            }
        }
        Value::Object(inputs)
    }

    /// Record a terminal outcome and notify observers.
    ///
    /// Observers run on the calling task after the registry lock is released.
    pub(crate) fn publish(&self, response_id: &ResponseId, op: PendingOperation) {
        let observers: Vec<Observer> = {
            let mut slots = self.slots();
            let slot = slots.entry(response_id.clone()).or_insert_with(Slot::new);
            if let Some(previous) = &slot.latest {
                debug!(
                    "Response '{}' overwritten: {} replaced by {}",
                    response_id, previous.id, op.id
                );
            }
            slot.latest = Some(op.clone());
            slot.generation.send_modify(|g| *g += 1);
            slot.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };

        for observer in observers {
            observer(response_id, &op);
        }
    }
}

impl Default for AsyncResultRegistry {
    fn default() -> Self {
        Self::new()
    }
}
