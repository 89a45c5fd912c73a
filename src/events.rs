//! Scoped event channels.
//!
//! Each authenticated actor gets one [`EventChannel`], created by its first
//! [`Subscription`]. The channel is closed on logout and forgotten once its
//! last subscription is dropped, so the registry only holds actors that are
//! currently listening.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum ConsoleEvent {
    /// Cached queries under `prefix` were dropped after a mutation.
    Invalidated { prefix: Vec<String> },
    LoggedOut,
}

/// EventChannel
///
/// Broadcast channel with an explicit end. After [`EventChannel::close`]
/// publishing is a no-op and every subscriber sees end-of-stream.
#[derive(Clone)]
pub struct EventChannel {
    sender: Arc<Mutex<Option<broadcast::Sender<ConsoleEvent>>>>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<ConsoleEvent>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` once the channel is closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ConsoleEvent>> {
        self.sender().as_ref().map(broadcast::Sender::subscribe)
    }

    /// Returns the number of subscribers reached.
    pub fn publish(&self, event: ConsoleEvent) -> usize {
        match self.sender().as_ref() {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn close(&self) {
        self.sender().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// SessionRegistry
///
/// One channel per actor id.
#[derive(Default)]
pub struct SessionRegistry {
    channels: Mutex<HashMap<Uuid, EventChannel>>,
}

pub type SessionState = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Uuid, EventChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// subscribe
    ///
    /// Subscribes to the actor's channel, creating it if needed. `None` when
    /// the channel was closed but not yet forgotten.
    pub fn subscribe(self: &Arc<Self>, actor_id: Uuid) -> Option<Subscription> {
        // Subscribing under the lock keeps `release` from dropping a channel
        // that is about to gain a receiver.
        let receiver = self.channels().entry(actor_id).or_default().subscribe()?;
        Some(Subscription {
            receiver: Some(receiver),
            registry: Arc::downgrade(self),
            actor_id,
        })
    }

    /// Forgets the actor's channel when nothing listens to it any more.
    fn release(&self, actor_id: Uuid) {
        let mut channels = self.channels();
        if channels
            .get(&actor_id)
            .is_some_and(|channel| channel.receiver_count() == 0)
        {
            channels.remove(&actor_id);
            tracing::debug!(%actor_id, "session channel released");
        }
    }

    /// Publishes to the actor's channel if one exists. Never creates one.
    pub fn publish(&self, actor_id: Uuid, event: ConsoleEvent) -> usize {
        match self.channels().get(&actor_id) {
            Some(channel) => channel.publish(event),
            None => 0,
        }
    }

    /// Sends `LoggedOut`, closes the channel and forgets it. Returns whether
    /// a channel existed.
    pub fn end(&self, actor_id: Uuid) -> bool {
        let Some(channel) = self.channels().remove(&actor_id) else {
            return false;
        };
        channel.publish(ConsoleEvent::LoggedOut);
        channel.close();
        tracing::debug!(%actor_id, "session channel closed");
        true
    }

    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels().is_empty()
    }
}

/// Subscription
///
/// A live receiver on an actor's channel. Dropping the last subscription of
/// an actor removes its channel from the registry.
pub struct Subscription {
    receiver: Option<broadcast::Receiver<ConsoleEvent>>,
    registry: Weak<SessionRegistry>,
    actor_id: Uuid,
}

impl Subscription {
    /// Next event. `Err(RecvError::Closed)` once the session has ended.
    pub async fn recv(&mut self) -> Result<ConsoleEvent, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before the registry counts receivers.
        drop(self.receiver.take());
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.actor_id);
        }
    }
}
