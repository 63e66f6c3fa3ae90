//! Fan-out of domain events to external subscribers (UIs, the out-of-scope
//! control API). Publish-only, multi-producer, grounded on the sibling
//! pack's `tokio::sync::broadcast`-based event bus: every unit that wants to
//! observe channel activity gets its own receiver and slow or absent
//! subscribers never back-pressure a publisher.

use tokio::sync::broadcast;

use crate::model::{ChannelId, ReceiverId, SourceId};

/// Domain events published out of a [`crate::channel::ChannelHandle`]. Topic names
/// match the external interface: one variant per topic.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    ReceiverAdded {
        channel_id: ChannelId,
        receiver_id: ReceiverId,
    },
    ReceiverRemoved {
        channel_id: ChannelId,
        receiver_id: ReceiverId,
    },
    ChannelPlayPause {
        channel_id: ChannelId,
        status: ChannelStatus,
    },
    ChannelFinished {
        channel_id: ChannelId,
    },
    SourceChanged {
        channel_id: ChannelId,
        new_source_id: SourceId,
    },
    SourceProgress {
        channel_id: ChannelId,
        source_id: SourceId,
        progress_ms: u64,
        duration_ms: u64,
    },
    /// `id` is a `ReceiverId` when `target` is `Receiver`, or the owning
    /// `ChannelId` when `target` is `Channel`.
    VolumeChange {
        id: uuid::Uuid,
        target: VolumeTarget,
        volume: f32,
    },
}

/// Mirrors the Channel state machine's externally visible statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Stop,
    Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTarget {
    Receiver,
    Channel,
}

const EVENT_BUS_CAPACITY: usize = 256;

/// Process-wide publish-only event bus. Cloning is cheap; every clone
/// publishes to the same set of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        EventBus { sender }
    }

    /// Registers a new subscriber. Events published before this call are
    /// never delivered to it.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to every current subscriber. A publish with no
    /// subscribers is a no-op, not an error.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
