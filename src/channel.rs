//! Owns the lifecycle of a playback group: the `{Stop, Play, Skip}` state
//! machine, the receiver set, the SourceStream, and at most one
//! Broadcaster at a time.
//!
//! Structured as a single-task actor with an inbound command queue and a
//! self-addressed follow-up message for broadcaster completion, the same
//! request/response-or-cast split the design notes call for when mapping
//! GenServer-style units onto tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::broadcaster::{self, BroadcasterHandle, BroadcasterOutcome, StopKind};
use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::controller::Controller;
use crate::emitter::Emitter;
use crate::error::{CoreError, CoreResult};
use crate::events::{ChannelStatus, CoreEvent, EventBus, VolumeTarget};
use crate::model::{ChannelId, ReceiverId, SourceId};
use crate::receiver::Receiver;
use crate::registry::Registry;
use crate::source_stream::SourceStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Stop,
    Play,
    Skip,
}

enum ChannelCommand {
    PlayPause,
    Skip {
        source_id: SourceId,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    AttachReceiver {
        receiver: Arc<Receiver>,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    DetachReceiver {
        receiver_id: ReceiverId,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    SetReceiverVolume {
        receiver_id: ReceiverId,
        volume: f32,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    SetChannelVolume {
        volume: f32,
    },
    BroadcasterDone(BroadcasterOutcome),
}

/// Handle to a running channel's command queue.
#[derive(Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    event_bus: EventBus,
}

impl ChannelHandle {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Toggles Stop/Play. Fire-and-forget: there is no caller waiting on a
    /// play/pause result, only on the `channel_play_pause` event.
    pub fn play_pause(&self) {
        let _ = self.commands.send(ChannelCommand::PlayPause);
    }

    pub async fn skip(&self, source_id: SourceId) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(ChannelCommand::Skip { source_id, reply });
        rx.await.unwrap_or(Err(CoreError::ChannelNotPlaying))
    }

    pub async fn attach_receiver(&self, receiver: Arc<Receiver>) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(ChannelCommand::AttachReceiver { receiver, reply });
        rx.await
            .unwrap_or(Err(CoreError::ReceiverNotFound(uuid::Uuid::nil())))
    }

    pub async fn detach_receiver(&self, receiver_id: ReceiverId) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(ChannelCommand::DetachReceiver {
            receiver_id,
            reply,
        });
        rx.await.unwrap_or(Err(CoreError::ReceiverNotFound(receiver_id)))
    }

    pub async fn set_receiver_volume(&self, receiver_id: ReceiverId, volume: f32) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(ChannelCommand::SetReceiverVolume {
            receiver_id,
            volume,
            reply,
        });
        rx.await.unwrap_or(Err(CoreError::ReceiverNotFound(receiver_id)))
    }

    /// Fire-and-forget, same as `play_pause`: applies `volume` to every
    /// currently attached receiver.
    pub fn set_channel_volume(&self, volume: f32) {
        let _ = self
            .commands
            .send(ChannelCommand::SetChannelVolume { volume });
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }
}

struct PendingSkip {
    source_id: SourceId,
    reply: oneshot::Sender<CoreResult<()>>,
}

struct ChannelActor {
    id: ChannelId,
    config: Config,
    clock: MonotonicClock,
    event_bus: EventBus,
    controller: Arc<Controller>,
    receivers: Registry<ReceiverId, Arc<Receiver>>,
    source: Option<Box<dyn SourceStream>>,
    broadcaster: Option<BroadcasterHandle>,
    state: ChannelState,
    pending_skip: Option<PendingSkip>,
    known_source_ids: Vec<SourceId>,
    self_sender: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelActor {
    fn broadcast_latency(&self) -> i64 {
        let max_latency = self
            .receivers
            .keys()
            .into_iter()
            .filter_map(|id| self.receivers.get(&id))
            .map(|r| r.latency())
            .max()
            .unwrap_or(0);
        max_latency + self.config.buffer_latency_us
    }

    fn current_emitters(&self) -> HashMap<ReceiverId, Arc<dyn Emitter>> {
        self.receivers
            .keys()
            .into_iter()
            .filter_map(|id| {
                self.receivers
                    .get(&id)
                    .map(|r| (id, r.emitter() as Arc<dyn Emitter>))
            })
            .collect()
    }

    fn spawn_broadcaster(&mut self, source: Box<dyn SourceStream>, latency: i64) {
        let (handle, done_rx) = broadcaster::spawn(
            source,
            self.current_emitters(),
            self.config,
            self.clock.clone(),
            self.event_bus.clone(),
            self.id,
        );
        handle.start(self.clock.now(), latency, self.config.start_buffer_size);
        self.controller.register(self.id, handle.clone());
        self.broadcaster = Some(handle);

        let commands = self.self_sender.clone();
        tokio::spawn(async move {
            if let Ok(outcome) = done_rx.await {
                let _ = commands.send(ChannelCommand::BroadcasterDone(outcome));
            }
        });
    }

    fn handle_play_pause(&mut self) {
        match self.state {
            ChannelState::Stop => {
                let source = self
                    .source
                    .take()
                    .expect("channel holds its source stream while stopped");
                let latency = self.broadcast_latency();
                self.spawn_broadcaster(source, latency);
                self.state = ChannelState::Play;
                self.event_bus.publish(CoreEvent::ChannelPlayPause {
                    channel_id: self.id,
                    status: ChannelStatus::Play,
                });
                tracing::info!(channel_id = %self.id, "channel playing");
            }
            ChannelState::Play => {
                if let Some(handle) = &self.broadcaster {
                    handle.stop(StopKind::Normal, self.clock.now());
                }
                tracing::info!(channel_id = %self.id, "channel pausing");
            }
            ChannelState::Skip => {
                tracing::warn!(channel_id = %self.id, "play_pause ignored mid-skip");
            }
        }
    }

    fn handle_skip(&mut self, source_id: SourceId, reply: oneshot::Sender<CoreResult<()>>) {
        match self.state {
            ChannelState::Stop => {
                let result = self
                    .source
                    .as_mut()
                    .expect("channel holds its source stream while stopped")
                    .seek(&source_id);
                let _ = reply.send(result);
            }
            ChannelState::Play => {
                if !self.known_source_ids.contains(&source_id) {
                    let _ = reply.send(Err(CoreError::UnknownSourceId(source_id)));
                    return;
                }
                if let Some(handle) = &self.broadcaster {
                    handle.stop(StopKind::Skip, self.clock.now());
                }
                self.state = ChannelState::Skip;
                self.pending_skip = Some(PendingSkip { source_id, reply });
            }
            ChannelState::Skip => {
                let _ = reply.send(Err(CoreError::ChannelNotPlaying));
            }
        }
    }

    fn handle_attach_receiver(&mut self, receiver: Arc<Receiver>, reply: oneshot::Sender<CoreResult<()>>) {
        let receiver_id = receiver.id();
        if self.receivers.contains(&receiver_id) {
            let _ = reply.send(Err(CoreError::ReceiverAlreadyAttached(receiver_id)));
            return;
        }
        self.receivers.register(receiver_id, receiver.clone());
        if self.state == ChannelState::Play {
            if let Some(handle) = &self.broadcaster {
                handle.buffer_receiver(
                    receiver_id,
                    receiver.emitter() as Arc<dyn Emitter>,
                    self.clock.now(),
                );
            }
        }
        self.event_bus.publish(CoreEvent::ReceiverAdded {
            channel_id: self.id,
            receiver_id,
        });
        let _ = reply.send(Ok(()));
    }

    fn handle_detach_receiver(&mut self, receiver_id: ReceiverId, reply: oneshot::Sender<CoreResult<()>>) {
        if self.receivers.unregister(&receiver_id).is_none() {
            let _ = reply.send(Err(CoreError::ReceiverNotFound(receiver_id)));
            return;
        }
        if let Some(handle) = &self.broadcaster {
            handle.remove_receiver(receiver_id);
        }
        self.event_bus.publish(CoreEvent::ReceiverRemoved {
            channel_id: self.id,
            receiver_id,
        });
        let _ = reply.send(Ok(()));
    }

    fn handle_set_receiver_volume(
        &mut self,
        receiver_id: ReceiverId,
        volume: f32,
        reply: oneshot::Sender<CoreResult<()>>,
    ) {
        match self.receivers.get(&receiver_id) {
            Some(receiver) => {
                receiver.set_volume(volume);
                self.event_bus.publish(CoreEvent::VolumeChange {
                    id: receiver_id,
                    target: VolumeTarget::Receiver,
                    volume,
                });
                let _ = reply.send(Ok(()));
            }
            None => {
                let _ = reply.send(Err(CoreError::ReceiverNotFound(receiver_id)));
            }
        }
    }

    fn handle_set_channel_volume(&mut self, volume: f32) {
        for receiver_id in self.receivers.keys() {
            if let Some(receiver) = self.receivers.get(&receiver_id) {
                receiver.set_volume(volume);
            }
        }
        self.event_bus.publish(CoreEvent::VolumeChange {
            id: self.id,
            target: VolumeTarget::Channel,
            volume,
        });
    }

    fn handle_broadcaster_done(&mut self, outcome: BroadcasterOutcome) {
        self.controller.unregister(&self.id);
        self.broadcaster = None;

        match outcome {
            BroadcasterOutcome::StreamFinished { source } => {
                self.source = Some(source);
                self.state = ChannelState::Stop;
                self.event_bus
                    .publish(CoreEvent::ChannelFinished { channel_id: self.id });
                tracing::info!(channel_id = %self.id, "channel finished");
            }
            BroadcasterOutcome::Stopped {
                kind: StopKind::Normal,
                source,
            } => {
                self.source = Some(source);
                self.state = ChannelState::Stop;
                self.event_bus.publish(CoreEvent::ChannelPlayPause {
                    channel_id: self.id,
                    status: ChannelStatus::Stop,
                });
            }
            BroadcasterOutcome::Stopped {
                kind: StopKind::Skip,
                mut source,
            } => {
                let pending = self.pending_skip.take();
                if let Some(PendingSkip { source_id, reply }) = pending {
                    source.flush();
                    // source_id was already checked against known_source_ids
                    // before the broadcaster was torn down, so this seek is
                    // expected to succeed; the Err arm is a defensive
                    // fallback only.
                    match source.seek(&source_id) {
                        Ok(()) => {
                            let latency = self.broadcast_latency();
                            self.spawn_broadcaster(source, latency);
                            self.state = ChannelState::Play;
                            let _ = reply.send(Ok(()));
                        }
                        Err(err) => {
                            self.source = Some(source);
                            self.state = ChannelState::Stop;
                            let _ = reply.send(Err(err));
                        }
                    }
                } else {
                    self.source = Some(source);
                    self.state = ChannelState::Stop;
                }
            }
        }
    }
}

/// Spawns a channel actor and returns a handle to it. `event_bus` is the
/// process-wide bus shared by every channel; the caller owns its lifetime.
pub fn spawn(
    source: Box<dyn SourceStream>,
    config: Config,
    clock: MonotonicClock,
    controller: Arc<Controller>,
    event_bus: EventBus,
) -> ChannelHandle {
    let id = uuid::Uuid::new_v4();
    let known_source_ids = source.known_source_ids();
    let (tx, mut rx) = mpsc::unbounded_channel::<ChannelCommand>();

    let mut actor = ChannelActor {
        id,
        config,
        clock,
        event_bus: event_bus.clone(),
        controller,
        receivers: Registry::new(),
        source: Some(source),
        broadcaster: None,
        state: ChannelState::Stop,
        pending_skip: None,
        known_source_ids,
        self_sender: tx.clone(),
    };

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                ChannelCommand::PlayPause => actor.handle_play_pause(),
                ChannelCommand::Skip { source_id, reply } => actor.handle_skip(source_id, reply),
                ChannelCommand::AttachReceiver { receiver, reply } => {
                    actor.handle_attach_receiver(receiver, reply)
                }
                ChannelCommand::DetachReceiver { receiver_id, reply } => {
                    actor.handle_detach_receiver(receiver_id, reply)
                }
                ChannelCommand::SetReceiverVolume {
                    receiver_id,
                    volume,
                    reply,
                } => actor.handle_set_receiver_volume(receiver_id, volume, reply),
                ChannelCommand::SetChannelVolume { volume } => {
                    actor.handle_set_channel_volume(volume)
                }
                ChannelCommand::BroadcasterDone(outcome) => actor.handle_broadcaster_done(outcome),
            }
        }
    });

    ChannelHandle {
        id,
        commands: tx,
        event_bus,
    }
}
