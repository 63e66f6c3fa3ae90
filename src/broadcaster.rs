//! The packet scheduler: turns a SourceStream into a paced stream of
//! timestamped packets, keeps a sliding in-flight window for catch-up and
//! recovery, and reports completion back to the owning Channel.
//!
//! Structured as a single-task actor with an inbound command queue, the
//! way a per-stream decode loop is usually structured, generalized from
//! one fixed decode pipeline to the command table in the design notes.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};

use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::emitter::{Emitter, EmitterHandle};
use crate::events::{CoreEvent, EventBus};
use crate::model::{ChannelId, Frame, InFlightPacket, ReceiverId, StreamItem, TimestampedPacket};
use crate::source_stream::SourceStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Normal,
    Skip,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum BroadcasterState {
    Created,
    Running,
    Draining,
    Terminated,
}

pub enum BroadcasterCommand {
    Start {
        now: i64,
        latency: i64,
        buffer_size: u32,
    },
    Emit {
        now: i64,
        interval: i64,
    },
    Stop {
        kind: StopKind,
        now: i64,
    },
    BufferReceiver {
        receiver_id: ReceiverId,
        emitter: std::sync::Arc<dyn Emitter>,
        now: i64,
    },
    RemoveReceiver {
        receiver_id: ReceiverId,
    },
}

/// Handle to a running broadcaster's command queue. Cloning is cheap;
/// commands are delivered in the order they were sent (FIFO per sender).
#[derive(Clone)]
pub struct BroadcasterHandle {
    commands: mpsc::UnboundedSender<BroadcasterCommand>,
}

impl BroadcasterHandle {
    pub fn start(&self, now: i64, latency: i64, buffer_size: u32) {
        let _ = self.commands.send(BroadcasterCommand::Start {
            now,
            latency,
            buffer_size,
        });
    }

    pub fn emit(&self, now: i64, interval: i64) {
        let _ = self.commands.send(BroadcasterCommand::Emit { now, interval });
    }

    pub fn stop(&self, kind: StopKind, now: i64) {
        let _ = self.commands.send(BroadcasterCommand::Stop { kind, now });
    }

    pub fn buffer_receiver(
        &self,
        receiver_id: ReceiverId,
        emitter: std::sync::Arc<dyn Emitter>,
        now: i64,
    ) {
        let _ = self.commands.send(BroadcasterCommand::BufferReceiver {
            receiver_id,
            emitter,
            now,
        });
    }

    /// Stops handing future packets to `receiver_id`. Packets already
    /// in-flight to it are not revoked.
    pub fn remove_receiver(&self, receiver_id: ReceiverId) {
        let _ = self
            .commands
            .send(BroadcasterCommand::RemoveReceiver { receiver_id });
    }
}

/// What a broadcaster hands back to its owning Channel when it terminates:
/// always the reclaimed SourceStream, plus why it stopped.
pub enum BroadcasterOutcome {
    Stopped {
        kind: StopKind,
        source: Box<dyn SourceStream>,
    },
    StreamFinished {
        source: Box<dyn SourceStream>,
    },
}

struct Broadcaster {
    config: Config,
    event_bus: EventBus,
    channel_id: ChannelId,
    source: Box<dyn SourceStream>,
    receivers: HashMap<ReceiverId, std::sync::Arc<dyn Emitter>>,
    in_flight: VecDeque<InFlightPacket>,
    packet_number: u64,
    start_time: i64,
    latency: i64,
    emit_time: i64,
    last_source_id: Option<crate::model::SourceId>,
    progress_played_frames: u64,
    tick_count: u32,
    state: BroadcasterState,
}

impl Broadcaster {
    fn new(
        source: Box<dyn SourceStream>,
        receivers: HashMap<ReceiverId, std::sync::Arc<dyn Emitter>>,
        config: Config,
        event_bus: EventBus,
        channel_id: ChannelId,
    ) -> Self {
        Broadcaster {
            config,
            event_bus,
            channel_id,
            source,
            receivers,
            in_flight: VecDeque::new(),
            packet_number: 0,
            start_time: 0,
            latency: 0,
            emit_time: 0,
            last_source_id: None,
            progress_played_frames: 0,
            tick_count: 0,
            state: BroadcasterState::Created,
        }
    }

    fn playback_at(&self, packet_number: u64) -> i64 {
        self.start_time + self.latency + packet_number as i64 * self.config.stream_interval_us()
    }

    fn emit_one(&mut self, emit_at: i64) {
        match self.source.next_frame() {
            StreamItem::End => {
                self.state = BroadcasterState::Draining;
                tracing::info!(channel_id = %self.channel_id, "source exhausted, draining in-flight window");
            }
            StreamItem::Frame(frame) => {
                let packet = TimestampedPacket {
                    packet_number: self.packet_number,
                    playback_at: self.playback_at(self.packet_number),
                    source_id: frame.source_id,
                    bytes: frame.bytes,
                };
                let mut handles: Vec<(ReceiverId, EmitterHandle)> =
                    Vec::with_capacity(self.receivers.len());
                for (receiver_id, emitter) in self.receivers.iter() {
                    let handle = emitter.emit(emit_at, packet.playback_at, packet.bytes.clone());
                    handles.push((*receiver_id, handle));
                }
                tracing::debug!(
                    channel_id = %self.channel_id,
                    packet_number = packet.packet_number,
                    playback_at = packet.playback_at,
                    "emitted packet"
                );
                self.in_flight.push_back(InFlightPacket {
                    handles,
                    playback_at: packet.playback_at,
                    source_id: packet.source_id,
                    bytes: packet.bytes,
                });
                self.packet_number += 1;
            }
        }
    }

    fn start(&mut self, now: i64, latency: i64, buffer_size: u32) {
        self.start_time = now;
        self.latency = latency;
        self.emit_time = now;
        self.state = BroadcasterState::Running;
        let step = self.config.stream_interval_us() / self.config.start_fast_forward_divisor;
        for _ in 0..buffer_size {
            let emit_at = self.emit_time;
            self.emit_one(emit_at);
            self.emit_time += step;
            if self.state == BroadcasterState::Draining {
                break;
            }
        }
        tracing::info!(channel_id = %self.channel_id, buffer_size, "broadcaster started");
    }

    fn emit(&mut self, now: i64, interval: i64) {
        if self.state == BroadcasterState::Running {
            let threshold = (now + interval - self.emit_time).abs() < interval
                || (now + interval) > self.emit_time;
            if threshold {
                let emit_at = self.emit_time;
                self.emit_one(emit_at);
                self.emit_time += self.config.stream_interval_us();
            }
        }
        self.prune_in_flight(now);
        self.publish_progress_if_due();
    }

    fn publish_progress_if_due(&mut self) {
        self.tick_count += 1;
        if self.tick_count % self.config.progress_publish_multiplier != 0 {
            return;
        }
        let Some(source_id) = self.last_source_id.clone() else {
            return;
        };
        let progress_ms =
            (self.progress_played_frames * self.config.stream_interval_us() as u64) / 1_000;
        let duration_ms = self.source.current_duration_ms().unwrap_or(0);
        self.event_bus.publish(CoreEvent::SourceProgress {
            channel_id: self.channel_id,
            source_id,
            progress_ms,
            duration_ms,
        });
    }

    fn prune_in_flight(&mut self, now: i64) {
        while let Some(front) = self.in_flight.front() {
            if front.playback_at > now {
                break;
            }
            let played = self.in_flight.pop_front().expect("checked front above");
            if self.last_source_id.as_ref() != Some(&played.source_id) {
                self.last_source_id = Some(played.source_id.clone());
                self.progress_played_frames = 0;
                self.event_bus.publish(CoreEvent::SourceChanged {
                    channel_id: self.channel_id,
                    new_source_id: played.source_id,
                });
            } else {
                self.progress_played_frames += 1;
            }
        }
        if self.state == BroadcasterState::Draining && self.in_flight.is_empty() {
            self.state = BroadcasterState::Terminated;
        }
    }

    fn stop(&mut self, kind: StopKind, now: i64) {
        match kind {
            StopKind::Normal => {
                let mut rebuffer_frames = Vec::new();
                while let Some(packet) = self.in_flight.pop_front() {
                    self.discard_packet(&packet);
                    if packet.playback_at > now {
                        rebuffer_frames.push(Frame {
                            source_id: packet.source_id,
                            bytes: packet.bytes,
                        });
                    }
                }
                self.source.rebuffer(rebuffer_frames);
            }
            StopKind::Skip => {
                while let Some(packet) = self.in_flight.pop_front() {
                    self.discard_packet(&packet);
                }
            }
        }
        self.state = BroadcasterState::Terminated;
        tracing::info!(channel_id = %self.channel_id, ?kind, "broadcaster stopped");
    }

    fn discard_packet(&self, packet: &InFlightPacket) {
        for (receiver_id, handle) in &packet.handles {
            if let Some(emitter) = self.receivers.get(receiver_id) {
                emitter.discard(*handle, packet.playback_at);
            }
        }
    }

    fn buffer_receiver(
        &mut self,
        receiver_id: ReceiverId,
        emitter: std::sync::Arc<dyn Emitter>,
        now: i64,
    ) {
        for packet in self.in_flight.iter_mut() {
            let handle = emitter.emit(now, packet.playback_at, packet.bytes.clone());
            packet.handles.push((receiver_id, handle));
        }
        self.receivers.insert(receiver_id, emitter);
        tracing::info!(channel_id = %self.channel_id, receiver_id = %receiver_id, "late receiver buffered with current in-flight window");
    }

    fn remove_receiver(&mut self, receiver_id: ReceiverId) {
        self.receivers.remove(&receiver_id);
    }

    fn is_terminated(&self) -> bool {
        self.state == BroadcasterState::Terminated
    }

    fn into_source(self) -> Box<dyn SourceStream> {
        self.source
    }
}

/// Spawns a broadcaster actor. Returns a handle for sending commands and a
/// one-shot receiver that resolves exactly once, when the broadcaster
/// terminates for any reason.
pub fn spawn(
    source: Box<dyn SourceStream>,
    receivers: HashMap<ReceiverId, std::sync::Arc<dyn Emitter>>,
    config: Config,
    _clock: MonotonicClock,
    event_bus: EventBus,
    channel_id: ChannelId,
) -> (BroadcasterHandle, oneshot::Receiver<BroadcasterOutcome>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut broadcaster = Broadcaster::new(source, receivers, config, event_bus, channel_id);
        let mut done_tx = Some(done_tx);

        while let Some(command) = rx.recv().await {
            match command {
                BroadcasterCommand::Start {
                    now,
                    latency,
                    buffer_size,
                } => broadcaster.start(now, latency, buffer_size),
                BroadcasterCommand::Emit { now, interval } => broadcaster.emit(now, interval),
                BroadcasterCommand::BufferReceiver {
                    receiver_id,
                    emitter,
                    now,
                } => broadcaster.buffer_receiver(receiver_id, emitter, now),
                BroadcasterCommand::RemoveReceiver { receiver_id } => {
                    broadcaster.remove_receiver(receiver_id)
                }
                BroadcasterCommand::Stop { kind, now } => {
                    broadcaster.stop(kind, now);
                    if let Some(done_tx) = done_tx.take() {
                        let _ = done_tx.send(BroadcasterOutcome::Stopped {
                            kind,
                            source: broadcaster.into_source(),
                        });
                    }
                    return;
                }
            }

            if broadcaster.is_terminated() {
                if let Some(done_tx) = done_tx.take() {
                    let _ = done_tx.send(BroadcasterOutcome::StreamFinished {
                        source: broadcaster.into_source(),
                    });
                }
                return;
            }
        }
    });

    (BroadcasterHandle { commands: tx }, done_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::test_support::RecordingEmitter;
    use crate::model::{Frame, SourceId};
    use crate::source_stream::test_support::VecSourceStream;
    use std::sync::Arc;

    fn frame(id: &str, byte: u8) -> Frame {
        Frame {
            source_id: SourceId::from(id),
            bytes: vec![byte; 4],
        }
    }

    fn cfg() -> Config {
        let mut cfg = Config::default();
        cfg.sample_rate = 1; // makes stream_interval_us() predictable
        cfg.frame_samples = 1; // stream_interval_us() == 1_000_000
        cfg.start_fast_forward_divisor = 4;
        cfg
    }

    async fn run_start(
        frames: Vec<Frame>,
        buffer_size: u32,
    ) -> (Broadcaster, Arc<RecordingEmitter>) {
        let source: Box<dyn SourceStream> = Box::new(VecSourceStream::new(frames));
        let emitter = Arc::new(RecordingEmitter::new());
        let mut receivers: HashMap<ReceiverId, Arc<dyn Emitter>> = HashMap::new();
        let receiver_id = uuid::Uuid::new_v4();
        receivers.insert(receiver_id, emitter.clone());
        let mut broadcaster = Broadcaster::new(
            source,
            receivers,
            cfg(),
            EventBus::new(),
            uuid::Uuid::new_v4(),
        );
        broadcaster.start(0, 50_000, buffer_size);
        (broadcaster, emitter)
    }

    #[tokio::test]
    async fn playback_at_matches_formula() {
        let frames = vec![frame("a", 1), frame("a", 2), frame("a", 3)];
        let (_broadcaster, emitter) = run_start(frames, 3).await;
        let sent = emitter.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        for (n, (_, _, playback_at, _)) in sent.iter().enumerate() {
            assert_eq!(*playback_at, 0 + 50_000 + n as i64 * 1_000_000);
        }
    }

    #[tokio::test]
    async fn start_paces_emit_at_by_quarter_stream_interval() {
        let frames = vec![frame("a", 1), frame("a", 2)];
        let (_broadcaster, emitter) = run_start(frames, 2).await;
        let sent = emitter.sent.lock().unwrap();
        assert_eq!(sent[0].1, 0);
        assert_eq!(sent[1].1, 250_000);
    }

    #[tokio::test]
    async fn stop_normal_discards_future_packets_and_rebuffers_them() {
        let frames = vec![frame("a", 1), frame("a", 2), frame("a", 3)];
        let (mut broadcaster, emitter) = run_start(frames, 3).await;
        // playback_at values are 50_000, 1_050_000, 2_050_000; stop at now=0
        // discards and rebuffers all three.
        broadcaster.stop(StopKind::Normal, 0);
        assert_eq!(emitter.discarded.lock().unwrap().len(), 3);
        // rebuffered frames replay in original order.
        match broadcaster.source.next_frame() {
            StreamItem::Frame(f) => assert_eq!(f, frame("a", 1)),
            StreamItem::End => panic!("expected rebuffered frame"),
        }
    }

    #[tokio::test]
    async fn stop_skip_discards_all_in_flight_without_rebuffering() {
        let frames = vec![frame("a", 1), frame("a", 2)];
        let (mut broadcaster, emitter) = run_start(frames, 2).await;
        broadcaster.stop(StopKind::Skip, 0);
        assert_eq!(emitter.discarded.lock().unwrap().len(), 2);
        assert_eq!(broadcaster.source.next_frame(), StreamItem::End);
    }

    #[tokio::test]
    async fn prune_emits_source_changed_on_transition() {
        let frames = vec![frame("a", 1), frame("b", 2)];
        let source: Box<dyn SourceStream> = Box::new(VecSourceStream::new(frames));
        let emitter: Arc<dyn Emitter> = Arc::new(RecordingEmitter::new());
        let mut receivers: HashMap<ReceiverId, Arc<dyn Emitter>> = HashMap::new();
        receivers.insert(uuid::Uuid::new_v4(), emitter);
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut broadcaster = Broadcaster::new(source, receivers, cfg(), bus, uuid::Uuid::new_v4());
        broadcaster.start(0, 0, 2);
        // both packets already playable at now = 2_000_000 (past both playback_at).
        broadcaster.prune_in_flight(2_000_000);

        let first = sub.try_recv().unwrap();
        assert!(matches!(first, CoreEvent::SourceChanged { .. }));
        let second = sub.try_recv().unwrap();
        assert!(matches!(second, CoreEvent::SourceChanged { .. }));
    }

    #[tokio::test]
    async fn end_of_stream_drains_then_terminates() {
        let frames = vec![frame("a", 1)];
        let source: Box<dyn SourceStream> = Box::new(VecSourceStream::new(frames));
        let emitter: Arc<dyn Emitter> = Arc::new(RecordingEmitter::new());
        let mut receivers: HashMap<ReceiverId, Arc<dyn Emitter>> = HashMap::new();
        receivers.insert(uuid::Uuid::new_v4(), emitter);
        let mut broadcaster =
            Broadcaster::new(source, receivers, cfg(), EventBus::new(), uuid::Uuid::new_v4());
        broadcaster.start(0, 0, 5); // buffer_size exceeds available frames -> Draining
        assert_eq!(broadcaster.state, BroadcasterState::Draining);
        broadcaster.prune_in_flight(10_000_000);
        assert!(broadcaster.is_terminated());
    }

    #[tokio::test]
    async fn progress_publishes_every_nth_tick_with_elapsed_playback() {
        let frames = vec![frame("a", 1), frame("a", 2), frame("a", 3), frame("a", 4)];
        let source: Box<dyn SourceStream> = Box::new(VecSourceStream::new(frames));
        let emitter: Arc<dyn Emitter> = Arc::new(RecordingEmitter::new());
        let mut receivers: HashMap<ReceiverId, Arc<dyn Emitter>> = HashMap::new();
        receivers.insert(uuid::Uuid::new_v4(), emitter);
        let mut config = cfg();
        config.progress_publish_multiplier = 2;
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut broadcaster =
            Broadcaster::new(source, receivers, config, bus, uuid::Uuid::new_v4());
        broadcaster.start(0, 0, 2);
        // Both buffered packets are already playable, so this single prune
        // pass advances progress_played_frames and fires the initial
        // source_changed transition (None -> "a").
        broadcaster.prune_in_flight(10_000_000);
        let _ = sub.try_recv().expect("initial source_changed");

        broadcaster.publish_progress_if_due();
        assert!(sub.try_recv().is_err(), "tick 1 should not publish yet");
        broadcaster.publish_progress_if_due();
        let event = sub
            .try_recv()
            .expect("tick 2 should publish source_progress");
        match event {
            CoreEvent::SourceProgress {
                source_id,
                progress_ms,
                ..
            } => {
                assert_eq!(source_id, SourceId::from("a"));
                assert!(progress_ms > 0);
            }
            other => panic!("expected SourceProgress, got {other:?}"),
        }
    }
}
