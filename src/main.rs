use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use broadcast_core::channel;
use broadcast_core::clock::MonotonicClock;
use broadcast_core::config::Config;
use broadcast_core::controller::Controller;
use broadcast_core::error::CoreResult;
use broadcast_core::events::EventBus;
use broadcast_core::model::SourceId;
use broadcast_core::receiver::{spawn_sync_loop, Receiver};
use broadcast_core::source_stream::{PlaylistSourceStream, SourceProvider};
use broadcast_core::transport::TcpEmitter;
use tokio::net::TcpListener;

/// A placeholder playlist entry that yields silence. Stands in for the
/// real track-file decoder, which lives outside this core (see the
/// crate-level docs).
struct SilenceProvider {
    id: SourceId,
    remaining: u32,
    frame_bytes: usize,
}

impl SourceProvider for SilenceProvider {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn read_frame(&mut self) -> CoreResult<Option<Vec<u8>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(vec![0u8; self.frame_bytes]))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::default();
    let clock = MonotonicClock::new();
    let controller = Controller::new(clock.clone(), config);
    let _tick_handle = controller.run();
    // One bus for the whole process: every channel publishes onto it, and
    // any subscriber sees events from every channel.
    let event_bus = EventBus::new();

    let playlist: Vec<Box<dyn SourceProvider>> = vec![Box::new(SilenceProvider {
        id: SourceId::from("demo-track"),
        remaining: 2_000,
        frame_bytes: config.stream_bytes_per_step,
    })];
    let source = Box::new(PlaylistSourceStream::new(
        playlist,
        config.source_read_failure_threshold,
        config.stream_bytes_per_step,
    ));

    let channel = channel::spawn(
        source,
        config,
        clock.clone(),
        controller.clone(),
        event_bus.clone(),
    );

    let listen_addr: SocketAddr = "0.0.0.0:9494".parse().context("invalid listen address")?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .context("failed to bind receiver listen socket")?;
    tracing::info!(%listen_addr, "listening for receiver connections");

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        tracing::info!(%peer, "receiver connected");
        let clock = clock.clone();
        let channel = channel.clone();

        tokio::spawn(async move {
            let (emitter, read_half) = TcpEmitter::new(stream, clock.clone());
            let emitter = Arc::new(emitter);
            let receiver = Arc::new(Receiver::new(uuid::Uuid::new_v4(), emitter));
            let _sync_task = spawn_sync_loop(receiver.clone(), read_half, clock, config);
            if let Err(err) = channel.attach_receiver(receiver).await {
                tracing::warn!(%err, %peer, "failed to attach receiver");
            }
        });
    }
}
