//! Reliable per-receiver transport. The core assumes a reliable transport
//! per receiver (see the scope notes); lossy UDP multicast fan-out is
//! future work, not this implementation. `socket2`-tuned, one TCP stream
//! per receiver rather than a shared multicast group.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::clock::MonotonicClock;
use crate::emitter::{Emitter, EmitterHandle};
use crate::wire::{encode_packet, ControlOp};

/// Builds a `TcpStream` with keepalive enabled so a dead receiver is
/// detected instead of silently accumulating unacknowledged sends.
pub async fn connect(addr: std::net::SocketAddr) -> anyhow::Result<TcpStream> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(5))
        .with_interval(Duration::from_secs(5));
    socket.set_keepalive(true)?;
    socket.set_tcp_keepalive(&keepalive)?;
    socket.set_nodelay(true)?;
    socket.connect(&addr.into())?;
    socket.set_nonblocking(true)?;
    let std_stream: std::net::TcpStream = socket.into();
    Ok(TcpStream::from_std(std_stream)?)
}

/// Emits timestamped packets to one receiver over a dedicated TCP stream
/// and sends 4-byte control opcodes (`FLSH`, `STOP`, sync) on the same
/// connection.
pub struct TcpEmitter {
    clock: MonotonicClock,
    writer: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    pending: Arc<DashMap<EmitterHandle, Arc<std::sync::atomic::AtomicBool>>>,
    next_handle: AtomicU64,
}

impl TcpEmitter {
    pub fn new(stream: TcpStream, clock: MonotonicClock) -> (Self, tokio::net::tcp::OwnedReadHalf) {
        let (read_half, write_half) = stream.into_split();
        (
            TcpEmitter {
                clock,
                writer: Arc::new(Mutex::new(write_half)),
                pending: Arc::new(DashMap::new()),
                next_handle: AtomicU64::new(0),
            },
            read_half,
        )
    }

    /// Sends a 4-byte control opcode immediately, bypassing pacing.
    pub async fn send_control(&self, op: ControlOp) -> anyhow::Result<()> {
        self.send_raw(op.as_bytes()).await
    }

    /// Writes raw bytes to the connection immediately, bypassing pacing.
    /// Used for control opcodes and the sync request/response exchange,
    /// neither of which goes through the `Emitter::emit` schedule.
    pub async fn send_raw(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        Ok(())
    }

}

impl Emitter for TcpEmitter {
    fn emit(&self, emit_at: i64, playback_at: i64, bytes: Vec<u8>) -> EmitterHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        self.pending.insert(handle, cancelled.clone());

        let delay_us = (emit_at - self.clock.now()).max(0) as u64;
        let writer = self.writer.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            if delay_us > 0 {
                tokio::time::sleep(Duration::from_micros(delay_us)).await;
            }
            if cancelled.load(Ordering::SeqCst) {
                pending.remove(&handle);
                return;
            }
            let packet = encode_packet(playback_at, &bytes);
            let mut writer = writer.lock().await;
            if let Err(err) = writer.write_all(&packet).await {
                tracing::warn!(%err, "transport send failed, receiver will be marked offline");
            }
            pending.remove(&handle);
        });

        handle
    }

    fn discard(&self, handle: EmitterHandle, _playback_at: i64) {
        if let Some(entry) = self.pending.get(&handle) {
            entry.store(true, Ordering::SeqCst);
        }
    }

    fn stop(&self) {
        for entry in self.pending.iter() {
            entry.value().store(true, Ordering::SeqCst);
        }
    }
}
