//! One remote speaker, as seen by the hub: identity, latency estimate,
//! online/offline flag, volume, and the background task that keeps its
//! clock-sync estimate current. One owned per-receiver TCP connection
//! per proxy, rather than a shared multicast host slot.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::model::ReceiverId;
use crate::sync::{converge, sample_from_exchange, SyncSample};
use crate::transport::TcpEmitter;
use crate::wire::{decode_sync_response, encode_sync_request};

/// Hub-side proxy for one remote speaker. Runs the requester side of the
/// time-sync exchange against the physical device's echo responder over
/// its dedicated connection, and stores the converged latency for the
/// owning [`crate::channel::ChannelHandle`] to fold into `broadcast_latency`.
pub struct Receiver {
    id: ReceiverId,
    emitter: Arc<TcpEmitter>,
    latency_us: AtomicI64,
    online: AtomicBool,
    volume_bits: AtomicU32,
}

impl Receiver {
    pub fn new(id: ReceiverId, emitter: Arc<TcpEmitter>) -> Self {
        Receiver {
            id,
            emitter,
            latency_us: AtomicI64::new(0),
            online: AtomicBool::new(true),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn id(&self) -> ReceiverId {
        self.id
    }

    pub fn emitter(&self) -> Arc<TcpEmitter> {
        self.emitter.clone()
    }

    pub fn latency(&self) -> i64 {
        self.latency_us.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::SeqCst))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::SeqCst);
    }

    fn set_latency(&self, latency_us: i64) {
        self.latency_us.store(latency_us, Ordering::SeqCst);
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Releases this receiver's transport; `leave()` from the channel's
    /// perspective.
    pub fn leave(&self) {
        self.emitter.stop();
        self.set_online(false);
    }
}

/// Runs the periodic sync protocol against `read_half` until cancelled
/// (drop the returned `JoinHandle`). Updates `receiver`'s latency and
/// online flag in place so the owning Channel can read them at any time.
pub fn spawn_sync_loop(
    receiver: Arc<Receiver>,
    mut read_half: OwnedReadHalf,
    clock: MonotonicClock,
    config: Config,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut consecutive_misses: u32 = 0;
        loop {
            let mut samples = Vec::with_capacity(config.sync_sample_count);
            for _ in 0..config.sync_sample_count {
                if let Some(sample) =
                    run_one_exchange(&receiver, &mut read_half, &clock, config.sync_rtt_ceiling_us)
                        .await
                {
                    samples.push(sample);
                }
            }

            match converge(&samples, config.sync_rtt_ceiling_us) {
                Some(report) => {
                    receiver.set_latency(report.latency_us);
                    receiver.set_online(true);
                    consecutive_misses = 0;
                    tracing::info!(
                        receiver_id = %receiver.id(),
                        latency_us = report.latency_us,
                        "sync converged"
                    );
                }
                None => {
                    consecutive_misses += 1;
                    tracing::warn!(receiver_id = %receiver.id(), "sync round produced no usable samples");
                }
            }

            if consecutive_misses >= config.offline_after_missed_sync_multiplier {
                receiver.set_online(false);
                tracing::warn!(receiver_id = %receiver.id(), "receiver marked offline after missed syncs");
            }

            tokio::time::sleep(Duration::from_micros(config.sync_interval_us as u64)).await;
        }
    })
}

async fn run_one_exchange(
    receiver: &Arc<Receiver>,
    read_half: &mut OwnedReadHalf,
    clock: &MonotonicClock,
    rtt_ceiling_us: i64,
) -> Option<SyncSample> {
    let t1 = clock.now();
    let request = encode_sync_request(t1);
    if let Err(err) = receiver.emitter.send_raw(&request).await {
        tracing::warn!(%err, receiver_id = %receiver.id(), "failed to send sync request");
        return None;
    }

    let mut buf = [0u8; 28];
    let read = tokio::time::timeout(
        Duration::from_micros(rtt_ceiling_us as u64),
        read_half.read_exact(&mut buf),
    )
    .await;
    let t4 = clock.now();

    match read {
        Ok(Ok(_)) => {
            let response = decode_sync_response(&buf)?;
            Some(sample_from_exchange(
                response.t1,
                response.t2,
                response.t3,
                t4,
            ))
        }
        _ => None,
    }
}
