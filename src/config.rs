//! Every tuning constant named in the design lives here, centralized, rather
//! than scattered through scheduler and sync logic as magic numbers.

/// Tuning knobs for a broadcast core instance. One `Config` is built once
/// per process and threaded through the [`crate::controller::Controller`],
/// [`crate::channel::ChannelHandle`] and [`crate::receiver::Receiver`]
/// constructors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// PCM sample rate, in Hz, shared by every frame in a channel.
    pub sample_rate: u32,
    /// Bytes per emitted frame ("step"): 16-bit stereo PCM, fixed frame
    /// sample count.
    pub stream_bytes_per_step: usize,
    /// Number of PCM sample-frames packed into one `stream_bytes_per_step`.
    pub frame_samples: u32,
    /// Fixed headroom added to the slowest receiver's latency to get
    /// `broadcast_latency`.
    pub buffer_latency_us: i64,
    /// How many frames `Broadcaster::start` pre-fills before steady state.
    pub start_buffer_size: u32,
    /// During start, frames are emitted every `stream_interval /
    /// start_fast_forward_divisor` instead of every `stream_interval`.
    pub start_fast_forward_divisor: i64,
    /// Number of request/response samples collected before reporting a
    /// converged time-sync offset.
    pub sync_sample_count: usize,
    /// Interval between periodic re-syncs while a receiver is online.
    pub sync_interval_us: i64,
    /// RTT samples above this ceiling are dropped as unusable.
    pub sync_rtt_ceiling_us: i64,
    /// A receiver missing sync for this many multiples of
    /// `sync_interval_us` is marked offline.
    pub offline_after_missed_sync_multiplier: u32,
    /// Consecutive source-read failures before the stream is advanced past
    /// the offending source.
    pub source_read_failure_threshold: u32,
    /// `source_progress` events publish every this many tick intervals.
    pub progress_publish_multiplier: u32,
}

impl Config {
    /// `stream_interval`, in microseconds, derived from sample rate and
    /// frame size: `(frame_samples / sample_rate) * 1_000_000`.
    pub fn stream_interval_us(&self) -> i64 {
        (self.frame_samples as i64 * 1_000_000) / self.sample_rate as i64
    }

    /// Tick interval driving the Controller: `stream_interval /
    /// start_fast_forward_divisor`.
    pub fn tick_interval_us(&self) -> i64 {
        self.stream_interval_us() / self.start_fast_forward_divisor
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sample_rate: 44_100,
            // 16-bit stereo: 2 bytes/sample * 2 channels * frame_samples.
            stream_bytes_per_step: 1_024 * 4,
            frame_samples: 1_024,
            buffer_latency_us: 50_000,
            start_buffer_size: 20,
            start_fast_forward_divisor: 4,
            sync_sample_count: 11,
            sync_interval_us: 30_000_000,
            sync_rtt_ceiling_us: 1_000_000,
            offline_after_missed_sync_multiplier: 3,
            source_read_failure_threshold: 4,
            progress_publish_multiplier: 3,
        }
    }
}
