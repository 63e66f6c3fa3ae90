//! Receiver time-sync protocol: the NTP-style request/response exchange
//! that aligns a receiver's local clock to the broadcaster's monotonic
//! clock and reports round-trip latency, grounded on the sibling pack's
//! decentralized offset/RTT exchange, adapted to a client/responder shape
//! since this core has one authoritative monotonic clock rather than many
//! peers to reconcile.

use crate::clock::MonotonicClock;
use crate::wire::{decode_sync_request, encode_sync_response};

/// One completed request/response exchange, in the requester's local time
/// domain (`t1`, `t4`) and the responder's (`t2`, `t3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    pub offset: i64,
    pub round_trip: i64,
}

/// `offset = ((t2 - t1) + (t3 - t4)) / 2`, `round_trip = (t4 - t1) - (t3 -
/// t2)`.
pub fn sample_from_exchange(t1: i64, t2: i64, t3: i64, t4: i64) -> SyncSample {
    SyncSample {
        offset: ((t2 - t1) + (t3 - t4)) / 2,
        round_trip: (t4 - t1) - (t3 - t2),
    }
}

/// Final converged result of a sync session: the clock offset to apply and
/// the latency to report to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub offset: i64,
    pub latency_us: i64,
}

/// Drops samples whose round trip exceeds `rtt_ceiling_us`, then takes the
/// median by round trip. Returns `None` if every sample was above the
/// ceiling.
pub fn converge(samples: &[SyncSample], rtt_ceiling_us: i64) -> Option<SyncReport> {
    let mut usable: Vec<SyncSample> = samples
        .iter()
        .copied()
        .filter(|s| s.round_trip <= rtt_ceiling_us)
        .collect();
    if usable.is_empty() {
        return None;
    }
    usable.sort_by_key(|s| s.round_trip);
    let median = usable[usable.len() / 2];
    Some(SyncReport {
        offset: median.offset,
        latency_us: median.round_trip / 2,
    })
}

/// Broadcaster-side responder: decodes a `sync_request` payload, stamps
/// `t2` on receipt and `t3` on send, and returns the wire-ready response.
/// Returns `None` for a malformed request (ignored by the caller, same as
/// any other unknown opcode payload).
pub fn respond_to_sync(request: &[u8], clock: &MonotonicClock) -> Option<Vec<u8>> {
    let t1 = decode_sync_request(request)?;
    let t2 = clock.now();
    let t3 = clock.now();
    Some(encode_sync_response(t1, t2, t3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_formula_matches_spec() {
        // t1=0, t2=5, t3=6, t4=10: offset=((5-0)+(6-10))/2=0, rtt=(10-0)-(6-5)=9
        let sample = sample_from_exchange(0, 5, 6, 10);
        assert_eq!(sample.offset, 0);
        assert_eq!(sample.round_trip, 9);
    }

    #[test]
    fn converge_matches_median_of_n_with_outlier_discarded() {
        // RTT samples in ms, converted to us; offsets are irrelevant to this check.
        let rtts_ms = [8, 12, 10, 9, 11, 500, 10, 9, 11, 8, 12];
        let samples: Vec<SyncSample> = rtts_ms
            .iter()
            .map(|ms| SyncSample {
                offset: 0,
                round_trip: ms * 1_000,
            })
            .collect();
        let report = converge(&samples, 1_000_000).unwrap();
        assert_eq!(report.latency_us, 5_000);
    }

    #[test]
    fn converge_drops_samples_above_ceiling() {
        let samples = vec![
            SyncSample { offset: 0, round_trip: 2_000_000 },
            SyncSample { offset: 1, round_trip: 10_000 },
        ];
        let report = converge(&samples, 1_000_000).unwrap();
        assert_eq!(report.latency_us, 5_000);
    }

    #[test]
    fn converge_returns_none_when_all_samples_exceed_ceiling() {
        let samples = vec![SyncSample { offset: 0, round_trip: 2_000_000 }];
        assert!(converge(&samples, 1_000_000).is_none());
    }

    #[test]
    fn converge_is_robust_to_random_jitter_around_a_stable_link() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        // A link with ~20ms round trip and a few microsecond-scale jitter,
        // simulated rather than measured over a real socket.
        let samples: Vec<SyncSample> = (0..11)
            .map(|_| {
                let jitter_us: i64 = rng.gen_range(-500..500);
                SyncSample {
                    offset: 1_000 + jitter_us,
                    round_trip: 20_000 + jitter_us,
                }
            })
            .collect();
        let report = converge(&samples, 1_000_000).unwrap();
        assert!((report.latency_us - 10_000).abs() < 1_000);
    }

    #[test]
    fn respond_to_sync_stamps_t2_and_t3() {
        let clock = MonotonicClock::new();
        let request = crate::wire::encode_sync_request(clock.now());
        let response = respond_to_sync(&request, &clock).unwrap();
        let decoded = crate::wire::decode_sync_response(&response).unwrap();
        assert!(decoded.t2 <= decoded.t3);
    }
}
