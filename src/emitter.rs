//! The Emitter contract: paced delivery of timestamped packets to one
//! receiver transport.

/// Opaque handle to a scheduled send, returned by [`Emitter::emit`] and
/// passed back to [`Emitter::discard`]. Carries no meaning beyond identity.
pub type EmitterHandle = u64;

/// Takes a `(emit_at, playback_at, payload)` triple and delivers the payload
/// to one receiver transport at `emit_at`, tagging the payload with
/// `playback_at` on the wire. Implementations own whatever asynchronous
/// delivery mechanism they need internally; `emit` itself only schedules —
/// it does not block on the send.
pub trait Emitter: Send + Sync {
    /// Schedules delivery of `bytes` at local time `emit_at` (microseconds,
    /// same epoch as [`crate::clock::MonotonicClock`]). `emit_at` in the
    /// past means deliver immediately. Returns a handle usable for
    /// `discard`.
    fn emit(&self, emit_at: i64, playback_at: i64, bytes: Vec<u8>) -> EmitterHandle;

    /// Revokes the packet identified by `handle`/`playback_at`. A no-op if
    /// it has already gone out; idempotent.
    fn discard(&self, handle: EmitterHandle, playback_at: i64);

    /// Terminates the emitter, discarding all pending sends.
    fn stop(&self);
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every `emit`/`discard` call instead of touching a transport.
    /// Used by broadcaster and channel tests to assert scheduling-formula
    /// invariants deterministically.
    #[derive(Default)]
    pub struct RecordingEmitter {
        next_handle: Mutex<EmitterHandle>,
        pub sent: Mutex<Vec<(EmitterHandle, i64, i64, Vec<u8>)>>,
        pub discarded: Mutex<Vec<(EmitterHandle, i64)>>,
        pub stopped: Mutex<bool>,
    }

    impl RecordingEmitter {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Emitter for RecordingEmitter {
        fn emit(&self, emit_at: i64, playback_at: i64, bytes: Vec<u8>) -> EmitterHandle {
            let mut next = self.next_handle.lock().unwrap();
            let handle = *next;
            *next += 1;
            self.sent
                .lock()
                .unwrap()
                .push((handle, emit_at, playback_at, bytes));
            handle
        }

        fn discard(&self, handle: EmitterHandle, playback_at: i64) {
            self.discarded.lock().unwrap().push((handle, playback_at));
        }

        fn stop(&self) {
            *self.stopped.lock().unwrap() = true;
        }
    }
}
