//! A lazy sequence of fixed-size PCM frames drawn from an ordered playlist.
//!
//! Decoding a track file into raw PCM is an external collaborator (see the
//! crate-level docs): [`SourceStream`] only ever deals in already-decoded
//! frames, produced one playlist entry at a time by a [`SourceProvider`].

use std::collections::VecDeque;

use crate::error::{CoreError, CoreResult};
use crate::model::{Frame, SourceId, StreamItem};

/// The external decoding boundary: one playlist entry knows how to produce
/// its own fixed-size PCM frames, but nothing about playlists, pacing, or
/// the wire.
pub trait SourceProvider: Send {
    fn id(&self) -> &SourceId;

    /// Reads the next frame's raw bytes, or `None` once this entry is
    /// exhausted. An `Err` is a decode/IO failure on this entry only; the
    /// caller decides whether to substitute silence or skip ahead.
    fn read_frame(&mut self) -> CoreResult<Option<Vec<u8>>>;

    /// Best-effort rewind to the start of this entry. Providers that cannot
    /// rewind may leave this as a no-op; `reset` then degrades to "continue
    /// from wherever we are".
    fn restart(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Total playback length of this entry, when known, for `source_progress`
    /// reporting. `None` for providers that cannot determine this up front.
    fn duration_ms(&self) -> Option<u64> {
        None
    }
}

pub trait SourceStream: Send {
    fn next_frame(&mut self) -> StreamItem;

    /// Pushes frames back to the head of the stream, preserving order, so
    /// that the next `next_frame` returns `frames[0]`.
    fn rebuffer(&mut self, frames: Vec<Frame>);

    /// Discards all buffered output without moving the playlist cursor.
    fn flush(&mut self);

    /// Rewinds to the start of the current playlist entry.
    fn reset(&mut self);

    /// Advances the cursor to the playlist entry identified by `id`,
    /// flushing buffered output. Used by `skip`.
    fn seek(&mut self, id: &SourceId) -> CoreResult<()>;

    /// Known total length of the entry currently being read, when available.
    fn current_duration_ms(&self) -> Option<u64> {
        None
    }

    /// All source ids `seek` would accept, in playlist order. Lets a caller
    /// validate a skip target before committing to anything that would
    /// perturb playback if the id turns out to be unknown.
    fn known_source_ids(&self) -> Vec<SourceId> {
        Vec::new()
    }
}

/// The production [`SourceStream`]: an ordered playlist of
/// [`SourceProvider`]s with read-failure tolerance per §7.2.
pub struct PlaylistSourceStream {
    playlist: Vec<Box<dyn SourceProvider>>,
    cursor: usize,
    pending: VecDeque<Frame>,
    consecutive_failures: u32,
    failure_threshold: u32,
    silent_frame_bytes: usize,
}

impl PlaylistSourceStream {
    pub fn new(
        playlist: Vec<Box<dyn SourceProvider>>,
        failure_threshold: u32,
        silent_frame_bytes: usize,
    ) -> Self {
        PlaylistSourceStream {
            playlist,
            cursor: 0,
            pending: VecDeque::new(),
            consecutive_failures: 0,
            failure_threshold,
            silent_frame_bytes,
        }
    }

    fn silent_frame(&self, source_id: SourceId) -> Frame {
        Frame {
            source_id,
            bytes: vec![0u8; self.silent_frame_bytes],
        }
    }
}

impl SourceStream for PlaylistSourceStream {
    fn next_frame(&mut self) -> StreamItem {
        if let Some(frame) = self.pending.pop_front() {
            return StreamItem::Frame(frame);
        }

        loop {
            if self.cursor >= self.playlist.len() {
                return StreamItem::End;
            }
            let source_id = self.playlist[self.cursor].id().clone();
            match self.playlist[self.cursor].read_frame() {
                Ok(Some(bytes)) => {
                    self.consecutive_failures = 0;
                    return StreamItem::Frame(Frame { source_id, bytes });
                }
                Ok(None) => {
                    self.cursor += 1;
                    self.consecutive_failures = 0;
                    continue;
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures < self.failure_threshold {
                        tracing::warn!(error = %err, %source_id, "source read error, substituting silence");
                        return StreamItem::Frame(self.silent_frame(source_id));
                    }
                    tracing::warn!(
                        %source_id,
                        failures = self.consecutive_failures,
                        "consecutive source read failures exceeded threshold, advancing past source"
                    );
                    self.cursor += 1;
                    self.consecutive_failures = 0;
                    continue;
                }
            }
        }
    }

    fn rebuffer(&mut self, frames: Vec<Frame>) {
        for frame in frames.into_iter().rev() {
            self.pending.push_front(frame);
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
    }

    fn reset(&mut self) {
        self.pending.clear();
        if let Some(provider) = self.playlist.get_mut(self.cursor) {
            if let Err(err) = provider.restart() {
                tracing::warn!(error = %err, "source restart failed, continuing from current position");
            }
        }
    }

    fn seek(&mut self, id: &SourceId) -> CoreResult<()> {
        let position = self.playlist.iter().position(|p| p.id() == id);
        match position {
            Some(index) => {
                self.pending.clear();
                self.cursor = index;
                self.consecutive_failures = 0;
                Ok(())
            }
            None => Err(CoreError::UnknownSourceId(id.clone())),
        }
    }

    fn current_duration_ms(&self) -> Option<u64> {
        self.playlist.get(self.cursor).and_then(|p| p.duration_ms())
    }

    fn known_source_ids(&self) -> Vec<SourceId> {
        self.playlist.iter().map(|p| p.id().clone()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::VecSourceStream;
    use super::*;

    fn frame(id: &str, byte: u8) -> Frame {
        Frame {
            source_id: SourceId::from(id),
            bytes: vec![byte; 4],
        }
    }

    #[test]
    fn next_frame_drains_in_order_then_ends() {
        let mut stream = VecSourceStream::new(vec![frame("a", 1), frame("a", 2)]);
        assert_eq!(stream.next_frame(), StreamItem::Frame(frame("a", 1)));
        assert_eq!(stream.next_frame(), StreamItem::Frame(frame("a", 2)));
        assert_eq!(stream.next_frame(), StreamItem::End);
    }

    #[test]
    fn rebuffer_restores_order_for_next_read() {
        let mut stream = VecSourceStream::new(vec![frame("a", 3)]);
        stream.rebuffer(vec![frame("a", 1), frame("a", 2)]);
        assert_eq!(stream.next_frame(), StreamItem::Frame(frame("a", 1)));
        assert_eq!(stream.next_frame(), StreamItem::Frame(frame("a", 2)));
        assert_eq!(stream.next_frame(), StreamItem::Frame(frame("a", 3)));
    }

    #[test]
    fn flush_drops_buffered_frames() {
        let mut stream = VecSourceStream::new(vec![frame("a", 1)]);
        stream.flush();
        assert_eq!(stream.next_frame(), StreamItem::End);
    }

    #[test]
    fn seek_to_unknown_id_is_an_error() {
        let mut stream = VecSourceStream::new(vec![frame("a", 1)]);
        assert!(matches!(
            stream.seek(&SourceId::from("missing")),
            Err(CoreError::UnknownSourceId(_))
        ));
    }
}
