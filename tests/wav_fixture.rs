//! Exercises `PlaylistSourceStream` against a real decoded WAV file instead
//! of synthetic frames, using `hound` purely as a test-fixture decoder (see
//! the crate docs: container/codec decoding is an external collaborator,
//! not something this core ships).

use std::io::Cursor;

use broadcast_core::error::CoreResult;
use broadcast_core::model::{SourceId, StreamItem};
use broadcast_core::source_stream::{PlaylistSourceStream, SourceProvider, SourceStream};

struct WavSourceProvider {
    id: SourceId,
    samples: Vec<i16>,
    cursor: usize,
    samples_per_frame: usize,
}

impl WavSourceProvider {
    fn from_wav_bytes(id: SourceId, wav: &[u8], samples_per_frame: usize) -> Self {
        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        WavSourceProvider {
            id,
            samples,
            cursor: 0,
            samples_per_frame,
        }
    }
}

impl SourceProvider for WavSourceProvider {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn read_frame(&mut self) -> CoreResult<Option<Vec<u8>>> {
        if self.cursor >= self.samples.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.samples_per_frame).min(self.samples.len());
        let bytes = self.samples[self.cursor..end]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        self.cursor = end;
        Ok(Some(bytes))
    }
}

fn make_wav(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf.into_inner()
}

#[test]
fn playlist_source_stream_reads_decoded_wav_frames_then_ends() {
    let samples: Vec<i16> = (0..20).map(|n| n * 100).collect();
    let wav = make_wav(&samples);
    let provider = WavSourceProvider::from_wav_bytes(SourceId::from("track"), &wav, 8);

    let mut stream = PlaylistSourceStream::new(vec![Box::new(provider)], 4, 16);

    let mut frame_count = 0;
    loop {
        match stream.next_frame() {
            StreamItem::Frame(frame) => {
                assert_eq!(frame.source_id, SourceId::from("track"));
                assert!(!frame.bytes.is_empty());
                frame_count += 1;
            }
            StreamItem::End => break,
        }
    }
    // 20 samples / 8 per frame = 3 frames (last one partial).
    assert_eq!(frame_count, 3);
}
