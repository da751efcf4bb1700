//! Fixed-size output chunking
//!
//! The resampler emits frames of exactly `chunk_size` samples. Output that
//! does not fill a chunk waits in the assembler; output that overflows one
//! is carried into the next chunk, so nothing is lost or duplicated between
//! emitted frames.

use crate::types::{AudioFrame, ChannelBuffer, SampleFormat};

#[derive(Debug)]
pub struct ChunkAssembler {
    format: SampleFormat,
    chunk_size: usize,
    sample_rate: u32,
    pending: Vec<Vec<f64>>,
}

impl ChunkAssembler {
    pub fn new(format: SampleFormat, channels: usize, chunk_size: usize, sample_rate: u32) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            format,
            chunk_size,
            sample_rate,
            pending: (0..channels)
                .map(|_| Vec::with_capacity(chunk_size))
                .collect(),
        }
    }

    /// Append resampled output, returning every chunk it completed.
    pub fn push(&mut self, outputs: Vec<Vec<f64>>) -> Vec<AudioFrame> {
        let available = outputs.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut frames = Vec::new();
        let mut offset = 0;

        while offset < available {
            let room = self.chunk_size - self.pending_len();
            let n = room.min(available - offset);
            for (pending, output) in self.pending.iter_mut().zip(&outputs) {
                pending.extend_from_slice(&output[offset..offset + n]);
            }
            offset += n;

            if self.pending_len() == self.chunk_size {
                frames.push(self.take());
            }
        }

        frames
    }

    /// Emit whatever is buffered, even an empty chunk.
    pub fn flush(&mut self) -> AudioFrame {
        self.take()
    }

    pub fn clear(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.first().map_or(0, |p| p.len())
    }

    fn take(&mut self) -> AudioFrame {
        let format = self.format;
        let channels = self
            .pending
            .iter_mut()
            .map(|pending| {
                let buffer = ChannelBuffer::from_f64(format, pending);
                pending.clear();
                buffer
            })
            .collect();
        AudioFrame {
            channels,
            sample_rate: self.sample_rate,
        }
    }
}
