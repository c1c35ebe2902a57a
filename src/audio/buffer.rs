//! # Audio Buffer Management
//!
//! Ordered, append-only buffer of PCM frames for one streaming session.
//!
//! The buffered duration is derived from an integer sample count, so it is
//! always exactly `total samples / sample rate` no matter how many frames
//! were appended. A flush consumes the whole buffer at once.

/// Buffered mono `f32` frames awaiting transcription.
///
/// ## Memory Management:
/// Frames are kept as received and only concatenated when a span is taken,
/// so appending never copies previously buffered audio.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    frames: Vec<Vec<f32>>,
    total_samples: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Vec::new(),
            total_samples: 0,
            sample_rate,
        }
    }

    /// Append one frame. Empty frames are ignored.
    pub fn append(&mut self, frame: Vec<f32>) {
        if frame.is_empty() {
            return;
        }
        self.total_samples += frame.len();
        self.frames.push(frame);
    }

    /// Duration of the buffered audio in seconds.
    ///
    /// ## Calculation:
    /// Duration = number_of_samples / sample_rate
    pub fn duration_seconds(&self) -> f64 {
        self.total_samples as f64 / self.sample_rate as f64
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Concatenate every buffered frame into one span and empty the buffer.
    pub fn take_span(&mut self) -> Vec<f32> {
        let mut span = Vec::with_capacity(self.total_samples);
        for frame in self.frames.drain(..) {
            span.extend_from_slice(&frame);
        }
        self.total_samples = 0;
        span
    }

    /// Drop all buffered audio.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.total_samples = 0;
    }
}
