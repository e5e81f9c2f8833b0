//! Audio output for the modplay tracker player.
//!
//! A bounded single-producer single-consumer block queue feeds a cpal
//! output stream: the producer thread pushes whole stereo blocks, the
//! device callback pops them without blocking and zero-fills on underflow.

mod cpal_backend;

pub use cpal_backend::{BlockProducer, CpalOutput};

/// Stereo frames per queued block.
pub const BLOCK_FRAMES: usize = 2048;

/// Bounded queue depth, in blocks.
pub const QUEUE_BLOCKS: usize = 32;

/// One interleaved stereo block (`BLOCK_FRAMES * 2` f32 values).
pub type Block = Vec<f32>;

/// Error type for audio device operations.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to create audio stream: {0}")]
    StreamCreate(String),
    #[error("playback error: {0}")]
    Playback(String),
}
