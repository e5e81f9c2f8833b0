//! Playback engine for the modplay tracker player.
//!
//! Turns a loaded `Song` into interleaved stereo f32 blocks: the `Sequencer`
//! advances order/row/tick state and interprets effects per format, and the
//! mixer interpolates sample data per channel at sub-tick granularity.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod freq;
mod mixer;
mod sequencer;
mod track;

pub use mixer::{mix, PanTable};
pub use sequencer::Sequencer;
pub use track::Track;

/// Output sample rate, fixed for the whole pipeline.
pub const SAMPLE_RATE: u32 = 44100;
