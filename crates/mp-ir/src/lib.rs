//! Core song model for the modplay tracker player.
//!
//! Format loaders emit these types and the playback engine consumes them.
//! A `Song` is immutable after load and may be shared by reference across
//! threads. Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod pattern;
mod sample;
mod song;

pub use pattern::{Cell, Pattern, VOL_NONE};
pub use sample::Sample;
pub use song::{Format, Instrument, Song};
