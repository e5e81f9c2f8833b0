//! Song container and format tag.

use alloc::vec::Vec;
use arrayvec::ArrayString;

use crate::pattern::Pattern;
use crate::sample::Sample;

/// Which tracker format a song was loaded from.
///
/// The sequencer dispatches effect semantics and period math on this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Mod,
    S3m,
    Xm,
    It,
}

/// Note-to-sample lookup for one instrument (XM: 96 entries, IT: 120).
///
/// Entries are global sample-bank indices; 0 = no sample.
#[derive(Clone, Debug, Default)]
pub struct Instrument {
    pub sample_map: Vec<u16>,
}

/// A complete song, immutable after load.
#[derive(Clone, Debug)]
pub struct Song {
    pub format: Format,
    pub title: ArrayString<32>,
    /// Playback order: indices into `patterns`
    pub orders: Vec<u16>,
    pub patterns: Vec<Pattern>,
    /// Channel count (1..32, or 64 for IT)
    pub num_channels: u8,
    /// Initial ticks per row (1..31)
    pub initial_speed: u8,
    /// Initial tempo in BPM (>= 32)
    pub initial_tempo: u16,
    /// Linear-frequency slide mode (XM/IT)
    pub linear: bool,
    /// Sample bank; index 0 is a reserved empty sentinel
    pub samples: Vec<Sample>,
    /// Per-instrument note maps (XM/IT; empty for MOD/S3M)
    pub instruments: Vec<Instrument>,
}

impl Song {
    /// Create an empty song with format defaults (speed 6, 125 BPM).
    pub fn new(format: Format) -> Self {
        Self {
            format,
            title: ArrayString::new(),
            orders: Vec::new(),
            patterns: Vec::new(),
            num_channels: 4,
            initial_speed: 6,
            initial_tempo: 125,
            linear: matches!(format, Format::Xm | Format::It),
            samples: alloc::vec![Sample::default()],
            instruments: Vec::new(),
        }
    }

    /// The pattern played at the given order position, if any.
    pub fn pattern_at(&self, order: usize) -> Option<&Pattern> {
        self.orders
            .get(order)
            .and_then(|&p| self.patterns.get(p as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_song_reserves_sample_zero() {
        let song = Song::new(Format::Mod);
        assert_eq!(song.samples.len(), 1);
        assert!(song.samples[0].is_empty());
    }

    #[test]
    fn linear_default_follows_format() {
        assert!(!Song::new(Format::Mod).linear);
        assert!(!Song::new(Format::S3m).linear);
        assert!(Song::new(Format::Xm).linear);
        assert!(Song::new(Format::It).linear);
    }

    #[test]
    fn pattern_at_follows_order_list() {
        let mut song = Song::new(Format::Mod);
        song.patterns.push(Pattern::new(64, 4));
        song.patterns.push(Pattern::new(32, 4));
        song.orders = alloc::vec![1, 0];

        assert_eq!(song.pattern_at(0).unwrap().rows, 32);
        assert_eq!(song.pattern_at(1).unwrap().rows, 64);
        assert!(song.pattern_at(2).is_none());
    }
}
