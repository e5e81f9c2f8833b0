//! ProTracker MOD loader.

use mp_ir::{Cell, Format, Pattern, Sample, Song, VOL_NONE};

use crate::bytes::{read_name, u16_be, u8_at};
use crate::pcm;
use crate::LoadError;

/// Channel counts for known signature tags at offset 1080. Tags of the form
/// `<digits>CH` are parsed numerically; no tag at all means a 15-sample
/// legacy file with 4 channels.
const TAGS: [(&[u8; 4], u8); 8] = [
    (b"M.K.", 4),
    (b"M!K!", 4),
    (b"FLT4", 4),
    (b"4CHN", 4),
    (b"6CHN", 6),
    (b"8CHN", 8),
    (b"FLT8", 8),
    (b"2CHN", 2),
];

fn detect_channels(tag: &[u8]) -> Option<u8> {
    for (known, channels) in TAGS {
        if tag == known.as_slice() {
            return Some(channels);
        }
    }
    if tag.len() == 4 && &tag[2..4] == b"CH" && tag[..2].iter().all(u8::is_ascii_digit) {
        let n = (tag[0] - b'0') * 10 + (tag[1] - b'0');
        if n > 0 {
            return Some(n);
        }
    }
    None
}

/// Load a MOD file from bytes.
pub fn load_mod(data: &[u8]) -> Result<Song, LoadError> {
    // Smallest legal layout: 15 sample headers, length byte, order table
    if data.len() < 20 + 15 * 30 + 2 + 128 {
        return Err(LoadError::TooShort(data.len()));
    }

    let mut song = Song::new(Format::Mod);
    song.title = read_name(data, 0, 20);

    let (num_samples, num_channels) = match data.get(1080..1084).and_then(detect_channels) {
        Some(channels) => (31, channels),
        None => (15, 4),
    };
    song.num_channels = num_channels;

    // Sample headers: big-endian word counts, doubled to bytes
    let mut offset = 20;
    let mut sample_lens = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let mut sample = Sample::default();
        sample.name = read_name(data, offset, 22);
        sample_lens.push(u16_be(data, offset + 22) as usize * 2);
        let ft = u8_at(data, offset + 24) & 0xF;
        sample.finetune = if ft < 8 { ft as i8 } else { ft as i8 - 16 };
        sample.volume = u8_at(data, offset + 25).min(64);
        sample.loop_start = u16_be(data, offset + 26) as u32 * 2;
        let loop_len = u16_be(data, offset + 28) as u32 * 2;
        sample.loop_len = if loop_len <= 2 { 0 } else { loop_len };
        song.samples.push(sample);
        offset += 30;
    }

    let song_len = (u8_at(data, offset) as usize).min(128);
    offset += 2;
    let orders: Vec<u16> = data[offset..offset + 128].iter().map(|&b| b as u16).collect();
    offset += 128;
    if num_samples == 31 {
        offset += 4; // signature
    }

    // The pattern list is sized from the order table, so every order entry
    // has a backing pattern even in truncated files
    let pattern_count = if song_len > 0 {
        orders[..song_len].iter().max().copied().unwrap_or(0) as usize + 1
    } else {
        1
    };
    song.orders = orders[..song_len].to_vec();

    for _ in 0..pattern_count {
        let mut pattern = Pattern::new(64, num_channels);
        for row in 0..64u16 {
            for ch in 0..num_channels {
                let cell = if offset + 4 <= data.len() {
                    let b = &data[offset..offset + 4];
                    offset += 4;
                    Cell {
                        note: (((b[0] & 0xF) as u16) << 8) | b[1] as u16,
                        instrument: (b[0] & 0xF0) | (b[2] >> 4),
                        volume: VOL_NONE,
                        effect: b[2] & 0xF,
                        param: b[3],
                    }
                } else {
                    Cell { note: 0, instrument: 0, volume: VOL_NONE, effect: 0, param: 0 }
                };
                pattern.set_cell(row, ch, cell);
            }
        }
        song.patterns.push(pattern);
    }

    // Sample data: signed 8-bit PCM, stored in header order
    for (i, &len) in sample_lens.iter().enumerate() {
        if len == 0 {
            continue;
        }
        if offset + len <= data.len() {
            song.samples[i + 1].data = pcm::signed8(&data[offset..offset + len]);
            offset += len;
        } else {
            tracing::warn!(sample = i + 1, "sample data truncated, leaving empty");
        }
    }

    tracing::debug!(
        title = %song.title,
        channels = num_channels,
        patterns = pattern_count,
        "loaded MOD"
    );
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Minimal 31-sample M.K. module: one pattern, one 8-frame sample on
    /// slot 1, a C-2 note (period 428) with effect F06 on channel 0 row 0.
    fn build_mod() -> Vec<u8> {
        let mut d = vec![0u8; 1084 + 64 * 4 * 4 + 8];
        d[..9].copy_from_slice(b"test song");
        // Sample 1 header at offset 20
        d[20..25].copy_from_slice(b"kick\0");
        d[42..44].copy_from_slice(&4u16.to_be_bytes()); // 4 words = 8 bytes
        d[44] = 0; // finetune
        d[45] = 48; // volume
        d[46..48].copy_from_slice(&0u16.to_be_bytes()); // loop start
        d[48..50].copy_from_slice(&1u16.to_be_bytes()); // loop len 2 bytes -> none
        d[950] = 1; // song length
        d[952] = 0; // order 0 -> pattern 0
        d[1080..1084].copy_from_slice(b"M.K.");
        // Row 0 channel 0: sample 1, period 428 (0x1AC), effect F, param 6
        d[1084] = 0x01; // sample hi nibble 0 | period hi 0x1
        d[1085] = 0xAC;
        d[1086] = 0x1F; // sample lo nibble 1 | effect F
        d[1087] = 0x06;
        // Sample data: ramp of 8 signed bytes
        let base = 1084 + 64 * 4 * 4;
        for i in 0..8 {
            d[base + i] = (i as i32 * 16 - 64) as i8 as u8;
        }
        d
    }

    #[test]
    fn parses_header_and_title() {
        let song = load_mod(&build_mod()).unwrap();
        assert_eq!(song.format, Format::Mod);
        assert_eq!(song.title.as_str(), "test song");
        assert_eq!(song.num_channels, 4);
        assert_eq!(song.orders, vec![0]);
        assert_eq!(song.patterns.len(), 1);
        assert_eq!(song.samples.len(), 32); // sentinel + 31 slots
    }

    #[test]
    fn decodes_cell_fields() {
        let song = load_mod(&build_mod()).unwrap();
        let cell = song.patterns[0].cell(0, 0).unwrap();
        assert_eq!(cell.note, 428);
        assert_eq!(cell.instrument, 1);
        assert_eq!(cell.effect, 0xF);
        assert_eq!(cell.param, 6);
    }

    #[test]
    fn decodes_sample_metadata_and_pcm() {
        let song = load_mod(&build_mod()).unwrap();
        let s = &song.samples[1];
        assert_eq!(s.name.as_str(), "kick");
        assert_eq!(s.volume, 48);
        assert_eq!(s.len(), 8);
        assert_eq!(s.loop_len, 0, "2-byte loop is no loop");
        assert!((s.data[0] - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn high_sample_numbers_use_both_nibbles() {
        let mut d = build_mod();
        // Sample 17 = hi nibble 1, lo nibble 1
        d[1084] = 0x11;
        d[1086] = 0x10;
        let song = load_mod(&d).unwrap();
        assert_eq!(song.patterns[0].cell(0, 0).unwrap().instrument, 17);
    }

    #[test]
    fn negative_finetune_is_sign_extended() {
        let mut d = build_mod();
        d[44] = 0xF; // -1
        let song = load_mod(&d).unwrap();
        assert_eq!(song.samples[1].finetune, -1);
    }

    #[test]
    fn digit_tag_sets_channel_count() {
        let mut d = build_mod();
        d[1080..1084].copy_from_slice(b"10CH");
        // 10 channels needs a bigger pattern; data shrinks but the loader
        // degrades to empty cells instead of failing
        let song = load_mod(&d).unwrap();
        assert_eq!(song.num_channels, 10);
    }

    #[test]
    fn missing_tag_means_legacy_15_samples() {
        let d = vec![0u8; 700];
        let song = load_mod(&d).unwrap();
        assert_eq!(song.num_channels, 4);
        assert_eq!(song.samples.len(), 16);
    }

    #[test]
    fn tiny_file_is_rejected() {
        assert!(matches!(load_mod(&[0u8; 100]), Err(LoadError::TooShort(100))));
    }

    #[test]
    fn order_entries_always_have_patterns() {
        let song = load_mod(&build_mod()).unwrap();
        for &o in &song.orders {
            assert!((o as usize) < song.patterns.len());
        }
    }
}
