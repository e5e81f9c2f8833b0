//! ScreamTracker 3 S3M loader.

use mp_ir::{Cell, Format, Pattern, Sample, Song, VOL_NONE};

use crate::bytes::{read_name, slice_at, u16_le, u32_le, u8_at};
use crate::pcm;
use crate::LoadError;

/// Load an S3M file from bytes.
pub fn load_s3m(data: &[u8]) -> Result<Song, LoadError> {
    if data.len() < 0x60 {
        return Err(LoadError::TooShort(data.len()));
    }

    let mut song = Song::new(Format::S3m);
    song.title = read_name(data, 0, 28);

    let order_count = u16_le(data, 0x20) as usize;
    let sample_count = u16_le(data, 0x22) as usize;
    let pattern_count = u16_le(data, 0x24) as usize;
    // File-format version word: 1 = old signed samples, 2 = unsigned
    let signed_samples = u16_le(data, 0x2A) == 1;
    song.initial_speed = u8_at(data, 0x31).max(1);
    song.initial_tempo = (u8_at(data, 0x32) as u16).max(32);

    let orders: Vec<u16> = slice_at(data, 0x60, order_count)
        .iter()
        .filter(|&&o| o < 254)
        .map(|&o| o as u16)
        .collect();

    // Parapointer tables follow the order list, in 16-byte units
    let table_base = 0x60 + order_count;
    let sample_ptrs: Vec<usize> = (0..sample_count)
        .map(|i| u16_le(data, table_base + i * 2) as usize * 16)
        .collect();
    let pattern_ptrs: Vec<usize> = (0..pattern_count)
        .map(|i| u16_le(data, table_base + sample_count * 2 + i * 2) as usize * 16)
        .collect();

    for ptr in sample_ptrs {
        song.samples.push(load_sample(data, ptr, signed_samples));
    }

    // Channel count is discovered from the pattern data itself
    let mut max_channel: Option<u8> = None;
    for ptr in pattern_ptrs {
        song.patterns.push(load_pattern(data, ptr, &mut max_channel));
    }
    song.num_channels = max_channel.map_or(4, |m| m + 1);

    let before = orders.len();
    song.orders = orders
        .into_iter()
        .filter(|&o| (o as usize) < song.patterns.len())
        .collect();
    if song.orders.len() != before {
        tracing::warn!(
            dropped = before - song.orders.len(),
            "order entries referencing missing patterns"
        );
    }

    tracing::debug!(
        title = %song.title,
        channels = song.num_channels,
        patterns = song.patterns.len(),
        "loaded S3M"
    );
    Ok(song)
}

/// Sample block: type 1 (PCM) only, anything else stays an empty sentinel.
fn load_sample(data: &[u8], ptr: usize, signed_samples: bool) -> Sample {
    let mut sample = Sample::default();
    if ptr == 0 || ptr + 0x50 > data.len() || u8_at(data, ptr) != 1 {
        return sample;
    }

    sample.name = read_name(data, ptr + 0x30, 28);
    // MemSeg: 3-byte parapointer, low word then high byte
    let data_ptr =
        (((u8_at(data, ptr + 0x0F) as usize) << 16) | u16_le(data, ptr + 0x0D) as usize) * 16;
    let length = u32_le(data, ptr + 0x10) as usize;
    let loop_begin = u32_le(data, ptr + 0x14);
    let loop_end = u32_le(data, ptr + 0x18);
    sample.volume = u8_at(data, ptr + 0x1C).min(64);
    let flags = u8_at(data, ptr + 0x1F);
    let is_16bit = flags & 4 != 0;
    let has_loop = flags & 1 != 0;
    let bytes_per = if is_16bit { 2 } else { 1 };

    sample.loop_start = loop_begin;
    sample.loop_len = if has_loop && loop_end > loop_begin + 2 {
        loop_end - loop_begin
    } else {
        0
    };
    // Only the low word of C2Spd is significant
    sample.c5_speed = match u16_le(data, ptr + 0x20) {
        0 => 8363,
        c5 => c5 as u32,
    };

    if length > 0 {
        if data_ptr > 0 && data_ptr + length * bytes_per <= data.len() {
            let raw = &data[data_ptr..data_ptr + length * bytes_per];
            sample.data = if is_16bit {
                pcm::signed16(raw)
            } else if signed_samples {
                pcm::signed8(raw)
            } else {
                pcm::unsigned8(raw)
            };
        } else {
            tracing::warn!(name = %sample.name, "sample data out of range, leaving empty");
        }
    }
    sample
}

/// Packed pattern: 64 rows, channel index plus conditional note/ins,
/// volume, and effect bytes, rows terminated by a zero byte.
fn load_pattern(data: &[u8], ptr: usize, max_channel: &mut Option<u8>) -> Pattern {
    let mut pattern = Pattern::new(64, 32);
    if ptr == 0 || ptr + 2 > data.len() {
        return pattern;
    }

    let mut offset = ptr + 2;
    let mut row = 0u16;
    while row < 64 && offset < data.len() {
        let what = data[offset];
        offset += 1;
        if what == 0 {
            row += 1;
            continue;
        }
        let channel = what & 0x1F;
        *max_channel = Some(max_channel.map_or(channel, |m| m.max(channel)));

        let mut cell = Cell { note: 0, instrument: 0, volume: VOL_NONE, effect: 0, param: 0 };
        if what & 0x20 != 0 && offset + 1 < data.len() {
            cell.note = data[offset] as u16;
            cell.instrument = data[offset + 1];
            offset += 2;
        }
        if what & 0x40 != 0 && offset < data.len() {
            cell.volume = data[offset];
            offset += 1;
        }
        if what & 0x80 != 0 && offset + 1 < data.len() {
            cell.effect = data[offset];
            cell.param = data[offset + 1];
            offset += 2;
        }
        pattern.set_cell(row, channel, cell);
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Minimal S3M: 3 orders (one 0xFF marker), 1 sample, 1 pattern.
    /// The pattern puts a C-5 note + instrument 1 + volume 32 + effect A/3
    /// on channel 2 of row 0.
    fn build_s3m() -> Vec<u8> {
        let mut d = vec![0u8; 0x200 + 16];
        d[..5].copy_from_slice(b"stest");
        d[0x20..0x22].copy_from_slice(&3u16.to_le_bytes()); // orders
        d[0x22..0x24].copy_from_slice(&1u16.to_le_bytes()); // samples
        d[0x24..0x26].copy_from_slice(&1u16.to_le_bytes()); // patterns
        d[0x2A..0x2C].copy_from_slice(&2u16.to_le_bytes()); // unsigned samples
        d[0x31] = 4; // speed
        d[0x32] = 120; // tempo
        d[0x60] = 0; // order 0 -> pattern 0
        d[0x61] = 255; // end marker, skipped
        d[0x62] = 0;
        // Parapointers: sample block at 0x100, pattern block at 0x180
        let base = 0x60 + 3;
        d[base..base + 2].copy_from_slice(&(0x100u16 / 16).to_le_bytes());
        d[base + 2..base + 4].copy_from_slice(&(0x180u16 / 16).to_le_bytes());

        // Sample block at 0x100
        d[0x100] = 1; // type 1 = PCM
        d[0x10D..0x10F].copy_from_slice(&(0x200u16 / 16).to_le_bytes()); // memseg low
        d[0x10F] = 0; // memseg high
        d[0x110..0x114].copy_from_slice(&8u32.to_le_bytes()); // length
        d[0x11C] = 50; // volume
        d[0x11F] = 0; // flags: 8-bit, no loop
        d[0x120..0x122].copy_from_slice(&8363u16.to_le_bytes()); // c2spd
        d[0x130..0x134].copy_from_slice(b"snar");

        // Pattern block at 0x180: length word then packed rows
        let packed = [
            0xE2u8, // channel 2, note+ins, volume, effect
            0x50, 1, // note C-5, instrument 1
            32,   // volume
            1, 3, // effect A (speed), param 3
            0,    // end of row 0
        ];
        let plen = (packed.len() + 2) as u16;
        d[0x180..0x182].copy_from_slice(&plen.to_le_bytes());
        d[0x182..0x182 + packed.len()].copy_from_slice(&packed);

        // Sample PCM at 0x200: unsigned bytes centered on 128
        for i in 0..8 {
            d[0x200 + i] = 128 + (i as u8) * 8;
        }
        d
    }

    #[test]
    fn parses_header() {
        let song = load_s3m(&build_s3m()).unwrap();
        assert_eq!(song.format, Format::S3m);
        assert_eq!(song.title.as_str(), "stest");
        assert_eq!(song.initial_speed, 4);
        assert_eq!(song.initial_tempo, 120);
        assert!(!song.linear);
    }

    #[test]
    fn marker_orders_are_skipped() {
        let song = load_s3m(&build_s3m()).unwrap();
        assert_eq!(song.orders, vec![0, 0]);
    }

    #[test]
    fn channel_count_comes_from_pattern_data() {
        let song = load_s3m(&build_s3m()).unwrap();
        assert_eq!(song.num_channels, 3);
    }

    #[test]
    fn decodes_packed_cell() {
        let song = load_s3m(&build_s3m()).unwrap();
        let cell = song.patterns[0].cell(0, 2).unwrap();
        assert_eq!(cell.note, 0x50);
        assert_eq!(cell.instrument, 1);
        assert_eq!(cell.volume, 32);
        assert_eq!(cell.effect, 1);
        assert_eq!(cell.param, 3);
        // Untouched channels stay absent
        assert_eq!(song.patterns[0].cell(0, 0), None);
        assert_eq!(song.patterns[0].cell(1, 2), None);
    }

    #[test]
    fn decodes_unsigned_sample() {
        let song = load_s3m(&build_s3m()).unwrap();
        let s = &song.samples[1];
        assert_eq!(s.name.as_str(), "snar");
        assert_eq!(s.volume, 50);
        assert_eq!(s.c5_speed, 8363);
        assert_eq!(s.len(), 8);
        assert_eq!(s.data[0], 0.0); // 128 is center
        assert!(s.data[1] > 0.0);
    }

    #[test]
    fn old_format_word_selects_signed_decoding() {
        let mut d = build_s3m();
        d[0x2A..0x2C].copy_from_slice(&1u16.to_le_bytes());
        let song = load_s3m(&d).unwrap();
        // 128 as signed i8 is -128
        assert_eq!(song.samples[1].data[0], -1.0);
    }

    #[test]
    fn non_pcm_sample_block_is_empty() {
        let mut d = build_s3m();
        d[0x100] = 2; // adlib instrument
        let song = load_s3m(&d).unwrap();
        assert!(song.samples[1].is_empty());
    }

    #[test]
    fn out_of_range_sample_pointer_degrades() {
        let mut d = build_s3m();
        d[0x110..0x114].copy_from_slice(&100_000u32.to_le_bytes());
        let song = load_s3m(&d).unwrap();
        assert!(song.samples[1].is_empty());
    }

    #[test]
    fn tiny_file_is_rejected() {
        assert!(matches!(load_s3m(&[0u8; 16]), Err(LoadError::TooShort(16))));
    }
}
