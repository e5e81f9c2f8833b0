//! FastTracker II XM loader.

use mp_ir::{Cell, Format, Instrument, Pattern, Sample, Song, VOL_NONE};

use crate::bytes::{read_name, slice_at, u16_le, u32_le, u8_at};
use crate::pcm;
use crate::LoadError;

const XM_EMPTY: Cell = Cell { note: 0, instrument: 0, volume: VOL_NONE, effect: 0, param: 0 };

/// Load an XM file from bytes.
pub fn load_xm(data: &[u8]) -> Result<Song, LoadError> {
    if data.len() < 80 {
        return Err(LoadError::TooShort(data.len()));
    }

    let mut song = Song::new(Format::Xm);
    song.title = read_name(data, 17, 20);

    let header_size = u32_le(data, 60) as usize;
    let song_len = (u16_le(data, 64) as usize).min(255);
    song.num_channels = u16_le(data, 68).min(32) as u8;
    let pattern_count = u16_le(data, 70) as usize;
    let instrument_count = u16_le(data, 72) as usize;
    song.linear = u16_le(data, 74) & 1 != 0;
    song.initial_speed = u16_le(data, 76).clamp(1, 255) as u8;
    song.initial_tempo = u16_le(data, 78).max(32);
    let orders: Vec<u16> = slice_at(data, 80, 256)
        .iter()
        .take(song_len)
        .map(|&b| b as u16)
        .collect();

    // Patterns start right after the header
    let mut offset = 60 + header_size;
    for _ in 0..pattern_count {
        if offset + 9 > data.len() {
            break;
        }
        let header_len = u32_le(data, offset) as usize;
        let rows = u16_le(data, offset + 5).max(1);
        let packed_size = u16_le(data, offset + 7) as usize;
        let packed_off = offset + header_len.max(9);
        offset = packed_off + packed_size;

        let mut pattern = Pattern::new(rows, song.num_channels);
        let packed = slice_at(data, packed_off, packed_size);
        unpack_pattern(&mut pattern, packed, song.num_channels);
        song.patterns.push(pattern);
    }

    // Instruments, each followed by its sample headers and sample data
    for _ in 0..instrument_count {
        if offset + 4 > data.len() {
            break;
        }
        offset = load_instrument(data, offset, &mut song);
    }

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
        linear = song.linear,
        patterns = song.patterns.len(),
        "loaded XM"
    );
    Ok(song)
}

/// Packed rows: a byte with bit 7 set selects which of note, instrument,
/// volume, effect, and parameter follow; otherwise the byte is the note and
/// four more bytes follow.
fn unpack_pattern(pattern: &mut Pattern, packed: &[u8], channels: u8) {
    if packed.is_empty() {
        for row in 0..pattern.rows {
            for ch in 0..channels {
                pattern.set_cell(row, ch, XM_EMPTY);
            }
        }
        return;
    }

    let mut i = 0usize;
    for row in 0..pattern.rows {
        for ch in 0..channels {
            let mut cell = XM_EMPTY;
            if i < packed.len() {
                let b = packed[i];
                i += 1;
                if b & 0x80 != 0 {
                    if b & 1 != 0 && i < packed.len() {
                        cell.note = packed[i] as u16;
                        i += 1;
                    }
                    if b & 2 != 0 && i < packed.len() {
                        cell.instrument = packed[i];
                        i += 1;
                    }
                    if b & 4 != 0 && i < packed.len() {
                        cell.volume = packed[i];
                        i += 1;
                    }
                    if b & 8 != 0 && i < packed.len() {
                        cell.effect = packed[i];
                        i += 1;
                    }
                    if b & 16 != 0 && i < packed.len() {
                        cell.param = packed[i];
                        i += 1;
                    }
                } else {
                    cell.note = b as u16;
                    if i + 4 <= packed.len() {
                        cell.instrument = packed[i];
                        cell.volume = packed[i + 1];
                        cell.effect = packed[i + 2];
                        cell.param = packed[i + 3];
                        i += 4;
                    } else if i < packed.len() {
                        cell.instrument = packed[i];
                        i += 1;
                    }
                }
            }
            pattern.set_cell(row, ch, cell);
        }
    }
}

struct SampleHeader {
    len: usize,
    loop_start: usize,
    loop_len: usize,
    volume: u8,
    finetune: i8,
    flags: u8,
    pan: u8,
    relative: i8,
}

/// Parse one instrument block; returns the offset just past its sample data.
fn load_instrument(data: &[u8], start: usize, song: &mut Song) -> usize {
    let inst_size = u32_le(data, start) as usize;
    let sample_count = if start + 28 <= data.len() {
        u16_le(data, start + 27) as usize
    } else {
        0
    };
    let headers_off = start + inst_size.max(29);

    if sample_count == 0 {
        song.instruments.push(Instrument { sample_map: vec![0; 96] });
        return headers_off;
    }

    // Note->sample table, translated to global sample-bank indices
    let sample_base = song.samples.len();
    let mut raw_map = [0u8; 96];
    if start + 129 <= data.len() {
        raw_map.copy_from_slice(&data[start + 33..start + 129]);
    }
    let sample_map = raw_map
        .iter()
        .map(|&n| {
            if (n as usize) < sample_count {
                (sample_base + n as usize) as u16
            } else {
                0
            }
        })
        .collect();
    song.instruments.push(Instrument { sample_map });

    // All sample headers come first, then their data in the same order
    let mut headers = Vec::with_capacity(sample_count);
    let mut offset = headers_off;
    for _ in 0..sample_count {
        if offset + 40 > data.len() {
            break;
        }
        headers.push(SampleHeader {
            len: u32_le(data, offset) as usize,
            loop_start: u32_le(data, offset + 4) as usize,
            loop_len: u32_le(data, offset + 8) as usize,
            volume: u8_at(data, offset + 12),
            finetune: u8_at(data, offset + 13) as i8,
            flags: u8_at(data, offset + 14),
            pan: u8_at(data, offset + 15),
            relative: u8_at(data, offset + 16) as i8,
        });
        offset += 40;
    }

    for h in headers {
        let mut sample = Sample::default();
        sample.volume = h.volume;
        sample.finetune = h.finetune;
        sample.pan = h.pan;
        sample.relative_note = h.relative;

        let is_16bit = h.flags & 16 != 0;
        let loop_type = h.flags & 3;
        let bytes_per = if is_16bit { 2 } else { 1 };

        // Header fields are byte counts; sample positions are frames
        let raw = slice_at(data, offset, h.len);
        offset += h.len;
        if !raw.is_empty() {
            sample.data = if is_16bit { pcm::delta16(raw) } else { pcm::delta8(raw) };
        }
        sample.loop_start = (h.loop_start / bytes_per) as u32;
        let loop_frames = h.loop_len / bytes_per;
        sample.loop_len = if loop_type != 0 && loop_frames > 2 {
            loop_frames as u32
        } else {
            0
        };
        song.samples.push(sample);
    }
    offset
}
