//! Impulse Tracker IT loader.

use mp_ir::{Cell, Format, Instrument, Pattern, Sample, Song, VOL_NONE};

use crate::bytes::{read_name, slice_at, u16_le, u32_le, u8_at};
use crate::pcm;
use crate::LoadError;

const IT_EMPTY: Cell = Cell { note: 0xFF, instrument: 0, volume: VOL_NONE, effect: 0, param: 0 };

/// Load an IT file from bytes.
pub fn load_it(data: &[u8]) -> Result<Song, LoadError> {
    if data.len() < 0xC0 {
        return Err(LoadError::TooShort(data.len()));
    }
    if &data[0..4] != b"IMPM" {
        return Err(LoadError::BadMagic("IMPM"));
    }

    let mut song = Song::new(Format::It);
    song.title = read_name(data, 4, 26);
    song.num_channels = 64;

    let order_count = u16_le(data, 0x20) as usize;
    let instrument_count = u16_le(data, 0x22) as usize;
    let sample_count = u16_le(data, 0x24) as usize;
    let pattern_count = u16_le(data, 0x26) as usize;
    let flags = u16_le(data, 0x2C);
    song.linear = flags & 8 != 0;
    song.initial_speed = u8_at(data, 0x32).max(1);
    song.initial_tempo = (u8_at(data, 0x33) as u16).max(32);

    let orders: Vec<u16> = slice_at(data, 0xC0, order_count)
        .iter()
        .filter(|&&o| o < 254)
        .map(|&o| o as u16)
        .collect();

    // Three pointer tables: instruments, samples, patterns
    let ins_base = 0xC0 + order_count;
    let smp_base = ins_base + instrument_count * 4;
    let pat_base = smp_base + sample_count * 4;
    let instrument_ptrs: Vec<usize> =
        (0..instrument_count).map(|i| u32_le(data, ins_base + i * 4) as usize).collect();
    let sample_ptrs: Vec<usize> =
        (0..sample_count).map(|i| u32_le(data, smp_base + i * 4) as usize).collect();
    let pattern_ptrs: Vec<usize> =
        (0..pattern_count).map(|i| u32_le(data, pat_base + i * 4) as usize).collect();

    for ptr in instrument_ptrs {
        song.instruments.push(load_instrument(data, ptr));
    }
    for ptr in sample_ptrs {
        song.samples.push(load_sample(data, ptr));
    }
    for ptr in pattern_ptrs {
        song.patterns.push(load_pattern(data, ptr));
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
        linear = song.linear,
        patterns = song.patterns.len(),
        "loaded IT"
    );
    Ok(song)
}

/// Instrument block: only the 120-pair keyboard table at +0x40 matters
/// here (envelopes are not interpreted).
fn load_instrument(data: &[u8], ptr: usize) -> Instrument {
    let mut sample_map = vec![0u16; 120];
    if ptr != 0 && ptr + 0x140 <= data.len() && &data[ptr..ptr + 4] == b"IMPI" {
        for (note, slot) in sample_map.iter_mut().enumerate() {
            let pair = ptr + 0x40 + note * 2;
            // Second byte of each pair is the 1-based sample number
            *slot = u8_at(data, pair + 1) as u16;
        }
    }
    Instrument { sample_map }
}

/// Sample block (`IMPS`). Compressed samples are skipped; the convert byte
/// selects signed/unsigned and delta decoding.
fn load_sample(data: &[u8], ptr: usize) -> Sample {
    let mut sample = Sample::default();
    if ptr == 0 || ptr + 0x50 > data.len() || &data[ptr..ptr + 4] != b"IMPS" {
        return sample;
    }

    let global_vol = u8_at(data, ptr + 0x11);
    let flags = u8_at(data, ptr + 0x12);
    let volume = u8_at(data, ptr + 0x13);
    sample.name = read_name(data, ptr + 0x14, 26);
    let convert = u8_at(data, ptr + 0x2E);

    // Fold the sample's global volume into its default volume
    sample.volume = if global_vol < 64 {
        ((volume as u32 * global_vol as u32) / 64).min(64) as u8
    } else {
        volume.min(64)
    };

    if flags & 1 == 0 {
        return sample; // header without data
    }
    if flags & 8 != 0 {
        tracing::warn!(name = %sample.name, "compressed IT sample skipped");
        return sample;
    }

    let length = u32_le(data, ptr + 0x30) as usize;
    let loop_begin = u32_le(data, ptr + 0x34) as usize;
    let loop_end = u32_le(data, ptr + 0x38) as usize;
    sample.c5_speed = u32_le(data, ptr + 0x3C).max(256);
    let data_ptr = u32_le(data, ptr + 0x48) as usize;

    let is_16bit = flags & 2 != 0;
    let has_loop = flags & 16 != 0;
    let bytes_per = if is_16bit { 2 } else { 1 };
    let signed = convert & 1 != 0;
    let delta = convert & 4 != 0;

    sample.loop_start = (loop_begin / bytes_per) as u32;
    sample.loop_len = if has_loop && loop_end > loop_begin {
        ((loop_end - loop_begin) / bytes_per) as u32
    } else {
        0
    };

    if length > 0 {
        if data_ptr > 0 && data_ptr + length * bytes_per <= data.len() {
            let raw = &data[data_ptr..data_ptr + length * bytes_per];
            sample.data = match (delta, is_16bit, signed) {
                (true, true, _) => pcm::delta16(raw),
                (true, false, _) => pcm::delta8(raw),
                (false, true, true) => pcm::signed16(raw),
                (false, true, false) => pcm::unsigned16(raw),
                (false, false, true) => pcm::signed8(raw),
                (false, false, false) => pcm::unsigned8(raw),
            };
        } else {
            tracing::warn!(name = %sample.name, "sample data out of range, leaving empty");
        }
    }
    sample
}

/// Pattern block: mask-memory packed rows, up to 200 of them.
fn load_pattern(data: &[u8], ptr: usize) -> Pattern {
    if ptr == 0 || ptr + 8 > data.len() {
        let mut pattern = Pattern::new(64, 64);
        fill_rows(&mut pattern, 0);
        return pattern;
    }
    let packed_len = u16_le(data, ptr) as usize;
    let rows = u16_le(data, ptr + 2).clamp(1, 200);
    let packed = slice_at(data, ptr + 8, packed_len);
    unpack_pattern(packed, rows)
}

fn fill_rows(pattern: &mut Pattern, from_row: u16) {
    for row in from_row..pattern.rows {
        for ch in 0..64 {
            pattern.set_cell(row, ch, IT_EMPTY);
        }
    }
}

/// Each packed entry is a channel byte; bit 7 updates the channel's mask.
/// Mask bits 0..3 read a new note/instrument/volume/effect, bits 4..7 reuse
/// the channel's last value. A zero byte ends the row.
fn unpack_pattern(packed: &[u8], rows: u16) -> Pattern {
    let mut pattern = Pattern::new(rows, 64);
    let mut mask = [0u8; 64];
    let mut last_note = [0xFFu8; 64];
    let mut last_ins = [0u8; 64];
    let mut last_vol = [0xFFu8; 64];
    let mut last_effect = [0u8; 64];
    let mut last_param = [0u8; 64];
    let mut current = [IT_EMPTY; 64];

    let mut i = 0usize;
    let mut row = 0u16;
    while row < rows && i < packed.len() {
        let b = packed[i];
        i += 1;
        if b == 0 {
            for (ch, cell) in current.iter().enumerate() {
                pattern.set_cell(row, ch as u8, *cell);
            }
            current = [IT_EMPTY; 64];
            row += 1;
            continue;
        }
        let ch = ((b - 1) & 63) as usize;
        if b & 128 != 0 && i < packed.len() {
            mask[ch] = packed[i];
            i += 1;
        }
        let m = mask[ch];
        if m & 1 != 0 && i < packed.len() {
            last_note[ch] = packed[i];
            i += 1;
        }
        let note = if m & (1 | 16) != 0 { last_note[ch] } else { 0xFF };
        if m & 2 != 0 && i < packed.len() {
            last_ins[ch] = packed[i];
            i += 1;
        }
        let instrument = if m & (2 | 32) != 0 { last_ins[ch] } else { 0 };
        if m & 4 != 0 && i < packed.len() {
            last_vol[ch] = packed[i];
            i += 1;
        }
        let volume = if m & (4 | 64) != 0 { last_vol[ch] } else { VOL_NONE };
        if m & 8 != 0 && i + 1 < packed.len() {
            last_effect[ch] = packed[i];
            last_param[ch] = packed[i + 1];
            i += 2;
        }
        let (effect, param) = if m & (8 | 128) != 0 {
            (last_effect[ch], last_param[ch])
        } else {
            (0, 0)
        };
        current[ch] = Cell { note: note as u16, instrument, volume, effect, param };
    }
    // Rows the packed data never reached stay empty
    while row < rows {
        for (ch, cell) in current.iter().enumerate() {
            pattern.set_cell(row, ch as u8, *cell);
        }
        current = [IT_EMPTY; 64];
        row += 1;
    }
    pattern
}
