//! End-to-end playback tests: synthetic module images are built in memory,
//! run through the loaders, and driven through the sequencer.

use std::sync::Arc;

use mp_engine::Sequencer;
use mp_formats::{load_it, load_mod, load_s3m, load_xm};

fn sequencer(song: mp_ir::Song) -> Sequencer {
    let mut seq = Sequencer::new(Arc::new(song));
    seq.begin();
    seq
}

fn left_rms(interleaved: &[f32]) -> f64 {
    let squares: f64 = interleaved
        .chunks_exact(2)
        .map(|f| (f[0] as f64) * (f[0] as f64))
        .sum();
    (squares / (interleaved.len() / 2) as f64).sqrt()
}

// --- synthetic module builders ---

/// 4-channel M.K. MOD: one pattern, one sample, cells as
/// (row, channel, period, sample, effect, param).
fn build_mod(cells: &[(u16, u8, u16, u8, u8, u8)], sample: &[i8]) -> Vec<u8> {
    let mut d = vec![0u8; 1084 + 64 * 4 * 4 + sample.len()];
    d[..8].copy_from_slice(b"scenario");
    // Sample 1: full volume, no loop
    d[20..24].copy_from_slice(b"ramp");
    d[42..44].copy_from_slice(&((sample.len() / 2) as u16).to_be_bytes());
    d[45] = 64;
    d[950] = 1;
    d[952] = 0;
    d[1080..1084].copy_from_slice(b"M.K.");
    for &(row, ch, period, snum, effect, param) in cells {
        let off = 1084 + (row as usize * 4 + ch as usize) * 4;
        d[off] = (snum & 0xF0) | ((period >> 8) as u8 & 0xF);
        d[off + 1] = period as u8;
        d[off + 2] = ((snum & 0x0F) << 4) | (effect & 0xF);
        d[off + 3] = param;
    }
    let base = 1084 + 64 * 4 * 4;
    for (i, &v) in sample.iter().enumerate() {
        d[base + i] = v as u8;
    }
    d
}

/// 1-channel S3M with the given initial speed and one packed effect cell
/// on channel 0, row 0.
fn build_s3m(speed: u8, effect: u8, param: u8) -> Vec<u8> {
    let mut d = vec![0u8; 0x100];
    d[..4].copy_from_slice(b"s3m!");
    d[0x20..0x22].copy_from_slice(&1u16.to_le_bytes()); // orders
    d[0x24..0x26].copy_from_slice(&1u16.to_le_bytes()); // patterns
    d[0x2A..0x2C].copy_from_slice(&2u16.to_le_bytes());
    d[0x31] = speed;
    d[0x32] = 125;
    d[0x60] = 0;
    // No samples: pattern parapointer table starts right after the orders
    d[0x61..0x63].copy_from_slice(&(0x70u16 / 16).to_le_bytes());
    let packed = [0x80u8, effect, param, 0];
    d[0x70..0x72].copy_from_slice(&((packed.len() + 2) as u16).to_le_bytes());
    d[0x72..0x72 + packed.len()].copy_from_slice(&packed);
    d
}

/// 1-channel linear XM: a single row holding `note` with instrument 1,
/// whose only sample has the given relative-note offset.
fn build_xm(note: u8, relative: i8) -> Vec<u8> {
    const HEADER_SIZE: usize = 276;
    let mut d = vec![0u8; 60 + HEADER_SIZE];
    d[..17].copy_from_slice(b"Extended Module: ");
    d[60..64].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    d[64..66].copy_from_slice(&1u16.to_le_bytes());
    d[68..70].copy_from_slice(&1u16.to_le_bytes());
    d[70..72].copy_from_slice(&1u16.to_le_bytes());
    d[72..74].copy_from_slice(&1u16.to_le_bytes());
    d[74..76].copy_from_slice(&1u16.to_le_bytes()); // linear
    d[76..78].copy_from_slice(&6u16.to_le_bytes());
    d[78..80].copy_from_slice(&125u16.to_le_bytes());
    d[80] = 0;

    let packed = [0x80u8 | 1 | 2, note, 1];
    let mut pat = vec![0u8; 9];
    pat[0..4].copy_from_slice(&9u32.to_le_bytes());
    pat[5..7].copy_from_slice(&1u16.to_le_bytes());
    pat[7..9].copy_from_slice(&(packed.len() as u16).to_le_bytes());
    d.extend_from_slice(&pat);
    d.extend_from_slice(&packed);

    let inst_size = 33 + 96;
    let mut inst = vec![0u8; inst_size];
    inst[0..4].copy_from_slice(&(inst_size as u32).to_le_bytes());
    inst[27..29].copy_from_slice(&1u16.to_le_bytes());
    d.extend_from_slice(&inst);

    let deltas = [64u8, 0, 0, 0];
    let mut sh = vec![0u8; 40];
    sh[0..4].copy_from_slice(&(deltas.len() as u32).to_le_bytes());
    sh[12] = 64;
    sh[16] = relative as u8;
    d.extend_from_slice(&sh);
    d.extend_from_slice(&deltas);
    d
}

/// IT with a single 1-row pattern holding one effect cell on channel 0.
fn build_it(effect: u8, param: u8) -> Vec<u8> {
    let pat_ptr = 0x100usize;
    let mut d = vec![0u8; 0x140];
    d[0..4].copy_from_slice(b"IMPM");
    d[4..8].copy_from_slice(b"loop");
    d[0x20..0x22].copy_from_slice(&1u16.to_le_bytes()); // orders
    d[0x26..0x28].copy_from_slice(&1u16.to_le_bytes()); // patterns
    d[0x2C..0x2E].copy_from_slice(&8u16.to_le_bytes()); // linear
    d[0x32] = 6;
    d[0x33] = 125;
    d[0xC0] = 0;
    // Pattern pointer table follows the single order byte
    d[0xC1..0xC5].copy_from_slice(&(pat_ptr as u32).to_le_bytes());

    let packed = [0x81u8, 8, effect, param, 0];
    d[pat_ptr..pat_ptr + 2].copy_from_slice(&(packed.len() as u16).to_le_bytes());
    d[pat_ptr + 2..pat_ptr + 4].copy_from_slice(&1u16.to_le_bytes()); // rows
    d[pat_ptr + 8..pat_ptr + 8 + packed.len()].copy_from_slice(&packed);
    d
}

// --- scenarios ---

/// One C-2 note (period 428) on a 64-frame ramp: the sample runs out well
/// within the first row, gating the channel off, and the output is audible.
#[test]
fn mod_note_plays_out_and_gates_off() {
    let ramp: Vec<i8> = (0..64).map(|i| (i * 4 - 128) as i8).collect();
    let song = load_mod(&build_mod(&[(0, 0, 428, 1, 0, 0)], &ramp)).unwrap();
    let mut seq = sequencer(song);
    assert_eq!(seq.samples_per_tick(), 882);

    let mut out = vec![0.0f32; 1764 * 2];
    seq.gen_block(&mut out);

    assert!(!seq.track(0).unwrap().gate, "sample ended, gate closed");
    assert!(left_rms(&out) > 0.0, "left channel carried audio");
}

/// S3M Axx on the first row: speed 1 becomes 3 before the next row plays.
#[test]
fn s3m_speed_effect_reaches_sequencer() {
    let song = load_s3m(&build_s3m(1, 1, 3)).unwrap();
    let mut seq = sequencer(song);
    assert_eq!(seq.speed(), 3);

    // The following rows now take three ticks each
    seq.advance_tick();
    seq.advance_tick();
    assert_eq!(seq.row(), 0);
    seq.advance_tick();
    assert_eq!(seq.row(), 1);
}

/// XM linear C-5 with a +12 relative note lands on 16726 Hz.
#[test]
fn xm_relative_note_doubles_c5() {
    let song = load_xm(&build_xm(61, 12)).unwrap();
    let seq = sequencer(song);
    let freq = seq.track(0).unwrap().freq;
    assert!((freq - 16726.0).abs() < 1.0, "got {} Hz", freq);
}

/// IT Bxx jumping back to order 0 cycles forever.
#[test]
fn it_jump_loop_never_ends() {
    let song = load_it(&build_it(2, 0)).unwrap();
    let mut seq = sequencer(song);
    for _ in 0..1000 {
        seq.advance_tick();
    }
    assert!(!seq.is_ended());
    assert_eq!(seq.order(), 0);
}

/// MOD pattern loop: E60 at row 4 and E62 at row 8 play rows 4..8 three
/// times in total before the pattern proceeds.
#[test]
fn mod_pattern_loop_runs_three_passes() {
    let cells = [
        (0u16, 1u8, 0u16, 0u8, 0xFu8, 0x01u8), // F01: one tick per row
        (4, 0, 0, 0, 0xE, 0x60),
        (8, 0, 0, 0, 0xE, 0x62),
    ];
    let song = load_mod(&build_mod(&cells, &[])).unwrap();
    let mut seq = sequencer(song);

    let mut visits = [0u32; 64];
    visits[seq.row() as usize] += 1;
    for _ in 0..200 {
        seq.advance_tick();
        if seq.is_ended() {
            break;
        }
        visits[seq.row() as usize] += 1;
    }
    for row in 4..=8 {
        assert_eq!(visits[row], 3, "row {}", row);
    }
    assert_eq!(visits[3], 1);
    assert_eq!(visits[9], 1);
}

/// Restart determinism: a reset sequencer reproduces the same stream.
#[test]
fn restart_replays_the_same_frames() {
    let ramp: Vec<i8> = (0..64).map(|i| (i * 4 - 128) as i8).collect();
    let cells = [
        (0u16, 0u8, 428u16, 1u8, 0u8, 0u8),
        (2, 0, 214, 0, 0x3, 8), // tone porta up
        (4, 0, 428, 1, 0x4, 0x46), // vibrato
    ];
    let data = build_mod(&cells, &ramp);
    let song = load_mod(&data).unwrap();
    let mut seq = sequencer(song);

    let render = |seq: &mut Sequencer| {
        let mut all = Vec::new();
        let mut block = vec![0.0f32; 2048];
        // Enough blocks to run through the porta and vibrato rows
        for _ in 0..24 {
            seq.gen_block(&mut block);
            all.extend_from_slice(&block);
        }
        all
    };

    let first = render(&mut seq);
    seq.reset();
    seq.begin();
    let second = render(&mut seq);
    assert_eq!(first, second);
}

/// A full run of a short module stays in range and eventually ends.
#[test]
fn full_playback_stays_clipped_and_terminates() {
    let ramp: Vec<i8> = (0..64).map(|i| (i * 4 - 128) as i8).collect();
    let song = load_mod(&build_mod(&[(0, 0, 428, 1, 0, 0)], &ramp)).unwrap();
    let mut seq = sequencer(song);

    let mut block = vec![0.0f32; 4096];
    let mut nonzero = false;
    // 64 rows * 6 ticks * 882 frames, with margin
    for _ in 0..200 {
        seq.gen_block(&mut block);
        nonzero |= block.iter().any(|&v| v != 0.0);
        assert!(block.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        if seq.is_ended() {
            break;
        }
    }
    assert!(seq.is_ended());
    assert!(nonzero);
}

/// An S3M whose order list is empty ends before producing anything.
#[test]
fn empty_order_list_ends_immediately() {
    let mut data = build_s3m(6, 0, 0);
    data[0x20] = 0; // no orders
    let song = load_s3m(&data).unwrap();
    let seq = sequencer(song);
    assert!(seq.is_ended());
}
