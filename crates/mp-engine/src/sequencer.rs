//! Order/row/tick sequencer and per-format effect interpreter.
//!
//! Tick 0 of a row runs row processing: instrument latch, note trigger or
//! portamento target, volume column, and row effects. Ticks 1..speed-1 run
//! the per-tick effects. Row and order transitions resolve after the last
//! tick of a row. Formats share the advance loop; effect semantics dispatch
//! on the song's format tag.

use alloc::sync::Arc;
use alloc::vec::Vec;

use mp_ir::{Cell, Format, Song, VOL_NONE};

use crate::freq::{
    amiga_freq, it_freq, mod_finetune, s3m_freq, samples_per_tick, xm_amiga, xm_linear, SINE,
    S3M_CLOCK, XM_AMIGA_CLOCK,
};
use crate::mixer::{mix, PanTable};
use crate::track::Track;

/// Amiga LRRL panning applied to MOD channels.
const MOD_PANS: [u8; 4] = [0, 255, 255, 0];

/// Sequencer state: playback cursor plus one `Track` per channel.
pub struct Sequencer {
    song: Arc<Song>,
    tracks: Vec<Track>,
    order: usize,
    row: u16,
    tick: u32,
    /// Output frames already emitted for the current tick
    tick_pos: u32,
    speed: u32,
    bpm: u16,
    samples_per_tick: u32,
    pending_jump: Option<usize>,
    pending_break: Option<u16>,
    loop_row: u16,
    loop_count: u8,
    ended: bool,
    pan: PanTable,
    scratch: Vec<f32>,
}

impl Sequencer {
    pub fn new(song: Arc<Song>) -> Self {
        let mut seq = Self {
            tracks: Vec::new(),
            order: 0,
            row: 0,
            tick: 0,
            tick_pos: 0,
            speed: 6,
            bpm: 125,
            samples_per_tick: samples_per_tick(125),
            pending_jump: None,
            pending_break: None,
            loop_row: 0,
            loop_count: 0,
            ended: false,
            pan: PanTable::new(),
            scratch: Vec::new(),
            song,
        };
        seq.reset();
        seq
    }

    /// Reset to order 0, row 0, song defaults. Tracks are re-initialized and
    /// default panning re-applied.
    pub fn reset(&mut self) {
        self.order = 0;
        self.row = 0;
        self.tick = 0;
        self.tick_pos = 0;
        self.speed = self.song.initial_speed.max(1) as u32;
        self.bpm = self.song.initial_tempo;
        self.samples_per_tick = samples_per_tick(self.bpm);
        self.pending_jump = None;
        self.pending_break = None;
        self.loop_row = 0;
        self.loop_count = 0;
        self.ended = false;
        self.tracks.clear();
        self.tracks
            .resize_with(self.song.num_channels as usize, Track::new);
        self.init_pans();
    }

    fn init_pans(&mut self) {
        if self.song.format == Format::Mod {
            for (i, t) in self.tracks.iter_mut().enumerate() {
                t.pan = MOD_PANS[i % 4];
            }
        }
        // Other formats start centered (Track default); XM/IT move the pan
        // to the sample default when an instrument is latched.
    }

    /// Run row processing for the current row. Call once before the first
    /// `gen_block`; subsequent rows are processed by the advance loop.
    pub fn begin(&mut self) {
        self.process_row();
    }

    // --- accessors ---

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn row(&self) -> u16 {
        self.row
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn samples_per_tick(&self) -> u32 {
        self.samples_per_tick
    }

    /// Pattern index at the current (clamped) order position.
    pub fn pattern_index(&self) -> u16 {
        let last = self.song.orders.len().saturating_sub(1);
        self.song
            .orders
            .get(self.order.min(last))
            .copied()
            .unwrap_or(0)
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    // --- audio generation ---

    /// Generate interleaved stereo frames into `out` (`out.len() / 2`
    /// frames). Tick boundaries are sample-accurate and carry across calls.
    /// After the song has ended the output is all zeros.
    pub fn gen_block(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        if self.ended {
            return;
        }
        let frames = out.len() / 2;
        let song = Arc::clone(&self.song);
        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }

        let mut pos = 0usize;
        while pos < frames {
            let remaining = self.samples_per_tick.saturating_sub(self.tick_pos) as usize;
            let chunk = remaining.min(frames - pos);
            if chunk == 0 {
                self.tick_pos = 0;
                self.advance_tick();
                if self.ended {
                    break;
                }
                continue;
            }
            for ch in 0..self.tracks.len() {
                let track = &mut self.tracks[ch];
                if mix(track, &song, &mut self.scratch[..chunk]) {
                    let (lg, rg) = self.pan.gains(track.pan);
                    for (k, &v) in self.scratch[..chunk].iter().enumerate() {
                        out[2 * (pos + k)] += v * lg;
                        out[2 * (pos + k) + 1] += v * rg;
                    }
                }
            }
            pos += chunk;
            self.tick_pos += chunk as u32;
            if self.tick_pos >= self.samples_per_tick {
                self.tick_pos = 0;
                self.advance_tick();
                if self.ended {
                    break;
                }
            }
        }

        // Bus headroom, then hard clip
        let scale = 1.0 / (self.tracks.len() / 4).max(1) as f32;
        for v in out.iter_mut() {
            *v = (*v * scale).clamp(-1.0, 1.0);
        }
    }

    // --- sequencing ---

    /// Advance one tick: per-tick effects, or row/order transition plus row
    /// processing when the row's last tick has elapsed.
    pub fn advance_tick(&mut self) {
        self.tick += 1;
        if self.tick >= self.speed {
            self.tick = 0;
            self.next_row();
            self.process_row();
        } else {
            self.tick_effects();
        }
    }

    fn next_row(&mut self) {
        let song_len = self.song.orders.len();
        if let Some(jump) = self.pending_jump.take() {
            self.order = jump;
            self.row = self.pending_break.take().unwrap_or(0);
        } else if let Some(brk) = self.pending_break.take() {
            self.row = brk;
            self.order += 1;
        } else {
            self.row += 1;
            if self.order < song_len {
                if let Some(pattern) = self.song.pattern_at(self.order) {
                    if self.row >= pattern.rows {
                        self.row = 0;
                        self.order += 1;
                    }
                }
            }
        }
        // A break row past the end of the target pattern lands on row 0
        if self.order < song_len {
            if let Some(pattern) = self.song.pattern_at(self.order) {
                if self.row >= pattern.rows {
                    self.row = 0;
                }
            }
        }
        if self.order >= song_len {
            self.ended = true;
        }
    }

    fn set_tempo(&mut self, bpm: u16) {
        self.bpm = bpm;
        self.samples_per_tick = samples_per_tick(bpm);
    }

    /// E6x / SBx. Loop state lives on the sequencer, shared by all channels.
    fn pattern_loop(&mut self, count: u8) {
        if count == 0 {
            self.loop_row = self.row;
        } else if self.loop_count == 0 {
            self.loop_count = count;
            self.pending_break = Some(self.loop_row);
            self.pending_jump = Some(self.order);
        } else {
            self.loop_count -= 1;
            if self.loop_count > 0 {
                self.pending_break = Some(self.loop_row);
                self.pending_jump = Some(self.order);
            }
        }
    }

    // --- row processing (tick 0) ---

    fn process_row(&mut self) {
        if self.order >= self.song.orders.len() {
            self.ended = true;
            return;
        }
        let song = Arc::clone(&self.song);
        let Some(pattern) = song.pattern_at(self.order) else {
            self.ended = true;
            return;
        };
        for ch in 0..self.tracks.len() {
            let Some(cell) = pattern.cell(self.row, ch as u8) else {
                continue;
            };
            match song.format {
                Format::Mod => self.row_mod(ch, cell, &song),
                Format::S3m => self.row_s3m(ch, cell, &song),
                Format::Xm => self.row_xm(ch, cell, &song),
                Format::It => self.row_it(ch, cell, &song),
            }
        }
    }

    fn row_mod(&mut self, ch: usize, cell: Cell, song: &Song) {
        let sample_count = song.samples.len();
        {
            let t = &mut self.tracks[ch];
            let snum = cell.instrument as usize;
            if snum > 0 && snum < sample_count {
                t.sample = snum;
                t.volume = song.samples[snum].volume;
            }
        }

        let effect = cell.effect;
        let param = cell.param;
        let is_porta = effect == 0x3 || effect == 0x5;
        let is_delay = effect == 0xE && param >> 4 == 0xD;
        {
            let t = &mut self.tracks[ch];
            let period = cell.note as i32;
            if period != 0 {
                let finetune = song.samples.get(t.sample).map_or(0, |s| s.finetune);
                let adjusted = mod_finetune(period, finetune);
                if is_porta {
                    t.porta_target = adjusted as f64;
                } else if is_delay {
                    // EDx: latch the pitch now, trigger at tick x
                    t.period = adjusted;
                    t.base_period = adjusted;
                } else {
                    trigger_mod(t, adjusted);
                }
            } else if !is_porta {
                t.base_period = t.period;
            }
            t.effect = effect;
            t.param = param;
        }

        match effect {
            0x3 if param != 0 => self.tracks[ch].porta_speed = param,
            0x4 => set_vibrato(&mut self.tracks[ch], param),
            0x9 if param != 0 => self.tracks[ch].pos = param as f64 * 256.0,
            0xB => self.pending_jump = Some(param as usize % song.orders.len()),
            0xC => self.tracks[ch].volume = param.min(64),
            0xD => self.pending_break = Some(break_row(param)),
            0xF => {
                if param != 0 && param < 32 {
                    self.speed = param as u32;
                } else if param >= 32 {
                    self.set_tempo(param as u16);
                }
            }
            0xE => {
                let sub = param >> 4;
                let amount = param & 0xF;
                match sub {
                    0x1 => {
                        let t = &mut self.tracks[ch];
                        t.period = (t.period - amount as i32).max(113);
                        t.base_period = t.period;
                        t.freq = amiga_freq(t.period);
                        t.target_freq = t.freq;
                    }
                    0x2 => {
                        let t = &mut self.tracks[ch];
                        t.period += amount as i32;
                        t.base_period = t.period;
                        t.freq = amiga_freq(t.period);
                        t.target_freq = t.freq;
                    }
                    0x6 => self.pattern_loop(amount),
                    0xA => {
                        let t = &mut self.tracks[ch];
                        t.volume = t.volume.saturating_add(amount).min(64);
                    }
                    0xB => {
                        let t = &mut self.tracks[ch];
                        t.volume = t.volume.saturating_sub(amount);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn row_s3m(&mut self, ch: usize, cell: Cell, song: &Song) {
        let sample_count = song.samples.len();
        {
            let t = &mut self.tracks[ch];
            let ins = cell.instrument as usize;
            if ins > 0 && ins < sample_count {
                t.sample = ins;
                t.volume = song.samples[ins].volume;
            }

            let note = cell.note;
            if note == 254 {
                // ^^ = note cut
                t.gate = false;
            } else if note != 0 && note != 255 {
                let c5 = song.samples.get(t.sample).map_or(8363, |s| s.c5_speed);
                let freq = s3m_freq(note, c5);
                if freq > 0.0 {
                    if cell.effect == 7 {
                        // Gxx: set the target period, never retrigger
                        t.porta_target = (S3M_CLOCK / freq) as i32 as f64;
                        if t.s3m_period == 0 {
                            t.s3m_period = if t.freq > 0.0 {
                                (S3M_CLOCK / t.freq) as i32
                            } else {
                                t.porta_target as i32
                            };
                        }
                    } else {
                        trigger(t, song, freq);
                    }
                }
            }
            if cell.volume != VOL_NONE {
                t.volume = cell.volume.min(64);
            }
            t.effect = cell.effect;
            t.param = cell.param;
        }

        let param = cell.param;
        match cell.effect {
            1 => self.speed = param.max(1) as u32, // Axx
            2 => self.pending_jump = Some(param as usize % song.orders.len()), // Bxx
            3 => self.pending_break = Some(break_row(param)), // Cxx
            4 => {
                // Dxy: only the fine variants act on tick 0
                let t = &mut self.tracks[ch];
                let hi = param >> 4;
                let lo = param & 0xF;
                if param >= 0xF0 {
                    t.volume = t.volume.saturating_sub(lo); // DFx
                } else if lo == 0xF {
                    t.volume = t.volume.saturating_add(hi).min(64); // DxF
                }
            }
            5 if param != 0 => {
                // Exx porta down: EFx extra fine (1/4 unit), EEx fine
                let t = &mut self.tracks[ch];
                if param & 0xF0 == 0xF0 {
                    t.s3m_period += (param & 0xF) as i32;
                    s3m_apply_period(t);
                } else if param & 0xF0 == 0xE0 {
                    t.s3m_period += ((param & 0xF) as i32) * 4;
                    s3m_apply_period(t);
                }
            }
            6 if param != 0 => {
                // Fxx porta up
                let t = &mut self.tracks[ch];
                if param & 0xF0 == 0xF0 {
                    t.s3m_period = (t.s3m_period - (param & 0xF) as i32).max(1);
                    s3m_apply_period(t);
                } else if param & 0xF0 == 0xE0 {
                    t.s3m_period = (t.s3m_period - ((param & 0xF) as i32) * 4).max(1);
                    s3m_apply_period(t);
                }
            }
            7 if param != 0 => self.tracks[ch].porta_speed = param, // Gxx memory
            8 => set_vibrato(&mut self.tracks[ch], param),          // Hxy
            19 => {
                // SBx pattern loop; SCx note cut runs per tick
                if param >> 4 == 0xB {
                    self.pattern_loop(param & 0xF);
                }
            }
            20 => self.set_tempo((param as u16).max(32)), // Txx
            _ => {}
        }
    }

    fn row_xm(&mut self, ch: usize, cell: Cell, song: &Song) {
        let sample_count = song.samples.len();
        let note = cell.note;
        {
            // Resolve instrument to a sample through the note map
            let t = &mut self.tracks[ch];
            let ins = cell.instrument as usize;
            if ins >= 1 && ins <= song.instruments.len() {
                let map = &song.instruments[ins - 1].sample_map;
                let idx = if (1..=96).contains(&note) {
                    note as usize - 1
                } else if t.sample > 0 {
                    t.sample - 1
                } else {
                    0
                };
                let sidx = map.get(idx.min(95)).copied().unwrap_or(0) as usize;
                if sidx > 0 && sidx < sample_count {
                    t.sample = sidx;
                    t.volume = song.samples[sidx].volume;
                    t.pan = song.samples[sidx].pan;
                }
            } else if ins > 0 && ins < sample_count {
                t.sample = ins;
                t.volume = song.samples[ins].volume;
                t.pan = song.samples[ins].pan;
            }
        }

        let effect = cell.effect;
        let param = cell.param;
        let is_porta = effect == 0x3 || effect == 0x5;
        let is_delay = effect == 0xE && param >> 4 == 0xD;
        {
            let t = &mut self.tracks[ch];
            if (1..=96).contains(&note) {
                let freq = note_freq_xm(song, note as i32, t.sample);
                if freq > 0.0 {
                    if is_porta {
                        t.porta_target = xm_porta_target(song, freq);
                    } else if is_delay {
                        // EDx: latch the pitch now, trigger at tick x
                        t.target_freq = freq;
                        if !song.linear {
                            t.period = (XM_AMIGA_CLOCK / freq) as i32;
                            t.base_period = t.period;
                        }
                    } else {
                        trigger(t, song, freq);
                    }
                }
            } else if note == 97 {
                // Key-off: envelopes are unmodeled, gate off immediately
                t.gate = false;
            }

            // Volume column
            let vol = cell.volume;
            match vol {
                0x10..=0x50 => t.volume = vol - 0x10,
                0x60..=0x6F => t.volume = t.volume.saturating_sub(vol & 0xF),
                0x70..=0x7F => t.volume = t.volume.saturating_add(vol & 0xF).min(64),
                0x80..=0x8F => t.volume = t.volume.saturating_sub(vol & 0xF),
                0x90..=0x9F => t.volume = t.volume.saturating_add(vol & 0xF).min(64),
                0xA0..=0xAF => t.vib_speed = vol & 0xF,
                0xC0..=0xCF => t.pan = ((vol & 0xF) << 4) | (vol & 0xF),
                0xF0..=0xFF => {
                    // Volume-column tone porta targets only when the cell
                    // carries a note
                    if (1..=96).contains(&note) {
                        let target = note_freq_xm(song, note as i32, t.sample);
                        if target > 0.0 {
                            t.porta_target = xm_porta_target(song, target);
                            if param != 0 {
                                t.porta_speed = param;
                            }
                        }
                    }
                }
                _ => {}
            }
            t.effect = effect;
            t.param = param;
        }

        match effect {
            0x3 if param != 0 => self.tracks[ch].porta_speed = param,
            0x4 => set_vibrato(&mut self.tracks[ch], param),
            0x9 if param != 0 => self.tracks[ch].pos = param as f64 * 256.0,
            0xB => self.pending_jump = Some(param as usize % song.orders.len()),
            0xC => self.tracks[ch].volume = param.min(64),
            0xD => self.pending_break = Some(break_row(param)),
            0xF => {
                if param != 0 && param < 32 {
                    self.speed = param as u32;
                } else if param >= 32 {
                    self.set_tempo(param as u16);
                }
            }
            0xE => {
                let sub = param >> 4;
                let amount = param & 0xF;
                match sub {
                    0x1 => {
                        let t = &mut self.tracks[ch];
                        if song.linear {
                            t.freq *= libm::exp2(amount as f64 / 768.0);
                            t.target_freq = t.freq;
                        } else {
                            t.period = (t.period - amount as i32).max(1);
                            t.base_period = t.period;
                            t.freq = XM_AMIGA_CLOCK / t.period as f64;
                            t.target_freq = t.freq;
                        }
                    }
                    0x2 => {
                        let t = &mut self.tracks[ch];
                        if song.linear {
                            t.freq *= libm::exp2(-(amount as f64) / 768.0);
                            t.target_freq = t.freq;
                        } else {
                            t.period += amount as i32;
                            t.base_period = t.period;
                            t.freq = XM_AMIGA_CLOCK / t.period as f64;
                            t.target_freq = t.freq;
                        }
                    }
                    0x6 => self.pattern_loop(amount),
                    0xA => {
                        let t = &mut self.tracks[ch];
                        t.volume = t.volume.saturating_add(amount).min(64);
                    }
                    0xB => {
                        let t = &mut self.tracks[ch];
                        t.volume = t.volume.saturating_sub(amount);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn row_it(&mut self, ch: usize, cell: Cell, song: &Song) {
        let sample_count = song.samples.len();
        let note = cell.note;
        {
            let t = &mut self.tracks[ch];
            let ins = cell.instrument as usize;
            if ins > 0 {
                if ins <= song.instruments.len() {
                    // Instrument mode: keyboard table maps note -> sample
                    let sidx = if note != 0xFF && note <= 119 {
                        song.instruments[ins - 1]
                            .sample_map
                            .get(note as usize)
                            .copied()
                            .unwrap_or(0) as usize
                    } else {
                        t.sample
                    };
                    if sidx > 0 && sidx < sample_count {
                        t.sample = sidx;
                        t.volume = song.samples[sidx].volume;
                    }
                } else if ins < sample_count {
                    // Sample mode
                    t.sample = ins;
                    t.volume = song.samples[ins].volume;
                }
            }

            if note <= 119 {
                let c5 = song.samples.get(t.sample).map_or(8363, |s| s.c5_speed);
                let freq = it_freq(note, c5);
                if freq > 0.0 {
                    if cell.effect == 7 {
                        t.porta_target = freq;
                    } else {
                        trigger(t, song, freq);
                    }
                }
            } else if note == 254 {
                t.gate = false;
            }
            // note 255 = note off: envelopes unmodeled, nothing to do

            let vol = cell.volume;
            if vol != VOL_NONE {
                if vol <= 64 {
                    t.volume = vol;
                } else if (65..=74).contains(&vol) {
                    t.volume = t.volume.saturating_add(vol - 65).min(64);
                } else if (75..=84).contains(&vol) {
                    t.volume = t.volume.saturating_sub(vol - 75);
                }
            }
            t.effect = cell.effect;
            t.param = cell.param;
        }

        let param = cell.param;
        match cell.effect {
            1 => self.speed = param.max(1) as u32, // Axx
            2 => self.pending_jump = Some(param as usize % song.orders.len()), // Bxx
            3 => self.pending_break = Some(break_row(param)), // Cxx
            4 => {
                let t = &mut self.tracks[ch];
                let hi = param >> 4;
                let lo = param & 0xF;
                if param >= 0xF0 {
                    t.volume = t.volume.saturating_sub(lo);
                } else if lo == 0xF {
                    t.volume = t.volume.saturating_add(hi).min(64);
                }
            }
            5 if param != 0 && song.linear => {
                // Exx porta down, fine variants; no-op on Amiga-slide songs
                let t = &mut self.tracks[ch];
                if param & 0xF0 == 0xF0 {
                    t.freq *= libm::exp2(-((param & 0xF) as f64) / 768.0);
                    t.target_freq = t.freq;
                } else if param & 0xF0 == 0xE0 {
                    t.freq *= libm::exp2(-((param & 0xF) as f64) * 4.0 / 768.0);
                    t.target_freq = t.freq;
                }
            }
            6 if param != 0 && song.linear => {
                let t = &mut self.tracks[ch];
                if param & 0xF0 == 0xF0 {
                    t.freq *= libm::exp2((param & 0xF) as f64 / 768.0);
                    t.target_freq = t.freq;
                } else if param & 0xF0 == 0xE0 {
                    t.freq *= libm::exp2((param & 0xF) as f64 * 4.0 / 768.0);
                    t.target_freq = t.freq;
                }
            }
            7 if param != 0 => self.tracks[ch].porta_speed = param, // Gxx memory
            8 => set_vibrato(&mut self.tracks[ch], param),          // Hxy
            15 if param != 0 => self.tracks[ch].pos = param as f64 * 256.0, // Oxx
            19 => {
                if param >> 4 == 0xB {
                    self.pattern_loop(param & 0xF);
                }
            }
            20 => self.set_tempo((param as u16).max(32)), // Txx
            _ => {}
        }
    }

    // --- per-tick effects (ticks 1..speed-1) ---

    fn tick_effects(&mut self) {
        let tick = self.tick;
        let format = self.song.format;
        let linear = self.song.linear;
        for t in &mut self.tracks {
            let effect = t.effect;
            let param = t.param;
            match format {
                Format::Mod => tick_mod(t, effect, param, tick),
                Format::S3m => tick_s3m(t, effect, param, tick),
                Format::Xm => tick_xm(t, effect, param, tick, linear),
                Format::It => tick_it(t, effect, param, tick, linear),
            }
        }
    }
}

/// Dxx-style break target: the parameter is BCD (tens nibble, ones nibble).
fn break_row(param: u8) -> u16 {
    (param >> 4) as u16 * 10 + (param & 0xF) as u16
}

/// Hxy-style vibrato parameter: nonzero nibbles update the memory.
fn set_vibrato(t: &mut Track, param: u8) {
    if param >> 4 != 0 {
        t.vib_speed = param >> 4;
    }
    if param & 0xF != 0 {
        t.vib_depth = param & 0xF;
    }
}

/// MOD note trigger: set the period and restart the sample.
fn trigger_mod(t: &mut Track, period: i32) {
    t.period = period;
    t.base_period = period;
    t.freq = amiga_freq(period);
    t.target_freq = t.freq;
    t.pos = 0.0;
    t.vib_phase = 0;
    t.gate = true;
}

/// Non-MOD note trigger: set the frequency, restart the sample, and seed the
/// format's period state for portamento math.
fn trigger(t: &mut Track, song: &Song, freq: f64) {
    t.freq = freq;
    t.target_freq = freq;
    t.pos = 0.0;
    t.vib_phase = 0;
    t.gate = true;
    match song.format {
        Format::S3m if freq > 0.0 => {
            t.s3m_period = (S3M_CLOCK / freq) as i32;
        }
        Format::Xm | Format::It if !song.linear && freq > 0.0 => {
            t.period = (XM_AMIGA_CLOCK / freq) as i32;
            t.base_period = t.period;
        }
        _ => {}
    }
}

/// Recompute frequency after an S3M period change.
fn s3m_apply_period(t: &mut Track) {
    if t.s3m_period != 0 {
        t.freq = S3M_CLOCK / t.s3m_period as f64;
        t.target_freq = t.freq;
    }
}

/// XM note frequency through the sample's finetune and relative note.
fn note_freq_xm(song: &Song, note: i32, sample: usize) -> f64 {
    let (finetune, relative) = song
        .samples
        .get(sample)
        .map_or((0, 0), |s| (s.finetune, s.relative_note));
    if song.linear {
        xm_linear(note, finetune, relative)
    } else {
        xm_amiga(note, finetune, relative)
    }
}

/// XM tone-porta target: a frequency on linear songs, a period otherwise.
fn xm_porta_target(song: &Song, freq: f64) -> f64 {
    if song.linear {
        freq
    } else {
        (XM_AMIGA_CLOCK / freq) as i32 as f64
    }
}

/// Dxy per-tick slide: add the high nibble if set, else subtract the low.
fn volume_slide(t: &mut Track, param: u8) {
    let hi = param >> 4;
    let lo = param & 0xF;
    if hi != 0 {
        t.volume = t.volume.saturating_add(hi).min(64);
    } else {
        t.volume = t.volume.saturating_sub(lo);
    }
}

fn tick_mod(t: &mut Track, effect: u8, param: u8, tick: u32) {
    match effect {
        0x0 if param != 0 => {
            // Arpeggio: base, +x, +y semitones, cycling every three ticks
            let shifts = [0i32, (param >> 4) as i32, (param & 0xF) as i32];
            if t.period != 0 {
                let semis = shifts[(tick % 3) as usize];
                t.freq = amiga_freq(t.period) * libm::exp2(semis as f64 / 12.0);
            }
        }
        0x1 => {
            t.period = (t.period - param as i32).max(113);
            t.base_period = t.period;
            t.freq = amiga_freq(t.period);
            t.target_freq = t.freq;
        }
        0x2 => {
            t.period += param as i32;
            t.base_period = t.period;
            t.freq = amiga_freq(t.period);
            t.target_freq = t.freq;
        }
        0x3 | 0x5 => {
            if t.porta_target != 0.0 && t.porta_speed != 0 {
                let target = t.porta_target as i32;
                let speed = t.porta_speed as i32;
                if t.period < target {
                    t.period = (t.period + speed).min(target);
                } else if t.period > target {
                    t.period = (t.period - speed).max(target);
                }
                t.freq = amiga_freq(t.period);
            }
            if effect == 0x5 {
                volume_slide(t, param);
            }
        }
        0x4 | 0x6 => {
            let vib = (SINE[(t.vib_phase & 63) as usize] * t.vib_depth as i32) >> 7;
            t.freq = amiga_freq((t.base_period - vib).max(1));
            t.vib_phase = t.vib_phase.wrapping_add(t.vib_speed) & 63;
            if effect == 0x6 {
                volume_slide(t, param);
            }
        }
        0xA => volume_slide(t, param),
        0xE => {
            let sub = param >> 4;
            let amount = (param & 0xF) as u32;
            if sub == 0xC && tick == amount {
                t.volume = 0;
            } else if sub == 0xD && tick == amount {
                // Deferred trigger
                if t.period != 0 {
                    t.freq = amiga_freq(t.period);
                }
                t.pos = 0.0;
                t.gate = t.sample != 0;
            }
        }
        _ => {}
    }
}

fn tick_s3m(t: &mut Track, effect: u8, param: u8, tick: u32) {
    match effect {
        4 => {
            // Dxy: normal slide only; fine variants ran on tick 0
            if param < 0xF0 && param & 0xF != 0xF {
                volume_slide(t, param);
            }
        }
        5 if param < 0xE0 => {
            t.s3m_period += param as i32 * 4;
            s3m_apply_period(t);
        }
        6 if param < 0xE0 => {
            t.s3m_period = (t.s3m_period - param as i32 * 4).max(1);
            s3m_apply_period(t);
        }
        7 => {
            if t.porta_speed != 0 && t.s3m_period != 0 && t.porta_target != 0.0 {
                let target = t.porta_target as i32;
                let step = t.porta_speed as i32 * 4;
                if t.s3m_period < target {
                    t.s3m_period = (t.s3m_period + step).min(target);
                } else if t.s3m_period > target {
                    t.s3m_period = (t.s3m_period - step).max(target);
                }
                s3m_apply_period(t);
            }
        }
        8 => {
            let vib = (SINE[(t.vib_phase & 63) as usize] * t.vib_depth as i32) >> 7;
            if t.s3m_period != 0 {
                t.freq = S3M_CLOCK / (t.s3m_period - vib).max(1) as f64;
            }
            t.vib_phase = t.vib_phase.wrapping_add(t.vib_speed) & 63;
        }
        19 => {
            // SCx note cut
            if param >> 4 == 0xC && tick == (param & 0xF) as u32 {
                t.volume = 0;
            }
        }
        _ => {}
    }
}

fn tick_xm(t: &mut Track, effect: u8, param: u8, tick: u32, linear: bool) {
    match effect {
        0x0 if param != 0 => {
            let shifts = [0i32, (param >> 4) as i32, (param & 0xF) as i32];
            if t.target_freq > 0.0 {
                let semis = shifts[(tick % 3) as usize];
                t.freq = t.target_freq * libm::exp2(semis as f64 / 12.0);
            }
        }
        0x1 => {
            if linear {
                t.freq *= libm::exp2(param as f64 / 768.0);
                t.target_freq = t.freq;
            } else {
                t.period = (t.period - param as i32).max(1);
                t.base_period = t.period;
                t.freq = XM_AMIGA_CLOCK / t.period as f64;
                t.target_freq = t.freq;
            }
        }
        0x2 => {
            if linear {
                t.freq *= libm::exp2(-(param as f64) / 768.0);
                t.target_freq = t.freq;
            } else {
                t.period += param as i32;
                t.base_period = t.period;
                t.freq = XM_AMIGA_CLOCK / t.period as f64;
                t.target_freq = t.freq;
            }
        }
        0x3 | 0x5 => {
            if t.porta_speed != 0 && t.porta_target != 0.0 {
                if linear {
                    let target = t.porta_target;
                    let step = target * (libm::exp2(t.porta_speed as f64 / 768.0) - 1.0);
                    if t.freq < target {
                        t.freq = (t.freq + step).min(target);
                    } else if t.freq > target {
                        t.freq = (t.freq - step).max(target);
                    }
                } else {
                    let target = t.porta_target as i32;
                    let speed = t.porta_speed as i32;
                    if t.period < target {
                        t.period = (t.period + speed).min(target);
                    } else if t.period > target {
                        t.period = (t.period - speed).max(target);
                    }
                    t.freq = XM_AMIGA_CLOCK / t.period.max(1) as f64;
                }
            }
            if effect == 0x5 {
                volume_slide(t, param);
            }
        }
        0x4 | 0x6 => {
            let vib = (SINE[(t.vib_phase & 63) as usize] * t.vib_depth as i32) >> 7;
            if linear {
                t.freq = t.target_freq * libm::exp2(vib as f64 / 1536.0);
            } else if t.base_period != 0 {
                t.freq = XM_AMIGA_CLOCK / (t.base_period - vib).max(1) as f64;
            }
            t.vib_phase = t.vib_phase.wrapping_add(t.vib_speed) & 63;
            if effect == 0x6 {
                volume_slide(t, param);
            }
        }
        0xA => volume_slide(t, param),
        0xE => {
            let sub = param >> 4;
            let amount = (param & 0xF) as u32;
            if sub == 0xC && tick == amount {
                t.volume = 0;
            } else if sub == 0xD && tick == amount {
                t.pos = 0.0;
                t.freq = t.target_freq;
                t.gate = t.sample != 0;
            }
        }
        _ => {}
    }
}

fn tick_it(t: &mut Track, effect: u8, param: u8, tick: u32, linear: bool) {
    match effect {
        4 => {
            if param < 0xF0 && param & 0xF != 0xF {
                volume_slide(t, param);
            }
        }
        5 if param < 0xE0 && linear => {
            t.freq *= libm::exp2(-(param as f64) * 4.0 / 768.0);
            t.target_freq = t.freq;
        }
        6 if param < 0xE0 && linear => {
            t.freq *= libm::exp2(param as f64 * 4.0 / 768.0);
            t.target_freq = t.freq;
        }
        7 => {
            if t.porta_speed != 0 && t.porta_target != 0.0 {
                let target = t.porta_target;
                let step = target * (libm::exp2(t.porta_speed as f64 * 4.0 / 768.0) - 1.0);
                if t.freq < target {
                    t.freq = (t.freq + step).min(target);
                } else if t.freq > target {
                    t.freq = (t.freq - step).max(target);
                }
            }
        }
        8 => {
            let vib = (SINE[(t.vib_phase & 63) as usize] * t.vib_depth as i32) >> 7;
            t.freq = t.target_freq * libm::exp2(vib as f64 / 1536.0);
            t.vib_phase = t.vib_phase.wrapping_add(t.vib_speed) & 63;
        }
        19 => {
            if param >> 4 == 0xC && tick == (param & 0xF) as u32 {
                t.volume = 0;
            }
        }
        _ => {}
    }
}
