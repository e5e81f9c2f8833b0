//! Per-channel runtime state.

/// Runtime state for one playback channel.
///
/// The sequencer mutates this between tick boundaries; the mixer reads it
/// and advances `pos` at sub-tick granularity. Which of the period fields
/// is live depends on the song's format.
#[derive(Clone, Debug)]
pub struct Track {
    /// Current sample-bank index; 0 = none
    pub sample: usize,
    /// Playback position in sample frames
    pub pos: f64,
    /// Current playback frequency in Hz
    pub freq: f64,
    /// Vibrato base frequency
    pub target_freq: f64,
    /// Amiga period (MOD, XM Amiga mode)
    pub period: i32,
    /// Vibrato base period
    pub base_period: i32,
    /// ST3 period, used by S3M portamento math
    pub s3m_period: i32,
    /// Channel volume (0-64)
    pub volume: u8,
    /// Channel panning (0-255, 128 = center)
    pub pan: u8,
    /// Gate flag; a closed gate contributes silence
    pub gate: bool,
    /// Tone-portamento target: a period or a frequency, format dependent
    pub porta_target: f64,
    /// Tone-portamento speed
    pub porta_speed: u8,
    /// Vibrato phase, masked to 0..63
    pub vib_phase: u8,
    /// Vibrato speed
    pub vib_speed: u8,
    /// Vibrato depth
    pub vib_depth: u8,
    /// Last effect command, for per-tick dispatch
    pub effect: u8,
    /// Last effect parameter
    pub param: u8,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            sample: 0,
            pos: 0.0,
            freq: 0.0,
            target_freq: 0.0,
            period: 0,
            base_period: 0,
            s3m_period: 0,
            volume: 64,
            pan: 128,
            gate: false,
            porta_target: 0.0,
            porta_speed: 0,
            vib_phase: 0,
            vib_speed: 0,
            vib_depth: 0,
            effect: 0,
            param: 0,
        }
    }
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }
}
