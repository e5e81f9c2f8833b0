//! Playback controller for the modplay tracker player.
//!
//! Owns the sequencer behind a mutex, runs the producer thread that fills
//! the block queue, and exposes the control surface the UI drives. The
//! producer thread is the sole mutator of sequencer state while playback
//! runs; the UI reads a packed atomic snapshot instead of taking the lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use mp_audio::{Block, BlockProducer, CpalOutput, BLOCK_FRAMES};
use mp_engine::Sequencer;
use ringbuf::traits::Producer;

pub use mp_audio::AudioError;
pub use mp_ir::Song;

/// How long the producer parks on a full queue before dropping a block.
const FULL_QUEUE_WAIT: Duration = Duration::from_secs(1);

/// Poll interval while paused or while the queue is full.
const POLL_SLEEP: Duration = Duration::from_millis(20);

/// Playback mode for status reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayMode {
    Playing,
    Paused,
    Ended,
}

/// Read-only playback snapshot.
#[derive(Clone, Copy, Debug)]
pub struct Status {
    pub mode: PlayMode,
    pub order: u16,
    pub pattern: u16,
    pub row: u16,
    pub speed: u8,
    pub bpm: u16,
}

#[derive(Clone)]
struct Shared {
    playing: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    snapshot: Arc<AtomicU64>,
}

/// A loaded song plus its playback machinery.
pub struct Player {
    song: Arc<Song>,
    seq: Arc<Mutex<Sequencer>>,
    shared: Shared,
    output: Option<CpalOutput>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    pub fn new(song: Song) -> Self {
        let song = Arc::new(song);
        let seq = Sequencer::new(Arc::clone(&song));
        let shared = Shared {
            playing: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
            snapshot: Arc::new(AtomicU64::new(snapshot_of(&seq))),
        };
        Self {
            song,
            seq: Arc::new(Mutex::new(seq)),
            shared,
            output: None,
            worker: None,
        }
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    /// Begin playback from the current position.
    ///
    /// Device errors surface here and leave the player untouched.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (output, producer) = CpalOutput::open(
            Arc::clone(&self.shared.playing),
            Arc::clone(&self.shared.paused),
        )?;
        self.output = Some(output);

        self.shared.playing.store(true, Ordering::Relaxed);
        self.shared.paused.store(false, Ordering::Relaxed);
        self.shared.ended.store(false, Ordering::Relaxed);
        {
            let mut seq = lock(&self.seq);
            seq.begin();
            self.shared.ended.store(seq.is_ended(), Ordering::Relaxed);
            self.shared.snapshot.store(snapshot_of(&seq), Ordering::Relaxed);
        }

        let seq = Arc::clone(&self.seq);
        let shared = self.shared.clone();
        self.worker = Some(std::thread::spawn(move || {
            producer_loop(&seq, &shared, producer);
        }));
        Ok(())
    }

    /// Stop playback and release the audio stream; safe to call repeatedly.
    pub fn stop(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.output.take();
    }

    /// Flip the paused flag; both producer and callback emit silence while
    /// it is set.
    pub fn toggle_pause(&mut self) {
        self.shared.paused.fetch_xor(true, Ordering::Relaxed);
    }

    /// Reset to order 0, row 0, default speed and tempo. Resumes playback
    /// if it was running; the old queue is discarded with the old stream.
    pub fn restart(&mut self) -> Result<(), AudioError> {
        let was_playing = self.shared.playing.load(Ordering::Relaxed);
        self.stop();
        {
            let mut seq = lock(&self.seq);
            seq.reset();
            self.shared.ended.store(false, Ordering::Relaxed);
            self.shared.snapshot.store(snapshot_of(&seq), Ordering::Relaxed);
        }
        if was_playing {
            self.start()?;
        }
        Ok(())
    }

    /// Read-only snapshot of the playback position.
    pub fn status(&self) -> Status {
        let (order, pattern, row, speed, bpm) =
            unpack_snapshot(self.shared.snapshot.load(Ordering::Relaxed));
        let mode = if self.shared.paused.load(Ordering::Relaxed) {
            PlayMode::Paused
        } else if self.shared.ended.load(Ordering::Relaxed) {
            PlayMode::Ended
        } else {
            PlayMode::Playing
        };
        Status { mode, order, pattern, row, speed, bpm: bpm as u16 }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Relaxed)
            && !self.shared.ended.load(Ordering::Relaxed)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<'a>(seq: &'a Arc<Mutex<Sequencer>>) -> MutexGuard<'a, Sequencer> {
    seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer: generate blocks and push them into the bounded queue, parking
/// briefly on full and giving up on a block after `FULL_QUEUE_WAIT`.
fn producer_loop(seq: &Arc<Mutex<Sequencer>>, shared: &Shared, mut producer: BlockProducer) {
    while shared.playing.load(Ordering::Relaxed) && !shared.ended.load(Ordering::Relaxed) {
        if shared.paused.load(Ordering::Relaxed) {
            std::thread::sleep(POLL_SLEEP);
            continue;
        }

        let mut block: Block = vec![0.0; BLOCK_FRAMES * 2];
        {
            let mut seq = lock(seq);
            seq.gen_block(&mut block);
            shared.snapshot.store(snapshot_of(&seq), Ordering::Relaxed);
            if seq.is_ended() {
                shared.ended.store(true, Ordering::Relaxed);
            }
        }

        let mut waited = Duration::ZERO;
        let mut pending = Some(block);
        while let Some(b) = pending.take() {
            match producer.try_push(b) {
                Ok(()) => {}
                Err(b) => {
                    if waited >= FULL_QUEUE_WAIT || !shared.playing.load(Ordering::Relaxed) {
                        tracing::warn!("block queue full, dropping one block");
                        break;
                    }
                    std::thread::sleep(POLL_SLEEP);
                    waited += POLL_SLEEP;
                    pending = Some(b);
                }
            }
        }
    }
}

/// Pack (order, pattern, row, speed, bpm) into one atomic word.
fn pack_snapshot(order: u16, pattern: u16, row: u16, speed: u8, bpm: u8) -> u64 {
    (order as u64) << 48 | (pattern as u64) << 32 | (row as u64) << 16 | (speed as u64) << 8 | bpm as u64
}

fn unpack_snapshot(word: u64) -> (u16, u16, u16, u8, u8) {
    (
        (word >> 48) as u16,
        (word >> 32) as u16,
        (word >> 16) as u16,
        (word >> 8) as u8,
        word as u8,
    )
}

fn snapshot_of(seq: &Sequencer) -> u64 {
    pack_snapshot(
        seq.order().min(u16::MAX as usize) as u16,
        seq.pattern_index(),
        seq.row(),
        seq.speed().min(255) as u8,
        seq.bpm().min(255) as u8,
    )
}
