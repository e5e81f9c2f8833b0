//! cpal-based output stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use mp_engine::SAMPLE_RATE;
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::{AudioError, Block, BLOCK_FRAMES, QUEUE_BLOCKS};

/// Producer half of the block queue, handed to the generator thread.
pub type BlockProducer = HeapProd<Block>;

/// An open cpal output stream consuming the block queue.
///
/// The stream stays alive as long as this value does; dropping it releases
/// the device.
pub struct CpalOutput {
    _stream: Stream,
}

impl CpalOutput {
    /// Open the default output device at 44.1 kHz stereo f32 and start the
    /// stream. Returns the producer half of the bounded block queue.
    ///
    /// The callback emits silence while `playing` is false or `paused` is
    /// true, and on queue underflow.
    pub fn open(
        playing: Arc<AtomicBool>,
        paused: Arc<AtomicBool>,
    ) -> Result<(Self, BlockProducer), AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let config = StreamConfig {
            channels: 2,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: BufferSize::Fixed(BLOCK_FRAMES as u32),
        };

        let rb = HeapRb::<Block>::new(QUEUE_BLOCKS);
        let (producer, mut consumer) = rb.split();

        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !playing.load(Ordering::Relaxed) || paused.load(Ordering::Relaxed) {
                        out.fill(0.0);
                        return;
                    }
                    write_block(out, consumer.try_pop());
                },
                |err| tracing::error!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::Playback(e.to_string()))?;

        Ok((Self { _stream: stream }, producer))
    }
}

/// One block per callback: copy as many frames as fit, zero-fill the rest.
fn write_block(out: &mut [f32], block: Option<Block>) {
    match block {
        Some(block) => {
            let n = out.len().min(block.len());
            out[..n].copy_from_slice(&block[..n]);
            out[n..].fill(0.0);
        }
        None => out.fill(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Producer;

    #[test]
    fn underflow_is_silence() {
        let mut out = [1.0f32; 8];
        write_block(&mut out, None);
        assert_eq!(out, [0.0; 8]);
    }

    #[test]
    fn short_callback_truncates_block() {
        let mut out = [0.0f32; 4];
        write_block(&mut out, Some(vec![0.5; 8]));
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn short_block_zero_fills_tail() {
        let mut out = [1.0f32; 8];
        write_block(&mut out, Some(vec![0.5; 4]));
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn queue_is_fifo_and_bounded() {
        let rb = HeapRb::<Block>::new(2);
        let (mut prod, mut cons) = rb.split();
        assert!(prod.try_push(vec![1.0]).is_ok());
        assert!(prod.try_push(vec![2.0]).is_ok());
        assert!(prod.try_push(vec![3.0]).is_err(), "queue bounded");
        assert_eq!(cons.try_pop().unwrap()[0], 1.0);
        assert_eq!(cons.try_pop().unwrap()[0], 2.0);
        assert!(cons.try_pop().is_none());
    }
}
