//! PCM decoding of raw audio frames.
//!
//! The generative backend streams fixed-format PCM: interleaved 16-bit
//! little-endian samples at a fixed rate and channel count. Decoding is a
//! direct integer -> float conversion, de-interleaved per channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty audio frame")]
    Empty,
    #[error("frame length {len} is not a whole number of {channels}-channel i16 sample frames")]
    Misaligned { len: usize, channels: u16 },
}

/// A decoded audio frame, consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// De-interleaved samples, one Vec per channel, in [-1, 1].
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

impl AudioFrame {
    /// Decode interleaved i16-LE PCM bytes.
    pub fn decode_pcm(bytes: &[u8], sample_rate: u32, channel_count: u16) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let frame_bytes = 2 * channel_count as usize;
        if bytes.len() % frame_bytes != 0 {
            return Err(DecodeError::Misaligned {
                len: bytes.len(),
                channels: channel_count,
            });
        }

        let frame_count = bytes.len() / frame_bytes;
        let mut channels = vec![Vec::with_capacity(frame_count); channel_count as usize];
        for frame in bytes.chunks_exact(frame_bytes) {
            for (channel, sample) in channels.iter_mut().zip(frame.chunks_exact(2)) {
                let value = i16::from_le_bytes([sample[0], sample[1]]);
                channel.push(value as f32 / 32768.0);
            }
        }

        Ok(Self {
            channels,
            sample_rate,
            duration_secs: frame_count as f64 / sample_rate as f64,
        })
    }
}
