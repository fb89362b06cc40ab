//! Animated frame-sequence encoding.

use bytes::Bytes;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, GrayImage};

use crate::error::StudyError;

/// Default playback rate in frames per second.
pub const DEFAULT_FRAME_RATE: u32 = 10;

/// Minimum playback rate.
pub const MIN_FRAME_RATE: u32 = 1;

/// Maximum playback rate.
pub const MAX_FRAME_RATE: u32 = 60;

/// Lower is better quality and slower; 10 is the `gif` crate's recommendation.
const QUANTIZER_SPEED: i32 = 10;

/// Encodes ordered grayscale frames as a looping animated GIF.
#[derive(Debug, Clone, Copy)]
pub struct SequenceEncoder {
    frame_rate: u32,
}

impl SequenceEncoder {
    /// Create an encoder; the frame rate is clamped to 1-60.
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.clamp(MIN_FRAME_RATE, MAX_FRAME_RATE),
        }
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Encode frames in order. Fails on an empty frame list.
    pub fn encode(&self, frames: Vec<GrayImage>) -> Result<Bytes, StudyError> {
        if frames.is_empty() {
            return Err(StudyError::encode("no frames to encode"));
        }

        let delay = Delay::from_numer_denom_ms(1000, self.frame_rate);
        let mut output = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut output, QUANTIZER_SPEED);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(StudyError::encode)?;
            encoder
                .encode_frames(frames.into_iter().map(|frame| {
                    let rgba = DynamicImage::ImageLuma8(frame).to_rgba8();
                    Frame::from_parts(rgba, 0, 0, delay)
                }))
                .map_err(StudyError::encode)?;
        }

        Ok(Bytes::from(output))
    }
}

impl Default for SequenceEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}
