//! Decoded frames.
//!
//! `Frame` is the unit handed between pipeline stages: a tightly packed RGB24
//! grid (`width * height * 3` bytes, row-major, no stride padding). Every
//! stage either borrows a frame or consumes it and returns a new one; nothing
//! keeps frame history.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Duration, Instant};

/// Bytes per pixel for the RGB24 layout used everywhere in the crate.
pub const CHANNELS: usize = 3;

/// A decoded RGB24 frame.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Capture counter assigned by the frame source (0 for derived frames).
    pub sequence: u64,

    captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails when the buffer length does not match the geometry.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = frame_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    /// A frame of a single solid color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = frame_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / CHANNELS {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Time since the frame was captured (or derived).
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Convert into an `image` buffer for drawing. Keeps the pixel bytes, no copy.
    pub fn into_image(self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        // Length is validated at construction, so this cannot fail.
        RgbImage::from_raw(width, height, self.data)
            .unwrap_or_else(|| RgbImage::new(width, height))
    }

    /// Draw on the frame in place through an `image` view, keeping capture metadata.
    pub fn map_image<F: FnOnce(&mut RgbImage)>(self, draw: F) -> Self {
        let (sequence, captured_at) = (self.sequence, self.captured_at);
        let mut image = self.into_image();
        draw(&mut image);
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
            captured_at,
        }
    }

    /// Derive a new frame with different pixels, keeping capture metadata.
    pub(crate) fn derive(&self, data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let mut frame = Self::new(data, width, height)?;
        frame.sequence = self.sequence;
        frame.captured_at = self.captured_at;
        Ok(frame)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Byte length of an RGB24 frame, rejecting empty or overflowing geometry.
pub fn frame_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow ({}x{})", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn zero_geometry_is_rejected() {
        assert!(frame_len(0, 10).is_err());
        assert!(Frame::filled(10, 0, [0, 0, 0]).is_err());
    }

    #[test]
    fn drawing_keeps_metadata() -> Result<()> {
        let frame = Frame::filled(4, 3, [10, 20, 30])?.with_sequence(7);
        let drawn = frame.map_image(|image| {
            assert_eq!(image.get_pixel(3, 2).0, [10, 20, 30]);
            image.put_pixel(0, 0, image::Rgb([1, 2, 3]));
        });
        assert_eq!(drawn.sequence, 7);
        assert_eq!(drawn.dimensions(), (4, 3));
        assert_eq!(&drawn.as_bytes()[..6], &[1, 2, 3, 10, 20, 30]);
        Ok(())
    }
}
