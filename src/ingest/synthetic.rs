use anyhow::Result;

use crate::frame::{Frame, CHANNELS};

use super::CaptureDevice;

// ----------------------------------------------------------------------------
// Synthetic device (stub://) for tests and dry runs
// ----------------------------------------------------------------------------

/// Produces horizontally striped frames that shift with every grab.
pub struct SyntheticCapture {
    url: String,
    width: u32,
    height: u32,
    grabbed: u64,
    /// Simulated scene state, bumped every 50 grabs.
    scene_state: u8,
}

impl SyntheticCapture {
    pub fn new(url: &str, width: u32, height: u32) -> Self {
        log::info!("capture: opened {} (synthetic {}x{})", url, width, height);
        Self {
            url: url.to_string(),
            width,
            height,
            grabbed: 0,
            scene_state: 0,
        }
    }

    pub fn grabbed(&self) -> u64 {
        self.grabbed
    }

    fn pixels(&self) -> Vec<u8> {
        let row_len = self.width as usize * CHANNELS;
        let mut data = Vec::with_capacity(row_len * self.height as usize);
        for y in 0..self.height as u64 {
            let shade = ((y + self.grabbed) % 256) as u8;
            let row = [shade, self.scene_state, 255 - shade];
            for _ in 0..self.width {
                data.extend_from_slice(&row);
            }
        }
        data
    }
}

impl CaptureDevice for SyntheticCapture {
    fn grab(&mut self) {
        self.grabbed += 1;
        if self.grabbed.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
    }

    fn retrieve(&mut self) -> Result<Option<Frame>> {
        Frame::new(self.pixels(), self.width, self.height).map(Some)
    }

    fn release(&mut self) {
        log::info!("capture: released {}", self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_configured_geometry() -> Result<()> {
        let mut device = SyntheticCapture::new("stub://test", 32, 16);
        device.grab();
        let frame = device.retrieve()?.expect("synthetic frame");
        assert_eq!(frame.dimensions(), (32, 16));
        Ok(())
    }

    #[test]
    fn content_moves_between_grabs() -> Result<()> {
        let mut device = SyntheticCapture::new("stub://test", 4, 4);
        device.grab();
        let first = device.retrieve()?.expect("first frame");
        device.grab();
        let second = device.retrieve()?.expect("second frame");
        assert_ne!(first.as_bytes(), second.as_bytes());
        assert_eq!(device.grabbed(), 2);
        Ok(())
    }
}
