//! Proportional frame scaling.
//!
//! Frames are shrunk before inference and drawing for throughput. Scaling uses
//! box (area) convolution, which averages every source pixel that falls under
//! a destination pixel and therefore behaves well when shrinking.

use anyhow::{anyhow, Context, Result};
use fast_image_resize as fr;

use crate::frame::Frame;

/// Scale a dimension by a percentage, truncating toward zero.
pub fn scale_dimension(value: u32, percent: u32) -> u32 {
    ((value as u64 * percent as u64) / 100) as u32
}

/// Scale a signed reference coordinate by a percentage, truncating toward zero.
pub fn scale_coordinate(value: i32, percent: u32) -> i32 {
    ((value as i64 * percent as i64) / 100) as i32
}

/// Target dimensions for `resize`, or an error when the result would be empty.
pub fn scaled_dimensions(width: u32, height: u32, percent: u32) -> Result<(u32, u32)> {
    if percent == 0 {
        return Err(anyhow!("scale percent must be greater than zero"));
    }
    let scaled = (
        scale_dimension(width, percent),
        scale_dimension(height, percent),
    );
    if scaled.0 == 0 || scaled.1 == 0 {
        return Err(anyhow!(
            "scaling {}x{} by {}% produces an empty frame",
            width,
            height,
            percent
        ));
    }
    Ok(scaled)
}

/// Return a new frame scaled on both axes by `percent`.
///
/// `100` returns an unchanged copy without touching the pixels.
pub fn resize(frame: &Frame, percent: u32) -> Result<Frame> {
    let (width, height) = scaled_dimensions(frame.width, frame.height, percent)?;
    resize_exact(frame, width, height)
}

/// Return a new frame scaled to exactly `width` x `height`.
pub fn resize_exact(frame: &Frame, width: u32, height: u32) -> Result<Frame> {
    if (width, height) == frame.dimensions() {
        return Ok(frame.clone());
    }
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot resize to an empty frame ({}x{})", width, height));
    }

    let src = fr::images::ImageRef::new(
        frame.width,
        frame.height,
        frame.as_bytes(),
        fr::PixelType::U8x3,
    )
    .context("wrap frame for resizing")?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Box));
    resizer
        .resize(&src, &mut dst, Some(&options))
        .with_context(|| {
            format!(
                "resize {}x{} -> {}x{}",
                frame.width, frame.height, width, height
            )
        })?;

    frame.derive(dst.into_vec(), width, height)
}
