use serde::{Deserialize, Serialize};

/// Pixel layout requested from the receiver. Passed through to the engine,
/// no effect on negotiation routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra32,
    Yuv420BiPlanarVideoRange,
    Yuv420BiPlanarFullRange,
}

/// Resolution, pixel format and frame rate of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: f64,
}

impl VideoFormat {
    pub fn pixel_rate(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height) * self.frame_rate
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Yuv420BiPlanarFullRange,
            frame_rate: 30.0,
        }
    }
}

/// Frame rate at which the weighting factor is exactly 1.
pub const REFERENCE_FRAME_RATE: f64 = 30.0;

const FRAME_WEIGHT_EXPONENT_DENOMINATOR: f64 = 3.5;

/// Exponential low-frame-rate weighting: sparse streams get proportionally
/// more bits per pixel so they are not starved. Equals 1 at 30 fps.
pub fn frame_rate_weight(frame_rate: f64) -> f64 {
    ((REFERENCE_FRAME_RATE - frame_rate) / (FRAME_WEIGHT_EXPONENT_DENOMINATOR * frame_rate)).exp()
}

/// Estimate the maximum encoder rate suitable for a video format, in kbps.
/// `min(round(pixel_rate * target_bpp * weight), max_rate_kbps)`.
pub fn peak_video_rate(format: &VideoFormat, target_bpp: f64, max_rate_kbps: u32) -> u32 {
    let recommended = format.pixel_rate() * target_bpp * frame_rate_weight(format.frame_rate);
    let capped = recommended.min(f64::from(max_rate_kbps));
    capped.round() as u32
}
