//! Brightness measurement of beam images.

use bf_types::{config_error, BfError, BfResult};
use image::{ImageBuffer, Luma};
use std::path::Path;

/// 16-bit grayscale frame.
pub type GrayFrame = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Maps an image file to one non-negative quality value.
pub trait MetricSource: Send + Sync {
    fn measure(&self, path: &Path) -> BfResult<f64>;
}

/// Mean intensity after a square median filter.
///
/// The median pass removes hot pixels and single-frame sparks before the
/// mean is taken. Borders replicate the edge pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessMetric {
    median_kernel: u32,
}

impl Default for BrightnessMetric {
    fn default() -> Self {
        Self { median_kernel: 5 }
    }
}

impl BrightnessMetric {
    pub fn new(median_kernel: u32) -> BfResult<Self> {
        if median_kernel == 0 || median_kernel % 2 == 0 {
            return Err(config_error!("median kernel must be odd, got {median_kernel}"));
        }
        Ok(Self { median_kernel })
    }

    pub fn median_kernel(&self) -> u32 {
        self.median_kernel
    }

    /// Brightness of an already decoded frame. `None` for an empty frame.
    pub fn brightness(&self, frame: &GrayFrame) -> Option<f64> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let sum: u64 = if self.median_kernel == 1 {
            frame.as_raw().iter().map(|&p| u64::from(p)).sum()
        } else {
            median_filter(frame, self.median_kernel)
                .iter()
                .map(|&p| u64::from(p))
                .sum()
        };

        Some(sum as f64 / (u64::from(width) * u64::from(height)) as f64)
    }
}

impl MetricSource for BrightnessMetric {
    fn measure(&self, path: &Path) -> BfResult<f64> {
        let decode_error = |message: String| BfError::ImageDecode {
            path: path.display().to_string(),
            message,
        };

        let frame = image::open(path)
            .map_err(|e| decode_error(e.to_string()))?
            .into_luma16();

        self.brightness(&frame)
            .ok_or_else(|| decode_error("image has no pixels".to_string()))
    }
}

fn median_filter(frame: &GrayFrame, kernel: u32) -> Vec<u16> {
    let (width, height) = frame.dimensions();
    let radius = (kernel / 2) as i64;
    let pixels = frame.as_raw();
    let mut window = Vec::with_capacity((kernel * kernel) as usize);
    let mut out = Vec::with_capacity(pixels.len());

    for y in 0..height as i64 {
        for x in 0..width as i64 {
            window.clear();
            for dy in -radius..=radius {
                let sy = (y + dy).clamp(0, height as i64 - 1) as usize;
                for dx in -radius..=radius {
                    let sx = (x + dx).clamp(0, width as i64 - 1) as usize;
                    window.push(pixels[sy * width as usize + sx]);
                }
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable(mid);
            out.push(*median);
        }
    }

    out
}
