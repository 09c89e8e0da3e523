use crate::config::MotionConfig;
use crate::error::AnalyzerError;
use crate::frame::FrameData;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::dilate,
    region_labelling::{connected_components, Connectivity},
};
use std::collections::HashMap;
use tracing::{debug, info};

const ANALYSIS_MAX_WIDTH: u32 = 640;
const ANALYSIS_MAX_HEIGHT: u32 = 480;
const BLUR_SIGMA: f32 = 1.0;
const DILATE_RADIUS: u8 = 2;

/// Per-frame motion measurement
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionSignal {
    /// Changed pixels / total pixels
    pub pixel_ratio: f64,
    /// Largest connected changed region / total pixels
    pub region_ratio: f64,
    /// Whether either ratio reached its threshold
    pub positive: bool,
}

/// Frame differencing against the previous frame
pub struct MotionAnalyzer {
    noise_level: u8,
    pixel_threshold: f64,
    object_threshold: f64,
    previous: Option<GrayImage>,
    pub(crate) frame_count: u64,
}

impl MotionAnalyzer {
    pub fn new(config: &MotionConfig) -> Self {
        info!(
            "Motion analyzer: noise {}, pixel {}%, object {}%",
            config.noise_level, config.pixel_threshold, config.object_threshold
        );

        Self {
            noise_level: config.noise_level.clamp(1, 255) as u8,
            pixel_threshold: config.pixel_threshold,
            object_threshold: config.object_threshold,
            previous: None,
            frame_count: 0,
        }
    }

    /// Measure motion in `frame` relative to the previously analyzed frame.
    ///
    /// The first frame, and any frame whose size differs from its
    /// predecessor, only primes the reference and reports no motion.
    pub fn analyze(&mut self, frame: &FrameData) -> Result<MotionSignal, AnalyzerError> {
        let gray = frame.to_luma()?;
        let prepared = gaussian_blur_f32(&downscale(gray), BLUR_SIGMA);
        self.frame_count += 1;

        let previous = match self.previous.replace(prepared) {
            Some(previous) => previous,
            None => {
                debug!("Motion reference initialized from frame {}", frame.seq);
                return Ok(MotionSignal::default());
            }
        };

        let current = match &self.previous {
            Some(current) if current.dimensions() == previous.dimensions() => current,
            _ => {
                debug!("Frame {} changed size, resetting motion reference", frame.seq);
                return Ok(MotionSignal::default());
            }
        };

        let mask = change_mask(&previous, current, self.noise_level);
        let total = (mask.width() as u64 * mask.height() as u64).max(1) as f64;
        let changed = mask.pixels().filter(|p| p[0] > 0).count() as f64;

        let pixel_ratio = changed / total;
        let region_ratio = if changed > 0.0 {
            let grown = dilate(&mask, Norm::LInf, DILATE_RADIUS);
            let components = connected_components(&grown, Connectivity::Eight, Luma([0u8]));
            largest_component(&components) as f64 / total
        } else {
            0.0
        };

        let positive = pixel_ratio * 100.0 >= self.pixel_threshold
            || region_ratio * 100.0 >= self.object_threshold;

        debug!(
            "Frame {}: {:.3}% pixels, {:.3}% region, positive={}",
            frame.seq,
            pixel_ratio * 100.0,
            region_ratio * 100.0,
            positive
        );

        Ok(MotionSignal {
            pixel_ratio,
            region_ratio,
            positive,
        })
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frame_count
    }
}

/// Shrink to fit the analysis bounds, keeping the aspect ratio
fn downscale(gray: GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width <= ANALYSIS_MAX_WIDTH && height <= ANALYSIS_MAX_HEIGHT {
        return gray;
    }

    let scale = f64::min(
        ANALYSIS_MAX_WIDTH as f64 / width as f64,
        ANALYSIS_MAX_HEIGHT as f64 / height as f64,
    );
    let target_w = ((width as f64 * scale) as u32).max(1);
    let target_h = ((height as f64 * scale) as u32).max(1);
    imageops::resize(&gray, target_w, target_h, FilterType::Triangle)
}

/// 255 where the absolute difference exceeds `noise_level`, else 0
fn change_mask(previous: &GrayImage, current: &GrayImage, noise_level: u8) -> GrayImage {
    let (width, height) = current.dimensions();
    let data = previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .map(|(a, b)| if a.abs_diff(*b) > noise_level { 255 } else { 0 })
        .collect();

    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

fn largest_component(components: &ImageBuffer<Luma<u32>, Vec<u32>>) -> u64 {
    let mut sizes: HashMap<u32, u64> = HashMap::new();
    for pixel in components.pixels() {
        if pixel[0] > 0 {
            *sizes.entry(pixel[0]).or_insert(0) += 1;
        }
    }
    sizes.values().max().copied().unwrap_or(0)
}
