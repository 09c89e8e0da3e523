use crate::error::{AnalyzerError, RecordingError};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Camera identifier shared by every frame of that camera
pub type CameraId = Arc<str>;

/// Frame format enumeration supporting different video formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
    /// 8-bit luma only
    Gray8,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
            FrameFormat::Gray8 => 1,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// One captured image. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Owning camera
    pub camera_id: CameraId,
    /// Sequence number, increasing per camera
    pub seq: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership, never mutated)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        camera_id: CameraId,
        seq: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            camera_id,
            seq,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Time elapsed since `earlier` was captured, zero if it is not earlier
    pub fn elapsed_since(&self, earlier: SystemTime) -> Duration {
        self.timestamp.duration_since(earlier).unwrap_or_default()
    }

    /// JPEG bytes for this frame. MJPEG frames are returned without a copy.
    pub fn to_jpeg(&self, quality: u8) -> Result<Arc<Vec<u8>>, RecordingError> {
        let (pixels, color) = match self.format {
            FrameFormat::Mjpeg => return Ok(Arc::clone(&self.data)),
            FrameFormat::Rgb24 => (None, ColorType::Rgb8),
            FrameFormat::Gray8 => (None, ColorType::L8),
            FrameFormat::Yuyv => (Some(yuyv_to_rgb(&self.data)), ColorType::Rgb8),
        };

        if !self.validate_size() {
            return Err(RecordingError::FrameEncoding {
                details: format!(
                    "frame {} has {} bytes, expected {:?}",
                    self.seq,
                    self.data.len(),
                    self.expected_size()
                ),
            });
        }

        let source = pixels.as_deref().unwrap_or(self.data.as_slice());
        let mut jpeg = Vec::with_capacity(source.len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode(source, self.width, self.height, color)
            .map_err(|e| RecordingError::FrameEncoding {
                details: format!("frame {}: {}", self.seq, e),
            })?;

        Ok(Arc::new(jpeg))
    }

    /// 8-bit luma view of the frame for motion analysis
    pub fn to_luma(&self) -> Result<GrayImage, AnalyzerError> {
        let size_error = || AnalyzerError::Decode {
            frame: self.seq,
            details: format!(
                "{:?} frame {}x{} has {} bytes",
                self.format,
                self.width,
                self.height,
                self.data.len()
            ),
        };

        match self.format {
            FrameFormat::Mjpeg => {
                image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)
                    .map(|img| img.to_luma8())
                    .map_err(|e| AnalyzerError::Decode {
                        frame: self.seq,
                        details: e.to_string(),
                    })
            }
            FrameFormat::Gray8 => {
                GrayImage::from_raw(self.width, self.height, self.data.as_ref().clone())
                    .ok_or_else(size_error)
            }
            FrameFormat::Rgb24 => {
                if !self.validate_size() {
                    return Err(size_error());
                }
                let luma = self
                    .data
                    .chunks_exact(3)
                    .map(|px| luma_from_rgb(px[0], px[1], px[2]))
                    .collect();
                GrayImage::from_raw(self.width, self.height, luma).ok_or_else(size_error)
            }
            FrameFormat::Yuyv => {
                if !self.validate_size() {
                    return Err(size_error());
                }
                // Y0 U Y1 V: every even byte is luma
                let luma = self.data.iter().step_by(2).copied().collect();
                GrayImage::from_raw(self.width, self.height, luma).ok_or_else(size_error)
            }
        }
    }
}

fn luma_from_rgb(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let c = y as f32;
            let d = u as f32 - 128.0;
            let e = v as f32 - 128.0;
            rgb.push((c + 1.402 * e).clamp(0.0, 255.0) as u8);
            rgb.push((c - 0.344 * d - 0.714 * e).clamp(0.0, 255.0) as u8);
            rgb.push((c + 1.772 * d).clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraId {
        Arc::from("test")
    }

    #[test]
    fn test_frame_format_properties() {
        assert_eq!(FrameFormat::Mjpeg.bytes_per_pixel(), 0);
        assert_eq!(FrameFormat::Yuyv.bytes_per_pixel(), 2);
        assert_eq!(FrameFormat::Rgb24.bytes_per_pixel(), 3);
        assert_eq!(FrameFormat::Gray8.bytes_per_pixel(), 1);
        assert!(FrameFormat::Mjpeg.is_compressed());
        assert!(!FrameFormat::Gray8.is_compressed());
    }

    #[test]
    fn test_frame_clone_shares_buffer() {
        let frame = FrameData::new(
            camera(),
            7,
            SystemTime::now(),
            vec![1u8; 16],
            4,
            4,
            FrameFormat::Gray8,
        );
        let copy = frame.clone();

        assert!(Arc::ptr_eq(&frame.data, &copy.data));
        assert_eq!(copy.seq, 7);
    }

    #[test]
    fn test_frame_size_validation() {
        let ok = FrameData::new(camera(), 1, SystemTime::now(), vec![0; 12], 2, 2, FrameFormat::Rgb24);
        assert!(ok.validate_size());

        let short = FrameData::new(camera(), 2, SystemTime::now(), vec![0; 5], 2, 2, FrameFormat::Rgb24);
        assert!(!short.validate_size());
        assert!(short.to_luma().is_err());
        assert!(short.to_jpeg(80).is_err());
    }

    #[test]
    fn test_mjpeg_passthrough() {
        let frame = FrameData::new(
            camera(),
            1,
            SystemTime::now(),
            vec![0xFF, 0xD8, 0xFF, 0xD9],
            1,
            1,
            FrameFormat::Mjpeg,
        );
        let jpeg = frame.to_jpeg(50).unwrap();
        assert!(Arc::ptr_eq(&jpeg, &frame.data));
    }

    #[test]
    fn test_raw_frames_encode_and_decode() {
        let gray = FrameData::new(camera(), 1, SystemTime::now(), vec![128; 64], 8, 8, FrameFormat::Gray8);
        let jpeg = gray.to_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = FrameData::new(camera(), 2, SystemTime::now(), jpeg.to_vec(), 8, 8, FrameFormat::Mjpeg)
            .to_luma()
            .unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
        let px = decoded.get_pixel(4, 4)[0];
        assert!((120..=136).contains(&px));

        let yuyv = FrameData::new(camera(), 3, SystemTime::now(), [200u8, 128].repeat(16), 4, 4, FrameFormat::Yuyv);
        assert!(yuyv.to_luma().unwrap().pixels().all(|p| p[0] == 200));
        assert!(yuyv.to_jpeg(80).is_ok());

        let rgb = FrameData::new(camera(), 4, SystemTime::now(), vec![255; 48], 4, 4, FrameFormat::Rgb24);
        assert!(rgb.to_luma().unwrap().pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_elapsed_since() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let frame = FrameData::new(camera(), 1, start + Duration::from_millis(1500), vec![], 0, 0, FrameFormat::Mjpeg);

        assert_eq!(frame.elapsed_since(start), Duration::from_millis(1500));
        assert_eq!(
            frame.elapsed_since(start + Duration::from_secs(10)),
            Duration::ZERO
        );
    }
}
