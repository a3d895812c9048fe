//! Camera frame snapshots
//!
//! The interpreter never waits for a frame: it asks a [`FrameSource`] for
//! the latest snapshot and treats `None` as "no image available".

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use image::{ImageError, ImageFormat, RgbImage};

use crate::color::Rgb;
use crate::error::{ScriptError, ScriptResult};

/// An immutable image in tightly packed BGR byte order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap BGR bytes; `data` must hold exactly `width * height * 3` bytes
    pub fn from_bgr(width: usize, height: usize, data: impl Into<Arc<[u8]>>) -> ScriptResult<Self> {
        let data = data.into();
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| ScriptError::invalid("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(ScriptError::invalid(format!(
                "frame of {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with one color
    pub fn solid(width: usize, height: usize, rgb: Rgb) -> Self {
        let [r, g, b] = rgb;
        let data: Vec<u8> = std::iter::repeat([b, g, r])
            .take(width * height)
            .flatten()
            .collect();
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// RGB value at (x, y), or `None` outside the frame
    pub fn pixel(&self, x: i64, y: i64) -> Option<Rgb> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        let offset = (y as usize * self.width + x as usize) * 3;
        let bgr = self.data.get(offset..offset + 3)?;
        Some([bgr[2], bgr[1], bgr[0]])
    }

    /// Truncated mean RGB of a region
    ///
    /// The origin is clamped into the frame and the region to its edges, so
    /// a region always covers at least one pixel of a non-empty frame.
    pub fn region_average(&self, x: i64, y: i64, width: i64, height: i64) -> Option<Rgb> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let (w, h) = (self.width as i64, self.height as i64);
        let x1 = x.clamp(0, w - 1);
        let y1 = y.clamp(0, h - 1);
        let x2 = x1.saturating_add(width).min(w).max(x1 + 1);
        let y2 = y1.saturating_add(height).min(h).max(y1 + 1);

        let mut sums = [0u64; 3];
        for row in y1..y2 {
            for col in x1..x2 {
                let [r, g, b] = self.pixel(col, row)?;
                sums[0] += u64::from(r);
                sums[1] += u64::from(g);
                sums[2] += u64::from(b);
            }
        }
        let count = ((x2 - x1) * (y2 - y1)) as u64;
        Some(sums.map(|s| (s / count) as u8))
    }

    /// Pixels reordered to packed RGB
    pub fn to_rgb(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
            .collect()
    }

    /// Encode as PNG at `path`, replacing any existing file
    pub fn save_png(&self, path: &Path) -> ScriptResult<()> {
        let too_large = || {
            ScriptError::invalid(format!(
                "frame of {}x{} is too large to save",
                self.width, self.height
            ))
        };
        let width = u32::try_from(self.width).map_err(|_| too_large())?;
        let height = u32::try_from(self.height).map_err(|_| too_large())?;
        let image = RgbImage::from_raw(width, height, self.to_rgb()).ok_or_else(too_large)?;

        image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| match e {
                ImageError::IoError(source) => ScriptError::Io {
                    path: path.to_path_buf(),
                    source,
                },
                other => ScriptError::Internal(format!("cannot encode {}: {other}", path.display())),
            })
    }
}

/// Pull accessor for the most recent frame
pub trait FrameSource: Send + Sync {
    fn latest(&self) -> Option<Frame>;
}

impl<F> FrameSource for F
where
    F: Fn() -> Option<Frame> + Send + Sync,
{
    fn latest(&self) -> Option<Frame> {
        self()
    }
}

/// A source that never has a frame
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFrames;

impl FrameSource for NoFrames {
    fn latest(&self) -> Option<Frame> {
        None
    }
}

/// A slot a capture thread publishes into
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Frame>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot
    pub fn publish(&self, frame: Frame) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl FrameSource for LatestFrame {
    fn latest(&self) -> Option<Frame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bgr_checks_length() {
        assert!(Frame::from_bgr(2, 2, vec![0u8; 12]).is_ok());
        assert!(Frame::from_bgr(2, 2, vec![0u8; 11]).is_err());
    }

    #[test]
    fn test_pixel_is_rgb() {
        // one pixel, stored B=1 G=2 R=3
        let frame = Frame::from_bgr(1, 1, vec![1u8, 2, 3]).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([3, 2, 1]));
        assert_eq!(frame.pixel(1, 0), None);
        assert_eq!(frame.pixel(-1, 0), None);
    }

    #[test]
    fn test_save_png_keeps_colors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::from_bgr(2, 1, vec![1u8, 2, 3, 40, 50, 60]).unwrap();
        frame.save_png(&path).unwrap();

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (2, 1));
        assert_eq!(saved.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(saved.get_pixel(1, 0).0, [60, 50, 40]);
    }

    #[test]
    fn test_region_average_clamps() {
        let mut data = Vec::new();
        // 2x1 frame: left pixel red (0,0,200) in BGR, right pixel blue
        data.extend_from_slice(&[0, 0, 200]);
        data.extend_from_slice(&[100, 0, 0]);
        let frame = Frame::from_bgr(2, 1, data).unwrap();

        assert_eq!(frame.region_average(0, 0, 2, 1), Some([100, 0, 50]));
        assert_eq!(frame.region_average(0, 0, 50, 50), Some([100, 0, 50]));
        assert_eq!(frame.region_average(9, 9, 3, 3), Some([0, 0, 100]));
        assert_eq!(frame.region_average(0, 0, 0, 0), Some([200, 0, 0]));
    }

    #[test]
    fn test_latest_frame_slot() {
        let slot = LatestFrame::new();
        assert!(slot.latest().is_none());
        slot.publish(Frame::solid(4, 4, [1, 2, 3]));
        assert_eq!(slot.latest().unwrap().pixel(3, 3), Some([1, 2, 3]));
        slot.clear();
        assert!(slot.latest().is_none());
    }
}
