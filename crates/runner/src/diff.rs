//! Bitmap comparison

use image::{GenericImageView, Pixel, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::RunnerResult;

/// Allowed per-channel difference before a pixel counts as changed
const CHANNEL_TOLERANCE: i32 = 5;

/// Rectangle excluded from comparison, in reference image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IgnoreArea {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl IgnoreArea {
    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOptions {
    pub require_same_dimensions: bool,
    #[serde(default)]
    pub ignore_areas: Vec<IgnoreArea>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOutcome {
    /// 0.0 - 100.0
    pub mis_match_percentage: f64,
    pub is_same_dimensions: bool,
    /// PNG-encoded visualisation of the changed pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_bitmap: Option<Vec<u8>>,
}

/// Pixel comparison backend. Implementations run on blocking worker threads
/// and may panic; the scheduler contains it.
pub trait DiffAdapter: Send + Sync {
    fn diff(&self, reference: &Path, test: &Path, options: &DiffOptions) -> RunnerResult<DiffOutcome>;
}

/// Default adapter: per-channel tolerance over the union of both images.
/// Pixels outside the overlap count as changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelDiff;

impl DiffAdapter for PixelDiff {
    fn diff(&self, reference: &Path, test: &Path, options: &DiffOptions) -> RunnerResult<DiffOutcome> {
        let reference_bytes = std::fs::read(reference)?;
        let test_bytes = std::fs::read(test)?;

        if hash(&reference_bytes) == hash(&test_bytes) {
            debug!("Bitmaps match exactly (same hash)");
            return Ok(DiffOutcome {
                mis_match_percentage: 0.0,
                is_same_dimensions: true,
                diff_bitmap: None,
            });
        }

        let reference_img = image::load_from_memory(&reference_bytes)?;
        let test_img = image::load_from_memory(&test_bytes)?;
        let is_same_dimensions = reference_img.dimensions() == test_img.dimensions();

        let reference_rgba = reference_img.to_rgba8();
        let test_rgba = test_img.to_rgba8();
        let width = reference_rgba.width().max(test_rgba.width());
        let height = reference_rgba.height().max(test_rgba.height());

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        let mut total_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                if options.ignore_areas.iter().any(|area| area.contains(x, y)) {
                    continue;
                }
                total_pixels += 1;

                let changed = match (pixel_at(&reference_rgba, x, y), pixel_at(&test_rgba, x, y)) {
                    (Some(a), Some(b)) => {
                        if pixels_differ(a, b) {
                            true
                        } else {
                            let c = b.channels();
                            diff_img.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
                            false
                        }
                    }
                    _ => true,
                };
                if changed {
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                }
            }
        }

        let mis_match_percentage = if total_pixels == 0 {
            0.0
        } else {
            (diff_pixels as f64 / total_pixels as f64) * 100.0
        };

        let diff_bitmap = if diff_pixels > 0 {
            let mut encoded = Vec::new();
            diff_img.write_to(&mut Cursor::new(&mut encoded), image::ImageOutputFormat::Png)?;
            Some(encoded)
        } else {
            None
        };

        Ok(DiffOutcome {
            mis_match_percentage,
            is_same_dimensions,
            diff_bitmap,
        })
    }
}

fn pixel_at(img: &RgbaImage, x: u32, y: u32) -> Option<&Rgba<u8>> {
    (x < img.width() && y < img.height()).then(|| img.get_pixel(x, y))
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(a, b)| (*a as i32 - *b as i32).abs() > CHANNEL_TOLERANCE)
}

fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_image(dir: &TempDir, name: &str, width: u32, height: u32, color: [u8; 4]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        RgbaImage::from_pixel(width, height, Rgba(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_identical_files_match() {
        let tmp = TempDir::new().unwrap();
        let a = write_image(&tmp, "a.png", 8, 8, [10, 20, 30, 255]);
        let b = write_image(&tmp, "b.png", 8, 8, [10, 20, 30, 255]);

        let outcome = PixelDiff.diff(&a, &b, &DiffOptions::default()).unwrap();
        assert_eq!(outcome.mis_match_percentage, 0.0);
        assert!(outcome.is_same_dimensions);
        assert!(outcome.diff_bitmap.is_none());
    }

    #[test]
    fn test_small_channel_noise_is_tolerated() {
        let tmp = TempDir::new().unwrap();
        let a = write_image(&tmp, "a.png", 4, 4, [100, 100, 100, 255]);
        let b = write_image(&tmp, "b.png", 4, 4, [103, 98, 100, 255]);

        let outcome = PixelDiff.diff(&a, &b, &DiffOptions::default()).unwrap();
        assert_eq!(outcome.mis_match_percentage, 0.0);
    }

    #[test]
    fn test_different_sizes_report_dimension_mismatch() {
        let tmp = TempDir::new().unwrap();
        let a = write_image(&tmp, "a.png", 10, 10, [0, 0, 0, 255]);
        let b = write_image(&tmp, "b.png", 10, 5, [0, 0, 0, 255]);

        let outcome = PixelDiff.diff(&a, &b, &DiffOptions::default()).unwrap();
        assert!(!outcome.is_same_dimensions);
        assert!((outcome.mis_match_percentage - 50.0).abs() < 1e-9);
        assert!(outcome.diff_bitmap.is_some());
    }

    #[test]
    fn test_ignore_areas_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let a = write_image(&tmp, "a.png", 4, 4, [0, 0, 0, 255]);
        let b = write_image(&tmp, "b.png", 4, 4, [255, 255, 255, 255]);
        let options = DiffOptions {
            require_same_dimensions: true,
            ignore_areas: vec![IgnoreArea { x: 0, y: 0, width: 4, height: 2 }],
        };

        let outcome = PixelDiff.diff(&a, &b, &options).unwrap();
        assert!((outcome.mis_match_percentage - 100.0).abs() < 1e-9);

        let all = DiffOptions {
            ignore_areas: vec![IgnoreArea { x: 0, y: 0, width: 4, height: 4 }],
            ..options
        };
        assert_eq!(PixelDiff.diff(&a, &b, &all).unwrap().mis_match_percentage, 0.0);
    }
}
