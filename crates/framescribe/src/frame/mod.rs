//! Frame normalization, subtitle band cropping and thumbnails.
//!
//! Every frame is brought onto a fixed canvas first so crops from sources of
//! different resolutions cover the same screen region.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::ProcessError;

/// Geometry used when transforming frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    pub target_width: u32,
    pub target_height: u32,
    /// Relative aspect ratio difference still treated as a match.
    pub aspect_tolerance: f64,
    /// Share of the canvas height, measured from the bottom, that holds subtitles.
    pub roi_fraction: f64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            target_width: 1920,
            target_height: 1080,
            aspect_tolerance: 0.01,
            roi_fraction: 0.25,
            thumbnail_width: 320,
            thumbnail_height: 180,
        }
    }
}

/// Placement of a scaled image on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Output of [`transform`] for one frame.
pub struct TransformedFrame {
    /// The frame on the target canvas.
    pub normalized: RgbImage,
    /// PNG of the subtitle band.
    pub crop_png: Vec<u8>,
}

/// Where a `src_w`×`src_h` image lands on a `dst_w`×`dst_h` canvas.
///
/// Sources whose aspect ratio is within `tolerance` of the canvas fill it
/// entirely; others are scaled to fit and centred.
pub fn letterbox_rect(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32, tolerance: f64) -> Rect {
    let full = Rect {
        x: 0,
        y: 0,
        width: dst_w,
        height: dst_h,
    };
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return full;
    }

    let src_aspect = f64::from(src_w) / f64::from(src_h);
    let dst_aspect = f64::from(dst_w) / f64::from(dst_h);
    if ((src_aspect - dst_aspect) / dst_aspect).abs() <= tolerance {
        return full;
    }

    let scale = (f64::from(dst_w) / f64::from(src_w)).min(f64::from(dst_h) / f64::from(src_h));
    let width = ((f64::from(src_w) * scale).round() as u32).clamp(1, dst_w);
    let height = ((f64::from(src_h) * scale).round() as u32).clamp(1, dst_h);

    Rect {
        x: (dst_w - width) / 2,
        y: (dst_h - height) / 2,
        width,
        height,
    }
}

pub fn decode(name: &str, bytes: &[u8]) -> Result<DynamicImage, ProcessError> {
    image::load_from_memory(bytes).map_err(|e| ProcessError::ImageDecode {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Resizes or letterboxes an image onto the target canvas (black padding).
pub fn normalize(img: &DynamicImage, settings: &FrameSettings) -> RgbImage {
    let (dst_w, dst_h) = (settings.target_width, settings.target_height);
    let rect = letterbox_rect(
        img.width(),
        img.height(),
        dst_w,
        dst_h,
        settings.aspect_tolerance,
    );

    let rgb = img.to_rgb8();
    let resized = if rgb.dimensions() == (rect.width, rect.height) {
        rgb
    } else {
        imageops::resize(&rgb, rect.width, rect.height, FilterType::Triangle)
    };

    if rect.width == dst_w && rect.height == dst_h {
        return resized;
    }

    let mut canvas = RgbImage::from_pixel(dst_w, dst_h, Rgb([0, 0, 0]));
    imageops::overlay(&mut canvas, &resized, i64::from(rect.x), i64::from(rect.y));
    canvas
}

/// The bottom `fraction` of the frame.
pub fn crop_subtitle_band(img: &RgbImage, fraction: f64) -> RgbImage {
    let (width, height) = img.dimensions();
    let band = ((f64::from(height) * fraction.clamp(0.0, 1.0)).ceil() as u32).clamp(1, height.max(1));
    let y = height.saturating_sub(band);
    imageops::crop_imm(img, 0, y, width, band.min(height)).to_image()
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, ProcessError> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| ProcessError::ImageEncode(e.to_string()))?;
    Ok(buffer)
}

/// Downscales a normalized frame to a JPEG thumbnail.
pub fn thumbnail_jpeg(img: &RgbImage, width: u32, height: u32) -> Result<Vec<u8>, ProcessError> {
    let small = imageops::thumbnail(img, width.max(1), height.max(1));
    let mut buffer = Vec::new();
    small
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .map_err(|e| ProcessError::ImageEncode(e.to_string()))?;
    Ok(buffer)
}

/// Decodes, normalizes and crops one frame.
pub fn transform(
    name: &str,
    bytes: &[u8],
    settings: &FrameSettings,
) -> Result<TransformedFrame, ProcessError> {
    let decoded = decode(name, bytes)?;
    let normalized = normalize(&decoded, settings);
    drop(decoded);

    let crop = crop_subtitle_band(&normalized, settings.roi_fraction);
    let crop_png = encode_png(&crop)?;

    Ok(TransformedFrame {
        normalized,
        crop_png,
    })
}
