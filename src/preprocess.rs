use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage, RgbaImage, imageops};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::geometry::Dimensions;

/// Longest allowed side for the server preprocessing path.
pub const MAX_IMAGE_SIZE: u32 = 1920;

const UNSHARP_SIGMA: f32 = 1.0;
const UNSHARP_AMOUNT: f32 = 1.5;
const UNSHARP_THRESHOLD: i32 = 3;
const SHARPEN_FACTOR: f32 = 1.2;
const JPEG_QUALITY: u8 = 95;

/// RGB image written to a uniquely named temp JPEG, sized for the engine.
/// The file is removed when the value drops, removal errors swallowed.
pub struct PreparedImage {
    file: NamedTempFile,
    size: Dimensions,
}

impl PreparedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> Dimensions {
        self.size
    }
}

pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to load image: {}", path.display()))
}

/// Full preprocessing pass: color normalization, downsampling to
/// `max_side`, sharpening, then encode to a temp JPEG the engine reads.
pub fn prepare(image: DynamicImage, max_side: u32) -> Result<PreparedImage> {
    let rgb = normalize(image);
    let rgb = downsample(rgb, max_side);
    let rgb = sharpen(&rgb);
    let size = Dimensions {
        width: rgb.width(),
        height: rgb.height(),
    };

    let mut file = tempfile::Builder::new()
        .prefix("preprocessed_")
        .suffix(".jpg")
        .tempfile()
        .with_context(|| "failed to create temp file for preprocessed image")?;
    let encoder = JpegEncoder::new_with_quality(&mut file, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .with_context(|| "failed to encode preprocessed image")?;
    file.flush().ok();

    Ok(PreparedImage { file, size })
}

/// Flattens any decoded color mode to plain RGB. Alpha-bearing images are
/// composited onto an opaque white canvas; palette sources arrive from the
/// decoder already expanded to RGB or RGBA (transparency key) and take the
/// matching branch.
pub fn normalize(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        DynamicImage::ImageRgba8(rgba) => composite_onto_white(&rgba),
        other if other.color().has_alpha() => composite_onto_white(&other.to_rgba8()),
        other => other.to_rgb8(),
    }
}

fn composite_onto_white(rgba: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = f32::from(a) / 255.0;
        let blend =
            |channel: u8| (f32::from(channel) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Constrains the longer side to `max_side`, preserving aspect ratio. The
/// non-driving dimension truncates; images already within bounds keep
/// their resolution.
pub fn downsample(image: RgbImage, max_side: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_side {
        return image;
    }
    let (new_width, new_height) = if width > height {
        let ratio = f64::from(max_side) / f64::from(width);
        (max_side, (f64::from(height) * ratio) as u32)
    } else {
        let ratio = f64::from(max_side) / f64::from(height);
        ((f64::from(width) * ratio) as u32, max_side)
    };
    imageops::resize(&image, new_width, new_height, imageops::FilterType::Lanczos3)
}

/// Two-stage sharpening: edge-aware unsharp mask, then a global boost.
/// Parameters are fixed; recognition quality was tuned against them.
pub fn sharpen(image: &RgbImage) -> RgbImage {
    let masked = unsharp_mask(image, UNSHARP_SIGMA, UNSHARP_AMOUNT, UNSHARP_THRESHOLD);
    boost_sharpness(&masked, SHARPEN_FACTOR)
}

fn unsharp_mask(image: &RgbImage, sigma: f32, amount: f32, threshold: i32) -> RgbImage {
    let blurred = imageops::blur(image, sigma);
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let soft = blurred.get_pixel(x, y);
        for channel in 0..3 {
            let original = i32::from(pixel.0[channel]);
            let diff = original - i32::from(soft.0[channel]);
            if diff.abs() > threshold {
                let value = original as f32 + diff as f32 * amount;
                pixel.0[channel] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

// Interpolates away from a 3x3-smoothed copy; factor 1.0 is a no-op.
fn boost_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    const SMOOTH: [f32; 9] = [
        1.0 / 13.0,
        1.0 / 13.0,
        1.0 / 13.0,
        1.0 / 13.0,
        5.0 / 13.0,
        1.0 / 13.0,
        1.0 / 13.0,
        1.0 / 13.0,
        1.0 / 13.0,
    ];
    let smooth: RgbImage = imageops::filter3x3(image, &SMOOTH);
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let base = smooth.get_pixel(x, y);
        for channel in 0..3 {
            let soft = f32::from(base.0[channel]);
            let value = soft + (f32::from(pixel.0[channel]) - soft) * factor;
            pixel.0[channel] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
