// src/util/image.rs
//! Image helpers: uniform-border cropping, cover-resize, preview encoding, test pattern.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{
    codecs::jpeg::JpegEncoder,
    imageops::FilterType,
    DynamicImage, Rgb, RgbImage,
};

use crate::{log_debug, log_info, log_warn};

/// Max standard deviation for a row/column to count as a solid border
pub const UNIFORMITY_THRESHOLD: f64 = 25.0;
/// Borders thinner than this are left alone
pub const MIN_BORDER_SIZE: u32 = 5;

/// Population standard deviation over every channel sample in the line
fn line_std_dev<'a>(pixels: impl Iterator<Item = &'a Rgb<u8>>) -> f64 {
    let (mut count, mut sum, mut sum_sq) = (0f64, 0f64, 0f64);
    for pixel in pixels {
        for &channel in pixel.0.iter() {
            let value = channel as f64;
            count += 1.0;
            sum += value;
            sum_sq += value * value;
        }
    }
    if count == 0.0 {
        return 0.0;
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0).sqrt()
}

fn is_border_row(rgb: &RgbImage, y: u32) -> bool {
    line_std_dev((0..rgb.width()).map(|x| rgb.get_pixel(x, y))) <= UNIFORMITY_THRESHOLD
}

fn is_border_column(rgb: &RgbImage, x: u32) -> bool {
    line_std_dev((0..rgb.height()).map(|y| rgb.get_pixel(x, y))) <= UNIFORMITY_THRESHOLD
}

/// Crop solid-colour borders of any colour (white mats, beige scans, black bars).
///
/// Returns the original image when no edge has a border of at least
/// [`MIN_BORDER_SIZE`] or when the whole image is uniform.
pub fn auto_crop_borders(image: &DynamicImage) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    log_debug!(
        "Analyzing image ({}x{}) for uniform borders (uniformity_threshold={}, min_border_size={})",
        width, height, UNIFORMITY_THRESHOLD, MIN_BORDER_SIZE
    );

    let top = (0..height).find(|&y| !is_border_row(&rgb, y)).unwrap_or(0);
    let bottom = (0..height)
        .rev()
        .find(|&y| !is_border_row(&rgb, y))
        .map(|y| y + 1)
        .unwrap_or(height);
    let left = (0..width).find(|&x| !is_border_column(&rgb, x)).unwrap_or(0);
    let right = (0..width)
        .rev()
        .find(|&x| !is_border_column(&rgb, x))
        .map(|x| x + 1)
        .unwrap_or(width);

    let borders = [
        ("top", top),
        ("bottom", height - bottom),
        ("left", left),
        ("right", width - right),
    ];
    let significant: Vec<_> = borders
        .iter()
        .filter(|(_, size)| *size >= MIN_BORDER_SIZE)
        .collect();

    if significant.is_empty() {
        log_debug!("No significant borders detected (all < {}px): {:?}", MIN_BORDER_SIZE, borders);
        return image.clone();
    }

    if left >= right || top >= bottom {
        log_warn!(
            "Invalid crop box detected: left={}, right={}, top={}, bottom={}. Returning original image.",
            left, right, top, bottom
        );
        return image.clone();
    }

    let (new_width, new_height) = (right - left, bottom - top);
    let removed = (1.0 - (new_width as f64 * new_height as f64) / (width as f64 * height as f64)) * 100.0;
    log_info!(
        "Cropping borders: {:?} | Original: {}x{} -> Cropped: {}x{} ({:.1}% removed)",
        significant, width, height, new_width, new_height, removed
    );

    image.crop_imm(left, top, new_width, new_height)
}

/// Scale to cover `width`x`height` then centre-crop, or stretch when
/// `maintain_aspect` is false.
pub fn cover_resize(image: &DynamicImage, width: u32, height: u32, maintain_aspect: bool) -> DynamicImage {
    if !maintain_aspect {
        return image.resize_exact(width, height, FilterType::Lanczos3);
    }

    let scale = f64::max(
        width as f64 / image.width() as f64,
        height as f64 / image.height() as f64,
    );
    let scaled_width = ((image.width() as f64 * scale).round() as u32).max(width);
    let scaled_height = ((image.height() as f64 * scale).round() as u32).max(height);

    let resized = image.resize_exact(scaled_width, scaled_height, FilterType::Lanczos3);
    let left = (scaled_width - width) / 2;
    let top = (scaled_height - height) / 2;
    resized.crop_imm(left, top, width, height)
}

/// JPEG thumbnail `width` pixels wide (never upscaled), base64-encoded.
pub fn encode_preview(image: &DynamicImage, width: u32, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let thumbnail = if image.width() > width {
        let height = ((image.height() as f64 * width as f64 / image.width() as f64) as u32).max(1);
        image.resize(width, height, FilterType::Lanczos3)
    } else {
        image.clone()
    };

    // JPEG has no alpha channel
    let rgb = thumbnail.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&rgb)?;

    Ok(STANDARD.encode(jpeg).into_bytes())
}

/// White canvas with a black frame inset 10px and a centre cross.
pub fn test_pattern(width: u32, height: u32) -> DynamicImage {
    let black = Rgb([0, 0, 0]);
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    const INSET: u32 = 10;
    if width > 2 * INSET && height > 2 * INSET {
        let (x0, y0, x1, y1) = (INSET, INSET, width - INSET - 1, height - INSET - 1);
        for x in x0..=x1 {
            canvas.put_pixel(x, y0, black);
            canvas.put_pixel(x, y1, black);
        }
        for y in y0..=y1 {
            canvas.put_pixel(x0, y, black);
            canvas.put_pixel(x1, y, black);
        }
    }

    let (cx, cy) = (width / 2, height / 2);
    let arm = (width.min(height) / 10).max(1);
    for x in cx.saturating_sub(arm)..(cx + arm).min(width) {
        canvas.put_pixel(x, cy.min(height.saturating_sub(1)), black);
    }
    for y in cy.saturating_sub(arm)..(cy + arm).min(height) {
        canvas.put_pixel(cx.min(width.saturating_sub(1)), y, black);
    }

    DynamicImage::ImageRgb8(canvas)
}
