use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

const JPEG_QUALITY: u8 = 85;

/// Loads a cover image and returns its thumbnail as base64 JPEG.
pub fn generate_thumbnail(path: &Path) -> Result<String> {
    let image = image::open(path).with_context(|| format!("Failed to decode image: {:?}", path))?;
    encode_thumbnail(&image)
}

/// Fits the image into 320x200 (landscape) or 200x320 (portrait), keeping
/// the aspect ratio.
pub fn encode_thumbnail(image: &DynamicImage) -> Result<String> {
    let (max_w, max_h) = if image.width() > image.height() {
        (320, 200)
    } else {
        (200, 320)
    };
    let resized = image.resize(max_w, max_h, FilterType::Lanczos3).to_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&resized)
        .context("Failed to encode thumbnail")?;
    Ok(STANDARD.encode(bytes))
}

/// Stored for covers that cannot be decoded.
pub fn placeholder_thumbnail() -> Result<String> {
    let blank = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
    encode_thumbnail(&DynamicImage::ImageRgb8(blank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn decode(b64: &str) -> DynamicImage {
        let bytes = STANDARD.decode(b64).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn test_landscape_fits_box() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(1600, 800));
        let thumb = decode(&encode_thumbnail(&image).unwrap());
        assert_eq!(thumb.dimensions(), (320, 160));
    }

    #[test]
    fn test_portrait_fits_box() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(800, 1600));
        let thumb = decode(&encode_thumbnail(&image).unwrap());
        assert_eq!(thumb.dimensions(), (160, 320));
    }

    #[test]
    fn test_unreadable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(generate_thumbnail(&path).is_err());
        assert!(!placeholder_thumbnail().unwrap().is_empty());
    }
}
