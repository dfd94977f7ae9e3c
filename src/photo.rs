use crate::error::PhotoError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use log::debug;

pub const MAX_DIMENSION: u32 = 1200;
pub const JPEG_QUALITY: u8 = 70;
pub const CONTENT_TYPE: &str = "image/jpeg";

/// Clamps to `MAX_DIMENSION` on both axes, keeping the aspect ratio.
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return (width, height);
    }
    let ratio = (MAX_DIMENSION as f64 / width as f64).min(MAX_DIMENSION as f64 / height as f64);
    (
        ((width as f64 * ratio).round() as u32).max(1),
        ((height as f64 * ratio).round() as u32).max(1),
    )
}

/// Decodes any supported image, downsizes it and re-encodes as JPEG.
pub fn compress_image(bytes: &[u8]) -> Result<Vec<u8>, PhotoError> {
    let img = image::load_from_memory(bytes).map_err(PhotoError::Decode)?;
    let (width, height) = target_dimensions(img.width(), img.height());
    let img = if (width, height) != (img.width(), img.height()) {
        img.resize_exact(width, height, FilterType::Triangle)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(PhotoError::Encode)?;

    debug!("Compressed photo {} -> {} bytes ({}x{})", bytes.len(), out.len(), width, height);
    Ok(out)
}

/// Runs `compress_image` off the async executor.
pub async fn compress_image_async(bytes: Vec<u8>) -> Result<Vec<u8>, PhotoError> {
    tokio::task::spawn_blocking(move || compress_image(&bytes))
        .await
        .map_err(|e| PhotoError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(800, 600), (800, 600));
        assert_eq!(target_dimensions(4000, 3000), (1200, 900));
        assert_eq!(target_dimensions(1000, 2400), (500, 1200));
        assert_eq!(target_dimensions(1200, 1200), (1200, 1200));
    }

    #[test]
    fn test_compress_downsizes_large_photo() {
        let out = compress_image(&png(2400, 1600)).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1200, 800));
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_compress_keeps_small_photo_size() {
        let out = compress_image(&png(64, 48)).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(compress_image(b"not an image"), Err(PhotoError::Decode(_))));
    }

    #[tokio::test]
    async fn test_async_compress() {
        let out = compress_image_async(png(10, 10)).await.unwrap();
        assert!(!out.is_empty());
    }
}
