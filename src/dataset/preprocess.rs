//! Image preprocessing shared by training, evaluation and serving.
//!
//! Every image goes through the same steps: decode, convert to RGB, resize
//! to the square network input with nearest-neighbour sampling (the
//! interpolation Keras' `load_img` and `flow_from_directory` default to),
//! then lay out as CHW floats in [0, 1].

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};

use crate::utils::error::{LeafGuardError, Result};
use crate::IMAGE_CHANNELS;

/// Open and decode an image file
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| LeafGuardError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| LeafGuardError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| LeafGuardError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Decode an in-memory image (e.g. an HTTP upload), sniffing the format
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(LeafGuardError::ImageDecode("empty upload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| LeafGuardError::ImageDecode(e.to_string()))
}

/// Resize to `size` x `size` RGB, ignoring aspect ratio
pub fn resize_to_input(img: &DynamicImage, size: usize) -> RgbImage {
    img.resize_exact(size as u32, size as u32, FilterType::Nearest)
        .to_rgb8()
}

/// CHW float layout scaled to [0, 1]
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; IMAGE_CHANNELS * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        data[offset] = pixel[0] as f32 / 255.0;
        data[plane + offset] = pixel[1] as f32 / 255.0;
        data[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }

    data
}

/// Full inference path for one image
pub fn preprocess(img: &DynamicImage, size: usize) -> Vec<f32> {
    to_chw(&resize_to_input(img, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(w, h, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 255]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_to_chw_layout_and_range() {
        let img = RgbImage::from_fn(2, 2, |x, y| Rgb([255, (x * 255) as u8, (y * 255) as u8]));
        let data = to_chw(&img);

        assert_eq!(data.len(), 12);
        assert_eq!(&data[0..4], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&data[4..8], &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(&data[8..12], &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_preprocess_resizes() {
        let data = preprocess(&gradient(31, 17), 16);
        assert_eq!(data.len(), 3 * 16 * 16);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_resize_does_not_blend_pixels() {
        // Two solid halves; nearest sampling must never invent an in-between colour.
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        }));
        let resized = resize_to_input(&img, 7);

        assert_eq!(resized.dimensions(), (7, 7));
        for pixel in resized.pixels() {
            assert!(pixel.0 == [0, 0, 0] || pixel.0 == [255, 255, 255], "blended pixel {:?}", pixel);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(LeafGuardError::ImageDecode(_))
        ));
        assert!(decode_image(&[]).is_err());
    }

    #[test]
    fn test_decode_png_roundtrip() {
        let mut bytes = Vec::new();
        gradient(8, 8)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let img = decode_image(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (8, 8));
    }
}
