//! Training-time augmentation
//!
//! Random affine transform (rotation, shift, zoom) followed by an optional
//! horizontal flip, applied to the already-resized RGB image. Pixels sampled
//! outside the source are filled from the nearest edge.
//!
//! Validation and inference images are never augmented.

use image::{Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees, sampled from `±rotation_range`
    pub rotation_range: f32,
    /// Horizontal shift as a fraction of width
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of height
    pub height_shift_range: f32,
    /// Zoom factors are sampled per axis from `[1 - zoom_range, 1 + zoom_range]`
    pub zoom_range: f32,
    /// Flip left-right with probability 0.5
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 25.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Identity transform
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_range == 0.0
            && self.width_shift_range == 0.0
            && self.height_shift_range == 0.0
            && self.zoom_range == 0.0
            && !self.horizontal_flip
    }
}

/// Parameters drawn for one image
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    pub angle_degrees: f32,
    /// Shift in pixels
    pub shift_x: f32,
    pub shift_y: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw transform parameters for an image of the given size
    pub fn sample_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> AffineParams {
        let c = &self.config;
        let mut uniform = |range: f32| -> f32 {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        let angle_degrees = uniform(c.rotation_range);
        let shift_x = uniform(c.width_shift_range) * width as f32;
        let shift_y = uniform(c.height_shift_range) * height as f32;
        let zoom_x = 1.0 + uniform(c.zoom_range);
        let zoom_y = 1.0 + uniform(c.zoom_range);
        let flip = c.horizontal_flip && rng.gen::<f32>() < 0.5;

        AffineParams {
            angle_degrees,
            shift_x,
            shift_y,
            zoom_x,
            zoom_y,
            flip,
        }
    }

    /// Augment one image with freshly drawn parameters
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        if self.config.is_identity() {
            return img.clone();
        }
        let params = self.sample_params(img.width(), img.height(), rng);
        apply_affine(img, &params)
    }
}

/// Inverse-map every output pixel into the source and sample bilinearly.
///
/// A zoom factor below 1 samples a smaller region of the source, which
/// magnifies the leaf.
pub fn apply_affine(img: &RgbImage, params: &AffineParams) -> RgbImage {
    let (width, height) = img.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let theta = params.angle_degrees.to_radians();
    let (sin_t, cos_t) = theta.sin_cos();

    let mut output = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 - cx) * params.zoom_x;
            let dy = (y as f32 - cy) * params.zoom_y;
            let src_x = cx + dx * cos_t + dy * sin_t - params.shift_x;
            let src_y = cy - dx * sin_t + dy * cos_t - params.shift_y;

            let out_x = if params.flip { width - 1 - x } else { x };
            output.put_pixel(out_x, y, sample_nearest_edge(img, src_x, src_y));
        }
    }
    output
}

/// Bilinear sample with coordinates clamped to the image border
fn sample_nearest_edge(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_image() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    #[test]
    fn test_default_matches_training_recipe() {
        let c = AugmentationConfig::default();
        assert_eq!(c.rotation_range, 25.0);
        assert_eq!(c.width_shift_range, 0.2);
        assert_eq!(c.height_shift_range, 0.2);
        assert_eq!(c.zoom_range, 0.2);
        assert!(c.horizontal_flip);
        assert!(AugmentationConfig::none().is_identity());
    }

    #[test]
    fn test_identity_params_leave_image_unchanged() {
        let img = test_image();
        assert_eq!(apply_affine(&img, &AffineParams::identity()), img);
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let img = test_image();
        let params = AffineParams {
            flip: true,
            ..AffineParams::identity()
        };
        let out = apply_affine(&img, &params);
        assert_eq!(out.get_pixel(0, 5), img.get_pixel(31, 5));
        assert_eq!(out.get_pixel(31, 0), img.get_pixel(0, 0));
    }

    #[test]
    fn test_shift_fills_from_nearest_edge() {
        let img = test_image();
        let params = AffineParams {
            shift_x: 10.0,
            ..AffineParams::identity()
        };
        let out = apply_affine(&img, &params);
        // Columns uncovered by the shift repeat the left border.
        assert_eq!(out.get_pixel(0, 3), img.get_pixel(0, 3));
        assert_eq!(out.get_pixel(15, 3), img.get_pixel(5, 3));
    }

    #[test]
    fn test_sampled_params_stay_in_range() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let p = aug.sample_params(224, 224, &mut rng);
            assert!(p.angle_degrees.abs() <= 25.0);
            assert!(p.shift_x.abs() <= 0.2 * 224.0 + 1e-3);
            assert!(p.shift_y.abs() <= 0.2 * 224.0 + 1e-3);
            assert!((0.8..=1.2).contains(&p.zoom_x));
            assert!((0.8..=1.2).contains(&p.zoom_y));
        }
    }

    #[test]
    fn test_augment_is_reproducible_for_a_seed() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let img = test_image();

        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), img.dimensions());
    }
}
