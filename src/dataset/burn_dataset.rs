//! Burn Dataset and Batcher integration
//!
//! Images are decoded lazily, one batch at a time, with rayon spreading the
//! decoding of a batch over all cores. Augmentation runs inside the batcher
//! so the dataset itself stays immutable.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::RgbImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::warn;

use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::loader::{DatasetSplit, ImageSample};
use crate::dataset::preprocess::{load_image, resize_to_input, to_chw};
use crate::IMAGE_CHANNELS;
use crate::utils::error::Result;

/// A decoded image already resized to the network input
#[derive(Clone, Debug)]
pub struct LeafImage {
    pub image: RgbImage,
    pub label: usize,
    pub path: PathBuf,
}

impl LeafImage {
    pub fn load(sample: &ImageSample, image_size: usize) -> Result<Self> {
        let img = load_image(&sample.path)?;
        Ok(Self {
            image: resize_to_input(&img, image_size),
            label: sample.label,
            path: sample.path.clone(),
        })
    }
}

/// Lazily-decoding view over one dataset split
#[derive(Debug, Clone)]
pub struct LeafImageDataset {
    samples: Vec<ImageSample>,
    image_size: usize,
}

impl LeafImageDataset {
    pub fn new(samples: Vec<ImageSample>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
        }
    }

    pub fn from_split(split: &DatasetSplit, image_size: usize) -> Self {
        Self::new(split.samples.clone(), image_size)
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Decode the given indices in parallel, preserving their order.
    ///
    /// Undecodable images are dropped with a warning; the second value is how
    /// many were dropped.
    pub fn load_batch(&self, indices: &[usize]) -> (Vec<LeafImage>, usize) {
        let loaded: Vec<Option<LeafImage>> = indices
            .par_iter()
            .map(|&i| self.get(i))
            .collect();

        let skipped = loaded.iter().filter(|item| item.is_none()).count();
        (loaded.into_iter().flatten().collect(), skipped)
    }
}

impl Dataset<LeafImage> for LeafImageDataset {
    fn get(&self, index: usize) -> Option<LeafImage> {
        let sample = self.samples.get(index)?;
        match LeafImage::load(sample, self.image_size) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping image: {}", e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch ready for the network
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// `[batch, 3, height, width]`, values in [0, 1]
    pub images: Tensor<B, 4>,
    /// `[batch]` class indices
    pub targets: Tensor<B, 1, Int>,
}

/// Turns decoded images into tensors, optionally augmenting them first.
///
/// Each call to `batch` draws a new seed from `base_seed` and an internal
/// counter, so a run is reproducible as long as batches are requested in the
/// same order.
#[derive(Debug)]
pub struct LeafBatcher {
    augmenter: Option<Augmenter>,
    base_seed: u64,
    batches_built: AtomicU64,
}

impl Clone for LeafBatcher {
    fn clone(&self) -> Self {
        Self {
            augmenter: self.augmenter.clone(),
            base_seed: self.base_seed,
            batches_built: AtomicU64::new(self.batches_built.load(Ordering::Relaxed)),
        }
    }
}

impl LeafBatcher {
    /// Plain batcher for validation and inference
    pub fn plain() -> Self {
        Self {
            augmenter: None,
            base_seed: 0,
            batches_built: AtomicU64::new(0),
        }
    }

    /// Batcher that augments every image
    pub fn augmenting(config: AugmentationConfig, seed: u64) -> Self {
        Self {
            augmenter: Some(Augmenter::new(config)),
            base_seed: seed,
            batches_built: AtomicU64::new(0),
        }
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmenter.is_some()
    }

    fn pixels(&self, items: &[LeafImage]) -> Vec<f32> {
        match &self.augmenter {
            None => items.par_iter().flat_map_iter(|item| to_chw(&item.image)).collect(),
            Some(augmenter) => {
                let counter = self.batches_built.fetch_add(1, Ordering::Relaxed);
                let mut batch_rng = ChaCha8Rng::seed_from_u64(self.base_seed ^ counter.rotate_left(32));
                let seeds: Vec<u64> = items.iter().map(|_| batch_rng.gen()).collect();

                items
                    .par_iter()
                    .zip(seeds.par_iter())
                    .flat_map_iter(|(item, &seed)| {
                        let mut rng = ChaCha8Rng::seed_from_u64(seed);
                        to_chw(&augmenter.augment(&item.image, &mut rng))
                    })
                    .collect()
            }
        }
    }
}

impl<B: Backend> Batcher<B, LeafImage, LeafBatch<B>> for LeafBatcher {
    fn batch(&self, items: Vec<LeafImage>, device: &B::Device) -> LeafBatch<B> {
        let batch_size = items.len();
        let (width, height) = items
            .first()
            .map(|item| item.image.dimensions())
            .unwrap_or((0, 0));

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                self.pixels(&items),
                [batch_size, IMAGE_CHANNELS, height as usize, width as usize],
            ),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LeafBatch { images, targets }
    }
}
