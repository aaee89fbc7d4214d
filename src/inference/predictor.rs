//! Single-image prediction
//!
//! Loads once, predicts many times. The preprocessing is the same code path
//! the trainer uses for validation images.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::dataset::labels::LabelVocabulary;
use crate::dataset::preprocess::{decode_image, load_image, preprocess};
use crate::model::artifact::{ArtifactPaths, ModelArtifact};
use crate::model::classifier::LeafNet;
use crate::utils::error::{LeafGuardError, Result};
use crate::IMAGE_CHANNELS;

/// Outcome of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    /// Probability of `label`, in [0, 1]
    pub confidence: f32,
    /// Softmax output, one entry per class
    pub probabilities: Vec<f32>,
    /// Treatment advice, filled in by the serving layer when enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
    pub inference_time_ms: f64,
}

impl Prediction {
    /// Build from a probability vector. Ties go to the lowest index.
    pub fn from_probabilities(
        probabilities: Vec<f32>,
        vocabulary: &LabelVocabulary,
        inference_time: Duration,
    ) -> Result<Self> {
        let (class_index, confidence) = argmax(&probabilities).ok_or_else(|| {
            LeafGuardError::Inference("model produced an empty probability vector".to_string())
        })?;
        let label = vocabulary
            .get(class_index)
            .ok_or_else(|| {
                LeafGuardError::Inference(format!(
                    "class index {} outside a vocabulary of {}",
                    class_index,
                    vocabulary.len()
                ))
            })?
            .to_string();

        Ok(Self {
            class_index,
            label,
            confidence,
            probabilities,
            remedy: None,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        })
    }

    pub fn with_remedy(mut self, remedy: String) -> Self {
        self.remedy = Some(remedy);
        self
    }

    /// The `k` most likely classes as `(index, probability)`, most likely first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> = self.probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        indexed.truncate(k);
        indexed
    }
}

/// First index holding the maximum value; NaN entries are ignored
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// A model plus its vocabulary, ready to classify images
#[derive(Debug, Clone)]
pub struct Predictor<B: Backend> {
    model: LeafNet<B>,
    vocabulary: LabelVocabulary,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model: LeafNet<B>,
        vocabulary: LabelVocabulary,
        image_size: usize,
        device: B::Device,
    ) -> Result<Self> {
        if model.num_classes() != vocabulary.len() {
            return Err(LeafGuardError::Model(format!(
                "model has {} outputs but the vocabulary has {} labels",
                model.num_classes(),
                vocabulary.len()
            )));
        }
        Ok(Self {
            model,
            vocabulary,
            image_size,
            device,
        })
    }

    pub fn from_artifact(artifact: ModelArtifact<B>, device: B::Device) -> Result<Self> {
        let image_size = artifact.input_size();
        Self::new(artifact.model, artifact.vocabulary, image_size, device)
    }

    /// Load the artifact at `paths` and wrap it
    pub fn load(paths: &ArtifactPaths, device: B::Device) -> Result<Self> {
        let artifact = ModelArtifact::<B>::load(paths, &device)?;
        Self::from_artifact(artifact, device)
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Class probabilities for one decoded image
    pub fn probabilities(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let size = self.image_size;
        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(preprocess(img, size), [1, IMAGE_CHANNELS, size, size]),
            &self.device,
        );

        self.model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| LeafGuardError::Inference(format!("{:?}", e)))
    }

    pub fn predict_image(&self, img: &DynamicImage) -> Result<Prediction> {
        let start = Instant::now();
        let probabilities = self.probabilities(img)?;
        Prediction::from_probabilities(probabilities, &self.vocabulary, start.elapsed())
    }

    /// Decode and classify raw upload bytes
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        self.predict_image(&decode_image(bytes)?)
    }

    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        self.predict_image(&load_image(path)?)
    }

    /// Classify every image under `dir`, in path order. Failures are returned per file.
    pub fn predict_dir(&self, dir: &Path) -> Vec<(PathBuf, Result<Prediction>)> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| crate::dataset::loader::is_image_file(p))
            .collect();
        files.sort();

        files
            .into_iter()
            .map(|path| {
                let result = self.predict_path(&path);
                (path, result)
            })
            .collect()
    }
}
