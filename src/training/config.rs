//! Training configuration
//!
//! Defaults reproduce the reference recipe: 224px inputs, batches of 32,
//! 20 head epochs at 1e-3, then 10 fine-tuning epochs at 1e-5.
//! Loadable from JSON; CLI flags override individual fields.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::artifact::{ArtifactPaths, DEFAULT_MODEL_NAME};
use crate::model::backbone::BackboneConfig;
use crate::model::classifier::LeafNetConfig;
use crate::utils::error::{LeafGuardError, Result};

pub const DEFAULT_DATA_DIR: &str =
    "data/raw/New Plant Diseases Dataset(Augmented)/New Plant Diseases Dataset(Augmented)";

/// Which backbone to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackbonePreset {
    MobilenetV2,
    /// Minimal network for smoke tests on CPU
    Tiny,
}

impl BackbonePreset {
    pub fn config(self) -> BackboneConfig {
        match self {
            BackbonePreset::MobilenetV2 => BackboneConfig::mobilenet_v2(),
            BackbonePreset::Tiny => BackboneConfig::tiny(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory holding the split subdirectories
    pub data_dir: PathBuf,
    pub train_subdir: String,
    pub valid_subdir: String,

    pub output_dir: PathBuf,
    pub model_name: String,

    pub image_size: usize,
    pub batch_size: usize,

    pub head_epochs: usize,
    pub head_learning_rate: f64,

    pub fine_tune_epochs: usize,
    pub fine_tune_learning_rate: f64,
    /// Backbone units unfrozen for fine-tuning, counted from the top
    pub fine_tune_layers: usize,

    /// Epochs without a validation-loss improvement before a phase stops
    pub early_stopping_patience: usize,
    pub early_stopping_min_delta: f64,

    pub augmentation: AugmentationConfig,
    pub backbone: BackbonePreset,
    /// Pretrained backbone record (`.mpk`); random init when absent
    pub backbone_weights: Option<PathBuf>,

    /// Cap on training images, for quick experiments
    pub max_train_samples: Option<usize>,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            train_subdir: "train".to_string(),
            valid_subdir: "valid".to_string(),
            output_dir: PathBuf::from("models"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            image_size: crate::IMAGE_SIZE,
            batch_size: 32,
            head_epochs: 20,
            head_learning_rate: 1e-3,
            fine_tune_epochs: 10,
            fine_tune_learning_rate: 1e-5,
            fine_tune_layers: 4,
            early_stopping_patience: 5,
            early_stopping_min_delta: 0.0,
            augmentation: AugmentationConfig::default(),
            backbone: BackbonePreset::MobilenetV2,
            backbone_weights: None,
            max_train_samples: None,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(LeafGuardError::Config(msg.to_string()));

        if self.image_size < 32 {
            return fail("image_size must be at least 32");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0");
        }
        if self.head_epochs == 0 && self.fine_tune_epochs == 0 {
            return fail("at least one of head_epochs and fine_tune_epochs must be non-zero");
        }
        if self.head_learning_rate <= 0.0 || self.fine_tune_learning_rate <= 0.0 {
            return fail("learning rates must be positive");
        }
        if self.early_stopping_min_delta < 0.0 {
            return fail("early_stopping_min_delta must not be negative");
        }
        if self.model_name.trim().is_empty() {
            return fail("model_name must not be empty");
        }

        let units = self.backbone.config().num_units();
        if self.fine_tune_layers > units {
            return Err(LeafGuardError::Config(format!(
                "fine_tune_layers ({}) exceeds the {} backbone layers",
                self.fine_tune_layers, units
            )));
        }
        Ok(())
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::new(&self.output_dir, &self.model_name)
    }

    /// Network configuration for a vocabulary of `num_classes`
    pub fn model_config(&self, num_classes: usize) -> LeafNetConfig {
        LeafNetConfig::new(self.backbone.config(), num_classes).with_input_size(self.image_size)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load from JSON; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeafGuardError::PathNotFound(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)
            .map_err(|e| LeafGuardError::Config(format!("{:?}: {}", path, e)))?;
        Ok(config)
    }
}
