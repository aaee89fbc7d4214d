//! LeafGuard - Plant Leaf Disease Classification
//!
//! Transfer learning on a MobileNetV2-style backbone, written with the Burn
//! framework. Images are organised as `<split>/<class>/<image>` and the class
//! directory names form the label vocabulary.
//!
//! ## Features
//!
//! - Class-labelled directory loading with seeded, per-epoch shuffling
//! - Keras-style augmentation (rotation, shift, zoom, horizontal flip)
//! - Two-phase schedule: frozen backbone, then partial fine-tuning
//! - Early stopping on validation loss, best-accuracy checkpointing
//! - Model artifacts that carry their own label vocabulary
//! - Single-image prediction and validation-set evaluation

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::labels::LabelVocabulary;
pub use dataset::loader::{DatasetSplit, LeafDataset};
pub use inference::predictor::{Prediction, Predictor};
pub use model::artifact::{ArtifactPaths, ModelArtifact, ModelManifest};
pub use model::classifier::{LeafNet, LeafNetConfig};
pub use training::config::TrainingConfig;
pub use utils::error::{LeafGuardError, Result};

/// Input resolution (square) expected by the network
pub const IMAGE_SIZE: usize = 224;

/// Number of colour channels fed to the network
pub const IMAGE_CHANNELS: usize = 3;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
