//! Dataset module: directory scanning, label vocabulary, preprocessing,
//! augmentation and Burn `Dataset`/`Batcher` integration.
//!
//! Expected layout:
//!
//! ```text
//! data_root/
//! ├── train/
//! │   ├── Apple___Apple_scab/
//! │   ├── Apple___Black_rot/
//! │   └── ...
//! └── valid/
//!     ├── Apple___Apple_scab/
//!     └── ...
//! ```

pub mod augmentation;
pub mod burn_dataset;
pub mod labels;
pub mod loader;
pub mod preprocess;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{LeafBatch, LeafBatcher, LeafImage, LeafImageDataset};
pub use labels::LabelVocabulary;
pub use loader::{DatasetSplit, DatasetStats, ImageSample, LeafDataset};
