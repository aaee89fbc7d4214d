//! Directory-tree dataset loader
//!
//! Scans `<root>/<split>/<class>/**/<image>` and maps every image to the
//! index of its class in the training vocabulary.

use std::path::{Path, PathBuf};

use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dataset::labels::LabelVocabulary;
use crate::utils::error::{LeafGuardError, Result};
use crate::utils::format_number;

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "ppm", "tif", "tiff"];

/// A single image on disk with its class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    /// Index into the label vocabulary
    pub label: usize,
}

/// Whether a path carries one of the accepted image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Names of the immediate subdirectories of `dir`, sorted
pub fn discover_classes(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(LeafGuardError::PathNotFound(dir.to_path_buf()));
    }

    let mut classes = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if !name.starts_with('.') => classes.push(name),
            Ok(_) => {}
            Err(raw) => warn!("Skipping class directory with non UTF-8 name: {:?}", raw),
        }
    }
    classes.sort();
    Ok(classes)
}

/// One split (train or valid) of the dataset
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub name: String,
    pub root: PathBuf,
    pub samples: Vec<ImageSample>,
}

impl DatasetSplit {
    /// Index every image under `root`, labelling it through `vocabulary`.
    ///
    /// A class directory that is not in the vocabulary is an error. A
    /// vocabulary class with no directory is only worth a warning.
    pub fn scan(name: &str, root: &Path, vocabulary: &LabelVocabulary) -> Result<Self> {
        let classes = discover_classes(root)?;

        for class_name in &classes {
            if vocabulary.index_of(class_name).is_none() {
                return Err(LeafGuardError::Dataset(format!(
                    "class '{}' in split '{}' is not part of the training vocabulary",
                    class_name, name
                )));
            }
        }
        for label in vocabulary.iter() {
            if !classes.iter().any(|c| c == label) {
                warn!("Split '{}' has no directory for class '{}'", name, label);
            }
        }

        let mut samples = Vec::new();
        for class_name in &classes {
            let label = vocabulary
                .index_of(class_name)
                .ok_or_else(|| LeafGuardError::Dataset(format!("unknown class '{}'", class_name)))?;

            let mut files: Vec<PathBuf> = WalkDir::new(root.join(class_name))
                .min_depth(1)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();

            debug!("Split '{}' class '{}' (label {}): {} images", name, class_name, label, files.len());
            samples.extend(files.into_iter().map(|path| ImageSample { path, label }));
        }

        info!("Split '{}': {} images in {} classes", name, samples.len(), classes.len());

        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Keep a seeded random subset of at most `max` samples
    pub fn truncate_shuffled(&mut self, max: usize, seed: u64) {
        if self.samples.len() <= max {
            return;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
        self.samples.truncate(max);
    }

    /// Sample count per label index
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for sample in &self.samples {
            if let Some(c) = counts.get_mut(sample.label) {
                *c += 1;
            }
        }
        counts
    }
}

/// The train/valid pair plus the vocabulary derived from the train split
#[derive(Debug, Clone)]
pub struct LeafDataset {
    pub root: PathBuf,
    pub vocabulary: LabelVocabulary,
    pub train: DatasetSplit,
    pub valid: DatasetSplit,
}

impl LeafDataset {
    /// Open `<root>/<train_dir>` and `<root>/<valid_dir>`.
    pub fn open(root: &Path, train_dir: &str, valid_dir: &str) -> Result<Self> {
        info!("Loading dataset from: {:?}", root);
        if !root.is_dir() {
            return Err(LeafGuardError::PathNotFound(root.to_path_buf()));
        }

        let train_root = root.join(train_dir);
        let classes = discover_classes(&train_root)?;
        if classes.is_empty() {
            return Err(LeafGuardError::Dataset(format!(
                "no class directories found in {:?}",
                train_root
            )));
        }
        let vocabulary = LabelVocabulary::from_class_names(classes)?;
        info!("Found {} classes", vocabulary.len());

        let train = DatasetSplit::scan(train_dir, &train_root, &vocabulary)?;
        let valid = DatasetSplit::scan(valid_dir, &root.join(valid_dir), &vocabulary)?;

        Ok(Self {
            root: root.to_path_buf(),
            vocabulary,
            train,
            valid,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn stats(&self) -> DatasetStats {
        let train_counts = self.train.class_counts(self.num_classes());
        let valid_counts = self.valid.class_counts(self.num_classes());
        let per_class = self
            .vocabulary
            .iter()
            .zip(train_counts.into_iter().zip(valid_counts))
            .map(|(name, (train, valid))| ClassCount {
                name: name.to_string(),
                train,
                valid,
            })
            .collect();

        DatasetStats {
            root: self.root.clone(),
            per_class,
            train_total: self.train.len(),
            valid_total: self.valid.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassCount {
    pub name: String,
    pub train: usize,
    pub valid: usize,
}

/// Per-class image counts for both splits
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub root: PathBuf,
    pub per_class: Vec<ClassCount>,
    pub train_total: usize,
    pub valid_total: usize,
}

impl DatasetStats {
    pub fn print(&self) {
        println!("{}", "Dataset Statistics".cyan().bold());
        println!("  Root:       {:?}", self.root);
        println!("  Classes:    {}", self.per_class.len());
        println!("  Train:      {}", format_number(self.train_total));
        println!("  Validation: {}", format_number(self.valid_total));
        println!();
        println!("  {:<4} {:<50} {:>8} {:>8}", "idx", "class", "train", "valid");
        for (idx, class) in self.per_class.iter().enumerate() {
            let valid = if class.valid == 0 {
                "0".yellow().to_string()
            } else {
                class.valid.to_string()
            };
            println!("  {:<4} {:<50} {:>8} {:>8}", idx, class.name, class.train, valid);
        }
    }
}
