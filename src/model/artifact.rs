//! Model artifacts on disk
//!
//! A trained model is three files sharing a directory:
//!
//! - `<name>.mpk`: weights, written with Burn's `CompactRecorder`
//! - `<name>.json`: manifest with the architecture, the label vocabulary and
//!   its fingerprint, and where in training the weights came from
//! - `labels.txt`: the vocabulary again, one class per line
//!
//! Loading checks that the manifest, `labels.txt` and the width of the
//! network's output layer all agree, so weights can never be paired with the
//! labels of a different training run.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{CompactRecorder, Recorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::labels::LabelVocabulary;
use crate::model::backbone::Backbone;
use crate::model::classifier::{LeafNet, LeafNetConfig};
use crate::utils::error::{LeafGuardError, Result};

/// Default base name of the weights and manifest files
pub const DEFAULT_MODEL_NAME: &str = "leafguard_mobilenetv2";

pub const LABELS_FILE: &str = "labels.txt";

pub const HISTORY_FILE: &str = "training_history.json";

/// Bumped when the manifest layout changes incompatibly
pub const MANIFEST_VERSION: u32 = 1;

/// File locations for one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub name: String,
}

impl ArtifactPaths {
    pub fn new<P: Into<PathBuf>>(dir: P, name: &str) -> Self {
        Self {
            dir: dir.into(),
            name: name.to_string(),
        }
    }

    /// Path handed to the recorder; it appends `.mpk` itself
    pub fn weights_stem(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    pub fn weights_file(&self) -> PathBuf {
        self.dir.join(format!("{}.mpk", self.name))
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    pub fn labels_file(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    pub fn history_file(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self::new("models", DEFAULT_MODEL_NAME)
    }
}

/// Sidecar describing a weights file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub format_version: u32,
    pub architecture: LeafNetConfig,
    pub labels: LabelVocabulary,
    pub label_fingerprint: String,
    /// Training phase that produced the weights ("head" or "fine-tune")
    pub phase: String,
    /// 1-based epoch within that phase
    pub epoch: usize,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub saved_at: String,
    pub leafguard_version: String,
}

impl ModelManifest {
    pub fn new(
        architecture: LeafNetConfig,
        labels: LabelVocabulary,
        phase: &str,
        epoch: usize,
        val_accuracy: f64,
        val_loss: f64,
    ) -> Self {
        let label_fingerprint = labels.fingerprint();
        Self {
            format_version: MANIFEST_VERSION,
            architecture,
            labels,
            label_fingerprint,
            phase: phase.to_string(),
            epoch,
            val_accuracy,
            val_loss,
            saved_at: Utc::now().to_rfc3339(),
            leafguard_version: crate::VERSION.to_string(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeafGuardError::PathNotFound(path.to_path_buf()));
        }
        let manifest: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Internal consistency: version, fingerprint, head width
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MANIFEST_VERSION {
            return Err(LeafGuardError::Artifact(format!(
                "unsupported manifest version {} (expected {})",
                self.format_version, MANIFEST_VERSION
            )));
        }
        if self.labels.fingerprint() != self.label_fingerprint {
            return Err(LeafGuardError::Artifact(
                "label fingerprint does not match the embedded labels".to_string(),
            ));
        }
        if self.architecture.num_classes != self.labels.len() {
            return Err(LeafGuardError::Artifact(format!(
                "architecture has {} outputs but {} labels are recorded",
                self.architecture.num_classes,
                self.labels.len()
            )));
        }
        Ok(())
    }
}

/// A loaded model together with the vocabulary it was trained with
#[derive(Debug)]
pub struct ModelArtifact<B: Backend> {
    pub model: LeafNet<B>,
    pub vocabulary: LabelVocabulary,
    pub manifest: ModelManifest,
}

impl<B: Backend> ModelArtifact<B> {
    /// Overwrite the weights and manifest at `paths`
    pub fn save(model: &LeafNet<B>, manifest: &ModelManifest, paths: &ArtifactPaths) -> Result<()> {
        std::fs::create_dir_all(&paths.dir)?;

        model
            .clone()
            .save_file(paths.weights_stem(), &CompactRecorder::new())
            .map_err(|e| LeafGuardError::Artifact(format!("failed to save weights: {:?}", e)))?;
        manifest.save(&paths.manifest_file())?;
        Ok(())
    }

    /// Load and cross-check weights, manifest and `labels.txt`.
    ///
    /// A missing `labels.txt` is tolerated (the manifest carries the labels)
    /// but one that disagrees with the manifest is an error.
    pub fn load(paths: &ArtifactPaths, device: &B::Device) -> Result<Self> {
        let manifest = ModelManifest::load(&paths.manifest_file())?;

        let labels_file = paths.labels_file();
        if labels_file.exists() {
            let on_disk = LabelVocabulary::load(&labels_file)?;
            if on_disk != manifest.labels {
                return Err(LeafGuardError::Artifact(format!(
                    "{:?} does not match the labels recorded with the weights ({} vs {} classes)",
                    labels_file,
                    on_disk.len(),
                    manifest.labels.len()
                )));
            }
        } else {
            warn!("{:?} not found, using labels from the manifest", labels_file);
        }

        let weights = paths.weights_file();
        if !weights.exists() {
            return Err(LeafGuardError::PathNotFound(weights));
        }

        let model = manifest
            .architecture
            .init::<B>(device)
            .load_file(paths.weights_stem(), &CompactRecorder::new(), device)
            .map_err(|e| LeafGuardError::Artifact(format!("failed to load weights: {:?}", e)))?;

        if model.num_classes() != manifest.labels.len() {
            return Err(LeafGuardError::Artifact(format!(
                "model has {} output units but {} labels",
                model.num_classes(),
                manifest.labels.len()
            )));
        }

        info!(
            "Loaded model {:?}: {} classes, {} epoch {}, val_accuracy {:.4}",
            weights,
            manifest.labels.len(),
            manifest.phase,
            manifest.epoch,
            manifest.val_accuracy
        );

        Ok(Self {
            model,
            vocabulary: manifest.labels.clone(),
            manifest,
        })
    }

    pub fn input_size(&self) -> usize {
        self.manifest.architecture.input_size
    }
}

/// Replace a model's backbone with weights from a separately saved record
pub fn load_backbone_weights<B: Backend>(
    model: LeafNet<B>,
    path: &Path,
    device: &B::Device,
) -> Result<LeafNet<B>> {
    let record: <Backbone<B> as Module<B>>::Record =
        Recorder::<B>::load(&CompactRecorder::new(), path.to_path_buf(), device).map_err(|e| {
            LeafGuardError::Artifact(format!("failed to load backbone weights {:?}: {:?}", path, e))
        })?;

    let LeafNet { backbone, head } = model;
    Ok(LeafNet {
        backbone: backbone.load_record(record),
        head,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backbone::BackboneConfig;
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray;

    fn vocab(names: &[&str]) -> LabelVocabulary {
        LabelVocabulary::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn tiny(num_classes: usize) -> LeafNetConfig {
        LeafNetConfig::new(BackboneConfig::tiny(), num_classes)
            .with_input_size(32)
            .with_hidden_units(8)
            .with_hidden_units_2(8)
    }

    #[test]
    fn test_paths() {
        let paths = ArtifactPaths::default();
        assert_eq!(paths.weights_file(), PathBuf::from("models/leafguard_mobilenetv2.mpk"));
        assert_eq!(paths.manifest_file(), PathBuf::from("models/leafguard_mobilenetv2.json"));
        assert_eq!(paths.labels_file(), PathBuf::from("models/labels.txt"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path(), "model");
        let device = Default::default();
        let labels = vocab(&["a", "b", "c"]);
        let model = tiny(3).init::<TestBackend>(&device);
        let manifest = ModelManifest::new(tiny(3), labels.clone(), "head", 4, 0.81, 0.52);

        ModelArtifact::save(&model, &manifest, &paths).unwrap();
        labels.save(paths.labels_file()).unwrap();

        let loaded = ModelArtifact::<TestBackend>::load(&paths, &device).unwrap();
        assert_eq!(loaded.vocabulary, labels);
        assert_eq!(loaded.manifest.epoch, 4);
        assert_eq!(loaded.model.num_classes(), 3);
        assert_eq!(loaded.input_size(), 32);
    }

    #[test]
    fn test_mismatched_labels_file_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path(), "model");
        let device = Default::default();
        let model = tiny(2).init::<TestBackend>(&device);
        let manifest = ModelManifest::new(tiny(2), vocab(&["a", "b"]), "head", 1, 0.5, 1.0);

        ModelArtifact::save(&model, &manifest, &paths).unwrap();
        vocab(&["b", "a"]).save(paths.labels_file()).unwrap();

        let err = ModelArtifact::<TestBackend>::load(&paths, &device).unwrap_err();
        assert!(matches!(err, LeafGuardError::Artifact(_)));
    }

    #[test]
    fn test_manifest_detects_tampered_labels() {
        let mut manifest = ModelManifest::new(tiny(2), vocab(&["a", "b"]), "head", 1, 0.5, 1.0);
        assert!(manifest.validate().is_ok());

        manifest.labels = vocab(&["a", "z"]);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_rejects_width_mismatch() {
        let manifest = ModelManifest::new(tiny(3), vocab(&["a", "b"]), "head", 1, 0.5, 1.0);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_backbone_weights_are_loaded() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let source = tiny(2).init::<TestBackend>(&device);
        let stem = dir.path().join("backbone");
        source
            .backbone
            .clone()
            .save_file(&stem, &CompactRecorder::new())
            .unwrap();

        let fresh = tiny(2).init::<TestBackend>(&device);
        let loaded = load_backbone_weights(fresh, &dir.path().join("backbone.mpk"), &device).unwrap();

        let input = burn::tensor::Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected = source.backbone.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = loaded.backbone.forward(input).into_data().to_vec::<f32>().unwrap();
        // The compact recorder stores half precision.
        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 5e-2 * (1.0 + e.abs()));
        }
    }
}
