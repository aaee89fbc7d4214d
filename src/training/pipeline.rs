//! End-to-end training run
//!
//! Load the dataset, build the network, run the head phase and the
//! fine-tuning phase, then write `labels.txt` and the training history.

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::burn_dataset::LeafImageDataset;
use crate::dataset::loader::LeafDataset;
use crate::model::artifact::{load_backbone_weights, ArtifactPaths};
use crate::training::config::TrainingConfig;
use crate::training::history::TrainingHistory;
use crate::training::trainer::{CheckpointWriter, Phase, PhasePlan, Trainer, TrainerSettings};
use crate::utils::error::{LeafGuardError, Result};
use crate::utils::{format_duration, format_number};

/// Where the run ended up
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub best_val_accuracy: f64,
    pub best_phase: String,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub num_classes: usize,
    /// Wall time of all epochs in both phases
    pub duration_secs: f64,
    #[serde(skip)]
    pub paths: ArtifactPaths,
}

/// Train a model as described by `config`.
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;

    println!("{}", "Loading Dataset...".cyan());
    let mut dataset = LeafDataset::open(&config.data_dir, &config.train_subdir, &config.valid_subdir)?;
    dataset.stats().print();
    println!();

    if dataset.train.is_empty() {
        return Err(LeafGuardError::Dataset(format!(
            "no training images under {:?}",
            dataset.train.root
        )));
    }
    if dataset.valid.is_empty() {
        return Err(LeafGuardError::Dataset(format!(
            "no validation images under {:?}",
            dataset.valid.root
        )));
    }
    if let Some(max) = config.max_train_samples {
        dataset.train.truncate_shuffled(max, config.seed);
        info!("Training split capped at {} images", dataset.train.len());
    }

    let vocabulary = dataset.vocabulary.clone();
    let model_config = config.model_config(vocabulary.len());
    let paths = config.artifact_paths();
    std::fs::create_dir_all(&paths.dir)?;

    println!("{}", "Creating Model...".cyan());
    let mut model = model_config.init::<B>(device);
    match &config.backbone_weights {
        Some(path) => {
            model = load_backbone_weights(model, path, device)?;
            info!("Loaded pretrained backbone from {:?}", path);
        }
        None => warn!("No pretrained backbone weights given; the backbone starts from random initialisation"),
    }

    let backbone_layers = model.backbone.num_layers();
    println!("  Classes:          {}", vocabulary.len());
    println!("  Backbone layers:  {}", backbone_layers);
    println!("  Train images:     {}", format_number(dataset.train.len()));
    println!("  Valid images:     {}", format_number(dataset.valid.len()));
    println!("  Batch size:       {}", config.batch_size);
    println!("  Artifact:         {:?}", paths.weights_file());
    println!();

    let train_data = LeafImageDataset::from_split(&dataset.train, config.image_size);
    let valid_data = LeafImageDataset::from_split(&dataset.valid, config.image_size);

    let settings = TrainerSettings {
        batch_size: config.batch_size,
        patience: config.early_stopping_patience,
        min_delta: config.early_stopping_min_delta,
        augmentation: config.augmentation.clone(),
        seed: config.seed,
    };
    let writer = CheckpointWriter {
        paths: paths.clone(),
        architecture: model_config.clone(),
        vocabulary: vocabulary.clone(),
    };
    let mut trainer = Trainer::<B>::new(&train_data, &valid_data, settings, writer, device.clone());

    let plans = [
        PhasePlan {
            phase: Phase::Head,
            epochs: config.head_epochs,
            learning_rate: config.head_learning_rate,
            trainable_tail: 0,
        },
        PhasePlan {
            phase: Phase::FineTune,
            epochs: config.fine_tune_epochs,
            learning_rate: config.fine_tune_learning_rate,
            trainable_tail: config.fine_tune_layers.min(backbone_layers),
        },
    ];

    for plan in plans.into_iter().filter(|p| p.epochs > 0) {
        if plan.phase == Phase::FineTune {
            if let Some(message) = fine_tune_warning(config) {
                warn!("{}", message);
            }
        }
        let (trained, outcome) = trainer.run_phase(model, plan)?;
        model = trained;
        info!(
            "Phase '{}' finished after {} epochs (early stop: {})",
            plan.phase.name(),
            outcome.epochs_run,
            outcome.stopped_early
        );
        println!();
    }
    drop(model);

    let history: TrainingHistory = trainer.into_history();
    let saved = history.checkpointed_epoch().cloned().ok_or_else(|| {
        LeafGuardError::Training("no checkpoint was written".to_string())
    })?;

    // Written once, after the last phase, so it always matches the weights on disk.
    vocabulary.save(paths.labels_file())?;
    history.save(&paths.history_file())?;

    let summary = TrainingSummary {
        best_val_accuracy: saved.val_accuracy,
        best_phase: saved.phase.clone(),
        best_epoch: saved.epoch,
        epochs_run: history.epochs.len(),
        num_classes: vocabulary.len(),
        duration_secs: history.epochs.iter().map(|e| e.duration_secs).sum(),
        paths,
    };
    print_summary(&summary);
    Ok(summary)
}

/// Unfreezing a randomly initialised backbone switches its BatchNorm layers
/// from running statistics to batch statistics, which usually shows up as a
/// large loss spike in the first fine-tuning epoch.
fn fine_tune_warning(config: &TrainingConfig) -> Option<String> {
    if config.fine_tune_epochs == 0 || config.fine_tune_layers == 0 || config.backbone_weights.is_some() {
        return None;
    }
    Some(format!(
        "Fine-tuning {} backbone layers without pretrained weights; expect a loss spike while BatchNorm adapts (pass --backbone-weights to avoid it)",
        config.fine_tune_layers
    ))
}

fn print_summary(summary: &TrainingSummary) {
    println!("{}", "Training Complete!".green().bold());
    println!(
        "  Best validation accuracy: {:.2}% ({} epoch {})",
        summary.best_val_accuracy * 100.0,
        summary.best_phase,
        summary.best_epoch
    );
    println!(
        "  Training time: {} over {} epochs",
        format_duration(summary.duration_secs),
        summary.epochs_run
    );
    println!("  Weights:  {:?}", summary.paths.weights_file());
    println!("  Manifest: {:?}", summary.paths.manifest_file());
    println!("  Labels:   {:?}", summary.paths.labels_file());
    println!("  History:  {:?}", summary.paths.history_file());
    println!();
    println!("{}", "Next steps:".cyan().bold());
    println!(
        "  • Evaluate: leafguard evaluate --model-dir {:?}",
        summary.paths.dir
    );
    println!(
        "  • Predict:  leafguard predict --model-dir {:?} <image>",
        summary.paths.dir
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use crate::dataset::labels::LabelVocabulary;
    use crate::dataset::loader::DatasetSplit;
    use crate::inference::evaluate::evaluate;
    use crate::model::artifact::{ModelArtifact, ModelManifest};
    use crate::training::config::BackbonePreset;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use tempfile::tempdir;

    type TestBackend = Autodiff<NdArray>;

    fn write_class(dir: &Path, count: usize, color: [u8; 3]) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(20, 20, Rgb(color))
                .save(dir.join(format!("{}.png", i)))
                .unwrap();
        }
    }

    /// Three trivially separable solid-colour classes
    fn synthetic_config(root: &Path) -> TrainingConfig {
        let classes = [
            ("Tomato___Late_blight", [0, 0, 0]),
            ("Tomato___Leaf_Mold", [255, 255, 255]),
            ("Tomato___healthy", [0, 200, 0]),
        ];
        for (name, color) in classes {
            write_class(&root.join("data/train").join(name), 6, color);
            write_class(&root.join("data/valid").join(name), 2, color);
        }

        TrainingConfig {
            data_dir: root.join("data"),
            output_dir: root.join("models"),
            image_size: 32,
            batch_size: 4,
            head_epochs: 12,
            fine_tune_epochs: 2,
            fine_tune_layers: 2,
            head_learning_rate: 1e-2,
            fine_tune_learning_rate: 1e-3,
            early_stopping_patience: 20,
            augmentation: AugmentationConfig::none(),
            backbone: BackbonePreset::Tiny,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_two_phase_run_writes_consistent_artifacts() {
        let dir = tempdir().unwrap();
        let config = synthetic_config(dir.path());
        let device = Default::default();

        let summary = run_training::<TestBackend>(&config, &device).unwrap();
        let paths = config.artifact_paths();

        let labels = LabelVocabulary::load(paths.labels_file()).unwrap();
        assert_eq!(
            labels.labels(),
            &["Tomato___Late_blight", "Tomato___Leaf_Mold", "Tomato___healthy"]
        );

        let history = TrainingHistory::load(&paths.history_file()).unwrap();
        assert_eq!(history.phase_epochs("head"), 12);
        assert_eq!(history.phase_epochs("fine-tune"), 2);
        assert_eq!(summary.epochs_run, 14);

        // The checkpoint must have been overwritten at least once, otherwise
        // the strict-improvement rule is never exercised.
        let saves: Vec<&crate::training::history::EpochRecord> =
            history.epochs.iter().filter(|e| e.checkpointed).collect();
        assert!(saves.len() >= 2, "only {} checkpoint(s) written", saves.len());
        for pair in saves.windows(2) {
            assert!(pair[1].val_accuracy > pair[0].val_accuracy);
        }

        // The checkpoint holds the first epoch reaching the best accuracy, across both phases.
        let best = history.best_val_accuracy().unwrap();
        let manifest = ModelManifest::load(&paths.manifest_file()).unwrap();
        assert_eq!(manifest.val_accuracy, best.val_accuracy);
        assert_eq!(manifest.val_loss, best.val_loss);
        assert_eq!((manifest.phase.as_str(), manifest.epoch), (best.phase.as_str(), best.epoch));
        assert_eq!(summary.best_val_accuracy, best.val_accuracy);

        // Reloading the half-precision artifact reproduces the recorded metrics.
        let artifact = ModelArtifact::<NdArray>::load(&paths, &device).unwrap();
        assert_eq!(artifact.model.num_classes(), labels.len());
        assert_eq!(artifact.vocabulary, labels);

        let valid = DatasetSplit::scan("valid", &config.data_dir.join("valid"), &artifact.vocabulary).unwrap();
        let dataset = LeafImageDataset::from_split(&valid, artifact.input_size());
        let report = evaluate(&artifact.model, &dataset, config.batch_size, &device, false).unwrap();
        assert_eq!(report.samples, 6);
        assert_eq!(report.accuracy, manifest.val_accuracy);
        assert!(
            (report.loss - manifest.val_loss).abs() < 1e-2,
            "reloaded loss {} vs recorded {}",
            report.loss,
            manifest.val_loss
        );
    }

    #[test]
    fn test_missing_validation_images_fail_fast() {
        let dir = tempdir().unwrap();
        let mut config = synthetic_config(dir.path());
        config.valid_subdir = "empty".to_string();
        std::fs::create_dir_all(dir.path().join("data/empty")).unwrap();

        let err = run_training::<TestBackend>(&config, &Default::default()).unwrap_err();
        assert!(matches!(err, LeafGuardError::Dataset(_)));
        assert!(!config.artifact_paths().labels_file().exists());
    }

    #[test]
    fn test_fine_tune_warning_without_backbone_weights() {
        let mut config = TrainingConfig::default();
        let message = fine_tune_warning(&config).unwrap();
        assert!(message.contains("--backbone-weights"));

        config.fine_tune_epochs = 0;
        assert!(fine_tune_warning(&config).is_none());

        config.fine_tune_epochs = 3;
        config.backbone_weights = Some("mobilenet_v2.mpk".into());
        assert!(fine_tune_warning(&config).is_none());

        config.backbone_weights = None;
        config.fine_tune_layers = 0;
        assert!(fine_tune_warning(&config).is_none());
    }
}
