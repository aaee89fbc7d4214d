//! Epoch loop for one training phase
//!
//! Each phase gets a fresh Adam optimizer and a fresh early-stopping state.
//! The best-accuracy checkpoint is owned by the [`Trainer`] and therefore
//! shared by every phase it runs.

use std::time::Instant;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::burn_dataset::{LeafBatch, LeafBatcher, LeafImageDataset};
use crate::dataset::labels::LabelVocabulary;
use crate::inference::evaluate::evaluate;
use crate::model::artifact::{ArtifactPaths, ModelArtifact, ModelManifest};
use crate::model::classifier::{LeafNet, LeafNetConfig};
use crate::training::callbacks::{BestCheckpoint, EarlyStopping, EarlyStoppingAction};
use crate::training::history::{EpochRecord, TrainingHistory};
use crate::utils::batch_progress_bar;
use crate::utils::error::{LeafGuardError, Result};
use crate::utils::metrics::EpochAccumulator;

/// Adam epsilon matching the Keras default
const ADAM_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Backbone frozen, head trained
    Head,
    /// Top of the backbone unfrozen
    FineTune,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Head => "head",
            Phase::FineTune => "fine-tune",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhasePlan {
    pub phase: Phase,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Number of backbone units (from the top) that receive gradients
    pub trainable_tail: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub epochs_run: usize,
    pub stopped_early: bool,
    /// 1-based epoch whose weights were restored at the end of the phase
    pub restored_epoch: Option<usize>,
}

/// Persists the best weights together with their manifest
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    pub paths: ArtifactPaths,
    pub architecture: LeafNetConfig,
    pub vocabulary: LabelVocabulary,
}

impl CheckpointWriter {
    pub fn write<B: AutodiffBackend>(
        &self,
        model: &LeafNet<B>,
        phase: Phase,
        epoch: usize,
        val_accuracy: f64,
        val_loss: f64,
    ) -> Result<()> {
        let manifest = ModelManifest::new(
            self.architecture.clone(),
            self.vocabulary.clone(),
            phase.name(),
            epoch,
            val_accuracy,
            val_loss,
        );
        ModelArtifact::save(&model.valid(), &manifest, &self.paths)
    }
}

/// Loop settings that do not change between phases
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub batch_size: usize,
    pub patience: usize,
    pub min_delta: f64,
    pub augmentation: AugmentationConfig,
    pub seed: u64,
}

pub struct Trainer<'a, B: AutodiffBackend> {
    train: &'a LeafImageDataset,
    valid: &'a LeafImageDataset,
    settings: TrainerSettings,
    device: B::Device,
    writer: CheckpointWriter,
    checkpoint: BestCheckpoint,
    history: TrainingHistory,
    shuffle_rng: ChaCha8Rng,
    batcher: LeafBatcher,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(
        train: &'a LeafImageDataset,
        valid: &'a LeafImageDataset,
        settings: TrainerSettings,
        writer: CheckpointWriter,
        device: B::Device,
    ) -> Self {
        let batcher = LeafBatcher::augmenting(settings.augmentation.clone(), settings.seed);
        Self {
            train,
            valid,
            shuffle_rng: ChaCha8Rng::seed_from_u64(settings.seed),
            settings,
            device,
            writer,
            checkpoint: BestCheckpoint::new(),
            history: TrainingHistory::default(),
            batcher,
        }
    }

    pub fn into_history(self) -> TrainingHistory {
        self.history
    }

    /// Run up to `plan.epochs` epochs, returning the model with the best
    /// validation loss of this phase.
    pub fn run_phase(&mut self, model: LeafNet<B>, plan: PhasePlan) -> Result<(LeafNet<B>, PhaseOutcome)> {
        println!(
            "{}",
            format!(
                "Phase '{}': {} epochs, lr {:e}, {} trainable backbone layers",
                plan.phase.name(),
                plan.epochs,
                plan.learning_rate,
                plan.trainable_tail
            )
            .green()
            .bold()
        );

        let mut optimizer = AdamConfig::new()
            .with_epsilon(ADAM_EPSILON)
            .init::<B, LeafNet<B>>();
        let mut early_stopping = EarlyStopping::new(self.settings.patience, self.settings.min_delta);
        let mut best_weights: Option<LeafNet<B>> = None;
        let mut model = model;
        let mut outcome = PhaseOutcome {
            epochs_run: 0,
            stopped_early: false,
            restored_epoch: None,
        };

        for epoch in 0..plan.epochs {
            let started = Instant::now();
            println!("{}", format!("Epoch {}/{}", epoch + 1, plan.epochs).yellow().bold());

            let (trained, train_stats) = self.train_epoch(model, &mut optimizer, &plan)?;
            model = trained;

            let report = evaluate(
                &model.valid(),
                self.valid,
                self.settings.batch_size,
                &self.device,
                true,
            )?;
            if report.samples == 0 {
                return Err(LeafGuardError::Training(
                    "validation split produced no decodable images".to_string(),
                ));
            }

            let checkpointed = self.checkpoint.observe(report.accuracy);
            if checkpointed {
                self.writer
                    .write(&model, plan.phase, epoch + 1, report.accuracy, report.loss)?;
                debug!(
                    "Checkpoint written to {:?} (best val_accuracy {:?})",
                    self.writer.paths.weights_file(),
                    self.checkpoint.best_accuracy()
                );
            }

            let action = early_stopping.observe(epoch, report.loss);
            if action == EarlyStoppingAction::Improved {
                best_weights = Some(model.clone());
            }

            println!(
                "  {} loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}{}",
                "→".cyan(),
                train_stats.mean_loss(),
                train_stats.accuracy(),
                report.loss,
                report.accuracy,
                if checkpointed {
                    " (saved)".green().to_string()
                } else {
                    String::new()
                }
            );

            self.history.push(EpochRecord {
                phase: plan.phase.name().to_string(),
                epoch: epoch + 1,
                train_loss: train_stats.mean_loss(),
                train_accuracy: train_stats.accuracy(),
                val_loss: report.loss,
                val_accuracy: report.accuracy,
                learning_rate: plan.learning_rate,
                checkpointed,
                duration_secs: started.elapsed().as_secs_f64(),
            });
            outcome.epochs_run = epoch + 1;

            if action == EarlyStoppingAction::Stop {
                info!(
                    "Early stopping in phase '{}' after epoch {}: val_loss has not improved for {} epochs",
                    plan.phase.name(),
                    epoch + 1,
                    self.settings.patience
                );
                outcome.stopped_early = true;
                break;
            }
        }

        if outcome.epochs_run > 0 && early_stopping.should_restore(outcome.epochs_run - 1) {
            if let (Some(best), Some(best_epoch)) = (best_weights, early_stopping.best_epoch()) {
                info!(
                    "Restoring weights from epoch {} (val_loss {:.4})",
                    best_epoch + 1,
                    early_stopping.best_loss()
                );
                model = best;
                outcome.restored_epoch = Some(best_epoch + 1);
            }
        }

        Ok((model, outcome))
    }

    fn train_epoch<O>(
        &mut self,
        mut model: LeafNet<B>,
        optimizer: &mut O,
        plan: &PhasePlan,
    ) -> Result<(LeafNet<B>, EpochAccumulator)>
    where
        O: Optimizer<LeafNet<B>, B>,
    {
        use burn::data::dataset::Dataset;

        let mut indices: Vec<usize> = (0..self.train.len()).collect();
        indices.shuffle(&mut self.shuffle_rng);

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut stats = EpochAccumulator::new();
        let mut skipped = 0usize;

        let batch_size = self.settings.batch_size.max(1);
        let pb = batch_progress_bar(indices.len().div_ceil(batch_size), "train");

        for chunk in indices.chunks(batch_size) {
            let (items, failed) = self.train.load_batch(chunk);
            skipped += failed;
            if items.is_empty() {
                pb.inc(1);
                continue;
            }

            let batch: LeafBatch<B> = self.batcher.batch(items, &self.device);
            let size = batch.targets.dims()[0];

            let logits = model.forward_with_frozen_backbone(batch.images, plan.trainable_tail);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(LeafGuardError::Training(format!(
                    "non-finite loss in phase '{}'",
                    plan.phase.name()
                )));
            }
            let correct: i64 = logits
                .argmax(1)
                .reshape([size])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();
            stats.add_batch(loss_value, correct as usize, size);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(plan.learning_rate, model, grads);

            pb.inc(1);
            pb.set_message(format!("loss {:.4} acc {:.4}", stats.mean_loss(), stats.accuracy()));
        }
        pb.finish_and_clear();

        if skipped > 0 {
            warn!("{} training images could not be decoded this epoch", skipped);
        }
        if stats.samples() == 0 {
            return Err(LeafGuardError::Training(
                "training split produced no decodable images".to_string(),
            ));
        }

        Ok((model, stats))
    }
}
