//! Validation-set evaluation
//!
//! One ordered, unaugmented pass computing mean cross-entropy and accuracy.
//! Used after every training epoch and by the `evaluate` command.

use burn::{
    data::dataloader::batcher::Batcher,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, TensorData},
};
use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use crate::dataset::burn_dataset::{LeafBatch, LeafBatcher, LeafImageDataset};
use crate::dataset::labels::LabelVocabulary;
use crate::model::classifier::LeafNet;
use crate::utils::batch_progress_bar;
use crate::utils::error::{LeafGuardError, Result};
use crate::utils::metrics::{ConfusionMatrix, EpochAccumulator};

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub loss: f64,
    /// Fraction in [0, 1]
    pub accuracy: f64,
    pub samples: usize,
    /// Images that could not be decoded
    pub skipped: usize,
    pub confusion: ConfusionMatrix,
}

impl EvaluationReport {
    pub fn print(&self, vocabulary: Option<&LabelVocabulary>) {
        println!("{}", "Evaluation".cyan().bold());
        println!("  Validation Accuracy: {:.2}%", self.accuracy * 100.0);
        println!("  Validation Loss: {:.4}", self.loss);
        println!("  Samples: {}", self.samples);
        if self.skipped > 0 {
            println!("  {} {} unreadable images skipped", "!".yellow(), self.skipped);
        }

        if let Some(vocabulary) = vocabulary {
            println!();
            println!("  {:<50} {:>8} {:>8}", "class", "recall", "support");
            for (idx, recall) in self.confusion.per_class_recall().iter().enumerate() {
                let name = vocabulary.get(idx).unwrap_or("?");
                let recall = recall
                    .map(|r| format!("{:.2}%", r * 100.0))
                    .unwrap_or_else(|| "-".to_string());
                println!("  {:<50} {:>8} {:>8}", name, recall, self.confusion.support(idx));
            }
        }
    }
}

/// Evaluate `model` over `dataset` in order.
///
/// `model` should be in inference mode, i.e. on a non-autodiff backend
/// (call `.valid()` on a training model first).
pub fn evaluate<B: Backend>(
    model: &LeafNet<B>,
    dataset: &LeafImageDataset,
    batch_size: usize,
    device: &B::Device,
    show_progress: bool,
) -> Result<EvaluationReport> {
    use burn::data::dataset::Dataset;

    let batcher = LeafBatcher::plain();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let num_classes = model.num_classes();

    let mut accumulator = EpochAccumulator::new();
    let mut confusion = ConfusionMatrix::new(num_classes);
    let mut skipped = 0usize;

    let indices: Vec<usize> = (0..dataset.len()).collect();
    let chunks: Vec<&[usize]> = indices.chunks(batch_size.max(1)).collect();
    let pb = show_progress.then(|| batch_progress_bar(chunks.len(), "validate"));

    for chunk in chunks {
        let (items, failed) = dataset.load_batch(chunk);
        skipped += failed;
        if let Some(pb) = &pb {
            pb.inc(1);
        }
        if items.is_empty() {
            continue;
        }

        let batch: LeafBatch<B> = batcher.batch(items, device);
        let size = batch.targets.dims()[0];
        let logits = model.forward(batch.images);

        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();

        let predicted = read_labels(logits.argmax(1).reshape([size]).into_data())?;
        let actual = read_labels(batch.targets.into_data())?;
        if predicted.len() != size || actual.len() != size {
            return Err(LeafGuardError::Inference(format!(
                "batch of {} produced {} predictions and {} targets",
                size,
                predicted.len(),
                actual.len()
            )));
        }

        let mut correct = 0usize;
        for (&p, &a) in predicted.iter().zip(&actual) {
            confusion.add(a as usize, p as usize);
            if p == a {
                correct += 1;
            }
        }
        accumulator.add_batch(loss, correct, size);
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    if skipped > 0 {
        warn!("{} validation images could not be decoded", skipped);
    }

    Ok(EvaluationReport {
        loss: accumulator.mean_loss(),
        accuracy: accumulator.accuracy(),
        samples: accumulator.samples(),
        skipped,
        confusion,
    })
}

/// Class indices from an integer tensor read back to the host
fn read_labels(data: TensorData) -> Result<Vec<i64>> {
    data.convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| LeafGuardError::Inference(format!("failed to read class indices: {:?}", e)))
}
