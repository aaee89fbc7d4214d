//! Metric accumulators for training and evaluation passes

use serde::{Deserialize, Serialize};

/// Running loss/accuracy over one pass of a dataset.
///
/// Loss is weighted by batch size so that a short final batch does not skew
/// the mean, which matches how Keras reports `loss` and `val_loss`.
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    loss_sum: f64,
    correct: usize,
    total: usize,
    batches: usize,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch given its mean loss, correct count and size
    pub fn add_batch(&mut self, mean_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += mean_loss * batch_size as f64;
        self.correct += correct;
        self.total += batch_size;
        self.batches += 1;
    }

    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.loss_sum / self.total as f64
    }

    /// Fraction in [0, 1]
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    pub fn samples(&self) -> usize {
        self.total
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}

/// Confusion matrix indexed `[actual][predicted]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// Labels outside the class range are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.counts[actual][predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|row| row.iter().sum::<usize>()).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.num_classes).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }

    /// Recall of each class, `None` where the class has no samples
    pub fn per_class_recall(&self) -> Vec<Option<f64>> {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let support: usize = row.iter().sum();
                (support > 0).then(|| row[i] as f64 / support as f64)
            })
            .collect()
    }

    pub fn support(&self, class_idx: usize) -> usize {
        self.counts
            .get(class_idx)
            .map(|row| row.iter().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_weights_loss_by_batch_size() {
        let mut acc = EpochAccumulator::new();
        acc.add_batch(1.0, 30, 32);
        acc.add_batch(3.0, 0, 8);

        assert_eq!(acc.samples(), 40);
        assert_eq!(acc.batches(), 2);
        assert!((acc.mean_loss() - (32.0 + 24.0) / 40.0).abs() < 1e-9);
        assert!((acc.accuracy() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = EpochAccumulator::new();
        assert_eq!(acc.mean_loss(), 0.0);
        assert_eq!(acc.accuracy(), 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(2, 2);
        cm.add(5, 0);

        assert_eq!(cm.total(), 4);
        assert_eq!(cm.get(0, 1), 1);
        assert!((cm.accuracy() - 0.75).abs() < 1e-9);
        assert_eq!(cm.per_class_recall()[0], Some(0.5));
        assert_eq!(cm.support(2), 1);
    }

    #[test]
    fn test_recall_for_unseen_class() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        assert_eq!(cm.per_class_recall()[1], None);
    }
}
