//! Per-epoch training history, saved next to the model

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochRecord {
    pub phase: String,
    /// 1-based within the phase
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
    /// Whether this epoch's weights overwrote the checkpoint
    pub checkpointed: bool,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    /// The epoch whose weights are in the checkpoint, i.e. the last one saved
    pub fn checkpointed_epoch(&self) -> Option<&EpochRecord> {
        self.epochs.iter().rev().find(|r| r.checkpointed)
    }

    /// Highest validation accuracy, first occurrence on ties
    pub fn best_val_accuracy(&self) -> Option<&EpochRecord> {
        self.epochs.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_accuracy >= r.val_accuracy => Some(b),
            _ => Some(r),
        })
    }

    pub fn phase_epochs(&self, phase: &str) -> usize {
        self.epochs.iter().filter(|r| r.phase == phase).count()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: &str, epoch: usize, val_accuracy: f64, checkpointed: bool) -> EpochRecord {
        EpochRecord {
            phase: phase.to_string(),
            epoch,
            train_loss: 1.0,
            train_accuracy: 0.5,
            val_loss: 1.0,
            val_accuracy,
            learning_rate: 1e-3,
            checkpointed,
            duration_secs: 1.0,
        }
    }

    #[test]
    fn test_best_and_checkpointed_agree() {
        let mut history = TrainingHistory::default();
        history.push(record("head", 1, 0.5, true));
        history.push(record("head", 2, 0.8, true));
        history.push(record("fine-tune", 1, 0.8, false));
        history.push(record("fine-tune", 2, 0.7, false));

        let best = history.best_val_accuracy().unwrap();
        assert_eq!((best.phase.as_str(), best.epoch), ("head", 2));
        assert_eq!(history.checkpointed_epoch(), Some(best));
        assert_eq!(history.phase_epochs("fine-tune"), 2);
    }

    #[test]
    fn test_empty_history() {
        let history = TrainingHistory::default();
        assert!(history.best_val_accuracy().is_none());
        assert!(history.checkpointed_epoch().is_none());
    }
}
