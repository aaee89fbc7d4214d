//! Per-epoch training policies
//!
//! [`EarlyStopping`] watches validation loss within one phase.
//! [`BestCheckpoint`] watches validation accuracy across the whole run and
//! decides when the saved weights get overwritten.

/// Stop a phase once validation loss has not improved for `patience` epochs.
///
/// An epoch improves when its loss is below `best - min_delta`.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best_loss: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

/// What happened to an epoch's validation loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStoppingAction {
    /// New best: the caller should remember the current weights
    Improved,
    Continue,
    Stop,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta: min_delta.abs(),
            best_loss: f64::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    /// Record the validation loss of `epoch` (0-based within the phase)
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> EarlyStoppingAction {
        if val_loss < self.best_loss - self.min_delta {
            self.best_loss = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return EarlyStoppingAction::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            EarlyStoppingAction::Stop
        } else {
            EarlyStoppingAction::Continue
        }
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Whether the weights at the end of the phase differ from the best ones
    pub fn should_restore(&self, last_epoch: usize) -> bool {
        self.best_epoch.is_some_and(|best| best != last_epoch)
    }
}

/// Keep only the weights with the highest validation accuracy seen so far.
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    best_accuracy: f64,
}

impl Default for BestCheckpoint {
    fn default() -> Self {
        Self {
            best_accuracy: f64::NEG_INFINITY,
        }
    }
}

impl BestCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `val_accuracy` strictly beats every earlier epoch.
    /// The caller must then persist the weights.
    pub fn observe(&mut self, val_accuracy: f64) -> bool {
        if val_accuracy > self.best_accuracy {
            self.best_accuracy = val_accuracy;
            true
        } else {
            false
        }
    }

    /// `None` until the first observation
    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_accuracy.is_finite().then_some(self.best_accuracy)
    }
}
