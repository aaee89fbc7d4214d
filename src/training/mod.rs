//! Training: configuration, callbacks, the per-phase loop and the full run

pub mod callbacks;
pub mod config;
pub mod history;
pub mod pipeline;
pub mod trainer;

pub use callbacks::{BestCheckpoint, EarlyStopping, EarlyStoppingAction};
pub use config::{BackbonePreset, TrainingConfig};
pub use history::{EpochRecord, TrainingHistory};
pub use pipeline::{run_training, TrainingSummary};
pub use trainer::{Phase, PhasePlan, Trainer};
