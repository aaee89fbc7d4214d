//! Inference: single-image prediction and validation-set evaluation

pub mod evaluate;
pub mod predictor;

pub use evaluate::{evaluate, EvaluationReport};
pub use predictor::{argmax, Prediction, Predictor};
