//! Shared state: the model loaded at startup and the remedy client

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};

use leafguard::backend::DefaultBackend;
use leafguard::Predictor;

use crate::remedy::RemedyGenerator;

pub struct AppState {
    /// Loaded once; forward passes run on blocking threads
    pub predictor: Arc<Mutex<Predictor<DefaultBackend>>>,
    pub remedy: Arc<dyn RemedyGenerator>,
    /// Respond with `predicted_class` only
    pub label_only: bool,
    pub num_classes: usize,
    pub model_name: String,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        predictor: Predictor<DefaultBackend>,
        remedy: Arc<dyn RemedyGenerator>,
        label_only: bool,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            num_classes: predictor.vocabulary().len(),
            predictor: Arc::new(Mutex::new(predictor)),
            remedy,
            label_only,
            model_name: model_name.into(),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
