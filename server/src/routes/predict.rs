//! Image upload and classification

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use leafguard::LeafGuardError;

use crate::error::ApiError;
use crate::remedy::remedy_or_fallback;
use crate::state::SharedState;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub predicted_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

/// POST /predict/
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::Unprocessable(format!("expected a multipart form: {}", e)))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;
            upload = Some(bytes);
            break;
        }
    }
    let bytes = upload.ok_or_else(|| ApiError::Unprocessable(format!("field '{}' is required", FILE_FIELD)))?;

    let predictor = state.predictor.clone();
    let prediction = tokio::task::spawn_blocking(move || {
        let predictor = predictor
            .lock()
            .map_err(|_| LeafGuardError::Inference("predictor lock poisoned".to_string()))?;
        predictor.predict_bytes(&bytes)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("inference task failed: {}", e)))??;

    info!(
        "Predicted {} ({:.1}%) in {:.1}ms",
        prediction.label,
        prediction.confidence * 100.0,
        prediction.inference_time_ms
    );

    if state.label_only {
        return Ok(Json(PredictResponse {
            predicted_class: prediction.label,
            confidence: None,
            remedy: None,
        }));
    }

    let remedy = remedy_or_fallback(state.remedy.as_ref(), &prediction.label).await;
    let prediction = prediction.with_remedy(remedy);

    Ok(Json(PredictResponse {
        predicted_class: prediction.label,
        confidence: Some(prediction.confidence),
        remedy: prediction.remedy,
    }))
}
