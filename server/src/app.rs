//! Router assembly

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::SharedState;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Credentials are allowed, so origins are an explicit list and methods and
/// headers are mirrored from the preflight rather than wildcarded.
pub fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn router(state: SharedState, origins: Vec<HeaderValue>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/predict/", post(routes::predict::predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tower::ServiceExt;

    use leafguard::backend::DefaultBackend;
    use leafguard::model::backbone::BackboneConfig;
    use leafguard::{LabelVocabulary, LeafNetConfig, Predictor};

    use crate::remedy::{fallback_remedy, RemedyGenerator};
    use crate::state::AppState;

    const BOUNDARY: &str = "leafguard-test-boundary";

    struct Unreachable;

    #[async_trait]
    impl RemedyGenerator for Unreachable {
        async fn generate(&self, _disease_name: &str) -> anyhow::Result<String> {
            Err(anyhow!("connection refused"))
        }
    }

    fn app(label_only: bool) -> Router {
        let device = Default::default();
        let labels = LabelVocabulary::new(vec![
            "Tomato___Late_blight".to_string(),
            "Tomato___healthy".to_string(),
        ])
        .unwrap();
        let model = LeafNetConfig::new(BackboneConfig::tiny(), labels.len())
            .with_input_size(32)
            .init::<DefaultBackend>(&device);
        let predictor = Predictor::new(model, labels, 32, device).unwrap();

        let state = AppState::new(predictor, Arc::new(Unreachable), label_only, "test");
        let origins = DEFAULT_CORS_ORIGINS
            .iter()
            .copied()
            .map(HeaderValue::from_static)
            .collect();
        router(Arc::new(state), origins)
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 30, |x, y| {
            Rgb([(x * 6) as u8, 150, (y * 8) as u8])
        }));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn multipart_request(field: &str, payload: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"leaf.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_predict_falls_back_when_remedy_fails() {
        let response = app(false)
            .oneshot(multipart_request("file", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let label = body["predicted_class"].as_str().unwrap().to_string();
        assert!(label == "Tomato___Late_blight" || label == "Tomato___healthy");

        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
        assert_eq!(body["remedy"].as_str().unwrap(), fallback_remedy(&label));
    }

    #[tokio::test]
    async fn test_label_only_response() {
        let response = app(true)
            .oneshot(multipart_request("file", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let fields = body.as_object().unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key("predicted_class"));
    }

    #[tokio::test]
    async fn test_same_upload_same_answer() {
        let app = app(true);
        let first = json_body(app.clone().oneshot(multipart_request("file", &png_bytes())).await.unwrap()).await;
        let second = json_body(app.oneshot(multipart_request("file", &png_bytes())).await.unwrap()).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_undecodable_upload_is_bad_request() {
        let response = app(false)
            .oneshot(multipart_request("file", b"definitely not an image"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn test_missing_file_field_is_unprocessable() {
        let response = app(false)
            .oneshot(multipart_request("photo", &png_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app(false)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/predict/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin_with_credentials() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/predict/")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
    }

    #[tokio::test]
    async fn test_health_reports_classes() {
        let response = app(false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["num_classes"], 2);
    }
}
