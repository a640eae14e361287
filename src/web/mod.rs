//! HTTP surface: the generate endpoint, health, debug and the uploaded files.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::config::{Config, Environment};
use crate::constants::UPLOADS_ROUTE;
use crate::error::{ErrorBody, PixtaleError};
use crate::pipeline::{RequestStage, StoryPipeline};
use crate::speech::TranslateSpeech;
use crate::story::ChatStoryTeller;

mod cors;
mod upload;

use cors::cors_layer;
use upload::read_image_upload;

/// Room for the multipart framing around a maximum-size file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub(crate) struct AppState {
    config: Arc<Config>,
    pipeline: StoryPipeline,
}

impl AppState {
    pub(crate) fn new(config: Config, pipeline: StoryPipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }

    /// 500 response for a failed generation; detail only leaks in development.
    fn generation_failed(&self, err: &PixtaleError) -> Response {
        let detail = if self.config.environment.exposes_errors() {
            err.to_string()
        } else {
            "An unexpected error occurred".to_string()
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new(
                "Failed to generate story and audio",
                Some(detail),
            )),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    success: bool,
    story: String,
    audio_url: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let environment = if state.config.api_configured() {
        "Environment: OK"
    } else {
        "Missing NVIDIA_API_KEY"
    };
    Json(json!({
        "status": "ok",
        "message": "PixTale API is running",
        "environment": environment,
    }))
}

async fn debug_handler(State(state): State<AppState>) -> Result<Json<Value>, PixtaleError> {
    let uploads = state.pipeline.store().stats().await?;
    Ok(Json(json!({
        "success": true,
        "environment": {
            "version": env!("CARGO_PKG_VERSION"),
            "mode": state.config.environment,
            "api_configured": state.config.api_configured(),
            "port": state.config.port.get(),
        },
        "uploads": uploads,
    })))
}

async fn upload_test_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, PixtaleError> {
    let upload = read_image_upload(&mut multipart, state.config.max_upload_bytes).await?;
    let stored = state.pipeline.store().save_test_upload(&upload).await?;
    let filename = stored
        .path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Json(json!({
        "success": true,
        "message": "Test upload successful",
        "file": {
            "filename": filename,
            "path": stored.path.display().to_string(),
            "size": stored.size,
            "mimetype": upload.content_type,
        },
    })))
}

async fn generate_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_image_upload(&mut multipart, state.config.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(err) => return err.into_response(),
    };

    match state.pipeline.run(&upload).await {
        Ok(generated) => {
            info!("Returning {} to client", generated.audio_url);
            RequestStage::Responded.reached(generated.id);
            Json(GenerateResponse {
                success: true,
                story: generated.story,
                audio_url: generated.audio_url,
            })
            .into_response()
        }
        Err(failure) => {
            error!("Error generating story: {}", failure);
            state.generation_failed(&failure.error)
        }
    }
}

fn create_router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.pipeline.store().dir());
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/api/health", axum::routing::get(health_handler))
        .route("/api/debug", axum::routing::get(debug_handler))
        .route(
            "/api/debug/upload-test",
            axum::routing::post(upload_test_handler),
        )
        .route("/api/generate", axum::routing::post(generate_handler))
        .nest_service(UPLOADS_ROUTE, uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// The full application wired to the real story model and speech service.
pub fn build_app(config: Config) -> Result<Router, PixtaleError> {
    let teller = Arc::new(ChatStoryTeller::from_config(&config));
    let speech = Arc::new(TranslateSpeech::from_config(&config)?);
    let pipeline = StoryPipeline::new(&config, teller, speech);
    Ok(create_router(AppState::new(config, pipeline)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Binds the listener and serves until Ctrl-C.
pub async fn setup_server(config: Config) -> Result<(), anyhow::Error> {
    if !config.api_configured() {
        error!("NVIDIA_API_KEY is not set, story generation will fail until it is");
    }
    if config.environment == Environment::Development {
        info!("Running in development mode, error detail is returned to callers");
    }
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let addr = format!("{}:{}", config.listen_address, config.port);
    let app = build_app(config)?;

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pipeline::tests::{FakeSpeech, FakeTeller, jpeg_upload};
    use crate::speech::SpeechEngine;
    use crate::story::StoryTeller;
    use axum::body::Body;
    use axum::http::{Request, header::CONTENT_TYPE};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "pixtale-test-boundary";

    fn app_with(
        config: Config,
        teller: Arc<dyn StoryTeller>,
        speech: Arc<dyn SpeechEngine>,
    ) -> Router {
        let pipeline = StoryPipeline::new(&config, teller, speech);
        create_router(AppState::new(config, pipeline))
    }

    fn multipart_request(
        uri: &str,
        field: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
                 filename=\"holiday.jpg\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn generate_returns_story_and_audio_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_with(
            Config::new(dir.path()),
            FakeTeller::telling("A cat sat on a mat."),
            FakeSpeech::working(),
        );
        let upload = jpeg_upload(2000, 1000);

        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/generate",
                "image",
                "image/jpeg",
                &upload.bytes,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["story"], "A cat sat on a mat.");
        let audio_url = body["audioUrl"].as_str().expect("audioUrl").to_string();
        assert!(audio_url.starts_with("/uploads/story-") && audio_url.ends_with(".mp3"));

        let request = Request::builder()
            .uri(&audio_url)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.starts_with(b"ID3"));
    }

    #[tokio::test]
    async fn failure_hides_detail_in_production() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_with(
            Config::new(dir.path()),
            FakeTeller::failing(),
            FakeSpeech::working(),
        );
        let upload = jpeg_upload(16, 16);

        let response = app
            .oneshot(multipart_request(
                "/api/generate",
                "image",
                "image/jpeg",
                &upload.bytes,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Failed to generate story and audio");
        assert_eq!(body["error"], "An unexpected error occurred");
    }

    #[tokio::test]
    async fn failure_shows_detail_in_development() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::new(dir.path());
        config.environment = Environment::Development;
        let app = app_with(config, FakeTeller::failing(), FakeSpeech::working());
        let upload = jpeg_upload(16, 16);

        let response = app
            .oneshot(multipart_request(
                "/api/generate",
                "image",
                "image/jpeg",
                &upload.bytes,
            ))
            .await
            .unwrap();
        let body = read_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .expect("error")
                .contains("quota exceeded")
        );
    }

    #[tokio::test]
    async fn rejects_non_image_uploads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let speech = FakeSpeech::working();
        let app = app_with(
            Config::new(dir.path()),
            FakeTeller::telling("nope"),
            speech.clone(),
        );

        let response = app
            .oneshot(multipart_request(
                "/api/generate",
                "image",
                "application/pdf",
                b"%PDF-1.4",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["message"], "Only JPG and PNG image files are allowed");
        assert_eq!(speech.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_missing_file_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_with(
            Config::new(dir.path()),
            FakeTeller::telling("nope"),
            FakeSpeech::working(),
        );

        let response = app
            .oneshot(multipart_request(
                "/api/generate",
                "caption",
                "image/jpeg",
                b"hello",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["message"], "No image file provided");
    }

    #[tokio::test]
    async fn rejects_oversized_uploads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::new(dir.path());
        config.max_upload_bytes = 1024 * 1024;
        let app = app_with(config, FakeTeller::telling("nope"), FakeSpeech::working());
        let bytes = vec![0u8; 1024 * 1024 + 1];

        let response = app
            .oneshot(multipart_request(
                "/api/generate",
                "file",
                "image/png",
                &bytes,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["message"], "File too large. Max size is 1MB");
    }

    #[tokio::test]
    async fn small_limits_are_reported_in_kilobytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::new(dir.path());
        config.max_upload_bytes = 1024;
        let app = app_with(config, FakeTeller::telling("nope"), FakeSpeech::working());
        let bytes = vec![0u8; 300 * 1024];

        let response = app
            .oneshot(multipart_request(
                "/api/generate",
                "image",
                "image/jpeg",
                &bytes,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["message"], "File too large. Max size is 1KB");
    }

    #[tokio::test]
    async fn health_reports_missing_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_with(
            Config::new(dir.path()),
            FakeTeller::telling("x"),
            FakeSpeech::working(),
        );
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let body = read_json(app.oneshot(request).await.unwrap()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environment"], "Missing NVIDIA_API_KEY");
    }

    #[tokio::test]
    async fn debug_counts_generated_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::new(dir.path());
        config.api_key = Some("secret".to_string());
        let app = app_with(config, FakeTeller::telling("Hi."), FakeSpeech::working());
        let upload = jpeg_upload(16, 16);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(multipart_request(
                    "/api/generate",
                    "image",
                    "image/jpeg",
                    &upload.bytes,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/debug/upload-test",
                "image",
                "image/jpeg",
                &upload.bytes,
            ))
            .await
            .unwrap();
        let body = read_json(response).await;
        assert_eq!(body["message"], "Test upload successful");
        assert!(
            body["file"]["filename"]
                .as_str()
                .expect("filename")
                .starts_with("test-")
        );

        let request = Request::builder()
            .uri("/api/debug")
            .body(Body::empty())
            .unwrap();
        let body = read_json(app.oneshot(request).await.unwrap()).await;
        assert_eq!(body["environment"]["api_configured"], true);
        assert_eq!(body["environment"]["mode"], "production");
        assert_eq!(body["uploads"]["image_count"], 2);
        assert_eq!(body["uploads"]["audio_count"], 2);
        assert_eq!(
            body["uploads"]["recent_audio"]
                .as_array()
                .expect("recent audio")
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_with(
            Config::new(dir.path()),
            FakeTeller::telling("x"),
            FakeSpeech::working(),
        );
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/generate")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://localhost:5173"
        );
    }
}
