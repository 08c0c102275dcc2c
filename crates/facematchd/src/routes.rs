use crate::engine::{DaemonError, EngineHandle};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use facematch_core::{BoundingBox, EngineError, FrameAnalysis, MatchResult, UnknownFace};
use serde::Serialize;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reload-known-faces", post(reload_known_faces))
        .route("/recognize", post(recognize))
        .route("/recognize-frame", post(recognize_frame))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[derive(Serialize)]
struct BboxJson {
    top: i32,
    right: i32,
    bottom: i32,
    left: i32,
}

impl From<BoundingBox> for BboxJson {
    fn from(b: BoundingBox) -> Self {
        Self { top: b.top, right: b.right, bottom: b.bottom, left: b.left }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchJson {
    user_id: String,
    confidence: f32,
    bbox: BboxJson,
    snapshot: Option<String>,
}

impl From<MatchResult> for MatchJson {
    fn from(m: MatchResult) -> Self {
        Self {
            user_id: m.identity_id,
            confidence: m.confidence,
            bbox: m.bbox.into(),
            snapshot: m.snapshot.map(|s| BASE64.encode(s)),
        }
    }
}

#[derive(Serialize)]
struct UnknownFaceJson {
    bbox: BboxJson,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<String>,
}

impl From<UnknownFace> for UnknownFaceJson {
    fn from(u: UnknownFace) -> Self {
        Self { bbox: u.bbox.into(), snapshot: u.snapshot.map(|s| BASE64.encode(s)) }
    }
}

#[derive(Serialize)]
struct VideoResponse {
    matches: Vec<MatchJson>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameResponse {
    matches: Vec<MatchJson>,
    unknown_faces: Vec<UnknownFaceJson>,
}

impl From<FrameAnalysis> for FrameResponse {
    fn from(a: FrameAnalysis) -> Self {
        Self {
            matches: a.matches.into_iter().map(Into::into).collect(),
            unknown_faces: a.unknown_faces.into_iter().map(Into::into).collect(),
        }
    }
}

/// JSON `{"error": ...}` with a status code.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<DaemonError> for ApiError {
    fn from(e: DaemonError) -> Self {
        match &e {
            DaemonError::Engine(EngineError::EmptyFrame) => Self::bad_request("Empty frame image"),
            DaemonError::Engine(EngineError::InvalidFrame(_)) => Self::bad_request("Invalid frame image"),
            DaemonError::Engine(EngineError::InvalidVideo(_)) => Self::bad_request("Invalid video file"),
            _ => {
                tracing::error!(error = %e, "request failed");
                Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: e.to_string() }
            }
        }
    }
}

/// Bytes of the first multipart field called `name`.
async fn field_bytes(multipart: &mut Multipart, name: &str) -> Result<Option<Vec<u8>>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() == Some(name) {
            let bytes = field.bytes().await.map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(Some(bytes.to_vec()));
        }
    }
    Ok(None)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true, "service": "facematchd" }))
}

async fn reload_known_faces(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let summary = state.engine.reload().await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "knownFaces": summary.known_faces,
        "skipped": summary.skipped,
    })))
}

async fn recognize(State(state): State<AppState>, mut multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let video = field_bytes(&mut multipart, "video")
        .await?
        .ok_or_else(|| ApiError::bad_request("Missing video file"))?;
    tracing::debug!(bytes = video.len(), "video received");

    let matches = state.engine.recognize_video(video).await?;
    Ok(Json(VideoResponse { matches: matches.into_iter().map(Into::into).collect() }))
}

async fn recognize_frame(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let image = field_bytes(&mut multipart, "frame")
        .await?
        .ok_or_else(|| ApiError::bad_request("Missing frame image"))?;
    if image.is_empty() {
        return Err(ApiError::bad_request("Empty frame image"));
    }

    let analysis = state.engine.recognize_frame(image).await?;
    Ok(Json(FrameResponse::from(analysis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, VideoOpener};
    use facematch_core::config::DetectionModel;
    use facematch_core::provider::{FaceEmbeddingProvider, ProviderError};
    use facematch_core::video::VecFrameSource;
    use facematch_core::{Embedding, EngineConfig, FaceLocation, FaceMatchEngine, FrameSource};
    use facematch_media::ImageRsCodec;
    use facematch_store::{SqliteIdentityStore, StoredIdentity};
    use image::RgbImage;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;
    use std::io::Cursor;

    /// Finds one fixed face in every image.
    struct OneFaceProvider;

    const FACE: BoundingBox = BoundingBox { top: 10, right: 90, bottom: 90, left: 10 };

    impl FaceEmbeddingProvider for OneFaceProvider {
        fn detect(
            &mut self,
            _image: &RgbImage,
            _upsample: u32,
            _model: DetectionModel,
        ) -> Result<Vec<FaceLocation>, ProviderError> {
            Ok(vec![FaceLocation::from_bbox(FACE)])
        }

        fn embed(
            &mut self,
            _image: &RgbImage,
            faces: &[FaceLocation],
            _jitters: u32,
        ) -> Result<Vec<Embedding>, ProviderError> {
            Ok(faces.iter().map(|_| Embedding::new(vec![1.0, 0.0])).collect())
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([120, 100, 80]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png).unwrap();
        out
    }

    fn two_frame_opener() -> VideoOpener {
        Box::new(|path: &std::path::Path| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("video-"), "{name}");
            let frames = vec![RgbImage::new(100, 100), RgbImage::new(100, 100)];
            Ok(Box::new(VecFrameSource::new(frames)) as Box<dyn FrameSource>)
        })
    }

    /// Start the API on an ephemeral port with one enrolled identity.
    async fn serve(dir: &std::path::Path) -> String {
        std::fs::write(dir.join("ada.png"), png(100, 100)).unwrap();
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        store
            .upsert(&StoredIdentity { id: "u1".into(), name: Some("Ada".into()), image_path: Some("ada.png".into()) })
            .unwrap();
        store
            .upsert(&StoredIdentity { id: "u2".into(), name: None, image_path: None })
            .unwrap();

        let config = EngineConfig { image_root: dir.to_path_buf(), ..EngineConfig::default() };
        let engine = FaceMatchEngine::new(OneFaceProvider, ImageRsCodec, config);
        let handle = spawn_engine(engine, store, two_frame_opener()).unwrap();

        let app = router(AppState { engine: handle }, 1024 * 1024);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn post_form(url: String, form: Form) -> (StatusCode, Value) {
        let resp = reqwest::Client::new().post(url).multipart(form).send().await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path()).await;
        let body: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "ok": true, "service": "facematchd" }));
    }

    #[tokio::test]
    async fn test_reload_counts_faces_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/reload-known-faces"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["knownFaces"], 1);
        assert_eq!(body["skipped"], 1);
    }

    #[tokio::test]
    async fn test_recognize_frame_match() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path()).await;
        let form = Form::new().part("frame", Part::bytes(png(100, 100)).file_name("f.png"));
        let (status, body) = post_form(format!("{base}/recognize-frame"), form).await;

        assert_eq!(status, StatusCode::OK);
        let m = &body["matches"][0];
        assert_eq!(m["userId"], "u1");
        assert!((m["confidence"].as_f64().unwrap() - 1.0).abs() < 1e-6);
        // primary pass ran at 1.45x, boxes are mapped back
        assert_eq!(m["bbox"], serde_json::json!({ "top": 7, "right": 62, "bottom": 62, "left": 7 }));
        assert!(m["snapshot"].is_string());
        assert_eq!(body["unknownFaces"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_recognize_frame_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path()).await;
        let url = format!("{base}/recognize-frame");

        let (status, body) = post_form(url.clone(), Form::new().text("other", "x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing frame image");

        let form = Form::new().part("frame", Part::bytes(Vec::new()).file_name("f.png"));
        let (status, body) = post_form(url.clone(), form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Empty frame image");

        let form = Form::new().part("frame", Part::bytes(b"garbage".to_vec()).file_name("f.png"));
        let (status, body) = post_form(url, form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid frame image");
    }

    #[tokio::test]
    async fn test_recognize_video() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(dir.path()).await;

        let (status, body) = post_form(format!("{base}/recognize"), Form::new().text("other", "x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing video file");

        let form = Form::new().part("video", Part::bytes(b"fake mp4".to_vec()).file_name("clip.mp4"));
        let (status, body) = post_form(format!("{base}/recognize"), form).await;
        assert_eq!(status, StatusCode::OK);
        let matches = body["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["userId"], "u1");
    }

    #[test]
    fn test_unknown_face_json_omits_missing_snapshot() {
        let json = serde_json::to_value(UnknownFaceJson::from(UnknownFace { bbox: FACE, snapshot: None })).unwrap();
        assert_eq!(json, serde_json::json!({ "bbox": { "top": 10, "right": 90, "bottom": 90, "left": 10 } }));

        let json = serde_json::to_value(MatchJson::from(MatchResult {
            identity_id: "u1".into(),
            confidence: 0.5,
            bbox: FACE,
            snapshot: Some(vec![1, 2, 3]),
        }))
        .unwrap();
        assert_eq!(json["snapshot"], "AQID");
        assert_eq!(json["userId"], "u1");
    }
}
