#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use video_chunker::adapters::http::{self, AppState, UPLOAD_FIELD};
use video_chunker::domain::{TranscodeJob, VideoId};
use video_chunker::ports::{EngineError, EngineRequest, TranscodeEngine};
use video_chunker::Config;

const BOUNDARY: &str = "chunker-test-boundary";

/// What the fake engine does with each request.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Write `segments` one-second segments and a matching manifest.
    Succeed { segments: usize },
    /// Exit with the given diagnostic, leaving a half-written segment behind.
    Fail(&'static str),
    /// Run until cancelled.
    Block,
}

pub struct FakeEngine {
    behaviour: Behaviour,
    pub calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    async fn transcode(
        &self,
        request: &EngineRequest,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Succeed { segments } => {
                let mut manifest = String::from(
                    "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:0\n",
                );
                for i in 0..*segments {
                    let name = format!("chunk_{:03}.ts", i);
                    tokio::fs::write(request.output_dir.join(&name), vec![0x47u8; 188]).await?;
                    manifest.push_str(&format!("#EXTINF:1.000000,\n{}\n", name));
                }
                manifest.push_str("#EXT-X-ENDLIST\n");
                tokio::fs::write(request.manifest_path(), manifest).await?;
                Ok(())
            }
            Behaviour::Fail(diagnostic) => {
                tokio::fs::write(request.output_dir.join("chunk_000.ts"), b"partial").await?;
                Err(EngineError::Exited {
                    status: String::from("exit status: 1"),
                    diagnostic: diagnostic.to_string(),
                })
            }
            Behaviour::Block => {
                cancel.cancelled().await;
                Err(EngineError::Cancelled)
            }
        }
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new(engine: Arc<dyn TranscodeEngine>) -> Self {
        Self::with_config(engine, |_| {})
    }

    pub fn with_config(engine: Arc<dyn TranscodeEngine>, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().to_path_buf();
        tweak(&mut config);

        let state = AppState::build(&config, engine);
        let router = http::router(state.clone());
        Self { dir, state, router }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn upload(&self, content_type: &str, data: &[u8]) -> Response<Body> {
        self.send(upload_request(UPLOAD_FIELD, content_type, data)).await
    }

    /// Upload and return the assigned id, asserting the upload was accepted.
    pub async fn upload_ok(&self, data: &[u8]) -> VideoId {
        let response = self.upload("video/mp4", data).await;
        assert_eq!(response.status(), 202);
        let body = json(response).await;
        VideoId::parse(body["videoId"].as_str().unwrap()).unwrap()
    }

    pub async fn wait(&self, id: &VideoId) -> TranscodeJob {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.state.registry.wait_for_terminal(id),
        )
        .await
        .expect("job did not finish in time")
        .expect("job is not registered")
    }

    /// Number of per-video directories under the storage root.
    pub fn stored_videos(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }
}

pub fn upload_request(field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"clip.mp4\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/video/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&bytes(response).await).unwrap()
}
