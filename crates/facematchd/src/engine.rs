use facematch_core::provider::{FaceEmbeddingProvider, IdentityStore, ImageCodec};
use facematch_core::video::{FrameSource, VideoError};
use facematch_core::{EngineError, FaceMatchEngine, FrameAnalysis, MatchResult};
use facematch_media::{FfmpegVideoSource, MediaError, UploadTempFile};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of a forced gallery rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    pub known_faces: usize,
    pub skipped: usize,
}

/// Opens an uploaded clip for sequential decoding.
pub type VideoOpener = Box<dyn Fn(&Path) -> Result<Box<dyn FrameSource>, VideoError> + Send>;

pub fn ffmpeg_opener() -> VideoOpener {
    Box::new(|path: &Path| Ok(Box::new(FfmpegVideoSource::open(path)?) as Box<dyn FrameSource>))
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    RecognizeFrame {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<FrameAnalysis, DaemonError>>,
    },
    RecognizeVideo {
        video: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<MatchResult>, DaemonError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<ReloadSummary, DaemonError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, DaemonError>>) -> EngineRequest,
    ) -> Result<T, DaemonError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| DaemonError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DaemonError::ChannelClosed)?
    }

    /// Decode one image and analyse it against the gallery.
    pub async fn recognize_frame(&self, image: Vec<u8>) -> Result<FrameAnalysis, DaemonError> {
        self.request(|reply| EngineRequest::RecognizeFrame { image, reply }).await
    }

    /// Best match per identity across an uploaded clip.
    pub async fn recognize_video(&self, video: Vec<u8>) -> Result<Vec<MatchResult>, DaemonError> {
        self.request(|reply| EngineRequest::RecognizeVideo { video, reply }).await
    }

    pub async fn reload(&self) -> Result<ReloadSummary, DaemonError> {
        self.request(|reply| EngineRequest::Reload { reply }).await
    }
}

struct Worker<P, C, S> {
    engine: FaceMatchEngine<P, C>,
    store: S,
    open_video: VideoOpener,
}

impl<P, C, S> Worker<P, C, S>
where
    P: FaceEmbeddingProvider,
    C: ImageCodec,
    S: IdentityStore,
{
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::RecognizeFrame { image, reply } => {
                let result = self.engine.recognize_image(&self.store, &image).map_err(Into::into);
                let _ = reply.send(result);
            }
            EngineRequest::RecognizeVideo { video, reply } => {
                let _ = reply.send(self.recognize_video(&video));
            }
            EngineRequest::Reload { reply } => {
                let result = self
                    .engine
                    .reload(&self.store)
                    .map(|snap| ReloadSummary {
                        known_faces: snap.len(),
                        skipped: snap.report.skipped().count(),
                    })
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
        }
    }

    fn recognize_video(&mut self, video: &[u8]) -> Result<Vec<MatchResult>, DaemonError> {
        let upload = UploadTempFile::write(video)?;
        let result = (self.open_video)(upload.path())
            .map_err(EngineError::from)
            .and_then(|mut source| self.engine.recognize_video(&self.store, &mut source));
        upload.cleanup();
        Ok(result?)
    }
}

/// Spawn the engine on a dedicated OS thread. The thread owns the provider,
/// codec and store and serves requests one at a time.
pub fn spawn_engine<P, C, S>(
    engine: FaceMatchEngine<P, C>,
    store: S,
    open_video: VideoOpener,
) -> std::io::Result<EngineHandle>
where
    P: FaceEmbeddingProvider + Send + 'static,
    C: ImageCodec + Send + 'static,
    S: IdentityStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
    let mut worker = Worker { engine, store, open_video };

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
