use async_trait::async_trait;
use booth_common::config::{CameraConfig, CameraMode};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Something that hands out one fresh frame per call.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn read_frame(&self) -> Result<RgbImage, CameraError>;
}

/// Open the configured camera and wait for its first frame.
///
/// Failing here is fatal for the booth: there is nothing to do without frames.
pub async fn open(config: &CameraConfig) -> Result<Arc<dyn FrameSource>, CameraError> {
    let startup = Duration::from_secs(config.startup_timeout_secs);
    let source: Arc<dyn FrameSource> = match config.mode {
        CameraMode::Mjpeg => Arc::new(MjpegCamera::start(config)?),
        CameraMode::Polling => Arc::new(SnapshotCamera::new(config)?),
    };
    match tokio::time::timeout(startup, source.read_frame()).await {
        Ok(Ok(frame)) => {
            info!(width = frame.width(), height = frame.height(), "camera ready");
            Ok(source)
        }
        Ok(Err(e)) => Err(CameraError::Unavailable(e.to_string())),
        Err(_) => Err(CameraError::Unavailable(format!(
            "no frame within {}s",
            config.startup_timeout_secs
        ))),
    }
}

async fn decode(jpeg: Bytes) -> Result<RgbImage, CameraError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&jpeg).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| CameraError::Task(e.to_string()))?
        .map_err(CameraError::Decode)
}

// ---------------------------------------------------------------------------
// Multipart parsing
// ---------------------------------------------------------------------------

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` body. Chunks may
/// cut boundaries and headers anywhere.
struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one chunk; returns every JPEG completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // keep a tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // resume the scan near the end next time
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let mut part = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    part.truncate(end);
                    if !part.is_empty() {
                        frames.push(part.freeze());
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }
        frames
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// MJPEG stream camera
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct LatestFrame {
    seq: u64,
    jpeg: Bytes,
}

/// Camera backed by a long-lived MJPEG stream. A background task keeps only
/// the newest JPEG; readers wait for one they have not seen yet.
pub struct MjpegCamera {
    frames: Mutex<watch::Receiver<LatestFrame>>,
    read_timeout: Duration,
    task: JoinHandle<()>,
}

impl MjpegCamera {
    pub fn start(config: &CameraConfig) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(CameraError::Connect)?;
        let (tx, rx) = watch::channel(LatestFrame::default());
        let task = tokio::spawn(run_stream(client, config.url.clone(), tx));
        Ok(Self {
            frames: Mutex::new(rx),
            read_timeout: Duration::from_secs(config.startup_timeout_secs.max(1)),
            task,
        })
    }
}

impl Drop for MjpegCamera {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl FrameSource for MjpegCamera {
    async fn read_frame(&self) -> Result<RgbImage, CameraError> {
        let jpeg = {
            let mut rx = self.frames.lock().await;
            match tokio::time::timeout(self.read_timeout, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(CameraError::Closed),
                Err(_) => return Err(CameraError::Timeout),
            }
            let latest = rx.borrow_and_update();
            debug!(seq = latest.seq, bytes = latest.jpeg.len(), "frame taken");
            latest.jpeg.clone()
        };
        decode(jpeg).await
    }
}

/// Keep the stream open, reconnecting with exponential backoff.
async fn run_stream(client: reqwest::Client, url: String, tx: watch::Sender<LatestFrame>) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url = %url, "connecting to MJPEG stream");
        match consume_stream(&client, &url, &tx).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    client: &reqwest::Client,
    url: &str,
    tx: &watch::Sender<LatestFrame>,
) -> Result<(), CameraError> {
    let response = client.get(url).send().await.map_err(CameraError::Connect)?;
    if !response.status().is_success() {
        return Err(CameraError::Status(response.status().as_u16()));
    }
    info!(status = %response.status(), "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MultipartParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(CameraError::Stream)?;
        for jpeg in parser.push(&chunk) {
            let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
            if tx.send(LatestFrame { seq, jpeg }).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot camera
// ---------------------------------------------------------------------------

/// Polling fallback: one HTTP request per frame.
pub struct SnapshotCamera {
    client: reqwest::Client,
    url: String,
}

impl SnapshotCamera {
    pub fn new(config: &CameraConfig) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.startup_timeout_secs.max(1)))
            .build()
            .map_err(CameraError::Connect)?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl FrameSource for SnapshotCamera {
    async fn read_frame(&self) -> Result<RgbImage, CameraError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CameraError::Connect)?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "non-success response from camera");
            return Err(CameraError::Status(resp.status().as_u16()));
        }
        let jpeg = resp.bytes().await.map_err(CameraError::Stream)?;
        let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(seq, bytes = jpeg.len(), "snapshot fetched");
        decode(jpeg).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("HTTP connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    Stream(reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("frame decode failed: {0}")]
    Decode(image::ImageError),
    #[error("no new frame before timeout")]
    Timeout,
    #[error("frame stream closed")]
    Closed,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("decode task failed: {0}")]
    Task(String),
}
