use booth_common::artifact::ArtifactKind;
use booth_common::config::CaptureConfig;
use booth_common::state::{CaptureMode, FilterKind};
use chrono::Utc;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Delay, DynamicImage, Frame, RgbImage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::filter;

/// Final product of a capture.
pub enum Artifact {
    Still(RgbImage),
    Collage(RgbImage),
    /// Encoded, infinitely looping GIF.
    Gif(Vec<u8>),
}

pub struct CaptureResult {
    pub mode: CaptureMode,
    /// Filtered frames, in capture order.
    pub images: Vec<RgbImage>,
    /// Unix milliseconds, one per image, never decreasing.
    pub timestamps_ms: Vec<i64>,
    pub artifact: Artifact,
    /// Name the artifact is stored and uploaded under.
    pub filename: String,
    /// Set when the artifact was written to the photo directory.
    pub path: Option<PathBuf>,
}

impl CaptureResult {
    /// Bytes to store: JPEG for stills and collages, the GIF as encoded.
    pub fn export(&self, max_edge: u32, quality: u8) -> Result<Vec<u8>, CaptureError> {
        match &self.artifact {
            Artifact::Still(img) | Artifact::Collage(img) => encode_for_upload(img, max_edge, quality),
            Artifact::Gif(bytes) => Ok(bytes.clone()),
        }
    }
}

pub struct CaptureSequencer {
    config: CaptureConfig,
    photo_dir: PathBuf,
}

impl CaptureSequencer {
    pub fn new(config: CaptureConfig, photo_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            photo_dir: photo_dir.into(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Run the sequence for `mode`. With `persist` the artifact is also
    /// written under the photo directory.
    pub async fn capture(
        &self,
        source: &dyn FrameSource,
        mode: CaptureMode,
        filter: FilterKind,
        persist: bool,
    ) -> Result<CaptureResult, CaptureError> {
        let (count, interval) = match mode {
            CaptureMode::Single => (1, Duration::ZERO),
            CaptureMode::Burst => (
                self.config.burst_count,
                Duration::from_millis(self.config.burst_interval_ms),
            ),
            CaptureMode::Gif => (
                self.config.gif_frame_count,
                Duration::from_millis(self.config.gif_interval_ms),
            ),
        };

        let (images, timestamps_ms) = capture_frames(source, filter, count, interval).await?;
        let started_ms = timestamps_ms.first().copied().unwrap_or_else(|| Utc::now().timestamp_millis());

        let artifact = match mode {
            CaptureMode::Single => Artifact::Still(images[0].clone()),
            CaptureMode::Burst => Artifact::Collage(create_collage(&images)?),
            CaptureMode::Gif => {
                let frames = images.clone();
                let delay_ms = self.config.gif_frame_duration_ms;
                let bytes = tokio::task::spawn_blocking(move || encode_gif(&frames, delay_ms))
                    .await
                    .map_err(|e| CaptureError::Task(e.to_string()))??;
                Artifact::Gif(bytes)
            }
        };

        let filename = ArtifactKind::for_mode(mode).filename(started_ms.div_euclid(1000));
        let mut result = CaptureResult {
            mode,
            images,
            timestamps_ms,
            artifact,
            filename,
            path: None,
        };

        if persist {
            let bytes = result.export(self.config.export_max_edge, self.config.jpeg_quality)?;
            let path = self.photo_dir.join(&result.filename);
            write_artifact(&path, &bytes).await?;
            info!(path = %path.display(), bytes = bytes.len(), "artifact saved");
            result.path = Some(path);
        }

        Ok(result)
    }
}

/// Read `count` frames `interval` apart, filtering each. A failed read is
/// skipped rather than retried, so fewer frames than asked may come back.
async fn capture_frames(
    source: &dyn FrameSource,
    filter: FilterKind,
    count: usize,
    interval: Duration,
) -> Result<(Vec<RgbImage>, Vec<i64>), CaptureError> {
    let mut images = Vec::with_capacity(count);
    let mut timestamps = Vec::with_capacity(count);
    let mut last_ms = i64::MIN;

    for i in 0..count {
        match source.read_frame().await {
            Ok(frame) => {
                let ts = Utc::now().timestamp_millis().max(last_ms);
                last_ms = ts;
                let filtered = tokio::task::spawn_blocking(move || filter::apply(&frame, filter))
                    .await
                    .map_err(|e| CaptureError::Task(e.to_string()))?;
                debug!(index = i, %filter, "frame captured");
                images.push(filtered);
                timestamps.push(ts);
            }
            Err(e) => warn!(error = %e, index = i, "frame read failed, skipping"),
        }
        if i + 1 < count {
            tokio::time::sleep(interval).await;
        }
    }

    if images.is_empty() {
        return Err(CaptureError::NoFrames);
    }
    Ok((images, timestamps))
}

/// Tile up to four images into a 2×2 grid.
///
/// Short inputs are padded by repeating the last image, extras are ignored,
/// and every tile is resized to the smallest width and height among them.
pub fn create_collage(images: &[RgbImage]) -> Result<RgbImage, CaptureError> {
    let last = images.last().ok_or(CaptureError::NoFrames)?;
    let tiles: Vec<&RgbImage> = images
        .iter()
        .chain(std::iter::repeat(last))
        .take(4)
        .collect();

    let w = tiles.iter().map(|img| img.width()).min().unwrap_or(0);
    let h = tiles.iter().map(|img| img.height()).min().unwrap_or(0);

    let mut canvas = RgbImage::new(w * 2, h * 2);
    for (i, tile) in tiles.into_iter().enumerate() {
        let x = (i as u32 % 2) * w;
        let y = (i as u32 / 2) * h;
        if tile.dimensions() == (w, h) {
            imageops::replace(&mut canvas, tile, x as i64, y as i64);
        } else {
            let resized = imageops::resize(tile, w, h, FilterType::Triangle);
            imageops::replace(&mut canvas, &resized, x as i64, y as i64);
        }
    }
    Ok(canvas)
}

/// Encode frames as a GIF that loops forever, `delay_ms` per frame.
pub fn encode_gif(frames: &[RgbImage], delay_ms: u32) -> Result<Vec<u8>, CaptureError> {
    if frames.is_empty() {
        return Err(CaptureError::NoFrames);
    }
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buf, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        let delay = Delay::from_numer_denom_ms(delay_ms, 1);
        encoder.encode_frames(frames.iter().map(|img| {
            let rgba = DynamicImage::ImageRgb8(img.clone()).to_rgba8();
            Frame::from_parts(rgba, 0, 0, delay)
        }))?;
    }
    Ok(buf)
}

/// Shrink so the long edge is at most `max_edge`, then JPEG-encode.
pub fn encode_for_upload(img: &RgbImage, max_edge: u32, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let (w, h) = img.dimensions();
    let long = w.max(h);
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    if long > max_edge && max_edge > 0 {
        let scale = max_edge as f64 / long as f64;
        let nw = ((w as f64 * scale) as u32).max(1);
        let nh = ((h as f64 * scale) as u32).max(1);
        let resized = imageops::resize(img, nw, nh, FilterType::Triangle);
        encoder.encode_image(&resized)?;
    } else {
        encoder.encode_image(img)?;
    }
    Ok(buf)
}

/// Plain JPEG at `quality`, used for frames sent to the landmark and
/// detection services.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CaptureError::Io(dir.display().to_string(), e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| CaptureError::Io(path.display().to_string(), e))
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no frames captured, no artifact produced")]
    NoFrames,
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {0}: {1}")]
    Io(String, std::io::Error),
    #[error("capture task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraError;
    use async_trait::async_trait;
    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, Rgb};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out solid frames whose red channel is the call index.
    /// Calls listed in `fail_on` return an error instead.
    struct ScriptedCamera {
        calls: AtomicUsize,
        size: (u32, u32),
        fail_on: Vec<usize>,
    }

    impl ScriptedCamera {
        fn new(w: u32, h: u32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                size: (w, h),
                fail_on: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedCamera {
        async fn read_frame(&self) -> Result<RgbImage, CameraError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&n) {
                return Err(CameraError::Timeout);
            }
            Ok(RgbImage::from_pixel(self.size.0, self.size.1, Rgb([(n as u8).wrapping_mul(40), 0, 0])))
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            burst_interval_ms: 1,
            gif_interval_ms: 1,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn collage_doubles_tile_size() {
        let images = vec![RgbImage::new(100, 150); 4];
        let collage = create_collage(&images).unwrap();
        assert_eq!(collage.dimensions(), (200, 300));
    }

    #[test]
    fn collage_pads_with_last_image() {
        let a = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let b = RgbImage::from_pixel(10, 10, Rgb([0, 0, 255]));
        let collage = create_collage(&[a, b]).unwrap();
        assert_eq!(*collage.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*collage.get_pixel(15, 5), Rgb([0, 0, 255]));
        assert_eq!(*collage.get_pixel(5, 15), Rgb([0, 0, 255]));
        assert_eq!(*collage.get_pixel(15, 15), Rgb([0, 0, 255]));
    }

    #[test]
    fn collage_uses_smallest_dimensions_and_first_four() {
        let images = vec![
            RgbImage::new(40, 30),
            RgbImage::new(20, 50),
            RgbImage::new(30, 30),
            RgbImage::new(60, 60),
            RgbImage::new(2, 2),
        ];
        assert_eq!(create_collage(&images).unwrap().dimensions(), (40, 60));
    }

    #[test]
    fn collage_of_nothing_is_an_error() {
        assert!(matches!(create_collage(&[]), Err(CaptureError::NoFrames)));
    }

    #[test]
    fn gif_has_one_frame_per_image() {
        let frames: Vec<RgbImage> = (0..5)
            .map(|i| RgbImage::from_pixel(16, 12, Rgb([i * 50, 0, 0])))
            .collect();
        let bytes = encode_gif(&frames, 200).unwrap();
        let decoded = GifDecoder::new(std::io::Cursor::new(bytes))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(decoded.len(), 5);
        let (num, den) = decoded[0].delay().numer_denom_ms();
        assert_eq!(num / den, 200);
    }

    #[test]
    fn export_caps_long_edge() {
        let img = RgbImage::new(3200, 1000);
        let jpeg = encode_for_upload(&img, 1600, 85).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1600, 500));

        let small = RgbImage::new(640, 480);
        let decoded = image::load_from_memory(&encode_for_upload(&small, 1600, 85).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[tokio::test]
    async fn burst_builds_collage() {
        let camera = ScriptedCamera::new(100, 150);
        let sequencer = CaptureSequencer::new(fast_config(), "unused");
        let result = sequencer
            .capture(&camera, CaptureMode::Burst, FilterKind::None, false)
            .await
            .unwrap();

        assert_eq!(result.images.len(), 4);
        assert_eq!(camera.calls.load(Ordering::SeqCst), 4);
        let Artifact::Collage(collage) = &result.artifact else {
            panic!("expected a collage");
        };
        assert_eq!(collage.dimensions(), (200, 300));
        assert!(result.filename.starts_with("burst_"));
        assert!(result.path.is_none());
    }

    /// Same frame on every read.
    struct SolidCamera(RgbImage);

    #[async_trait]
    impl FrameSource for SolidCamera {
        async fn read_frame(&self) -> Result<RgbImage, CameraError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn black_burst_tiles_into_black_collage() {
        // frames 150 wide, 100 tall
        let black = Rgb([0, 0, 0]);
        let camera = SolidCamera(RgbImage::from_pixel(150, 100, black));
        let sequencer = CaptureSequencer::new(fast_config(), "unused");
        let result = sequencer
            .capture(&camera, CaptureMode::Burst, FilterKind::None, false)
            .await
            .unwrap();

        assert_eq!(result.images.len(), 4);
        let Artifact::Collage(collage) = &result.artifact else {
            panic!("expected a collage");
        };
        assert_eq!(*collage, RgbImage::from_pixel(300, 200, black));
    }

    #[tokio::test]
    async fn gif_frame_count_matches_captured_frames() {
        let camera = ScriptedCamera {
            fail_on: vec![2, 5],
            ..ScriptedCamera::new(24, 16)
        };
        let sequencer = CaptureSequencer::new(fast_config(), "unused");
        let result = sequencer
            .capture(&camera, CaptureMode::Gif, FilterKind::Bw, false)
            .await
            .unwrap();

        assert_eq!(camera.calls.load(Ordering::SeqCst), 8);
        assert_eq!(result.images.len(), 6);
        let Artifact::Gif(bytes) = &result.artifact else {
            panic!("expected a gif");
        };
        let decoded = GifDecoder::new(std::io::Cursor::new(bytes.clone()))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(decoded.len(), 6);
    }

    #[tokio::test]
    async fn timestamps_never_decrease() {
        let camera = ScriptedCamera::new(8, 8);
        let sequencer = CaptureSequencer::new(fast_config(), "unused");
        let result = sequencer
            .capture(&camera, CaptureMode::Gif, FilterKind::None, false)
            .await
            .unwrap();
        assert_eq!(result.timestamps_ms.len(), result.images.len());
        assert!(result.timestamps_ms.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn all_reads_failing_is_no_frames() {
        let camera = ScriptedCamera {
            fail_on: vec![0],
            ..ScriptedCamera::new(8, 8)
        };
        let sequencer = CaptureSequencer::new(fast_config(), "unused");
        let err = sequencer
            .capture(&camera, CaptureMode::Single, FilterKind::None, false)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::NoFrames));
    }

    #[tokio::test]
    async fn single_applies_filter_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let camera = ScriptedCamera::new(50, 40);
        let sequencer = CaptureSequencer::new(fast_config(), dir.path());
        let result = sequencer
            .capture(&camera, CaptureMode::Single, FilterKind::Polaroid, true)
            .await
            .unwrap();

        assert_eq!(result.images.len(), 1);
        assert!(result.images[0].width() > 50);
        let path = result.path.as_ref().unwrap();
        assert_eq!(path, &dir.path().join(&result.filename));
        assert!(result.filename.starts_with("photo_") && result.filename.ends_with(".jpg"));
        let saved = image::open(path).unwrap();
        assert_eq!(saved.width(), result.images[0].width());
    }

    #[tokio::test]
    async fn persisted_gif_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let camera = ScriptedCamera::new(10, 10);
        let sequencer = CaptureSequencer::new(fast_config(), dir.path());
        let result = sequencer
            .capture(&camera, CaptureMode::Gif, FilterKind::None, true)
            .await
            .unwrap();
        let path = result.path.unwrap();
        assert_eq!(path.extension().unwrap(), "gif");
        assert!(std::fs::read(path).unwrap().starts_with(b"GIF8"));
    }
}
