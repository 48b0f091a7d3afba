use booth_cloud::uploader::Uploader;
use booth_common::artifact::CaptureMetadata;
use booth_common::config::BoothConfig;
use booth_common::state::{BoothState, CaptureMode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::camera::FrameSource;
use crate::capture::{self, CaptureResult, CaptureSequencer};
use crate::detector::Detector;
use crate::gesture::{self, Gesture};
use crate::led::{CommandSink, LedCommand};
use crate::tracker::HandTracker;

/// JPEG quality for frames sent to the landmark and detection services.
const ANALYSIS_QUALITY: u8 = 80;

/// What a cycle resolved to before cooldown and edge-triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Trigger,
    Command(LedCommand),
}

/// Combine the prop detector's command with the gesture. A thumbs-up always
/// wins; the other gestures only apply when nothing else was seen.
pub fn resolve(gesture: Option<Gesture>, ambient: Option<LedCommand>) -> Resolved {
    let command = ambient.unwrap_or(LedCommand::Normal);
    match gesture {
        Some(Gesture::ThumbsUp) => Resolved::Trigger,
        Some(Gesture::Love) if command == LedCommand::Normal => Resolved::Command(LedCommand::Love),
        Some(Gesture::Sus) if command == LedCommand::Normal => Resolved::Command(LedCommand::Sus),
        _ => Resolved::Command(command),
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    /// LED command to send this cycle, if any.
    pub send: Option<LedCommand>,
    /// Whether to start a capture.
    pub capture: bool,
}

/// LED edge-triggering and capture cooldown.
#[derive(Debug)]
pub struct CommandState {
    last: Resolved,
    last_capture: Option<Instant>,
    cooldown: Duration,
}

impl CommandState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last: Resolved::Command(LedCommand::Normal),
            last_capture: None,
            cooldown,
        }
    }

    pub fn step(&mut self, gesture: Option<Gesture>, ambient: Option<LedCommand>, now: Instant) -> Step {
        let resolved = resolve(gesture, ambient);
        let mut step = Step::default();

        match resolved {
            Resolved::Trigger => {
                let ready = self
                    .last_capture
                    .map_or(true, |at| now.saturating_duration_since(at) > self.cooldown);
                if ready {
                    self.last_capture = Some(now);
                    step.capture = true;
                    step.send = Some(LedCommand::Photo);
                } else {
                    debug!("trigger inside cooldown, ignored");
                }
            }
            Resolved::Command(command) => {
                if self.last != resolved {
                    step.send = Some(command);
                }
            }
        }
        // a trigger counts as the last command so the next NORMAL goes out
        self.last = resolved;
        step
    }
}

/// Settle time between the PHOTO signal and the first frame.
pub fn settle_delay(config: &BoothConfig, mode: CaptureMode) -> Duration {
    match mode {
        CaptureMode::Burst => Duration::from_millis(config.burst_settle_ms),
        _ => Duration::from_millis(config.settle_ms),
    }
}

/// Main loop: frame in, gesture and prop detection, LED signals, capture on
/// a thumbs-up, upload in the background.
pub struct Booth {
    camera: Arc<dyn FrameSource>,
    tracker: Option<Arc<dyn HandTracker>>,
    detector: Option<Detector>,
    leds: Box<dyn CommandSink>,
    state: Arc<BoothState>,
    sequencer: CaptureSequencer,
    uploader: Option<Arc<Uploader>>,
    commands: CommandState,
    config: BoothConfig,
}

impl Booth {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: Arc<dyn FrameSource>,
        tracker: Option<Arc<dyn HandTracker>>,
        detector: Option<Detector>,
        leds: Box<dyn CommandSink>,
        state: Arc<BoothState>,
        sequencer: CaptureSequencer,
        uploader: Option<Arc<Uploader>>,
        config: BoothConfig,
    ) -> Self {
        let cooldown = Duration::from_secs_f64(config.cooldown_secs.max(0.0));
        Self {
            camera,
            tracker,
            detector,
            leds,
            state,
            sequencer,
            uploader,
            commands: CommandState::new(cooldown),
            config,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("booth loop started, show a thumbs-up to take a photo");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.cycle() => {}
            }
        }
        self.leds.send(LedCommand::Normal);
        info!("booth loop stopped");
    }

    async fn cycle(&mut self) {
        let frame = match self.camera.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "frame read failed, skipping cycle");
                return;
            }
        };
        let jpeg = match capture::encode_jpeg(&frame, ANALYSIS_QUALITY) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(error = %e, "failed to encode frame for analysis");
                return;
            }
        };

        let ambient = self.detect_ambient(&jpeg).await;
        let gesture = self.detect_gesture(&jpeg).await;

        let step = self.commands.step(gesture, ambient, Instant::now());
        if let Some(command) = step.send {
            self.leds.send(command);
        }
        if step.capture {
            self.take_photo().await;
        }
    }

    async fn detect_ambient(&self, jpeg: &[u8]) -> Option<LedCommand> {
        let detector = self.detector.as_ref()?;
        match detector.detect(jpeg).await {
            Ok(detections) => detector.ambient_command(&detections),
            Err(e) => {
                debug!(error = %e, "prop detection failed");
                None
            }
        }
    }

    async fn detect_gesture(&self, jpeg: &[u8]) -> Option<Gesture> {
        let tracker = self.tracker.as_ref()?;
        match tracker.hands(jpeg).await {
            Ok(hands) => gesture::classify_first(&hands),
            Err(e) => {
                debug!(error = %e, "landmark lookup failed");
                None
            }
        }
    }

    async fn take_photo(&mut self) {
        let snapshot = self.state.snapshot();
        info!(mode = %snapshot.mode, filter = %snapshot.filter, "starting capture sequence");
        tokio::time::sleep(settle_delay(&self.config, snapshot.mode)).await;

        let result = match self
            .sequencer
            .capture(
                self.camera.as_ref(),
                snapshot.mode,
                snapshot.filter,
                self.config.save_local,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "capture failed");
                return;
            }
        };
        info!(
            filename = %result.filename,
            mode = %result.mode,
            frames = result.images.len(),
            started_ms = ?result.timestamps_ms.first(),
            "capture complete"
        );

        let metadata = serde_json::to_value(CaptureMetadata {
            mode: snapshot.mode,
            filter: snapshot.filter,
        })
        .unwrap_or_default();
        self.dispatch_upload(result, metadata);
    }

    /// Hand the artifact to the uploader on a detached task.
    fn dispatch_upload(&self, result: CaptureResult, metadata: serde_json::Value) {
        let Some(uploader) = self.uploader.clone() else {
            return;
        };
        if let Some(path) = result.path {
            tokio::spawn(async move {
                uploader.upload_file(&path, metadata).await;
            });
            return;
        }
        let cfg = self.sequencer.config();
        match result.export(cfg.export_max_edge, cfg.jpeg_quality) {
            Ok(bytes) => {
                let filename = result.filename;
                tokio::spawn(async move {
                    uploader.upload_bytes(bytes, &filename, metadata).await;
                });
            }
            Err(e) => error!(error = %e, "failed to encode artifact for upload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraError;
    use crate::gesture::{Landmark, HAND_LANDMARKS, THUMB_MCP, THUMB_TIP};
    use crate::tracker::TrackerError;
    use async_trait::async_trait;
    use booth_common::config::CaptureConfig;
    use booth_common::state::FilterKind;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    const COOLDOWN: Duration = Duration::from_secs(6);

    #[test]
    fn resolution_order() {
        assert_eq!(resolve(None, None), Resolved::Command(LedCommand::Normal));
        assert_eq!(
            resolve(Some(Gesture::ThumbsUp), Some(LedCommand::Welcome)),
            Resolved::Trigger
        );
        assert_eq!(resolve(Some(Gesture::Love), None), Resolved::Command(LedCommand::Love));
        assert_eq!(
            resolve(Some(Gesture::Sus), Some(LedCommand::Rainbow)),
            Resolved::Command(LedCommand::Rainbow)
        );
    }

    #[test]
    fn repeated_commands_are_sent_once() {
        let mut state = CommandState::new(COOLDOWN);
        let t = Instant::now();
        assert_eq!(state.step(None, None, t).send, None);
        assert_eq!(state.step(Some(Gesture::Love), None, t).send, Some(LedCommand::Love));
        assert_eq!(state.step(Some(Gesture::Love), None, t).send, None);
        assert_eq!(state.step(None, Some(LedCommand::Welcome), t).send, Some(LedCommand::Welcome));
        assert_eq!(state.step(None, None, t).send, Some(LedCommand::Normal));
        assert_eq!(state.step(None, None, t).send, None);
    }

    #[test]
    fn trigger_sends_photo_then_normal() {
        let mut state = CommandState::new(COOLDOWN);
        let t = Instant::now();
        let step = state.step(Some(Gesture::ThumbsUp), None, t);
        assert_eq!(step, Step { send: Some(LedCommand::Photo), capture: true });
        assert_eq!(state.step(None, None, t).send, Some(LedCommand::Normal));
    }

    #[test]
    fn cooldown_drops_early_triggers() {
        let mut state = CommandState::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(state.step(Some(Gesture::ThumbsUp), None, t0).capture);

        let early = state.step(Some(Gesture::ThumbsUp), None, t0 + Duration::from_secs(3));
        assert_eq!(early, Step::default());

        assert!(state.step(Some(Gesture::ThumbsUp), None, t0 + Duration::from_secs(7)).capture);
    }

    #[test]
    fn settle_depends_on_mode() {
        let config = BoothConfig::default();
        assert_eq!(settle_delay(&config, CaptureMode::Burst), Duration::from_millis(300));
        assert_eq!(settle_delay(&config, CaptureMode::Single), Duration::from_millis(500));
        assert_eq!(settle_delay(&config, CaptureMode::Gif), Duration::from_millis(500));
    }

    struct StillCamera;

    #[async_trait]
    impl FrameSource for StillCamera {
        async fn read_frame(&self) -> Result<RgbImage, CameraError> {
            Ok(RgbImage::from_pixel(32, 24, Rgb([90, 120, 150])))
        }
    }

    struct ThumbsUpTracker;

    #[async_trait]
    impl HandTracker for ThumbsUpTracker {
        async fn hands(&self, _jpeg: &[u8]) -> Result<Vec<Vec<Landmark>>, TrackerError> {
            let mut hand = vec![Landmark { x: 0.5, y: 0.5, z: 0.0 }; HAND_LANDMARKS];
            for tip in [8, 12, 16, 20] {
                hand[tip].y = 0.7;
            }
            hand[THUMB_MCP].y = 0.6;
            hand[THUMB_TIP].y = 0.2;
            Ok(vec![hand])
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<LedCommand>>>);

    impl CommandSink for RecordingSink {
        fn send(&mut self, command: LedCommand) {
            self.0.lock().unwrap().push(command);
        }
    }

    #[tokio::test]
    async fn thumbs_up_captures_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let state = Arc::new(BoothState::new());
        state.set_filter(FilterKind::Bw);

        let config = BoothConfig {
            settle_ms: 1,
            burst_settle_ms: 1,
            ..BoothConfig::default()
        };
        let mut booth = Booth::new(
            Arc::new(StillCamera),
            Some(Arc::new(ThumbsUpTracker)),
            None,
            Box::new(sink.clone()),
            state,
            CaptureSequencer::new(CaptureConfig::default(), dir.path()),
            None,
            config,
        );

        booth.cycle().await;
        // second thumbs-up lands inside the cooldown
        booth.cycle().await;

        assert_eq!(*sink.0.lock().unwrap(), vec![LedCommand::Photo]);
        let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(saved.len(), 1);
        let name = saved[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("photo_") && name.ends_with(".jpg"));
    }
}
