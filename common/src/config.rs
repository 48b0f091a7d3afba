use serde::Deserialize;
use std::path::Path;

/// Booth configuration.
///
/// Loaded from an optional TOML file (the legacy config file), then
/// overridden by environment variables. Every section has defaults so an
/// empty file, or no file at all, is a valid starting point.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub booth: BoothConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectBackend {
    /// S3-compatible endpoint of the hosted storage service.
    S3,
    /// Plain directory, for offline deployments.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// PostgREST table of the hosted database.
    Rest,
    /// Local SQLite file.
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_object_backend")]
    pub object_backend: ObjectBackend,
    #[serde(default = "default_metadata_backend")]
    pub metadata_backend: MetadataBackend,
    /// Overrides `<url>/storage/v1/s3`.
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_access_key: String,
    #[serde(default)]
    pub s3_secret_key: String,
    #[serde(default = "default_region")]
    pub s3_region: String,
    #[serde(default = "default_local_store_dir")]
    pub local_store_dir: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    /// Long-lived multipart MJPEG stream.
    Mjpeg,
    /// One HTTP request per frame.
    Polling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_url")]
    pub url: String,
    #[serde(default = "default_camera_mode")]
    pub mode: CameraMode,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long startup waits for the first frame before giving up.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_burst_count")]
    pub burst_count: usize,
    #[serde(default = "default_burst_interval")]
    pub burst_interval_ms: u64,
    #[serde(default = "default_gif_frame_count")]
    pub gif_frame_count: usize,
    #[serde(default = "default_gif_interval")]
    pub gif_interval_ms: u64,
    #[serde(default = "default_gif_frame_duration")]
    pub gif_frame_duration_ms: u32,
    #[serde(default = "default_export_max_edge")]
    pub export_max_edge: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoothConfig {
    #[serde(default = "default_photo_dir")]
    pub photo_dir: String,
    /// Keep a local copy of every artifact. When false, artifacts are
    /// uploaded from memory and dropped if the upload fails.
    #[serde(default = "default_true")]
    pub save_local: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,
    #[serde(default = "default_burst_settle")]
    pub burst_settle_ms: u64,
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_url")]
    pub url: String,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_detector_timeout")]
    pub timeout_ms: u64,
}

impl DetectorConfig {
    pub fn enabled(&self) -> bool {
        matches!((&self.api_key, &self.model_id), (Some(k), Some(m)) if !k.is_empty() && !m.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_cap")]
    pub cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gallery_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            bucket: default_bucket(),
            table: default_table(),
            object_backend: default_object_backend(),
            metadata_backend: default_metadata_backend(),
            s3_endpoint: None,
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_region: default_region(),
            local_store_dir: default_local_store_dir(),
            sqlite_path: default_sqlite_path(),
            site_url: default_site_url(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: default_camera_url(),
            mode: default_camera_mode(),
            connect_timeout_secs: default_connect_timeout(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            burst_count: default_burst_count(),
            burst_interval_ms: default_burst_interval(),
            gif_frame_count: default_gif_frame_count(),
            gif_interval_ms: default_gif_interval(),
            gif_frame_duration_ms: default_gif_frame_duration(),
            export_max_edge: default_export_max_edge(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            photo_dir: default_photo_dir(),
            save_local: true,
            cooldown_secs: default_cooldown(),
            burst_settle_ms: default_burst_settle(),
            settle_ms: default_settle(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: default_tracker_url(),
            timeout_ms: default_tracker_timeout(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            api_url: default_detector_url(),
            api_key: None,
            model_id: None,
            confidence: default_confidence(),
            timeout_ms: default_detector_timeout(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cap: default_retention_cap(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_path: default_queue_path(),
            retry_interval_secs: default_retry_interval(),
            max_retries: default_max_retries(),
            upload_attempts: default_upload_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_gallery_bind(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_channel(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the legacy TOML file if it exists, then apply environment
    /// overrides. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
            Self::from_toml_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from the environment. `lookup` is `std::env::var` in
    /// production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("SUPABASE_URL") {
            self.cloud.url = url;
        }
        if self.cloud.url.is_empty() {
            if let Some(url) = get("NEXT_PUBLIC_SUPABASE_URL") {
                self.cloud.url = url;
            }
        }
        if let Some(key) = get("SUPABASE_KEY") {
            self.cloud.key = key;
        }
        if self.cloud.key.is_empty() {
            if let Some(key) = get("NEXT_PUBLIC_SUPABASE_ANON_KEY") {
                self.cloud.key = key;
            }
        }
        if let Some(bucket) = get("BUCKET_NAME") {
            self.cloud.bucket = bucket;
        }
        if let Some(access) = get("SUPABASE_S3_ACCESS_KEY") {
            self.cloud.s3_access_key = access;
        }
        if let Some(secret) = get("SUPABASE_S3_SECRET_KEY") {
            self.cloud.s3_secret_key = secret;
        }
        if let Some(site) = get("VERCEL_APP_URL").or_else(|| get("NEXT_PUBLIC_VERCEL_URL")) {
            self.cloud.site_url = site;
        }

        if let Some(key) = get("ROBOFLOW_API_KEY") {
            self.detector.api_key = Some(key);
        }
        if let Some(model) = get("ROBOFLOW_MODEL_ID") {
            self.detector.model_id = Some(model);
        }
        if let Some(raw) = get("ROBOFLOW_CONFIDENCE") {
            self.detector.confidence = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "ROBOFLOW_CONFIDENCE".into(),
                value: raw.clone(),
            })?;
        }

        if let Some(url) = get("CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(port) = get("SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(dir) = get("PHOTO_DIR") {
            self.booth.photo_dir = dir;
        }
        Ok(())
    }

    /// Whether any configured component talks to the hosted backend.
    pub fn uses_cloud(&self) -> bool {
        self.cloud.object_backend == ObjectBackend::S3
            || self.cloud.metadata_backend == MetadataBackend::Rest
            || self.remote.enabled
    }

    /// Fail fast on missing credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.uses_cloud() {
            if self.cloud.url.is_empty() {
                errors.push("missing SUPABASE_URL".to_string());
            }
            if self.cloud.key.is_empty() {
                errors.push("missing SUPABASE_KEY".to_string());
            }
        }
        if self.cloud.object_backend == ObjectBackend::S3
            && (self.cloud.s3_access_key.is_empty() || self.cloud.s3_secret_key.is_empty())
        {
            errors.push("missing S3 access key pair for the s3 object backend".to_string());
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            errors.push(format!(
                "detector confidence {} outside 0.0..=1.0",
                self.detector.confidence
            ));
        }
        if self.capture.burst_count == 0 || self.capture.gif_frame_count == 0 {
            errors.push("capture frame counts must be positive".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join(", ")))
        }
    }

    /// `<url>/storage/v1/s3` unless overridden.
    pub fn s3_endpoint(&self) -> String {
        self.cloud.s3_endpoint.clone().unwrap_or_else(|| {
            format!("{}/storage/v1/s3", self.cloud.url.trim_end_matches('/'))
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: String, value: String },
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_bucket() -> String {
    "photos".into()
}
fn default_table() -> String {
    "photos".into()
}
fn default_object_backend() -> ObjectBackend {
    ObjectBackend::S3
}
fn default_metadata_backend() -> MetadataBackend {
    MetadataBackend::Rest
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_local_store_dir() -> String {
    "cloud-store".into()
}
fn default_sqlite_path() -> String {
    "booth.db".into()
}
fn default_site_url() -> String {
    "https://excel-mascot.vercel.app/".into()
}
fn default_camera_url() -> String {
    "http://127.0.0.1:8080/stream".into()
}
fn default_camera_mode() -> CameraMode {
    CameraMode::Mjpeg
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_startup_timeout() -> u64 {
    10
}
fn default_burst_count() -> usize {
    4
}
fn default_burst_interval() -> u64 {
    500
}
fn default_gif_frame_count() -> usize {
    8
}
fn default_gif_interval() -> u64 {
    200
}
fn default_gif_frame_duration() -> u32 {
    200
}
fn default_export_max_edge() -> u32 {
    1600
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_photo_dir() -> String {
    "photos".into()
}
fn default_cooldown() -> f64 {
    6.0
}
fn default_burst_settle() -> u64 {
    300
}
fn default_settle() -> u64 {
    500
}
fn default_serial_port() -> String {
    "/dev/ttyACM0".into()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_reconnect_secs() -> u64 {
    5
}
fn default_tracker_url() -> String {
    "http://127.0.0.1:8765/hands".into()
}
fn default_tracker_timeout() -> u64 {
    500
}
fn default_detector_url() -> String {
    "https://detect.roboflow.com".into()
}
fn default_confidence() -> f32 {
    0.8
}
fn default_detector_timeout() -> u64 {
    2000
}
fn default_retention_cap() -> usize {
    600
}
fn default_queue_path() -> String {
    "sync_queue.json".into()
}
fn default_retry_interval() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_upload_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_gallery_bind() -> String {
    "0.0.0.0:5000".into()
}
fn default_channel() -> String {
    "booth_control".into()
}
fn default_heartbeat() -> u64 {
    25
}
fn default_log_level() -> String {
    "info".into()
}
