mod camera;
mod capture;
mod controller;
mod detector;
mod filter;
mod gesture;
mod keyboard;
mod led;
mod tracker;

use booth_cloud::remote::RemoteControl;
use booth_cloud::Stores;
use booth_common::config::Config;
use booth_common::state::BoothState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::capture::CaptureSequencer;
use crate::controller::Booth;
use crate::detector::Detector;
use crate::led::{CommandSink, NullSink, SerialBridge};
use crate::tracker::{HandTracker, HttpHandTracker};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("booth.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    info!(
        camera = config.camera.url,
        photo_dir = config.booth.photo_dir,
        site = config.cloud.site_url,
        "starting mascot photo booth"
    );

    if let Err(e) = std::fs::create_dir_all(&config.booth.photo_dir) {
        error!(error = %e, dir = config.booth.photo_dir, "cannot create photo directory");
        std::process::exit(1);
    }

    let state = Arc::new(BoothState::new());

    if config.gallery.enabled {
        let app = booth_gallery::router(&config.booth.photo_dir, Arc::clone(&state));
        let bind = config.gallery.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = booth_gallery::serve(&bind, app).await {
                error!(error = %e, bind, "gallery server stopped");
            }
        });
    }

    if config.remote.enabled {
        RemoteControl::new(&config, Arc::clone(&state)).spawn();
    }

    let stores = match Stores::open(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open cloud stores");
            std::process::exit(1);
        }
    };
    let uploader = Arc::new(stores.uploader(&config));
    Arc::clone(&uploader).spawn_sweeper(Duration::from_secs(config.sync.retry_interval_secs.max(1)));

    let leds: Box<dyn CommandSink> = if config.serial.enabled {
        Box::new(SerialBridge::new(&config.serial))
    } else {
        Box::new(NullSink)
    };

    let tracker: Arc<dyn HandTracker> = match HttpHandTracker::new(&config.tracker) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!(error = %e, "failed to build landmark client");
            std::process::exit(1);
        }
    };

    let detector = match Detector::from_config(&config.detector) {
        Ok(Some(d)) => {
            info!(model = ?config.detector.model_id, threshold = d.threshold(), "prop detection enabled");
            Some(d)
        }
        Ok(None) => {
            info!("prop detection disabled, set ROBOFLOW_API_KEY and ROBOFLOW_MODEL_ID to enable");
            None
        }
        Err(e) => {
            warn!(error = %e, "prop detection unavailable");
            None
        }
    };

    let camera = match camera::open(&config.camera).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, url = config.camera.url, "could not open camera");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    keyboard::spawn_stdin(Arc::clone(&state), shutdown_tx.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let booth = Booth::new(
        camera,
        Some(tracker),
        detector,
        leds,
        state,
        CaptureSequencer::new(config.capture.clone(), &config.booth.photo_dir),
        Some(uploader),
        config.booth.clone(),
    );
    booth.run(shutdown_rx).await;
}
