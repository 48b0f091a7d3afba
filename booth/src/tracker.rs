use async_trait::async_trait;
use booth_common::config::TrackerConfig;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::gesture::{Landmark, HAND_LANDMARKS};

/// Source of hand landmarks for a frame.
#[async_trait]
pub trait HandTracker: Send + Sync {
    /// Hands found in the JPEG frame, each with 21 landmarks.
    async fn hands(&self, jpeg: &[u8]) -> Result<Vec<Vec<Landmark>>, TrackerError>;
}

#[derive(Deserialize)]
struct HandsResponse {
    #[serde(default)]
    hands: Vec<Hand>,
}

#[derive(Deserialize)]
struct Hand {
    #[serde(default)]
    landmarks: Vec<Landmark>,
}

/// Landmark model served over HTTP: POST a JPEG, get
/// `{"hands":[{"landmarks":[{"x","y","z"}, ...]}]}` back.
pub struct HttpHandTracker {
    client: reqwest::Client,
    url: String,
}

impl HttpHandTracker {
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

fn complete_hands(body: HandsResponse) -> Vec<Vec<Landmark>> {
    body.hands
        .into_iter()
        .map(|hand| hand.landmarks)
        .filter(|landmarks| landmarks.len() >= HAND_LANDMARKS)
        .collect()
}

#[async_trait]
impl HandTracker for HttpHandTracker {
    async fn hands(&self, jpeg: &[u8]) -> Result<Vec<Vec<Landmark>>, TrackerError> {
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TrackerError::Status(resp.status().as_u16()));
        }
        let hands = complete_hands(resp.json().await?);
        debug!(hands = hands.len(), "landmarks received");
        Ok(hands)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("landmark request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("landmark service returned {0}")]
    Status(u16),
}
