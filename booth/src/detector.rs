use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use booth_common::config::DetectorConfig;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::led::LedCommand;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    /// Top-left x, top-left y, width, height in pixels.
    pub bbox: (i32, i32, i32, i32),
}

#[derive(Deserialize)]
struct Prediction {
    #[serde(rename = "class", default = "unknown_class")]
    class_name: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
}

fn unknown_class() -> String {
    "unknown".into()
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

impl From<Prediction> for Detection {
    fn from(p: Prediction) -> Self {
        Detection {
            class_name: p.class_name,
            confidence: p.confidence,
            bbox: (
                (p.x - p.width / 2.0) as i32,
                (p.y - p.height / 2.0) as i32,
                p.width as i32,
                p.height as i32,
            ),
        }
    }
}

/// Roboflow hosted inference client. Failures are returned to the caller,
/// which treats them as nothing seen.
pub struct Detector {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    threshold: f32,
}

impl Detector {
    /// `None` unless both the API key and model id are configured.
    pub fn from_config(config: &DetectorConfig) -> Result<Option<Self>, DetectorError> {
        let (Some(api_key), Some(model_id)) = (&config.api_key, &config.model_id) else {
            return Ok(None);
        };
        if api_key.is_empty() || model_id.is_empty() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Some(Self {
            client,
            endpoint: format!("{}/{}", config.api_url.trim_end_matches('/'), model_id),
            api_key: api_key.clone(),
            threshold: config.confidence,
        }))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Run detection on one JPEG frame.
    pub async fn detect(&self, jpeg: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        let started = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("api_key", self.api_key.clone()),
                ("confidence", self.threshold.to_string()),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(STANDARD.encode(jpeg))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(DetectorError::Status(resp.status().as_u16()));
        }
        let body: PredictResponse = resp.json().await?;
        let detections: Vec<Detection> = body.predictions.into_iter().map(Detection::from).collect();
        debug!(
            count = detections.len(),
            inference_ms = started.elapsed().as_millis() as u64,
            "detections received"
        );
        Ok(detections)
    }

    /// Command for the first detection at or above the threshold.
    pub fn ambient_command(&self, detections: &[Detection]) -> Option<LedCommand> {
        detections
            .iter()
            .find_map(|d| command_for(d, self.threshold))
    }
}

/// LED command a detected prop maps to, matched by substring of the
/// lowercased class name. Low-confidence detections map to nothing.
pub fn command_for(detection: &Detection, threshold: f32) -> Option<LedCommand> {
    if detection.confidence < threshold {
        return None;
    }
    let class = detection.class_name.to_lowercase();
    const MAPPINGS: [(&str, LedCommand); 5] = [
        ("heart", LedCommand::Love),
        ("star", LedCommand::Rainbow),
        ("hat", LedCommand::Wink),
        ("glasses", LedCommand::Sus),
        ("mascot", LedCommand::Welcome),
    ];
    Some(
        MAPPINGS
            .iter()
            .find(|(key, _)| class.contains(key))
            .map_or(LedCommand::Custom, |(_, cmd)| *cmd),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detection request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("detection API returned {0}")]
    Status(u16),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::post;
    use serde_json::json;
    use std::collections::HashMap;

    fn det(class: &str, confidence: f32) -> Detection {
        Detection {
            class_name: class.into(),
            confidence,
            bbox: (0, 0, 1, 1),
        }
    }

    fn config(api_url: String) -> DetectorConfig {
        DetectorConfig {
            api_url,
            api_key: Some("k3y".into()),
            model_id: Some("props/2".into()),
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn class_mapping() {
        assert_eq!(command_for(&det("Heart", 0.9), 0.8), Some(LedCommand::Love));
        assert_eq!(command_for(&det("gold-star", 0.9), 0.8), Some(LedCommand::Rainbow));
        assert_eq!(command_for(&det("top hat", 0.9), 0.8), Some(LedCommand::Wink));
        assert_eq!(command_for(&det("sunglasses", 0.9), 0.8), Some(LedCommand::Sus));
        assert_eq!(command_for(&det("mascot", 0.95), 0.8), Some(LedCommand::Welcome));
        assert_eq!(command_for(&det("umbrella", 0.95), 0.8), Some(LedCommand::Custom));
    }

    #[test]
    fn below_threshold_is_ignored() {
        assert_eq!(command_for(&det("heart", 0.5), 0.8), None);
        assert_eq!(command_for(&det("heart", 0.8), 0.8), Some(LedCommand::Love));
    }

    #[test]
    fn disabled_without_credentials() {
        let mut cfg = config("http://x".into());
        cfg.model_id = None;
        assert!(Detector::from_config(&cfg).unwrap().is_none());
        assert!(Detector::from_config(&DetectorConfig::default()).unwrap().is_none());
    }

    #[test]
    fn box_is_converted_from_centre() {
        let d = Detection::from(Prediction {
            class_name: "hat".into(),
            confidence: 0.9,
            x: 50.0,
            y: 40.0,
            width: 20.0,
            height: 10.0,
        });
        assert_eq!(d.bbox, (40, 35, 20, 10));
    }

    #[tokio::test]
    async fn posts_base64_and_picks_first_confident() {
        let app = axum::Router::new().route(
            "/props/2",
            post(|Query(q): Query<HashMap<String, String>>, body: String| async move {
                assert_eq!(q["api_key"], "k3y");
                assert_eq!(body, STANDARD.encode(b"jpeg"));
                axum::Json(json!({ "predictions": [
                    { "class": "heart", "confidence": 0.4, "x": 1, "y": 1, "width": 2, "height": 2 },
                    { "class": "mascot", "confidence": 0.93, "x": 1, "y": 1, "width": 2, "height": 2 },
                    { "class": "star", "confidence": 0.99, "x": 1, "y": 1, "width": 2, "height": 2 }
                ]}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let detector = Detector::from_config(&config(format!("http://{addr}")))
            .unwrap()
            .unwrap();
        let detections = detector.detect(b"jpeg").await.unwrap();
        assert_eq!(detections.len(), 3);
        assert_eq!(detector.ambient_command(&detections), Some(LedCommand::Welcome));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let app = axum::Router::new().route(
            "/props/2",
            post(|| async { axum::http::StatusCode::FORBIDDEN }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let detector = Detector::from_config(&config(format!("http://{addr}")))
            .unwrap()
            .unwrap();
        assert!(matches!(
            detector.detect(b"jpeg").await,
            Err(DetectorError::Status(403))
        ));
    }
}
