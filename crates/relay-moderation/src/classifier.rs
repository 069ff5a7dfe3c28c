//! Outbound HTTP client for the external image/media classifier
//! (SPEC_FULL.md §4.5). New relative to the teacher: `prober` never made a
//! real network call, it simulated probe results inline in `main.rs`; this
//! replaces the simulated `rand::random::<bool>()` with a real `reqwest`
//! multipart POST of the downloaded media, keeping the surrounding
//! worker-loop shape `prober/src/main.rs` used.

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to read downloaded media: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    pub decision: Decision,
    pub confidence: f64,
    pub content_level: u8,
    #[serde(default)]
    pub reason: String,
}

pub struct ClassifierClient {
    http: reqwest::Client,
    base_url: String,
}

impl ClassifierClient {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("classifier http client config is valid");
        Self { http, base_url }
    }

    /// POST the already-downloaded media files at `paths` to the classifier
    /// and parse its decision. `mode` distinguishes image vs. video
    /// classification and is sent as a plain form field.
    pub async fn classify(&self, paths: &[std::path::PathBuf], mode: &str) -> Result<ClassifyResponse, ClassifierError> {
        let mut form = multipart::Form::new().text("mode", mode.to_string());
        for path in paths {
            form = form.part("media", file_part(path).await?);
        }
        let response = self
            .http
            .post(format!("{}/classify", self.base_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let parsed = response.json::<ClassifyResponse>().await?;
        Ok(parsed)
    }
}

async fn file_part(path: &Path) -> Result<multipart::Part, ClassifierError> {
    let bytes = tokio::fs::read(path).await?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(multipart::Part::bytes(bytes).file_name(name))
}
