//! HTTP uploader posting chunks to the relay

use reqwest::header::CONTENT_TYPE;

use crate::audio::PcmChunk;
use crate::config::AgentConfig;
use crate::error::UploadError;
use crate::protocol::{HealthResponse, IngestMessage};

/// Posts chunks to `/audio` as JSON
pub struct Uploader {
    client: reqwest::Client,
    audio_url: String,
    health_url: String,
    machine_id: String,
    client_name: Option<String>,
}

impl Uploader {
    pub fn new(config: &AgentConfig, machine_id: impl Into<String>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let base = config.server_url.trim_end_matches('/');

        Ok(Self {
            client,
            audio_url: format!("{}/audio", base),
            health_url: format!("{}/health", base),
            machine_id: machine_id.into(),
            client_name: config.client_name.clone(),
        })
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Ingestion message carrying `chunk`
    pub fn message(&self, chunk: &PcmChunk) -> IngestMessage {
        IngestMessage::audio(
            chunk.data.clone(),
            chunk.format,
            self.client_name.clone(),
            self.machine_id.clone(),
        )
    }

    /// Post one chunk
    pub async fn upload(&self, chunk: &PcmChunk) -> Result<(), UploadError> {
        let body = serde_json::to_vec(&self.message(chunk))?;
        let response = self
            .client
            .post(&self.audio_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        Ok(())
    }

    /// Query the relay's `/health`
    pub async fn check_health(&self) -> Result<HealthResponse, UploadError> {
        let response = self.client.get(&self.health_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}
