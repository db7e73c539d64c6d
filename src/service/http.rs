//! HTTP implementation of [`AudioService`] on reqwest.

use crate::audio::DownloadBuffer;
use crate::config::ServiceConfig;
use crate::defaults::UPLOAD_CHUNK_BYTES;
use crate::error::{Result, TalkbackError};
use crate::service::protocol::{self, DEVICE_ID_HEADER, PollResult, UploadReceipt};
use crate::service::{AudioService, append_chunk};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Client for the TTS poll/download endpoints and the STT upload endpoint.
pub struct HttpAudioService {
    client: reqwest::Client,
    base_url: String,
    upload_base_url: String,
    device_id: String,
    upload_prefix: String,
    poll_timeout: Duration,
    request_timeout: Duration,
}

impl HttpAudioService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TalkbackError::Transport {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            upload_base_url: config.upload_base().to_string(),
            device_id: config.device_id.clone(),
            upload_prefix: config.upload_prefix.clone(),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

fn transport(context: &str, e: reqwest::Error) -> TalkbackError {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    TalkbackError::Transport {
        message: format!("{context}: {kind}: {e}"),
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl AudioService for HttpAudioService {
    async fn poll(&self) -> Result<PollResult> {
        let url = protocol::poll_url(&self.base_url);
        let response = self
            .client
            .get(&url)
            .header(DEVICE_ID_HEADER, &self.device_id)
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| transport("poll", e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| transport("poll", e))?;
        tracing::trace!(status, bytes = body.len(), "poll response");
        protocol::classify_poll(status, &url, &body)
    }

    async fn download(&self, audio_id: &str, buffer: &mut DownloadBuffer) -> Result<()> {
        protocol::validate_audio_id(audio_id)?;
        let url = protocol::audio_url(&self.base_url, audio_id);
        let response = self
            .client
            .get(&url)
            .header(DEVICE_ID_HEADER, &self.device_id)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport("download", e))?;

        if !response.status().is_success() {
            return Err(TalkbackError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        if let Some(total) = response.content_length() {
            tracing::debug!(audio_id, total, "content length known, pre-sizing buffer");
            buffer.reserve_total(total as usize);
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport("download", e))?;
            if !append_chunk(buffer, &chunk) {
                break;
            }
        }
        Ok(())
    }

    async fn upload(&self, pcm: &[u8]) -> Result<UploadReceipt> {
        let url = protocol::upload_url(&self.upload_base_url);
        let file_name =
            protocol::upload_file_name(&self.upload_prefix, &self.device_id, unix_timestamp());
        let total = pcm.len();
        let chunk_count = total.div_ceil(UPLOAD_CHUNK_BYTES);

        let chunks: Vec<Vec<u8>> = pcm.chunks(UPLOAD_CHUNK_BYTES).map(<[u8]>::to_vec).collect();
        let body = futures_util::stream::iter(chunks.into_iter().enumerate().map(
            move |(index, chunk)| {
                if (index + 1) % 10 == 0 || index + 1 == chunk_count {
                    tracing::debug!(chunk = index + 1, of = chunk_count, "upload progress");
                }
                Ok::<_, std::io::Error>(chunk)
            },
        ));

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total as u64)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| TalkbackError::Upload {
                message: e.to_string(),
            })?;
        let form = Form::new()
            .text("device_id", self.device_id.clone())
            .part("file", part);

        tracing::info!(file = %file_name, bytes = total, "uploading recording");
        let response = self
            .client
            .post(&url)
            .header(DEVICE_ID_HEADER, &self.device_id)
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TalkbackError::Upload {
                message: format!("{url}: {e}"),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| TalkbackError::Upload {
            message: format!("reading response: {e}"),
        })?;
        if !status.is_success() {
            return Err(TalkbackError::Upload {
                message: format!("HTTP {} from {}", status.as_u16(), url),
            });
        }
        protocol::parse_upload_response(&body)
    }
}
