//! Wire formats of the audio service: URLs, poll classification, upload
//! naming and response bodies.

use crate::error::{Result, TalkbackError};
use serde::{Deserialize, Serialize};

/// Header carrying the device identifier on every request.
pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// The service has a clip ready under this id.
    Found(String),
    /// Nothing to play.
    NotFound,
}

/// Body of a `200` poll response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollResponse {
    pub audio_id: String,
}

/// Body of an upload response. Both fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Transcription returned by the service, if any.
    pub text: Option<String>,
    /// Device id echoed by the service, if any.
    pub device_id: Option<String>,
}

impl From<UploadResponse> for UploadReceipt {
    fn from(response: UploadResponse) -> Self {
        Self {
            text: response.text.filter(|t| !t.trim().is_empty()),
            device_id: response.device_id,
        }
    }
}

/// Classifies a poll response by status code and body.
///
/// `204` means no work and `200` must carry a valid `audio_id`. Any other
/// status is a transport error.
pub fn classify_poll(status: u16, url: &str, body: &[u8]) -> Result<PollResult> {
    match status {
        204 => Ok(PollResult::NotFound),
        200 => {
            let response: PollResponse =
                serde_json::from_slice(body).map_err(|e| TalkbackError::Parse {
                    message: format!("poll response: {e}"),
                })?;
            validate_audio_id(&response.audio_id)?;
            Ok(PollResult::Found(response.audio_id))
        }
        status => Err(TalkbackError::HttpStatus {
            status,
            url: url.to_string(),
        }),
    }
}

/// Parses an upload response body. An empty body yields an empty receipt.
pub fn parse_upload_response(body: &[u8]) -> Result<UploadReceipt> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(UploadReceipt::default());
    }
    let response: UploadResponse =
        serde_json::from_slice(body).map_err(|e| TalkbackError::Parse {
            message: format!("upload response: {e}"),
        })?;
    Ok(response.into())
}

/// Audio ids are interpolated into a URL path, so only a safe alphabet is
/// accepted.
pub fn validate_audio_id(audio_id: &str) -> Result<()> {
    let valid = !audio_id.is_empty()
        && audio_id.len() <= 128
        && audio_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !audio_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(TalkbackError::Parse {
            message: format!("invalid audio_id {audio_id:?}"),
        })
    }
}

/// `{base}/poll`
pub fn poll_url(base: &str) -> String {
    format!("{}/poll", base.trim_end_matches('/'))
}

/// `{base}/audio/{audio_id}.pcm`
pub fn audio_url(base: &str, audio_id: &str) -> String {
    format!("{}/audio/{}.pcm", base.trim_end_matches('/'), audio_id)
}

/// `{base}/upload`
pub fn upload_url(base: &str) -> String {
    format!("{}/upload", base.trim_end_matches('/'))
}

/// `<prefix>_<device_id>_<unix_ts>.pcm`
pub fn upload_file_name(prefix: &str, device_id: &str, unix_ts: u64) -> String {
    format!("{prefix}_{device_id}_{unix_ts}.pcm")
}
