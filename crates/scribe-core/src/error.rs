use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScribeError>;

/// Failures of the inbound-message pipeline.
///
/// Every variant is turned into an HTTP response at the webhook boundary;
/// none of them is fatal to the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Request signature validation failed")]
    ValidationFailed,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Media download failed{}: {detail}", status_suffix(.status))]
    DownloadFailed { status: Option<u16>, detail: String },

    #[error("Audio decode failed: {0}")]
    DecodeFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Reply send failed: {0}")]
    SendFailed(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl PipelineError {
    /// Pipeline stage the error belongs to, for logs and metrics labels.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validate",
            Self::MalformedRequest(_) => "receive",
            Self::DownloadFailed { .. } => "download",
            Self::DecodeFailed(_) => "decode",
            Self::TranscriptionFailed(_) => "transcribe",
            Self::SendFailed(_) => "reply",
        }
    }

    /// HTTP status the webhook answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationFailed => 403,
            Self::MalformedRequest(_) => 400,
            _ => 500,
        }
    }

    /// Whether the sender should hear about this failure when failure notices are on.
    /// Request-level rejections and send failures never notify.
    pub fn notifies_sender(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. } | Self::DecodeFailed(_) | Self::TranscriptionFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_failed_display() {
        let with_status = PipelineError::DownloadFailed {
            status: Some(404),
            detail: "not found".into(),
        };
        assert_eq!(
            with_status.to_string(),
            "Media download failed (HTTP 404): not found"
        );

        let without_status = PipelineError::DownloadFailed {
            status: None,
            detail: "connection refused".into(),
        };
        assert_eq!(
            without_status.to_string(),
            "Media download failed: connection refused"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(PipelineError::ValidationFailed.http_status(), 403);
        assert_eq!(PipelineError::MalformedRequest("x".into()).http_status(), 400);
        assert_eq!(PipelineError::DecodeFailed("x".into()).http_status(), 500);
        assert_eq!(PipelineError::SendFailed("x".into()).http_status(), 500);
    }

    #[test]
    fn test_notifies_sender() {
        assert!(PipelineError::TranscriptionFailed("x".into()).notifies_sender());
        assert!(!PipelineError::SendFailed("x".into()).notifies_sender());
        assert!(!PipelineError::ValidationFailed.notifies_sender());
    }
}
