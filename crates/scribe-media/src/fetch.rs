//! Authenticated media download into a request's scratch directory.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use scribe_core::error::PipelineError;
use scribe_core::types::MediaRef;

use crate::audio::{AudioAsset, AudioNormalizer, ScratchDir, extension_for};

/// Longest provider error body kept in a [`PipelineError::DownloadFailed`].
const MAX_ERROR_BODY: usize = 512;

/// Retrieves an attachment and leaves a normalized WAV in the scratch directory.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        media: &MediaRef,
        scratch: &ScratchDir,
    ) -> Result<AudioAsset, PipelineError>;
}

/// HTTP Basic credentials for the media host (the Twilio account SID and token).
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// [`MediaFetcher`] that downloads over HTTP(S) and hands off to an [`AudioNormalizer`].
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    credentials: Option<BasicCredentials>,
    normalizer: Arc<dyn AudioNormalizer>,
    max_bytes: u64,
}

impl HttpMediaFetcher {
    pub fn new(
        credentials: Option<BasicCredentials>,
        normalizer: Arc<dyn AudioNormalizer>,
        timeout: Duration,
        max_bytes: u64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials,
            normalizer,
            max_bytes,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let mut req = self.client.get(url);
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }

        let mut resp = req.send().await.map_err(|e| PipelineError::DownloadFailed {
            status: None,
            detail: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = truncate(body.trim(), MAX_ERROR_BODY);
            error!(%status, url, body = %body, "Media download rejected");
            return Err(PipelineError::DownloadFailed {
                status: Some(status.as_u16()),
                detail: if body.is_empty() {
                    status.canonical_reason().unwrap_or("error").to_string()
                } else {
                    body
                },
            });
        }

        let too_large = |size: u64| PipelineError::DownloadFailed {
            status: Some(status.as_u16()),
            detail: format!("media exceeds {} bytes (got at least {size})", self.max_bytes),
        };
        if let Some(len) = resp.content_length() {
            if len > self.max_bytes {
                return Err(too_large(len));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| PipelineError::DownloadFailed {
            status: Some(status.as_u16()),
            detail: format!("download interrupted: {e}"),
        })? {
            let size = (bytes.len() + chunk.len()) as u64;
            if size > self.max_bytes {
                return Err(too_large(size));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(PipelineError::DownloadFailed {
                status: Some(status.as_u16()),
                detail: "media body is empty".into(),
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(
        &self,
        media: &MediaRef,
        scratch: &ScratchDir,
    ) -> Result<AudioAsset, PipelineError> {
        let bytes = self.download(&media.url).await?;

        let encoded_path = scratch.file(&format!("source.{}", extension_for(&media.content_type)));
        tokio::fs::write(&encoded_path, &bytes)
            .await
            .map_err(|e| PipelineError::DownloadFailed {
                status: None,
                detail: format!("could not store media: {e}"),
            })?;

        let wav_path = scratch.file("normalized.wav");
        let summary = self.normalizer.normalize(&encoded_path, &wav_path).await?;

        info!(
            request_id = scratch.request_id(),
            content_type = %media.content_type,
            bytes = bytes.len(),
            duration_secs = summary.duration_secs,
            "Media downloaded"
        );

        Ok(AudioAsset {
            content_type: media.content_type.clone(),
            encoded_path,
            encoded_bytes: bytes.len() as u64,
            wav_path,
            duration_secs: summary.duration_secs,
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Redirect};
    use axum::routing::get;
    use base64::Engine;

    use crate::audio::{FfmpegNormalizer, pcm_to_wav};

    fn fixture() -> Vec<u8> {
        let samples: Vec<i16> = (0..16000).map(|i| ((i % 100) * 50) as i16).collect();
        pcm_to_wav(&samples, 16000).unwrap()
    }

    fn expected_auth() -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("AC123:secret")
        )
    }

    async fn media_host() -> String {
        let app = Router::new()
            .route(
                "/media/voice",
                get(|headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth == expected_auth() {
                        (StatusCode::OK, fixture()).into_response()
                    } else {
                        (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
                    }
                }),
            )
            .route(
                "/media/garbage",
                get(|| async { b"OggS definitely not audio".to_vec() }),
            )
            .route(
                "/media/missing",
                get(|| async { (StatusCode::NOT_FOUND, "not found") }),
            )
            .route(
                "/media/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    fixture()
                }),
            );
        spawn(app).await
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn fetcher(password: &str, max_bytes: u64) -> HttpMediaFetcher {
        fetcher_with_timeout(password, max_bytes, Duration::from_secs(5))
    }

    fn fetcher_with_timeout(password: &str, max_bytes: u64, timeout: Duration) -> HttpMediaFetcher {
        HttpMediaFetcher::new(
            Some(BasicCredentials {
                username: "AC123".into(),
                password: password.into(),
            }),
            Arc::new(FfmpegNormalizer::new(
                "/nonexistent/bin/ffmpeg",
                Duration::from_secs(5),
            )),
            timeout,
            max_bytes,
        )
        .unwrap()
    }

    fn media(base: &str, path: &str, content_type: &str) -> MediaRef {
        MediaRef {
            content_type: content_type.into(),
            url: format!("{base}{path}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_credentials() {
        let base = media_host().await;
        let parent = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(Some(parent.path()), "req-ok").unwrap();

        let asset = fetcher("secret", 1 << 20)
            .fetch(&media(&base, "/media/voice", "audio/wav"), &scratch)
            .await
            .unwrap();

        assert_eq!(asset.encoded_bytes, fixture().len() as u64);
        assert!(asset.encoded_path.starts_with(scratch.path()));
        assert!(asset.wav_path.starts_with(scratch.path()));
        assert_eq!(asset.wav_bytes().await.unwrap(), fixture());
        assert!((asset.duration_secs - 1.0).abs() < 0.01);

        let dir = scratch.path().to_path_buf();
        scratch.close().unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_wrong_credentials_is_download_failed() {
        let base = media_host().await;
        let scratch = ScratchDir::create(None, "req-401").unwrap();

        let err = fetcher("wrong", 1 << 20)
            .fetch(&media(&base, "/media/voice", "audio/ogg"), &scratch)
            .await
            .unwrap_err();
        match err {
            PipelineError::DownloadFailed { status, detail } => {
                assert_eq!(status, Some(401));
                assert_eq!(detail, "bad credentials");
            }
            other => panic!("expected DownloadFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_download_failed() {
        let base = media_host().await;
        let scratch = ScratchDir::create(None, "req-404").unwrap();

        let err = fetcher("secret", 1 << 20)
            .fetch(&media(&base, "/media/missing", "audio/ogg"), &scratch)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Media download failed (HTTP 404): not found"
        );
    }

    #[tokio::test]
    async fn test_size_cap() {
        let base = media_host().await;
        let scratch = ScratchDir::create(None, "req-big").unwrap();

        let err = fetcher("secret", 100)
            .fetch(&media(&base, "/media/voice", "audio/wav"), &scratch)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DownloadFailed { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_undecodable_media_is_decode_failed() {
        let base = media_host().await;
        let scratch = ScratchDir::create(None, "req-garbage").unwrap();

        let err = fetcher("secret", 1 << 20)
            .fetch(&media(&base, "/media/garbage", "audio/ogg"), &scratch)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DecodeFailed(_)), "got {err:?}");
        assert!(scratch.file("source.ogg").exists());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let scratch = ScratchDir::create(None, "req-down").unwrap();
        let err = fetcher("secret", 1 << 20)
            .fetch(&media("http://127.0.0.1:9", "/media/voice", "audio/ogg"), &scratch)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DownloadFailed { status: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_slow_host_times_out() {
        let base = media_host().await;
        let scratch = ScratchDir::create(None, "req-slow").unwrap();

        let started = std::time::Instant::now();
        let err = fetcher_with_timeout("secret", 1 << 20, Duration::from_secs(1))
            .fetch(&media(&base, "/media/slow", "audio/wav"), &scratch)
            .await
            .unwrap_err();
        assert!(
            matches!(err, PipelineError::DownloadFailed { status: None, .. }),
            "got {err:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_redirect_to_other_host_drops_credentials() {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
        let cdn_seen = seen.clone();
        let cdn = spawn(Router::new().route(
            "/blob/voice",
            get(move |headers: HeaderMap| {
                let seen = cdn_seen.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push(auth);
                    fixture()
                }
            }),
        ))
        .await;

        let target = format!("{cdn}/blob/voice");
        let origin = spawn(Router::new().route(
            "/media/voice",
            get(move |headers: HeaderMap| {
                let target = target.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth == expected_auth() {
                        Redirect::temporary(&target).into_response()
                    } else {
                        (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
                    }
                }
            }),
        ))
        .await;

        let scratch = ScratchDir::create(None, "req-redirect").unwrap();
        let asset = fetcher("secret", 1 << 20)
            .fetch(&media(&origin, "/media/voice", "audio/wav"), &scratch)
            .await
            .unwrap();

        assert_eq!(asset.encoded_bytes, fixture().len() as u64);
        assert_eq!(*seen.lock().unwrap(), vec![None]);
        scratch.close().unwrap();
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = BasicCredentials {
            username: "AC1".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
