//! Inbound webhook orchestration: validate, parse, fetch, transcribe, reply.

use std::sync::Arc;
use std::time::Instant;

use axum::Form;
use axum::extract::rejection::FormRejection;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use scribe_core::error::PipelineError;
use scribe_core::types::{InboundMessage, MediaRef};
use scribe_media::ScratchDir;
use scribe_twilio::SIGNATURE_HEADER;
use scribe_twilio::inbound::{FormParams, parse_inbound, parse_status};

use crate::state::GatewayState;

/// Reply body for a voice note with no recognizable speech.
pub const NO_SPEECH_REPLY: &str = "(no speech detected)";

/// Best-effort notice sent to the sender when their voice note could not be processed.
pub const FAILURE_NOTICE: &str = "Sorry, I couldn't transcribe that voice message.";

/// `POST /webhook`: one inbound WhatsApp message.
pub async fn webhook_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    form: Result<Form<FormParams>, FormRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("webhook", %request_id);
    handle_inbound(state, headers, uri, form, request_id)
        .instrument(span)
        .await
}

async fn handle_inbound(
    state: Arc<GatewayState>,
    headers: HeaderMap,
    uri: Uri,
    form: Result<Form<FormParams>, FormRejection>,
    request_id: String,
) -> Response {
    let params = match form {
        Ok(Form(params)) => params,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Undecodable webhook body");
            return finish(Err(PipelineError::MalformedRequest(rejection.body_text())));
        }
    };

    if let Some(validator) = &state.validator {
        let url = signed_url(&state, &headers, &uri);
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !validator.validate(&url, &params, signature) {
            warn!(url, "Rejected webhook with invalid signature");
            return finish(Err(PipelineError::ValidationFailed));
        }
    }

    let message = match parse_inbound(&params) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "Rejected malformed webhook");
            return finish(Err(err));
        }
    };

    info!(
        channel = %message.channel,
        sender = %message.sender,
        profile_name = message.profile_name.as_deref().unwrap_or_default(),
        num_media = message.num_media,
        message_sid = message.message_sid.as_deref().unwrap_or_default(),
        received_at = %message.received_at.to_rfc3339(),
        "Inbound message"
    );

    let Some(media) = message.first_audio() else {
        debug!(sender = %message.sender, "No audio attachment, nothing to do");
        return finish(Ok(()));
    };
    if media.url.trim().is_empty() {
        return finish(Err(PipelineError::MalformedRequest(
            "audio attachment has no URL".into(),
        )));
    }

    let started = Instant::now();
    let outcome = process_voice_note(&state, &request_id, &message, media).await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_voice_note(outcome.as_ref().err(), started.elapsed().as_secs_f64());

    match outcome {
        Ok(sid) => {
            info!(
                sender = %message.sender,
                reply_sid = %sid,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transcript delivered"
            );
            finish(Ok(()))
        }
        Err(err) => {
            error!(
                stage = err.stage(),
                sender = %message.sender,
                media_url = %media.url,
                error = %err,
                "Voice note pipeline failed"
            );
            if state.notify_on_failure && err.notifies_sender() {
                if let Err(notice_err) = state.dispatcher.send(FAILURE_NOTICE, &message.sender).await {
                    warn!(error = %notice_err, "Failure notice could not be sent");
                }
            }
            finish(Err(err))
        }
    }
}

/// Run the pipeline inside a fresh scratch directory and always remove it.
async fn process_voice_note(
    state: &GatewayState,
    request_id: &str,
    message: &InboundMessage,
    media: &MediaRef,
) -> Result<String, PipelineError> {
    let scratch = ScratchDir::create(state.scratch_root.as_deref(), request_id).map_err(|e| {
        PipelineError::DownloadFailed {
            status: None,
            detail: format!("could not create scratch directory: {e}"),
        }
    })?;

    let outcome = transcribe_and_reply(state, &scratch, message, media).await;

    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
    }
    outcome
}

async fn transcribe_and_reply(
    state: &GatewayState,
    scratch: &ScratchDir,
    message: &InboundMessage,
    media: &MediaRef,
) -> Result<String, PipelineError> {
    let audio = state.fetcher.fetch(media, scratch).await?;

    let started = Instant::now();
    let transcript = tokio::time::timeout(
        state.transcribe_timeout,
        state.transcriber.transcribe(&audio, &state.language),
    )
    .await
    .map_err(|_| {
        PipelineError::TranscriptionFailed(format!(
            "timed out after {}s",
            state.transcribe_timeout.as_secs()
        ))
    })??;

    info!(
        transcriber = state.transcriber.name(),
        chars = transcript.text.chars().count(),
        audio_secs = audio.duration_secs,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Voice note transcribed"
    );

    let body = if transcript.text.is_empty() {
        NO_SPEECH_REPLY
    } else {
        transcript.text.as_str()
    };
    state.dispatcher.send(body, &message.sender).await
}

/// URL Twilio signed: the configured public URL, else the forwarded scheme and host.
fn signed_url(state: &GatewayState, headers: &HeaderMap, uri: &Uri) -> String {
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    if let Some(base) = &state.public_url {
        return format!("{base}{path}");
    }

    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let proto = header_str("x-forwarded-proto").unwrap_or("http");
    let host = header_str("x-forwarded-host")
        .or_else(|| header_str(header::HOST.as_str()))
        .unwrap_or("localhost");
    format!("{proto}://{host}{path}")
}

fn finish(result: Result<(), PipelineError>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(err.stage());
            let status =
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, err.to_string()).into_response()
        }
    }
}

/// `POST /status`: delivery status update for a reply we sent.
pub async fn status_handler(form: Result<Form<FormParams>, FormRejection>) -> Response {
    let params = match form {
        Ok(Form(params)) => params,
        Err(rejection) => {
            error!(error = %rejection.body_text(), "Undecodable status callback");
            return (StatusCode::INTERNAL_SERVER_ERROR, rejection.body_text()).into_response();
        }
    };

    let status = parse_status(&params);
    #[cfg(feature = "metrics")]
    crate::metrics::record_delivery_status(&status.message_status);

    if status.is_failure() {
        warn!(
            message_sid = %status.message_sid,
            message_status = %status.message_status,
            error_code = status.error_code.as_deref().unwrap_or_default(),
            to = status.to.as_deref().unwrap_or_default(),
            "Reply delivery failed"
        );
    } else {
        info!(
            message_sid = %status.message_sid,
            message_status = %status.message_status,
            "Reply status update"
        );
    }
    (StatusCode::OK, "OK").into_response()
}
