//! Message dispatch gateway.
//!
//! Turns API send requests into transport sends: checks the session is
//! connected, validates the request, normalizes the recipient, decodes base64
//! media and maps the outcome. Each dispatch is a single independent transport
//! call; nothing is queued or retried here.

use crate::error::Error;
use crate::session::{Generation, SessionController};
use crate::transport::{OutgoingMessage, SendReceipt};
use crate::types::{normalize_recipient, Jid, MessageId};
use crate::Result;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_IMAGE_NAME: &str = "image.jpg";
pub const DEFAULT_DOCUMENT_NAME: &str = "document.pdf";
pub const DEFAULT_DOCUMENT_MIMETYPE: &str = "application/pdf";
pub const AUDIO_MIMETYPE: &str = "audio/mp4";

/// Standard alphabet, padding optional.
const MEDIA: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// `POST /message/text` body.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRequest {
    pub number: Option<String>,
    pub text: Option<String>,
}

/// `POST /message/image` body. `image` is base64.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub number: Option<String>,
    pub image: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
}

/// `POST /message/doc` body. `document` is base64.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub number: Option<String>,
    pub document: Option<String>,
    pub file_name: Option<String>,
    pub mimetype: Option<String>,
}

/// `POST /message/audio` body. `audio` is base64; always sent as a voice note.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRequest {
    pub number: Option<String>,
    pub audio: Option<String>,
    /// Accepted for compatibility; voice notes carry no file name.
    pub file_name: Option<String>,
}

/// Outcome of a successful dispatch, as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub message_id: MessageId,
    pub timestamp: u64,
}

impl From<SendReceipt> for DispatchReceipt {
    fn from(r: SendReceipt) -> Self {
        Self {
            message_id: r.id,
            timestamp: r.timestamp,
        }
    }
}

/// Sends messages through the session's active transport.
#[derive(Clone)]
pub struct Gateway {
    session: SessionController,
}

impl Gateway {
    pub fn new(session: SessionController) -> Self {
        Self { session }
    }

    pub async fn send_text(&self, req: TextRequest) -> Result<DispatchReceipt> {
        self.dispatch(req.number, req.text, "number and text are required", |text| {
            Ok(OutgoingMessage::Text { text })
        })
        .await
    }

    pub async fn send_image(&self, req: ImageRequest) -> Result<DispatchReceipt> {
        let ImageRequest {
            number,
            image,
            file_name,
            caption,
        } = req;
        self.dispatch(number, image, "number and image are required", |image| {
            Ok(OutgoingMessage::Image {
                data: decode_media(&image)?,
                caption: caption.unwrap_or_default(),
                file_name: non_empty(file_name).unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string()),
            })
        })
        .await
    }

    pub async fn send_document(&self, req: DocumentRequest) -> Result<DispatchReceipt> {
        let DocumentRequest {
            number,
            document,
            file_name,
            mimetype,
        } = req;
        self.dispatch(number, document, "number and document are required", |document| {
            Ok(OutgoingMessage::Document {
                data: decode_media(&document)?,
                file_name: non_empty(file_name)
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string()),
                mimetype: non_empty(mimetype)
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_MIMETYPE.to_string()),
            })
        })
        .await
    }

    pub async fn send_audio(&self, req: AudioRequest) -> Result<DispatchReceipt> {
        self.dispatch(req.number, req.audio, "number and audio are required", |audio| {
            Ok(OutgoingMessage::Audio {
                data: decode_media(&audio)?,
                mimetype: AUDIO_MIMETYPE.to_string(),
                ptt: true,
            })
        })
        .await
    }

    async fn dispatch<F>(
        &self,
        number: Option<String>,
        payload: Option<String>,
        missing: &str,
        build: F,
    ) -> Result<DispatchReceipt>
    where
        F: FnOnce(String) -> Result<OutgoingMessage>,
    {
        // Subscribe before reading the handle so a reset in between is observed.
        let generations = self.session.watch_generation();
        let handle = self
            .session
            .active_transport()
            .await
            .ok_or(Error::SessionUnavailable)?;

        let (Some(number), Some(payload)) = (non_empty(number), non_empty(payload)) else {
            return Err(Error::InvalidRequest(missing.to_string()));
        };
        let to = normalize_recipient(&number)
            .ok_or_else(|| Error::InvalidRequest(format!("invalid number: {number}")))?;
        let message = build(payload)?;
        let kind = message.kind();

        debug!(%to, kind, epoch = handle.epoch, "dispatching");
        let result = tokio::select! {
            biased;
            _ = superseded(generations, handle.epoch) => {
                warn!(%to, kind, "session reset during send");
                return Err(Error::SendFailed(
                    "session was reset while the message was in flight".to_string(),
                ));
            }
            result = handle.transport.send_message(&to, message) => result,
        };

        match result {
            Ok(receipt) => {
                log_sent(&to, kind, &receipt);
                Ok(receipt.into())
            }
            Err(e) => {
                warn!(%to, kind, error = %e, "send failed");
                Err(Error::SendFailed(e.to_string()))
            }
        }
    }
}

fn log_sent(to: &Jid, kind: &str, receipt: &SendReceipt) {
    info!(%to, kind, id = %receipt.id, "message sent");
}

/// Resolves once the session moves past `epoch` or starts closing it.
async fn superseded(mut generations: watch::Receiver<Generation>, epoch: u64) {
    loop {
        if generations.borrow_and_update().supersedes(epoch) {
            return;
        }
        if generations.changed().await.is_err() {
            // controller gone; nothing will supersede this send
            std::future::pending::<()>().await;
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decode base64 media, accepting an optional `data:<mime>;base64,` prefix.
///
/// Undecodable input is a send failure; input that decodes to nothing is an
/// invalid request.
fn decode_media(encoded: &str) -> Result<Vec<u8>> {
    let encoded = encoded.trim();
    let body = match encoded.strip_prefix("data:") {
        Some(uri) => match uri.split_once(',') {
            Some((_, body)) => body,
            None => {
                return Err(Error::SendFailed(
                    "invalid data URI: missing ',' before the payload".to_string(),
                ))
            }
        },
        None => encoded,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let data = MEDIA
        .decode(compact)
        .map_err(|e| Error::SendFailed(format!("invalid base64 payload: {e}")))?;
    if data.is_empty() {
        return Err(Error::InvalidRequest("media payload is empty".to_string()));
    }
    Ok(data)
}
