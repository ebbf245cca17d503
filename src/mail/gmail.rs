// The `gmail` module implements the mailbox collaborator on top of the Gmail API.

use crate::mail::message::{AttachmentRef, Header, Message, OutgoingMessage, Part};
use crate::mail::{ChangeBatch, ChangeList, MailTransport, TransportError};
use crate::store::Cursor;
use crate::utils::context_hub::ContextHub;
use crate::utils::google_auth::GmailHubType;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use google_gmail1::api::{Message as GmailMessage, MessagePart, Scope};
use mime::Mime;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Gmail's alias for the authorized user.
pub const DEFAULT_USER_ID: &str = "me";

const RFC822_MEDIA_TYPE: &str = "message/rfc822";

/// A builder for [`GmailTransport`].
pub struct GmailTransportBuilder {
    hub: Arc<ContextHub>,
    user_id: String,
}

impl GmailTransportBuilder {
    /// Creates a new `GmailTransportBuilder`.
    ///
    /// This registers the `Readonly` and `Send` scopes with the provided
    /// [`ContextHub`], so a single consent covers polling and acknowledgments.
    pub fn new(hub: Arc<ContextHub>) -> Self {
        hub.add_scope(Scope::Readonly);
        hub.add_scope(Scope::Send);
        Self {
            hub,
            user_id: DEFAULT_USER_ID.to_string(),
        }
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    /// Authenticates (if not already done) and builds the transport.
    pub async fn build(&self) -> Result<GmailTransport, TransportError> {
        let hub = self.hub.get_hub().await?;
        Ok(GmailTransport {
            hub,
            user_id: self.user_id.clone(),
        })
    }
}

/// A [`MailTransport`] backed by the Gmail REST API.
#[derive(Clone)]
pub struct GmailTransport {
    hub: GmailHubType,
    user_id: String,
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn baseline_cursor(&self) -> Result<Cursor, TransportError> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile(&self.user_id)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(request_error)?;

        profile
            .history_id
            .map(Cursor::from)
            .ok_or_else(|| TransportError::Malformed("profile without historyId".to_string()))
    }

    async fn list_changes(&self, since: &Cursor) -> Result<ChangeList, TransportError> {
        let start = start_history_id(since)?;

        let mut changes = ChangeList::default();
        let mut page_token: Option<String> = None;
        loop {
            let mut call = self
                .hub
                .users()
                .history_list(&self.user_id)
                .start_history_id(start)
                .add_history_types("messageAdded")
                .label_id("INBOX")
                .add_scope(Scope::Readonly);
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, response) = call.doit().await.map_err(|e| {
                if status_of(&e) == Some(hyper::StatusCode::NOT_FOUND) {
                    TransportError::InvalidCursor(since.clone())
                } else {
                    request_error(e)
                }
            })?;

            if let Some(history_id) = response.history_id {
                let reported = Cursor::from(history_id);
                changes.high_water = Some(match changes.high_water.take() {
                    Some(current) => current.later(reported),
                    None => reported,
                });
            }

            for record in response.history.unwrap_or_default() {
                let Some(sequence) = record.id else { continue };
                let added_message_ids: Vec<String> = record
                    .messages_added
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|added| added.message.and_then(|m| m.id))
                    .collect();
                if !added_message_ids.is_empty() {
                    changes.batches.push(ChangeBatch {
                        sequence: Cursor::from(sequence),
                        added_message_ids,
                    });
                }
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
            debug!(since = %since, "Fetching next history page");
        }

        Ok(changes)
    }

    async fn get_message(&self, id: &str) -> Result<Message, TransportError> {
        let (_, message) = self
            .hub
            .users()
            .messages_get(&self.user_id, id)
            .format("full")
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(|e| not_found_or(e, id))?;

        convert_message(message)
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let (_, body) = self
            .hub
            .users()
            .messages_attachments_get(&self.user_id, message_id, attachment_id)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(|e| not_found_or(e, attachment_id))?;

        body.data.ok_or_else(|| {
            TransportError::Malformed(format!("attachment {attachment_id} has no data"))
        })
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String, TransportError> {
        let (request, media, media_type) = send_request(message)?;

        let (_, sent) = self
            .hub
            .users()
            .messages_send(request, &self.user_id)
            .add_scope(Scope::Send)
            .upload(media, media_type)
            .await
            .map_err(request_error)?;

        sent.id
            .ok_or_else(|| TransportError::Malformed("sent message without id".to_string()))
    }
}

/// Gmail only issues numeric history ids; anything else cannot be resumed from.
fn start_history_id(since: &Cursor) -> Result<u64, TransportError> {
    since
        .sequence()
        .ok_or_else(|| TransportError::InvalidCursor(since.clone()))
}

/// Splits an outgoing message into the metadata and the RFC 2822 media body
/// of a `messages.send` upload. The thread id travels as metadata.
fn send_request(
    message: &OutgoingMessage,
) -> Result<(GmailMessage, io::Cursor<Vec<u8>>, Mime), TransportError> {
    let media_type: Mime = RFC822_MEDIA_TYPE
        .parse()
        .map_err(|e| TransportError::Malformed(format!("media type {RFC822_MEDIA_TYPE}: {e}")))?;
    let request = GmailMessage {
        thread_id: message.thread_id.clone(),
        ..Default::default()
    };
    Ok((
        request,
        io::Cursor::new(compose_raw(message).into_bytes()),
        media_type,
    ))
}

fn status_of(error: &google_gmail1::Error) -> Option<hyper::StatusCode> {
    match error {
        google_gmail1::Error::BadRequest(value) => value["error"]["code"]
            .as_u64()
            .and_then(|code| u16::try_from(code).ok())
            .and_then(|code| hyper::StatusCode::from_u16(code).ok()),
        google_gmail1::Error::Failure(response) => Some(response.status()),
        _ => None,
    }
}

fn request_error(error: google_gmail1::Error) -> TransportError {
    TransportError::Request(error.to_string())
}

fn not_found_or(error: google_gmail1::Error, what: &str) -> TransportError {
    if status_of(&error) == Some(hyper::StatusCode::NOT_FOUND) {
        TransportError::NotFound(what.to_string())
    } else {
        request_error(error)
    }
}

fn convert_message(message: GmailMessage) -> Result<Message, TransportError> {
    let id = message
        .id
        .ok_or_else(|| TransportError::Malformed("message without id".to_string()))?;
    let mut payload = message.payload.unwrap_or_default();
    let headers = payload
        .headers
        .take()
        .unwrap_or_default()
        .into_iter()
        .map(|h| Header {
            name: h.name.unwrap_or_default(),
            value: h.value.unwrap_or_default(),
        })
        .collect();

    Ok(Message {
        id,
        thread_id: message.thread_id,
        label_ids: message.label_ids.unwrap_or_default(),
        headers,
        internal_date: message
            .internal_date
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        parts: vec![convert_part(payload)],
    })
}

fn convert_part(part: MessagePart) -> Part {
    let body = part.body.unwrap_or_default();
    let size = u64::try_from(body.size.unwrap_or(0)).unwrap_or(0);
    Part {
        mime_type: part.mime_type.unwrap_or_default(),
        filename: part.filename.filter(|f| !f.is_empty()),
        inline_data: body.data,
        attachment: body.attachment_id.map(|id| AttachmentRef { id, size }),
        children: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(convert_part)
            .collect(),
    }
}

/// Strips line breaks so a value cannot start a new header.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Encodes a header value as an RFC 2047 encoded-word when it is not ASCII.
fn encode_header(value: &str) -> String {
    let value = header_value(value);
    if value.is_ascii() {
        value
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Renders an RFC 2822 plain text message.
fn compose_raw(message: &OutgoingMessage) -> String {
    let mut raw = String::new();
    raw.push_str(&format!("To: {}\r\n", header_value(&message.to)));
    raw.push_str(&format!("Subject: {}\r\n", encode_header(&message.subject)));
    if let Some(reference) = &message.in_reply_to {
        let reference = header_value(reference);
        raw.push_str(&format!("In-Reply-To: {reference}\r\n"));
        raw.push_str(&format!("References: {reference}\r\n"));
    }
    raw.push_str("MIME-Version: 1.0\r\n");
    raw.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    raw.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    raw.push_str(&message.body.replace("\r\n", "\n").replace('\n', "\r\n"));
    raw
}
