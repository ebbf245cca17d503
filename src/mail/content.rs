// The `content` module pulls body text and attachments out of a message's part tree.

use crate::mail::MailTransport;
use crate::mail::message::{Attachment, AttachmentRef, Part};
use tracing::{debug, warn};

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    /// Delivered with the message.
    Inline(Vec<u8>),
    /// Must be fetched with a separate call.
    Remote(AttachmentRef),
}

/// An attachment found in a part tree, before its payload is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub source: AttachmentSource,
}

fn is_attachment(part: &Part) -> bool {
    part.filename.as_deref().is_some_and(|f| !f.is_empty())
}

/// Finds the body of type `preferred_mime_type`.
///
/// All siblings of a level are checked for a direct match before any child
/// level is visited, so a top-level `text/plain` part wins over a nested one.
pub fn extract_body(parts: &[Part], preferred_mime_type: &str) -> Option<String> {
    let direct = parts.iter().find(|p| {
        p.mime_type.eq_ignore_ascii_case(preferred_mime_type)
            && !is_attachment(p)
            && p.inline_data.is_some()
    });
    if let Some(data) = direct.and_then(|p| p.inline_data.as_deref()) {
        return Some(String::from_utf8_lossy(data).into_owned());
    }

    parts
        .iter()
        .find_map(|p| extract_body(&p.children, preferred_mime_type))
}

/// Returns the plain text body, falling back to the HTML one.
pub fn extract_text(parts: &[Part]) -> Option<String> {
    extract_body(parts, TEXT_PLAIN).or_else(|| extract_body(parts, TEXT_HTML))
}

/// Lists the attachments of a part tree in depth-first order.
pub fn enumerate_attachments(parts: &[Part]) -> Vec<AttachmentInfo> {
    let mut found = Vec::new();
    collect_attachments(parts, &mut found);
    found
}

fn collect_attachments(parts: &[Part], found: &mut Vec<AttachmentInfo>) {
    for part in parts {
        if is_attachment(part) {
            let filename = part.filename.clone().unwrap_or_default();
            if let Some(data) = &part.inline_data {
                found.push(AttachmentInfo {
                    filename,
                    size_bytes: data.len() as u64,
                    source: AttachmentSource::Inline(data.clone()),
                });
            } else if let Some(reference) = &part.attachment {
                found.push(AttachmentInfo {
                    filename,
                    size_bytes: reference.size,
                    source: AttachmentSource::Remote(reference.clone()),
                });
            }
        }
        collect_attachments(&part.children, found);
    }
}

/// Resolves attachment payloads, fetching remote ones one at a time.
///
/// An attachment that cannot be fetched is logged and left out; the rest of
/// the message is still usable.
pub async fn fetch_attachments(
    transport: &dyn MailTransport,
    message_id: &str,
    infos: Vec<AttachmentInfo>,
) -> Vec<Attachment> {
    let mut attachments = Vec::with_capacity(infos.len());
    for info in infos {
        let data = match info.source {
            AttachmentSource::Inline(data) => data,
            AttachmentSource::Remote(reference) => {
                match transport.get_attachment(message_id, &reference.id).await {
                    Ok(data) => data,
                    Err(e) => {
                        warn!(
                            message_id = %message_id,
                            filename = %info.filename,
                            error = %e,
                            "Failed to fetch attachment, skipping it"
                        );
                        continue;
                    }
                }
            }
        };
        debug!(message_id = %message_id, filename = %info.filename, bytes = data.len(), "Attachment resolved");
        attachments.push(Attachment {
            filename: info.filename,
            data,
        });
    }
    attachments
}
