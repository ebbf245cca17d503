use chrono::{DateTime, Utc};

/// A single message header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A reference to an attachment payload that must be fetched separately.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub id: String,
    pub size: u64,
}

/// A node of a message body tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    pub mime_type: String,
    pub filename: Option<String>,
    pub inline_data: Option<Vec<u8>>,
    pub attachment: Option<AttachmentRef>,
    pub children: Vec<Part>,
}

impl Part {
    /// A leaf part carrying inline text.
    pub fn text(mime_type: &str, text: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            inline_data: Some(text.as_bytes().to_vec()),
            ..Default::default()
        }
    }

    /// A container part such as `multipart/alternative`.
    pub fn multipart(mime_type: &str, children: Vec<Part>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            children,
            ..Default::default()
        }
    }

    /// An attachment small enough to be delivered with the message.
    pub fn inline_attachment(filename: &str, mime_type: &str, data: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            filename: Some(filename.to_string()),
            inline_data: Some(data.to_vec()),
            ..Default::default()
        }
    }

    /// An attachment whose payload lives behind `attachment_id`.
    pub fn remote_attachment(filename: &str, mime_type: &str, attachment_id: &str, size: u64) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            filename: Some(filename.to_string()),
            attachment: Some(AttachmentRef {
                id: attachment_id.to_string(),
                size,
            }),
            ..Default::default()
        }
    }
}

/// A message as fetched from the mailbox. Never mutated by this crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub headers: Vec<Header>,
    pub internal_date: Option<DateTime<Utc>>,
    /// The top level of the body tree. A single-part message has one entry.
    pub parts: Vec<Part>,
}

impl Message {
    /// Returns the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or_default()
    }

    pub fn sender(&self) -> Option<&str> {
        self.header("From")
    }

    /// The address replies should go to: `Reply-To`, else `From`.
    pub fn reply_address(&self) -> Option<&str> {
        self.header("Reply-To")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.sender())
    }

    /// Whether the mailbox owner sent this message.
    pub fn is_sent(&self) -> bool {
        self.label_ids.iter().any(|l| l == "SENT")
    }
}

/// An attachment with its payload, ready to be written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

/// A message to be sent through the mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// `Message-ID` of the message being answered.
    pub in_reply_to: Option<String>,
    /// Provider thread the reply belongs to.
    pub thread_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(headers: &[(&str, &str)]) -> Message {
        Message {
            id: "m1".to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| Header {
                    name: n.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn headers_are_case_insensitive() {
        let msg = message_with(&[("SUBJECT", "hello")]);
        assert_eq!(msg.subject(), "hello");
        assert_eq!(msg.header("subject"), Some("hello"));
    }

    #[test]
    fn reply_address_prefers_reply_to() {
        let msg = message_with(&[("From", "a@example.com"), ("Reply-To", "b@example.com")]);
        assert_eq!(msg.reply_address(), Some("b@example.com"));

        let msg = message_with(&[("From", "a@example.com"), ("Reply-To", " ")]);
        assert_eq!(msg.reply_address(), Some("a@example.com"));
    }

    #[test]
    fn missing_subject_is_empty() {
        assert_eq!(message_with(&[]).subject(), "");
    }
}
