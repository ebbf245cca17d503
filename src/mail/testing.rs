// In-memory mailbox shared by the unit tests.

use crate::mail::message::{Header, Message, OutgoingMessage, Part};
use crate::mail::{ChangeBatch, ChangeList, MailTransport, TransportError};
use crate::store::Cursor;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    baseline: u64,
    batches: Vec<(u64, Vec<String>)>,
    report_high_water: bool,
    invalid_cursor_once: bool,
    fail_listing: bool,
    fail_sends: bool,
    messages: HashMap<String, Message>,
    failing_messages: HashSet<String>,
    attachments: HashMap<(String, String), Vec<u8>>,
    listed_since: Vec<Cursor>,
    sent: Vec<OutgoingMessage>,
}

pub(crate) struct FakeMailbox {
    state: Mutex<State>,
}

impl FakeMailbox {
    pub(crate) fn new(baseline: u64) -> Self {
        Self {
            state: Mutex::new(State {
                baseline,
                report_high_water: true,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn add_message(&self, sequence: u64, message: Message) {
        let mut state = self.state.lock().unwrap();
        state.batches.push((sequence, vec![message.id.clone()]));
        state.messages.insert(message.id.clone(), message);
    }

    pub(crate) fn add_batch(&self, sequence: u64, ids: &[&str]) {
        let ids = ids.iter().map(|id| id.to_string()).collect();
        self.state.lock().unwrap().batches.push((sequence, ids));
    }

    pub(crate) fn add_attachment(&self, message_id: &str, attachment_id: &str, data: &[u8]) {
        self.state.lock().unwrap().attachments.insert(
            (message_id.to_string(), attachment_id.to_string()),
            data.to_vec(),
        );
    }

    pub(crate) fn report_high_water(&self, enabled: bool) {
        self.state.lock().unwrap().report_high_water = enabled;
    }

    pub(crate) fn invalidate_cursor_once(&self) {
        self.state.lock().unwrap().invalid_cursor_once = true;
    }

    pub(crate) fn fail_listing(&self, enabled: bool) {
        self.state.lock().unwrap().fail_listing = enabled;
    }

    pub(crate) fn fail_message(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_messages
            .insert(id.to_string());
    }

    pub(crate) fn fail_sends(&self, enabled: bool) {
        self.state.lock().unwrap().fail_sends = enabled;
    }

    pub(crate) fn listed_since(&self) -> Vec<Cursor> {
        self.state.lock().unwrap().listed_since.clone()
    }

    pub(crate) fn sent(&self) -> Vec<OutgoingMessage> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl MailTransport for FakeMailbox {
    async fn baseline_cursor(&self) -> Result<Cursor, TransportError> {
        let state = self.state.lock().unwrap();
        let latest = state.batches.iter().map(|(s, _)| *s).max().unwrap_or(0);
        Ok(Cursor::from(state.baseline.max(latest)))
    }

    async fn list_changes(&self, since: &Cursor) -> Result<ChangeList, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.listed_since.push(since.clone());
        if state.fail_listing {
            return Err(TransportError::Request("connection reset".to_string()));
        }
        if state.invalid_cursor_once {
            state.invalid_cursor_once = false;
            return Err(TransportError::InvalidCursor(since.clone()));
        }

        let Some(since) = since.sequence() else {
            return Err(TransportError::InvalidCursor(since.clone()));
        };
        let batches: Vec<ChangeBatch> = state
            .batches
            .iter()
            .filter(|(sequence, _)| *sequence > since)
            .map(|(sequence, ids)| ChangeBatch {
                sequence: Cursor::from(*sequence),
                added_message_ids: ids.clone(),
            })
            .collect();
        let latest = state.batches.iter().map(|(s, _)| *s).max().unwrap_or(0);
        let high_water = state
            .report_high_water
            .then(|| Cursor::from(state.baseline.max(latest)));

        Ok(ChangeList {
            batches,
            high_water,
        })
    }

    async fn get_message(&self, id: &str) -> Result<Message, TransportError> {
        let state = self.state.lock().unwrap();
        if state.failing_messages.contains(id) {
            return Err(TransportError::Request(format!("cannot fetch {id}")));
        }
        state
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(id.to_string()))
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(attachment_id.to_string()))
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(TransportError::Request("smtp relay down".to_string()));
        }
        state.sent.push(message.clone());
        Ok(format!("sent-{}", state.sent.len()))
    }
}

/// Builds a single-part plain text message from `sender@example.com`.
pub(crate) fn tagged_message(id: &str, subject: &str, body: &str) -> Message {
    Message {
        id: id.to_string(),
        thread_id: Some(format!("thread-{id}")),
        label_ids: vec!["INBOX".to_string()],
        headers: vec![
            Header {
                name: "From".to_string(),
                value: "sender@example.com".to_string(),
            },
            Header {
                name: "Subject".to_string(),
                value: subject.to_string(),
            },
            Header {
                name: "Message-ID".to_string(),
                value: format!("<{id}@example.com>"),
            },
        ],
        internal_date: None,
        parts: vec![Part::text("text/plain", body)],
    }
}
