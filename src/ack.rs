// The `ack` module answers stored requests with a templated acknowledgment.

use crate::classify::Classification;
use crate::conversation::Turn;
use crate::mail::{MailTransport, Message, OutgoingMessage, TransportError};
use crate::utils::{TEngine, TEngineError};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SUBJECT_TEMPLATE: &str = "Re: {{subject}}";
pub const DEFAULT_BODY_TEMPLATE: &str = "\
Your chatterbox request \"{{title}}\" was received on {{received_at}} \
and saved as turn {{turn}} of conversation {{conversation_id}}.

To continue this conversation, start the subject of your next message with:

    chatterbox:{{conversation_id}}
{{#if response}}
----
{{response}}
{{/if}}";

const SUBJECT_TEMPLATE: &str = "ack_subject";
const BODY_TEMPLATE: &str = "ack_body";

/// The `AckError` enum defines why an acknowledgment was not sent.
#[derive(Error, Debug)]
pub enum AckError {
    #[error("message {0} has no sender to reply to")]
    NoRecipient(String),
    #[error("failed to render acknowledgment: {0}")]
    Template(#[from] TEngineError),
    #[error("failed to send acknowledgment: {0}")]
    Send(#[from] TransportError),
}

/// Values available to the acknowledgment templates.
#[derive(Debug, Serialize)]
pub struct AckContext<'a> {
    pub subject: &'a str,
    pub title: &'a str,
    pub conversation_id: &'a str,
    pub turn: String,
    pub sender: &'a str,
    pub received_at: String,
    pub response: Option<&'a str>,
}

/// Sends acknowledgments through a [`MailTransport`].
pub struct Acknowledger {
    engine: TEngine,
    transport: Arc<dyn MailTransport>,
}

impl Acknowledger {
    /// Creates an acknowledger, compiling both templates up front.
    pub fn new(
        transport: Arc<dyn MailTransport>,
        subject_template: &str,
        body_template: &str,
    ) -> Result<Self, AckError> {
        let mut engine = TEngine::new();
        engine.register_template_string(SUBJECT_TEMPLATE, subject_template)?;
        engine.register_template_string(BODY_TEMPLATE, body_template)?;
        Ok(Self { engine, transport })
    }

    /// Creates an acknowledger with the built-in templates.
    pub fn with_default_templates(transport: Arc<dyn MailTransport>) -> Result<Self, AckError> {
        Self::new(transport, DEFAULT_SUBJECT_TEMPLATE, DEFAULT_BODY_TEMPLATE)
    }

    /// Renders the acknowledgment for a stored turn without sending it.
    pub fn render(
        &self,
        message: &Message,
        classification: &Classification,
        turn: &Turn,
        response: Option<&str>,
    ) -> Result<OutgoingMessage, AckError> {
        let to = message
            .reply_address()
            .ok_or_else(|| AckError::NoRecipient(message.id.clone()))?;
        let received_at = message
            .internal_date
            .map(|d| d.with_timezone(&Local))
            .unwrap_or_else(Local::now)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        let context = AckContext {
            subject: message.subject(),
            title: &classification.title,
            conversation_id: &turn.conversation_id,
            turn: turn.number.to_string(),
            sender: to,
            received_at,
            response,
        };

        Ok(OutgoingMessage {
            to: to.to_string(),
            subject: self.engine.render(SUBJECT_TEMPLATE, &context)?,
            body: self.engine.render(BODY_TEMPLATE, &context)?,
            in_reply_to: message.header("Message-ID").map(str::to_string),
            thread_id: message.thread_id.clone(),
        })
    }

    /// Sends the acknowledgment and returns the provider id of the reply.
    pub async fn acknowledge(
        &self,
        message: &Message,
        classification: &Classification,
        turn: &Turn,
        response: Option<&str>,
    ) -> Result<String, AckError> {
        let reply = self.render(message, classification, turn, response)?;
        let remote_id = self.transport.send_message(&reply).await?;
        debug!(message_id = %message.id, reply_id = %remote_id, to = %reply.to, "Acknowledgment sent");
        Ok(remote_id)
    }
}
