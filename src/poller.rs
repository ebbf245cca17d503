use crate::ack::{AckError, Acknowledger};
use crate::classify::{Classification, classify};
use crate::config::{Config, DEFAULT_PROMPT_TEMPLATE};
use crate::conversation::{ConversationStore, Turn, TurnNumber};
use crate::llm::{CompletionRequest, LLM};
use crate::mail::content::{enumerate_attachments, extract_text, fetch_attachments};
use crate::mail::{Attachment, ChangeFetcher, ChangeSet, FetchError, MailTransport, Message, TransportError};
use crate::shutdown::Shutdown;
use crate::store::{Cursor, CursorStore, StoreError};
use crate::utils::{TEngine, TEngineError};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROMPT_TEMPLATE: &str = "prompt";

/// Consecutive cycles a message may fail before it is skipped.
pub const DEFAULT_FAILURE_BUDGET: u32 = 5;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("change fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to persist poll state: {0}")]
    Store(#[from] StoreError),
    #[error("acknowledgment setup failed: {0}")]
    Ack(#[from] AckError),
    #[error("prompt template error: {0}")]
    Template(#[from] TEngineError),
}

/// Where a cycle currently is. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Resyncing,
    Baseline,
    Processing,
    Acknowledging,
    Persisting,
}

/// The step at which a message had to be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Materialize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => f.write_str("fetch"),
            Stage::Materialize => f.write_str("materialize"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Materialized {
        conversation_id: String,
        turn: TurnNumber,
        acknowledged: bool,
    },
    Untagged,
    /// Our own outgoing mail, recognized by its `SENT` label.
    SkippedOwnMessage,
    /// Deleted between listing and fetching.
    Vanished,
    /// Already stored while the cursor was held behind an earlier failure.
    AlreadyHandled,
    /// Holds the cursor back; the message is retried next cycle.
    Failed { stage: Stage, error: String },
    /// Failed for as many consecutive cycles as the failure budget allows
    /// and is no longer retried.
    Abandoned { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMessage {
    pub message_id: String,
    pub outcome: MessageOutcome,
}

/// What one call to [`Poller::poll_once`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub previous_cursor: Cursor,
    /// The cursor persisted at the end of the cycle.
    pub cursor: Cursor,
    pub baseline: bool,
    pub resynced: bool,
    /// Set when the change listing failed; nothing was processed.
    pub fetch_error: Option<String>,
    pub messages: Vec<ProcessedMessage>,
}

impl CycleReport {
    pub fn materialized(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.outcome, MessageOutcome::Materialized { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.outcome, MessageOutcome::Failed { .. }))
            .count()
    }
}

/// A builder for [`Poller`].
pub struct PollerBuilder {
    transport: Arc<dyn MailTransport>,
    data_dir: PathBuf,
    interactions_dir: PathBuf,
    interval: Duration,
    hot_start: bool,
    failure_budget: u32,
    ack_templates: Option<(String, String)>,
    model: Option<Box<dyn LLM>>,
    prompt_template: String,
    shutdown_handler: Option<Box<dyn Shutdown>>,
}

impl PollerBuilder {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        let paths = crate::config::PathsConfig::default();
        Self {
            transport,
            data_dir: paths.data_dir,
            interactions_dir: paths.interactions_dir,
            interval: Duration::from_secs(120),
            hot_start: true,
            failure_budget: DEFAULT_FAILURE_BUDGET,
            ack_templates: None,
            model: None,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            shutdown_handler: None,
        }
    }

    /// Applies the paths, poll, ack and prompt settings of `config`.
    ///
    /// The model and the shutdown handler are not part of the file and must
    /// be set separately.
    pub fn from_config(transport: Arc<dyn MailTransport>, config: &Config) -> Self {
        let mut builder = Self::new(transport)
            .with_data_dir(config.paths.data_dir.clone())
            .with_interactions_dir(config.paths.interactions_dir.clone())
            .with_interval(config.poll.interval)
            .with_hot_start(config.poll.hot_start)
            .with_failure_budget(config.poll.max_message_failures)
            .with_prompt_template(&config.llm.prompt);
        if config.ack.enabled {
            builder = builder.with_acknowledgments(&config.ack.subject, &config.ack.body);
        }
        builder
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_interactions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.interactions_dir = dir.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets whether the first cycle runs immediately or after one interval.
    pub fn with_hot_start(mut self, hot_start: bool) -> Self {
        self.hot_start = hot_start;
        self
    }

    /// Sets how many consecutive cycles a message may fail before it is
    /// abandoned so the cursor can move past it. Zero is treated as one.
    pub fn with_failure_budget(mut self, cycles: u32) -> Self {
        self.failure_budget = cycles.max(1);
        self
    }

    /// Enables acknowledgments rendered from the given handlebars templates.
    pub fn with_acknowledgments(mut self, subject_template: &str, body_template: &str) -> Self {
        self.ack_templates = Some((subject_template.to_string(), body_template.to_string()));
        self
    }

    pub fn with_model(mut self, model: Box<dyn LLM>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_prompt_template(mut self, template: &str) -> Self {
        self.prompt_template = template.to_string();
        self
    }

    pub fn with_shutdown_handler(mut self, handler: impl Shutdown + 'static) -> Self {
        self.shutdown_handler = Some(Box::new(handler));
        self
    }

    /// Compiles the templates and builds the poller.
    pub fn build(self) -> Result<Poller, PollError> {
        let acknowledger = match &self.ack_templates {
            Some((subject, body)) => Some(Acknowledger::new(self.transport.clone(), subject, body)?),
            None => None,
        };
        let mut prompts = TEngine::new();
        prompts.register_template_string(PROMPT_TEMPLATE, &self.prompt_template)?;

        Ok(Poller {
            fetcher: ChangeFetcher::new(self.transport.clone()),
            transport: self.transport,
            store: CursorStore::new(&self.data_dir),
            conversations: ConversationStore::new(self.interactions_dir),
            acknowledger,
            model: self.model,
            prompts,
            interval: self.interval,
            hot_start: self.hot_start,
            failure_budget: self.failure_budget,
            handled: HashSet::new(),
            failures: HashMap::new(),
            shutdown_handler: self.shutdown_handler,
        })
    }
}

/// Runs poll cycles against one mailbox.
///
/// Cycles never overlap: the next one is scheduled only after the previous
/// one has returned, and a shutdown request is only honored between cycles.
pub struct Poller {
    transport: Arc<dyn MailTransport>,
    fetcher: ChangeFetcher,
    store: CursorStore,
    conversations: ConversationStore,
    acknowledger: Option<Acknowledger>,
    model: Option<Box<dyn LLM>>,
    prompts: TEngine,
    interval: Duration,
    hot_start: bool,
    failure_budget: u32,
    /// Messages finished while the cursor is held; skipped when replayed.
    handled: HashSet<String>,
    /// Consecutive failed cycles per message.
    failures: HashMap<String, u32>,
    shutdown_handler: Option<Box<dyn Shutdown>>,
}

impl Poller {
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Polls until the shutdown handler fires. Without a handler this never
    /// returns.
    pub async fn run(mut self) -> Result<(), PollError> {
        let token = CancellationToken::new();
        // The handler runs for the whole loop so a signal that arrives
        // mid-cycle is still seen before the next tick.
        let watcher = self.shutdown_handler.take().map(|mut handler| {
            let token = token.clone();
            tokio::spawn(async move {
                handler.wait_for_signal().await;
                token.cancel();
            })
        });

        info!(
            interval = %humantime::format_duration(self.interval),
            hot_start = self.hot_start,
            acknowledgments = self.acknowledger.is_some(),
            model = self.model.is_some(),
            "Poller started"
        );

        let mut proceed = self.hot_start || self.wait_for_next_tick(&token).await;
        while proceed {
            match self.poll_once().await {
                Ok(report) => info!(
                    cycle = report.cycle,
                    cursor = %report.cursor,
                    materialized = report.materialized(),
                    failed = report.failed(),
                    "Poll cycle finished"
                ),
                Err(e) => error!(error = %e, "Poll cycle failed"),
            }
            proceed = self.wait_for_next_tick(&token).await;
        }

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        info!("Poller has shut down gracefully");
        Ok(())
    }

    /// Returns `false` once shutdown was requested.
    async fn wait_for_next_tick(&self, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = token.cancelled() => {
                info!("Shutdown requested, no further cycles will be scheduled");
                false
            }
            _ = tokio::time::sleep(self.interval) => true,
        }
    }

    /// Runs a single poll cycle.
    ///
    /// Fetch failures are reported in the returned [`CycleReport`]; only a
    /// failure to persist the cursor or counter is an error.
    pub async fn poll_once(&mut self) -> Result<CycleReport, PollError> {
        let cycle = self.store.load_counter().await + 1;
        let previous = self.store.load().await;
        let mut report = CycleReport {
            cycle,
            previous_cursor: previous.clone(),
            cursor: previous.clone(),
            baseline: false,
            resynced: false,
            fetch_error: None,
            messages: Vec::new(),
        };

        transition(cycle, CycleState::Fetching);
        let fetched = match self.fetcher.fetch_changes_since(&previous).await {
            Err(FetchError::InvalidCursor(rejected)) => {
                transition(cycle, CycleState::Resyncing);
                warn!(
                    cycle,
                    cursor = %rejected,
                    "Stored cursor was rejected, resyncing from a fresh baseline without replaying history"
                );
                report.resynced = true;
                report.cursor = Cursor::sentinel();
                self.store.save(&Cursor::sentinel()).await?;
                transition(cycle, CycleState::Fetching);
                self.fetcher.fetch_changes_since(&Cursor::sentinel()).await
            }
            other => other,
        };

        match fetched {
            Ok(changes) if changes.baseline => {
                transition(cycle, CycleState::Baseline);
                self.handled.clear();
                self.failures.clear();
                report.baseline = true;
                report.cursor = changes.new_cursor;
            }
            Ok(changes) => {
                transition(cycle, CycleState::Processing);
                let failed = self.process_changes(cycle, &changes, &mut report).await;
                report.cursor = changes.safe_cursor(&previous, &failed);
                if failed.is_empty() {
                    // Everything up to the new cursor is persisted below.
                    self.handled.clear();
                } else {
                    warn!(
                        cycle,
                        failed = failed.len(),
                        cursor = %report.cursor,
                        "Holding the cursor before the first failed message"
                    );
                }
            }
            Err(e) => {
                warn!(cycle, error = %e, "Failed to fetch changes, will retry next cycle");
                report.fetch_error = Some(e.to_string());
            }
        }

        transition(cycle, CycleState::Persisting);
        if report.fetch_error.is_none() {
            self.store.save(&report.cursor).await?;
        }
        self.store.save_counter(cycle).await?;
        transition(cycle, CycleState::Idle);
        Ok(report)
    }

    async fn process_changes(
        &mut self,
        cycle: u64,
        changes: &ChangeSet,
        report: &mut CycleReport,
    ) -> HashSet<String> {
        let mut failed = HashSet::new();
        for entry in &changes.entries {
            let message_id = entry.message_id.as_str();
            let outcome = if self.handled.contains(message_id) {
                debug!(cycle, message_id, "Already handled behind a held cursor, skipping");
                MessageOutcome::AlreadyHandled
            } else {
                let outcome = self.process_message(cycle, message_id).await;
                self.settle(cycle, message_id, outcome)
            };
            if matches!(outcome, MessageOutcome::Failed { .. }) {
                failed.insert(entry.message_id.clone());
            }
            report.messages.push(ProcessedMessage {
                message_id: entry.message_id.clone(),
                outcome,
            });
        }
        failed
    }

    /// Tracks failures against the budget and remembers finished messages.
    fn settle(&mut self, cycle: u64, message_id: &str, outcome: MessageOutcome) -> MessageOutcome {
        let (stage, error) = match outcome {
            MessageOutcome::Failed { stage, error } => (stage, error),
            finished => {
                self.failures.remove(message_id);
                self.handled.insert(message_id.to_string());
                return finished;
            }
        };

        let attempts = self.failures.entry(message_id.to_string()).or_insert(0);
        *attempts += 1;
        if *attempts < self.failure_budget {
            return MessageOutcome::Failed { stage, error };
        }

        error!(
            cycle,
            message_id,
            stage = %stage,
            attempts = *attempts,
            error = %error,
            "Message keeps failing, giving up on it"
        );
        self.failures.remove(message_id);
        self.handled.insert(message_id.to_string());
        MessageOutcome::Abandoned { stage, error }
    }

    async fn process_message(&mut self, cycle: u64, message_id: &str) -> MessageOutcome {
        let message = match self.transport.get_message(message_id).await {
            Ok(message) => message,
            Err(TransportError::NotFound(_)) => {
                info!(cycle, message_id, "Message disappeared before it could be fetched");
                return MessageOutcome::Vanished;
            }
            Err(e) => {
                error!(cycle, message_id, stage = %Stage::Fetch, error = %e, "Failed to fetch message");
                return MessageOutcome::Failed {
                    stage: Stage::Fetch,
                    error: e.to_string(),
                };
            }
        };

        if message.is_sent() {
            debug!(cycle, message_id, "Skipping a message we sent");
            return MessageOutcome::SkippedOwnMessage;
        }

        let body = extract_text(&message.parts);
        let classification = classify(message.subject());
        if !classification.is_tagged {
            info!(cycle, message_id, subject = %message.subject(), "Ignoring untagged message");
            return MessageOutcome::Untagged;
        }

        let infos = enumerate_attachments(&message.parts);
        let attachments = fetch_attachments(self.transport.as_ref(), &message.id, infos).await;
        let turn = match self
            .conversations
            .materialize(
                classification.explicit_conversation_id.as_deref(),
                body.as_deref(),
                &attachments,
            )
            .await
        {
            Ok(turn) => turn,
            Err(e) => {
                error!(
                    cycle,
                    message_id,
                    conversation_id = ?classification.explicit_conversation_id,
                    stage = %Stage::Materialize,
                    error = %e,
                    "Failed to store message"
                );
                return MessageOutcome::Failed {
                    stage: Stage::Materialize,
                    error: e.to_string(),
                };
            }
        };
        info!(
            cycle,
            message_id,
            conversation_id = %turn.conversation_id,
            turn = %turn.number,
            attachments = attachments.len(),
            "Stored message"
        );

        let response = self
            .complete(&message, &classification, body.as_deref(), attachments, &turn)
            .await;
        let acknowledged = self
            .acknowledge(cycle, &message, &classification, &turn, response.as_deref())
            .await;

        MessageOutcome::Materialized {
            conversation_id: turn.conversation_id,
            turn: turn.number,
            acknowledged,
        }
    }

    /// Asks the model about a stored turn and saves its answer next to it.
    async fn complete(
        &mut self,
        message: &Message,
        classification: &Classification,
        body: Option<&str>,
        attachments: Vec<Attachment>,
        turn: &Turn,
    ) -> Option<String> {
        let model = self.model.as_mut()?;
        let context = json!({
            "title": classification.title,
            "subject": message.subject(),
            "body": body.unwrap_or_default(),
            "sender": message.sender().unwrap_or_default(),
            "conversation_id": turn.conversation_id,
            "turn": turn.number.to_string(),
        });
        let prompt = match self.prompts.render(PROMPT_TEMPLATE, &context) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(message_id = %message.id, stage = "complete", error = %e, "Failed to render prompt");
                return None;
            }
        };

        let response = match model.complete(CompletionRequest::new(prompt, attachments)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    conversation_id = %turn.conversation_id,
                    stage = "complete",
                    error = %e,
                    "Model completion failed"
                );
                return None;
            }
        };
        if let Err(e) = self.conversations.write_response(turn, &response).await {
            warn!(
                message_id = %message.id,
                conversation_id = %turn.conversation_id,
                error = %e,
                "Failed to store model response"
            );
        }
        Some(response)
    }

    async fn acknowledge(
        &self,
        cycle: u64,
        message: &Message,
        classification: &Classification,
        turn: &Turn,
        response: Option<&str>,
    ) -> bool {
        let Some(acknowledger) = &self.acknowledger else {
            return false;
        };
        transition(cycle, CycleState::Acknowledging);
        match acknowledger
            .acknowledge(message, classification, turn, response)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    cycle,
                    message_id = %message.id,
                    conversation_id = %turn.conversation_id,
                    stage = "acknowledge",
                    error = %e,
                    "Failed to send acknowledgment"
                );
                false
            }
        }
    }
}

fn transition(cycle: u64, state: CycleState) {
    debug!(cycle, state = ?state, "Poll cycle state");
}
