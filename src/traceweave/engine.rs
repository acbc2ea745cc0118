//! The turn engine.
//!
//! [`TurnEngine`] ties the pieces together for one chat surface. It owns the
//! current [`Session`] and every timer, and is driven from a single
//! cooperative loop ([`TurnEngine::run`]) that selects over:
//!
//! - inbound [`StreamMessage`]s from the transport adapter,
//! - user actions (prompt submission, input focus reset),
//! - the 1 Hz elapsed-time ticker, while it is armed,
//! - the inactivity watchdog deadline, while a turn is open.
//!
//! No state is shared across tasks, so nothing here takes a lock. Each
//! handler runs to completion before the next message is looked at.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use traceweave::engine::{TurnEngine, UserAction};
//! use traceweave::event::NoopEventHandler;
//! use traceweave::ingest::{trace_channel, Envelope, StreamMessage};
//! use traceweave::persistence::MemoryStore;
//! use traceweave::TraceweaveConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (tx, mut inbound) = trace_channel(64);
//! let (actions_tx, mut actions) = tokio::sync::mpsc::channel(8);
//!
//! let mut engine = TurnEngine::new(
//!     TraceweaveConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoopEventHandler),
//! );
//!
//! actions_tx.send(UserAction::Submit("Where is my order?".into())).await?;
//! tx.send(StreamMessage::Envelope(Envelope::with_text("It shipped.").final_tag())).await?;
//! drop(actions_tx);
//! drop(tx);
//!
//! engine.run(&mut inbound, &mut actions).await?;
//! # Ok(())
//! # }
//! ```

use crate::traceweave::aggregator::{apply, Change};
use crate::traceweave::classifier::classify_event;
use crate::traceweave::completion::CompletionDetector;
use crate::traceweave::config::TraceweaveConfig;
use crate::traceweave::error::TraceError;
use crate::traceweave::event::{EventHandler, TurnEvent};
use crate::traceweave::history::{ChatHistory, HistoryEntry};
use crate::traceweave::ingest::{Envelope, StreamMessage, TraceReceiver};
use crate::traceweave::model::Session;
use crate::traceweave::nodes::node_id_for;
use crate::traceweave::persistence::KeyValueStore;
use crate::traceweave::ticker::{TickOutcome, TraceTicker};
use crate::traceweave::trace_cache::AgentTraceCache;
use crate::traceweave::watchdog::{InactivityWatchdog, WatchdogAlarm};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Actions originating from the user rather than the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// A new prompt; starts a fresh session.
    Submit(String),
    /// The prompt box regained focus; clears any stuck processing state.
    FocusReset,
}

pub struct TurnEngine {
    config: TraceweaveConfig,
    session: Session,
    detector: CompletionDetector,
    ticker: TraceTicker,
    watchdog: InactivityWatchdog,
    history: ChatHistory,
    trace_cache: AgentTraceCache,
    handler: Arc<dyn EventHandler>,
    prompt: Option<String>,
    answer: String,
    message_id: String,
    active_node: Option<String>,
    input_locked: bool,
    turn_open: bool,
}

impl TurnEngine {
    pub fn new(
        config: TraceweaveConfig,
        store: Arc<dyn KeyValueStore>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            session: Session::new(Utc::now()),
            detector: CompletionDetector::new(config.clone()),
            ticker: TraceTicker::new(config.max_ticks),
            watchdog: InactivityWatchdog::new(config.soft_inactivity, config.hard_inactivity),
            history: ChatHistory::new(store.clone(), config.history_capacity),
            trace_cache: AgentTraceCache::new(store),
            handler,
            prompt: None,
            answer: String::new(),
            message_id: String::new(),
            active_node: None,
            input_locked: false,
            turn_open: false,
            config,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Accumulated answer text for the current turn.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn is_input_locked(&self) -> bool {
        self.input_locked
    }

    /// Whether a submitted turn is still waiting for its answer to complete.
    pub fn is_turn_open(&self) -> bool {
        self.turn_open
    }

    pub fn ticker(&self) -> &TraceTicker {
        &self.ticker
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Reconciled groups of the current session, keyed by render node.
    pub fn trace_cache(&self) -> &AgentTraceCache {
        &self.trace_cache
    }

    async fn emit(&self, event: TurnEvent) {
        self.handler.on_turn_event(&event).await;
    }

    fn cache_groups(&self) {
        let now = Utc::now();
        for group in &self.session.groups {
            let node_id = node_id_for(&group.agent_identity, &self.config.node_ids);
            if let Err(err) =
                self.trace_cache
                    .store_trace(&node_id, group, Some(self.session.id.as_str()), now)
            {
                warn!("Failed to cache trace for node '{}': {}", node_id, err);
            }
        }
    }

    async fn publish_groups(&self) {
        self.cache_groups();
        self.emit(TurnEvent::GroupsUpdated {
            groups: self.session.groups.clone(),
        })
        .await;
    }

    async fn lock_input(&mut self) {
        if !self.input_locked {
            self.input_locked = true;
            self.emit(TurnEvent::InputLocked).await;
        }
    }

    async fn unlock_input(&mut self) {
        if self.input_locked {
            self.input_locked = false;
            self.emit(TurnEvent::InputUnlocked).await;
        }
    }

    /// Starts a new turn. The previous session, its groups and all timer
    /// state are dropped before anything else happens.
    pub async fn submit(&mut self, prompt: impl Into<String>) {
        let now = Utc::now();
        if let Err(err) = self.trace_cache.clear_all(Some(self.session.id.as_str())) {
            warn!("Failed to clear cached traces: {}", err);
        }
        self.session = Session::new(now);
        self.detector.reset();
        self.ticker.stop();
        self.watchdog.arm(Instant::now());
        self.answer.clear();
        self.active_node = None;
        self.prompt = Some(prompt.into());
        self.message_id = now.timestamp_millis().to_string();
        self.turn_open = true;
        info!("Session {} started", self.session.id);

        self.lock_input().await;
        self.publish_groups().await;
    }

    /// Reconciles an envelope's trace and answer text into the session.
    pub async fn handle_envelope(&mut self, envelope: Envelope) {
        self.watchdog.record_activity(Instant::now());

        if let Some(event) = envelope.trace_event() {
            let trace = classify_event(&event);
            debug!(
                "Trace from '{}' classified as {:?}",
                trace.agent_name, trace.kind
            );
            let applied = apply(&mut self.session, &trace, &self.config, Utc::now());
            if applied.change != Change::Ignored {
                if self.active_node.as_deref() != Some(applied.agent_identity.as_str()) {
                    let node_id = node_id_for(&applied.agent_identity, &self.config.node_ids);
                    self.active_node = Some(applied.agent_identity.clone());
                    self.emit(TurnEvent::NodeActivated {
                        agent_name: applied.agent_identity,
                        node_id,
                    })
                    .await;
                }
                if self.session.has_active_groups() {
                    self.ticker.arm();
                }
                self.publish_groups().await;
            }
        }

        if let Some(text) = envelope.assistant_text.as_deref().filter(|text| !text.is_empty()) {
            self.record_answer(text);
            if self.turn_open && self.detector.observe(&self.answer) {
                self.finish_turn().await;
            }
        }

        if envelope.is_final && self.turn_open {
            self.detector.mark_final();
            self.finish_turn().await;
        }
    }

    /// Every update carries the whole answer so far and replaces it. Each
    /// version is backed up as it arrives so a cut-off stream can be
    /// recovered later.
    fn record_answer(&mut self, text: &str) {
        self.answer = text.to_string();
        if self.message_id.is_empty() {
            return;
        }
        if let Err(err) = self.history.backup_answer(&self.message_id, &self.answer) {
            warn!("Failed to back up answer: {}", err);
        }
        if self.config.is_product_content(&self.answer) {
            if let Err(err) = self.history.backup_product(&self.answer, Utc::now()) {
                warn!("Failed to back up product answer: {}", err);
            }
        }
    }

    /// Snapshots the answer backups and repairs history entries whose stored
    /// response is shorter than a backed-up version. Returns the number of
    /// entries repaired.
    pub fn recover_history(&self) -> Result<usize, TraceError> {
        self.history.snapshot(Utc::now())?;
        self.history.recover_entries()
    }

    /// Surfaces a transport error as a non-fatal banner.
    pub async fn handle_transport_error(&mut self, message: &str) {
        let err = TraceError::StreamTransport(message.to_string());
        warn!("{}", err);
        self.emit(TurnEvent::StreamError {
            message: err.to_string(),
        })
        .await;
    }

    /// Input regained focus: release a stuck lock and reset flow animations.
    pub async fn focus_reset(&mut self) {
        self.unlock_input().await;
        self.active_node = None;
        self.emit(TurnEvent::FlowReset).await;
    }

    /// One ticker step.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.ticker.tick(&mut self.session, &self.config, Utc::now());
        if outcome != TickOutcome::Idle {
            self.publish_groups().await;
        }
        if outcome == TickOutcome::AllComplete {
            info!("All trace groups complete for session {}", self.session.id);
        }
        outcome
    }

    /// Polls the watchdog. Returns `Err(TurnTimedOut)` once the hard
    /// inactivity period has elapsed; the session itself is kept.
    pub async fn check_inactivity(&mut self) -> Result<(), TraceError> {
        let now = Instant::now();
        match self.watchdog.poll(now) {
            Some(WatchdogAlarm::SoftWarning) => {
                let inactive_secs = self.watchdog.inactive_secs(now);
                warn!("No activity for {}s, still waiting for a response", inactive_secs);
                self.emit(TurnEvent::InactivityWarning { inactive_secs }).await;
                Ok(())
            }
            Some(WatchdogAlarm::HardTimeout) => {
                let inactive_secs = self.watchdog.inactive_secs(now);
                let err = TraceError::TurnTimedOut { inactive_secs };
                warn!("{}", err);
                self.turn_open = false;
                self.ticker.stop();
                match self.recover_history() {
                    Ok(0) => {}
                    Ok(recovered) => info!("Recovered {} truncated history entries", recovered),
                    Err(err) => warn!("History recovery failed: {}", err),
                }
                self.emit(TurnEvent::TurnTimedOut { inactive_secs }).await;
                self.unlock_input().await;
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn finish_turn(&mut self) {
        self.turn_open = false;
        self.watchdog.disarm();
        info!(
            "Response complete for session {} ({} characters)",
            self.session.id,
            self.answer.chars().count()
        );
        self.emit(TurnEvent::TurnCompleted {
            response: self.answer.clone(),
        })
        .await;

        let entry = HistoryEntry {
            id: self.message_id.clone(),
            prompt: self.prompt.clone().unwrap_or_default(),
            response: self.answer.clone(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.history.commit(entry) {
            warn!("Failed to save chat history: {}", err);
        }
        if let Err(err) = self.history.backup_answer(&self.message_id, &self.answer) {
            warn!("Failed to back up answer: {}", err);
        }

        self.unlock_input().await;
    }

    /// Drives the engine until both input channels are exhausted and no timer
    /// is pending, or until a turn times out.
    ///
    /// On timeout the inbound channel is closed and the error returned; the
    /// engine and its session remain usable for the next submission.
    pub async fn run(
        &mut self,
        inbound: &mut TraceReceiver,
        actions: &mut mpsc::Receiver<UserAction>,
    ) -> Result<(), TraceError> {
        let mut ticks = time::interval(self.config.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_open = true;
        let mut actions_open = true;

        loop {
            let deadline = self.watchdog.deadline();
            let ticker_active = self.ticker.is_active();

            // User actions first, so a submission queued alongside its first
            // envelopes always opens the turn before they are handled.
            tokio::select! {
                biased;

                action = actions.recv(), if actions_open => match action {
                    Some(UserAction::Submit(prompt)) => self.submit(prompt).await,
                    Some(UserAction::FocusReset) => self.focus_reset().await,
                    None => actions_open = false,
                },
                message = inbound.recv(), if inbound_open => match message {
                    Some(StreamMessage::Envelope(envelope)) => self.handle_envelope(envelope).await,
                    Some(StreamMessage::TransportError(message)) => {
                        self.handle_transport_error(&message).await
                    }
                    Some(StreamMessage::Closed) | None => {
                        debug!("Inbound stream closed");
                        inbound_open = false;
                    }
                },
                _ = ticks.tick(), if ticker_active => {
                    self.tick().await;
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(err) = self.check_inactivity().await {
                        inbound.close();
                        return Err(err);
                    }
                }
                else => return Ok(()),
            }
        }
    }
}
