//! Message router: admission, greeting check, the intent -> primary -> secondary fallback
//! chain, reply delivery and the transcript record.
//!
//! Every message that is admitted ends in exactly one of: a formatted answer, or the
//! generic failure notice. The sender is released on every path, including panics
//! inside routing and cancellation of the routing task.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::backends::{BackendOutcome, Backends, GeneratorAdapter, IntentAdapter};
use crate::channels::{ChannelError, ChannelHandle, InboundMessage, SenderId};
use crate::config::{Config, MessagesConfig};
use crate::dispatch::{DispatchPermit, DispatchQueue};
use crate::greeting;
use crate::transcript::{ReplySource, Transcript, TranscriptEntry};

/// Final answer for one message. `final_text` carries no attribution suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub final_text: String,
    pub source: ReplySource,
    pub language: String,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Sender already had a message in flight; the wait notice was sent.
    Rejected,
    /// The answer was delivered.
    Replied(RoutingDecision),
    /// Routing or delivery failed; the generic failure notice was sent (best effort).
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("reply could not be delivered: {0}")]
    Send(#[from] ChannelError),
    #[error("all backends failed (last: {0})")]
    ChainExhausted(String),
    #[error("routing panicked: {0}")]
    Panicked(String),
}

/// Router knobs taken from config.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Intent answers are used only above this confidence (strict).
    pub confidence_threshold: f64,
    /// Language recorded for replies that don't report one.
    pub default_language: String,
    pub messages: MessagesConfig,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            confidence_threshold: config.router.confidence_threshold,
            default_language: config.router.default_language.clone(),
            messages: config.messages.clone(),
        }
    }

    fn attribution(&self, source: ReplySource) -> Option<&str> {
        let a = &self.messages.attribution;
        let suffix = match source {
            ReplySource::Greeting => a.greeting.as_deref()?,
            ReplySource::Intent => a.intent.as_str(),
            ReplySource::Primary => a.primary.as_str(),
            ReplySource::Secondary => a.secondary.as_str(),
        };
        Some(suffix).filter(|s| !s.trim().is_empty())
    }

    /// Answer text plus the source's attribution line.
    pub fn format_reply(&self, decision: &RoutingDecision) -> String {
        match self.attribution(decision.source) {
            Some(suffix) => format!("{}\n\n{}", decision.final_text, suffix),
            None => decision.final_text.clone(),
        }
    }
}

/// Routes messages of one channel. Owns that channel's dispatch queue.
pub struct MessageRouter {
    channel: Arc<dyn ChannelHandle>,
    intent: Option<IntentAdapter>,
    primary: GeneratorAdapter,
    secondary: GeneratorAdapter,
    transcript: Arc<dyn Transcript>,
    queue: DispatchQueue,
    settings: RouterSettings,
    records: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageRouter {
    pub fn new(
        channel: Arc<dyn ChannelHandle>,
        backends: Backends,
        transcript: Arc<dyn Transcript>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            channel,
            intent: backends.intent,
            primary: backends.primary,
            secondary: backends.secondary,
            transcript,
            queue: DispatchQueue::new(),
            settings,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Senders with a message in flight.
    pub fn busy_senders(&self) -> usize {
        self.queue.len()
    }

    pub fn is_busy(&self, sender: &SenderId) -> bool {
        self.queue.is_busy(sender)
    }

    /// Wait for transcript records spawned so far. Call before shutting down.
    pub async fn flush_records(&self) {
        let pending = std::mem::take(&mut *self.records());
        for task in pending {
            if let Err(e) = task.await {
                log::warn!("router: transcript record task failed: {}", e);
            }
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit and route `msg` to completion.
    pub async fn handle(&self, msg: InboundMessage) -> HandleOutcome {
        match self.queue.try_admit(&msg.sender) {
            Some(permit) => self.process(permit, msg).await,
            None => {
                self.reject(&msg).await;
                HandleOutcome::Rejected
            }
        }
    }

    /// Admit `msg` now, in caller order, and route it on its own task.
    pub fn spawn_handle(self: &Arc<Self>, msg: InboundMessage) -> JoinHandle<HandleOutcome> {
        let admitted = self.queue.try_admit(&msg.sender);
        let router = Arc::clone(self);
        tokio::spawn(async move {
            match admitted {
                Some(permit) => router.process(permit, msg).await,
                None => {
                    router.reject(&msg).await;
                    HandleOutcome::Rejected
                }
            }
        })
    }

    async fn reject(&self, msg: &InboundMessage) {
        log::info!(
            "router: {} busy, rejecting message on {}",
            msg.sender,
            self.channel.id()
        );
        if let Err(e) = self
            .channel
            .send_message(msg.sender.as_str(), &self.settings.messages.wait_notice)
            .await
        {
            log::warn!("router: wait notice to {} failed: {}", msg.sender, e);
        }
    }

    async fn process(&self, permit: DispatchPermit, msg: InboundMessage) -> HandleOutcome {
        let result = AssertUnwindSafe(self.route_and_reply(&msg))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RouterError::Panicked(panic_message(panic.as_ref()))));
        let outcome = match result {
            Ok(decision) => HandleOutcome::Replied(decision),
            Err(e) => {
                log::error!("router: message from {} failed: {}", msg.sender, e);
                if let Err(e) = self
                    .channel
                    .send_message(msg.sender.as_str(), &self.settings.messages.generic_failure)
                    .await
                {
                    log::warn!("router: failure notice to {} failed: {}", msg.sender, e);
                }
                HandleOutcome::Failed
            }
        };
        permit.release();
        outcome
    }

    async fn route_and_reply(&self, msg: &InboundMessage) -> Result<RoutingDecision, RouterError> {
        let decision = self.decide(msg).await?;
        let reply = self.settings.format_reply(&decision);
        self.deliver(&msg.sender, &reply).await?;
        self.spawn_record(msg, &decision);
        Ok(decision)
    }

    /// Run the greeting check and fallback chain without sending anything.
    pub async fn decide(&self, msg: &InboundMessage) -> Result<RoutingDecision, RouterError> {
        if let Some(greeting) = greeting::match_greeting(&msg.text) {
            log::debug!(
                "router: greeting {} from {}",
                greeting.category.as_str(),
                msg.sender
            );
            return Ok(self.decision(greeting.reply, ReplySource::Greeting, None));
        }

        if let Some(intent) = &self.intent {
            match intent.invoke(msg.sender.as_str(), &msg.text).await {
                BackendOutcome::Answered(answer)
                    if answer
                        .confidence
                        .is_some_and(|c| c > self.settings.confidence_threshold)
                        && !answer.text.trim().is_empty() =>
                {
                    return Ok(self.decision(answer.text, ReplySource::Intent, answer.language));
                }
                BackendOutcome::Answered(answer) => log::debug!(
                    "router: intent confidence {:?} not above {}, trying {}",
                    answer.confidence,
                    self.settings.confidence_threshold,
                    self.primary.name()
                ),
                BackendOutcome::Failed { reason } => {
                    log::debug!("router: intent failed ({}), trying {}", reason, self.primary.name())
                }
            }
        }

        match self.primary.invoke(&msg.text).await {
            BackendOutcome::Answered(answer) if !answer.text.trim().is_empty() => {
                return Ok(self.decision(answer.text, ReplySource::Primary, None));
            }
            BackendOutcome::Answered(_) => {
                log::info!("router: {} returned no text", self.primary.name())
            }
            BackendOutcome::Failed { reason } => log::info!(
                "router: {} failed ({}), falling back to {}",
                self.primary.name(),
                reason,
                self.secondary.name()
            ),
        }

        match self.secondary.invoke(&msg.text).await {
            BackendOutcome::Answered(answer) => {
                Ok(self.decision(answer.text, ReplySource::Secondary, None))
            }
            BackendOutcome::Failed { reason } => Err(RouterError::ChainExhausted(reason)),
        }
    }

    fn decision(&self, text: String, source: ReplySource, language: Option<String>) -> RoutingDecision {
        RoutingDecision {
            final_text: text,
            source,
            language: language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| self.settings.default_language.clone()),
        }
    }

    async fn deliver(&self, sender: &SenderId, reply: &str) -> Result<(), RouterError> {
        if let Err(e) = self.channel.set_typing(sender.as_str()).await {
            log::debug!("router: typing indicator for {} failed: {}", sender, e);
        }
        self.channel.send_message(sender.as_str(), reply).await?;
        Ok(())
    }

    // Not awaited: a slow or failing transcript never delays the sender's release.
    fn spawn_record(&self, msg: &InboundMessage, decision: &RoutingDecision) {
        let entry = TranscriptEntry {
            timestamp: chrono::Utc::now(),
            sender: msg.sender.clone(),
            user_message: msg.text.clone(),
            bot_response: decision.final_text.clone(),
            source: decision.source,
            language: decision.language.clone(),
        };
        let transcript = Arc::clone(&self.transcript);
        let task = tokio::spawn(async move {
            if let Err(e) = transcript.record(&entry).await {
                log::warn!(
                    "router: {} transcript record for {} failed: {}",
                    transcript.name(),
                    entry.sender,
                    e
                );
            }
        });
        let mut records = self.records();
        records.retain(|t| !t.is_finished());
        records.push(task);
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
