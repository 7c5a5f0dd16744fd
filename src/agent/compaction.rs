//! Session compaction: trigger, prune, summarise.
//!
//! [`SessionCompactor`] ties the pieces together for one conversation:
//!
//! 1. [`CompactionTrigger`] decides whether a history needs shrinking.
//! 2. [`HistoryPruner`] drops the oldest non-essential turns down to
//!    `target_fraction` of the budget (minus the system prompt).
//! 3. [`SummaryGenerator`] (or an attached [`ChatClient`]) digests what was
//!    dropped, and the digest is appended to the session as a
//!    `[Conversation Summary]` system message.
//!
//! After compaction the history plus system prompt fits the budget whenever
//! pruning can get it there. System messages are never dropped; the final
//! exchange is dropped only if it alone is over the budget.
//!
//! Only one compaction per session id runs at a time. A second caller for the
//! same session waits for the first to finish, then runs the trigger on its
//! own history; different sessions do not wait on each other.

use super::pruner::HistoryPruner;
use super::summary::{build_summary_prompt, summary_message, SummaryGenerator, NO_HISTORY_SUMMARY};
use super::tokens::{estimate_text_tokens, estimate_total_context_tokens};
use super::trigger::CompactionTrigger;
use crate::bus::{EventBus, EventType};
use crate::config::{AgentConfig, CompactionConfig, Config};
use crate::error::Result;
use crate::log_component;
use crate::providers::ChatClient;
use crate::session::{Message, SessionStore};
use crate::state::AgentState;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as SessionMutex, OwnedMutexGuard};
use tracing::{debug, warn};

static GLOBAL_COMPACTOR: Lazy<Arc<SessionCompactor>> =
    Lazy::new(|| Arc::new(SessionCompactor::new(CompactionConfig::default())));

/// Outcome of a compaction attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionResult {
    /// History to continue the conversation with
    pub compacted_history: Vec<Message>,
    /// Digest of the removed turns; empty when nothing was compacted
    pub summary: String,
    /// Whether any message was removed
    pub performed: bool,
    /// Number of messages removed
    pub messages_removed: usize,
}

impl CompactionResult {
    /// Result for a history left as it was.
    pub fn unchanged(history: &[Message]) -> Self {
        Self {
            compacted_history: history.to_vec(),
            summary: String::new(),
            performed: false,
            messages_removed: 0,
        }
    }

    fn empty() -> Self {
        Self {
            summary: NO_HISTORY_SUMMARY.to_string(),
            ..Self::default()
        }
    }
}

/// Per-session compaction locks, keyed by session id.
type SessionLocks = Mutex<HashMap<String, Arc<SessionMutex<()>>>>;

/// Holds one session's compaction lock; drops the map entry when nobody
/// else is waiting on it.
struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl<'a> SessionGuard<'a> {
    fn session_lock(locks: &SessionLocks, session_id: &str) -> Arc<SessionMutex<()>> {
        let mut map = locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(session_id.to_string()).or_default())
    }

    /// Block the current thread until the session is free.
    fn acquire(locks: &'a SessionLocks, session_id: &str) -> Self {
        let held = Self::session_lock(locks, session_id).blocking_lock_owned();
        Self {
            locks,
            session_id: session_id.to_string(),
            held: Some(held),
        }
    }

    async fn acquire_async(locks: &'a SessionLocks, session_id: &str) -> SessionGuard<'a> {
        let held = Self::session_lock(locks, session_id).lock_owned().await;
        Self {
            locks,
            session_id: session_id.to_string(),
            held: Some(held),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only made under the map lock, so a count of one means
        // no caller is holding or waiting on this session.
        if map
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.session_id);
        }
    }
}

/// Messages to keep and messages to summarise.
struct Plan {
    kept: Vec<Message>,
    removed: Vec<Message>,
    tokens_before: usize,
}

enum Step {
    Done(CompactionResult),
    Compact(Plan),
}

/// Messages of `history` missing from `kept`, where `kept` is an ordered
/// subsequence of `history`.
fn removed_messages(history: &[Message], kept: &[Message]) -> Vec<Message> {
    let mut kept_iter = kept.iter().peekable();
    history
        .iter()
        .filter(|m| {
            if kept_iter.peek() == Some(m) {
                kept_iter.next();
                false
            } else {
                true
            }
        })
        .cloned()
        .collect()
}

/// Per-session compaction orchestrator.
///
/// # Example
///
/// ```
/// use loopkeeper::agent::SessionCompactor;
/// use loopkeeper::config::CompactionConfig;
/// use loopkeeper::session::Message;
///
/// let compactor = SessionCompactor::new(CompactionConfig::default());
/// let history: Vec<Message> = (0..30)
///     .map(|i| Message::user(&format!("message {} with a handful of words", i)))
///     .collect();
///
/// let result = compactor.compact_session(&history, "Be brief.", 100);
/// assert!(result.performed);
/// assert!(result.compacted_history.len() < history.len());
/// ```
pub struct SessionCompactor {
    config: CompactionConfig,
    trigger: CompactionTrigger,
    pruner: HistoryPruner,
    summarizer: SummaryGenerator,
    summary_model: String,
    chat_client: RwLock<Option<Arc<dyn ChatClient>>>,
    store: RwLock<Option<Arc<dyn SessionStore>>>,
    agent_state: Option<Arc<AgentState>>,
    bus: Option<Arc<EventBus>>,
    session_locks: SessionLocks,
}

impl SessionCompactor {
    /// Compactor with no collaborators attached. Summaries are local until
    /// [`initialize`](Self::initialize) wires a chat client.
    pub fn new(config: CompactionConfig) -> Self {
        let summary_model = config
            .summary_model
            .clone()
            .unwrap_or_else(|| AgentConfig::default().model);
        Self {
            trigger: CompactionTrigger::from_config(&config),
            pruner: HistoryPruner::new(),
            summarizer: SummaryGenerator::from_config(&config),
            summary_model,
            chat_client: RwLock::new(None),
            store: RwLock::new(None),
            agent_state: None,
            bus: None,
            session_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Build from the full config; summaries use [`Config::summary_model`].
    pub fn from_config(config: &Config) -> Self {
        let mut compactor = Self::new(config.compaction.clone());
        compactor.summary_model = config.summary_model().to_string();
        compactor
    }

    /// The process-wide compactor, built from default config. Lives until
    /// process exit.
    pub fn global() -> Arc<SessionCompactor> {
        Arc::clone(&GLOBAL_COMPACTOR)
    }

    /// Wire (or unwire, with `None`) the chat client and session store.
    pub fn initialize(
        &self,
        chat_client: Option<Arc<dyn ChatClient>>,
        store: Option<Arc<dyn SessionStore>>,
    ) {
        *self.chat_client.write().unwrap_or_else(|e| e.into_inner()) = chat_client;
        *self.store.write().unwrap_or_else(|e| e.into_inner()) = store;
    }

    /// Report progress through `state`'s compaction fields.
    pub fn with_agent_state(mut self, state: Arc<AgentState>) -> Self {
        self.agent_state = Some(state);
        self
    }

    /// Publish `CompactionStarted` / `CompactionCompleted` on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn trigger(&self) -> &CompactionTrigger {
        &self.trigger
    }

    pub fn summary_model(&self) -> &str {
        &self.summary_model
    }

    pub fn has_chat_client(&self) -> bool {
        self.chat_client().is_some()
    }

    pub fn has_store(&self) -> bool {
        self.store().is_some()
    }

    fn chat_client(&self) -> Option<Arc<dyn ChatClient>> {
        self.chat_client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store(&self) -> Option<Arc<dyn SessionStore>> {
        self.store.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ── planning ───────────────────────────────────────────────────────

    /// Decide what to keep.
    ///
    /// `force` compacts even a history that fits `max_context_tokens` (the
    /// message-count trigger); the budget then becomes the current usage.
    fn plan(
        &self,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
        force: bool,
    ) -> Step {
        if history.is_empty() {
            return Step::Done(CompactionResult::empty());
        }

        let tokens_before = estimate_total_context_tokens(history, system_prompt);
        if max_context_tokens == 0 {
            return Step::Compact(Plan {
                kept: Vec::new(),
                removed: history.to_vec(),
                tokens_before,
            });
        }
        if tokens_before <= max_context_tokens && !force {
            return Step::Done(CompactionResult::unchanged(history));
        }

        let budget = max_context_tokens.min(tokens_before);
        let target = (budget as f64 * self.config.target_fraction) as usize;
        let target = target
            .saturating_sub(estimate_text_tokens(system_prompt))
            .max(1);
        let mut kept = self.pruner.prune_history(history, target);

        // Pruning keeps the final exchange; drop it too if it alone is over.
        while estimate_total_context_tokens(&kept, system_prompt) > max_context_tokens {
            match kept.iter().position(|m| !m.is_system()) {
                Some(idx) => {
                    kept.remove(idx);
                }
                None => break,
            }
        }

        let removed = removed_messages(history, &kept);
        if removed.is_empty() {
            return Step::Done(CompactionResult::unchanged(history));
        }
        Step::Compact(Plan {
            kept,
            removed,
            tokens_before,
        })
    }

    fn begin(&self, session_id: Option<&str>, plan: &Plan, history_len: usize) {
        if let Some(state) = &self.agent_state {
            state.begin_compaction("Pruning history");
        }
        if let Some(bus) = &self.bus {
            bus.publish_json(
                EventType::CompactionStarted,
                json!({
                    "session_id": session_id,
                    "messages": history_len,
                    "tokens": plan.tokens_before,
                }),
            );
        }
        if let Some(state) = &self.agent_state {
            state.set_compaction_progress(0.5, "Summarizing removed messages");
        }
    }

    fn finish(
        &self,
        session_id: Option<&str>,
        plan: Plan,
        summary: String,
        system_prompt: &str,
    ) -> CompactionResult {
        let messages_removed = plan.removed.len();
        let tokens_after = estimate_total_context_tokens(&plan.kept, system_prompt);

        log_component!(
            info,
            "compaction",
            "Compacted session history",
            session_id = session_id.unwrap_or("-"),
            messages_removed = messages_removed,
            tokens_before = plan.tokens_before,
            tokens_after = tokens_after,
        );

        if let Some(state) = &self.agent_state {
            state.finish_compaction(&format!("Removed {} messages", messages_removed));
        }
        if let Some(bus) = &self.bus {
            bus.publish_json(
                EventType::CompactionCompleted,
                json!({
                    "session_id": session_id,
                    "messages_removed": messages_removed,
                    "tokens_before": plan.tokens_before,
                    "tokens_after": tokens_after,
                }),
            );
        }

        CompactionResult {
            compacted_history: plan.kept,
            summary,
            performed: true,
            messages_removed,
        }
    }

    fn run(
        &self,
        session_id: Option<&str>,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
        force: bool,
    ) -> CompactionResult {
        match self.plan(history, system_prompt, max_context_tokens, force) {
            Step::Done(result) => result,
            Step::Compact(plan) => {
                self.begin(session_id, &plan, history.len());
                let summary = self.summarizer.generate_summary(&plan.removed);
                self.finish(session_id, plan, summary, system_prompt)
            }
        }
    }

    async fn run_async(
        &self,
        session_id: Option<&str>,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
        force: bool,
    ) -> CompactionResult {
        match self.plan(history, system_prompt, max_context_tokens, force) {
            Step::Done(result) => result,
            Step::Compact(plan) => {
                self.begin(session_id, &plan, history.len());
                let summary = self.summarize_async(&plan.removed).await;
                self.finish(session_id, plan, summary, system_prompt)
            }
        }
    }

    /// Ask the chat client for a summary, falling back to the local digest.
    async fn summarize_async(&self, removed: &[Message]) -> String {
        let Some(client) = self.chat_client() else {
            return self.summarizer.generate_summary(removed);
        };

        let prompt = vec![Message::user(&build_summary_prompt(removed))];
        match client.chat(&self.summary_model, prompt).await {
            Ok(response) if !response.content.trim().is_empty() => {
                response.content.trim().to_string()
            }
            Ok(_) => {
                warn!("Chat client returned an empty summary, using local summary");
                self.summarizer.generate_summary(removed)
            }
            Err(e) => {
                warn!(error = %e, "Summary request failed, using local summary");
                self.summarizer.generate_summary(removed)
            }
        }
    }

    // ── public operations ──────────────────────────────────────────────

    /// Compact `history` so that it plus `system_prompt` fits
    /// `max_context_tokens`.
    ///
    /// - empty history → empty result with the "no history" summary
    /// - `max_context_tokens == 0` → everything removed and summarised
    /// - already within budget → history unchanged, `performed: false`
    pub fn compact_session(
        &self,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
    ) -> CompactionResult {
        self.run(None, history, system_prompt, max_context_tokens, false)
    }

    /// [`compact_session`](Self::compact_session) with the summary requested
    /// from the attached chat client when there is one.
    pub async fn compact_session_async(
        &self,
        history: &[Message],
        system_prompt: &str,
        max_context_tokens: usize,
    ) -> CompactionResult {
        self.run_async(None, history, system_prompt, max_context_tokens, false)
            .await
    }

    /// Whether `maybe_compact` would do anything for this session now.
    fn should_run(&self, history: &[Message], system_prompt: &str) -> bool {
        if !self.config.enabled {
            debug!("Compaction disabled");
            return false;
        }
        self.trigger
            .should_compact(history, system_prompt, self.config.context_limit)
    }

    /// Store the summary and mark the session active.
    fn persist(&self, session_id: &str, result: &CompactionResult) -> Result<()> {
        if !result.performed {
            return Ok(());
        }
        match self.store() {
            Some(store) => {
                store.save_message(session_id, &summary_message(&result.summary))?;
                store.touch_session(session_id)
            }
            None => {
                debug!(session_id, "No session store attached, summary not saved");
                Ok(())
            }
        }
    }

    /// Compact the session if the trigger fires.
    ///
    /// The budget is `context_limit` from config. On compaction a
    /// `[Conversation Summary]` system message is saved to the attached store
    /// and the session is touched; store failures are returned.
    ///
    /// Blocks while another compaction of the same session is running. This
    /// must not be called from inside an async runtime; use
    /// [`maybe_compact_async`](Self::maybe_compact_async) there.
    pub fn maybe_compact(
        &self,
        session_id: &str,
        history: &[Message],
        system_prompt: &str,
    ) -> Result<CompactionResult> {
        let _guard = self.wait_for_session(session_id);
        if !self.should_run(history, system_prompt) {
            return Ok(CompactionResult::unchanged(history));
        }

        let result = self.run(
            Some(session_id),
            history,
            system_prompt,
            self.config.context_limit,
            true,
        );
        self.persist(session_id, &result)?;
        Ok(result)
    }

    /// [`maybe_compact`](Self::maybe_compact) with the summary requested
    /// from the attached chat client when there is one.
    pub async fn maybe_compact_async(
        &self,
        session_id: &str,
        history: &[Message],
        system_prompt: &str,
    ) -> Result<CompactionResult> {
        let _guard = match self.try_session(session_id) {
            Some(guard) => guard,
            None => {
                debug!(session_id, "Waiting for in-flight compaction of session");
                SessionGuard::acquire_async(&self.session_locks, session_id).await
            }
        };
        if !self.should_run(history, system_prompt) {
            return Ok(CompactionResult::unchanged(history));
        }

        let result = self
            .run_async(
                Some(session_id),
                history,
                system_prompt,
                self.config.context_limit,
                true,
            )
            .await;
        self.persist(session_id, &result)?;
        Ok(result)
    }

    /// Take the session lock if it is free.
    fn try_session(&self, session_id: &str) -> Option<SessionGuard<'_>> {
        let held = SessionGuard::session_lock(&self.session_locks, session_id)
            .try_lock_owned()
            .ok()?;
        Some(SessionGuard {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            held: Some(held),
        })
    }

    fn wait_for_session(&self, session_id: &str) -> SessionGuard<'_> {
        self.try_session(session_id).unwrap_or_else(|| {
            debug!(session_id, "Waiting for in-flight compaction of session");
            SessionGuard::acquire(&self.session_locks, session_id)
        })
    }

    /// Whether a compaction for `session_id` is running right now.
    pub fn is_compacting(&self, session_id: &str) -> bool {
        self.session_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

impl std::fmt::Debug for SessionCompactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCompactor")
            .field("config", &self.config)
            .field("summary_model", &self.summary_model)
            .field("has_chat_client", &self.has_chat_client())
            .field("has_store", &self.has_store())
            .finish()
    }
}
