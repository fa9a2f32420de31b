//! The chat turn state machine.
//!
//! One user submission walks Idle -> Searching -> Composing -> AwaitingModel,
//! with at most one extra Searching/AwaitingModel round when the model asks
//! for more information, then appends the final model turn and returns to
//! Idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::gemini::{GeminiClient, HistoryEntry};
use crate::prompt::PromptAssembler;
use crate::protocol::parse_reply;
use crate::search::{format_search_results, SearchClient};
use crate::store::{ConversationStore, Role, Turn};

/// The model may request follow-up searches, but only this many extra rounds
/// are honored per user submission; the protocol never loops indefinitely.
/// Kept as a named constant so the policy is easy to revisit.
pub const MAX_FOLLOW_UP_ROUNDS: usize = 1;

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum ChatError {
    /// Validation failure: shown inline, no state is mutated.
    #[error("Please ask a question first")]
    EmptyMessage,
    /// A turn is already in flight; the caller should retry once it settles.
    #[error("A reply is still being generated, please wait")]
    Busy,
    /// LLM-provider failure. The user's own turn stays in history; no model
    /// turn is appended. The detail is logged, the display text is generic.
    #[error("Something went wrong while generating a reply")]
    Llm(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub workspace_id: i64,
    pub text: String,
}

pub struct ChatOrchestrator {
    search: SearchClient,
    llm: GeminiClient,
    prompts: PromptAssembler,
    store: ConversationStore,
    // Shared so callers holding the orchestrator behind a lock can observe
    // an in-flight turn without waiting for the lock.
    in_flight: Arc<AtomicBool>,
}

// Clears the in-flight marker when the turn settles, including early
// returns and panics.
struct TurnGuard(Arc<AtomicBool>);

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ChatOrchestrator {
    pub fn new(
        search: SearchClient,
        llm: GeminiClient,
        prompts: PromptAssembler,
        store: ConversationStore,
    ) -> Self {
        Self {
            search,
            llm,
            prompts,
            store,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to the in-flight marker. It reads true for the full duration
    /// of a turn, so a caller that serializes access through a lock can
    /// reject an overlapping submission up front instead of queueing it.
    pub fn in_flight_flag(&self) -> Arc<AtomicBool> {
        self.in_flight.clone()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn prompts(&self) -> &PromptAssembler {
        &self.prompts
    }

    /// Runs one full chat turn for `message` against the current workspace,
    /// creating one when none is selected.
    pub async fn handle_message(
        &mut self,
        message: &str,
        language: &str,
    ) -> Result<TurnOutcome, ChatError> {
        self.handle_prompt(message, None, language).await
    }

    /// Canned-prompt variant: `display_title`, when given, is what lands in
    /// history and seeds the workspace name, while the full `message` is
    /// what gets searched and sent to the model.
    #[instrument(skip(self, message, display_title))]
    pub async fn handle_prompt(
        &mut self,
        message: &str,
        display_title: Option<&str>,
        language: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        // Explicit guard instead of relying on UI discipline: a second
        // submission while one is in flight gets a busy error.
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("rejecting chat turn: another turn is in flight");
            return Err(ChatError::Busy);
        }
        let _guard = TurnGuard(self.in_flight.clone());

        self.run_turn(message, display_title, language).await
    }

    async fn run_turn(
        &mut self,
        message: &str,
        display_title: Option<&str>,
        language: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let shown = display_title.unwrap_or(message);
        let workspace_id = match self.store.current_id() {
            Some(id) => id,
            None => self.store.create_workspace(Some(shown)),
        };
        let is_first_turn = self
            .store
            .workspace(workspace_id)
            .map(|w| w.history.is_empty())
            .unwrap_or(true);

        // Optimistic append: the user's turn lands in history before any
        // network call and stays there even if the rest of the turn fails.
        self.store.append_turn(
            workspace_id,
            Turn {
                role: Role::User,
                content: shown.to_string(),
            },
        );

        // Searching. Failures have already degraded to an empty list inside
        // the client; the formatter turns that into the sentinel block.
        let results = self.search.search(message).await;
        let formatted = format_search_results(&results);

        // Composing.
        let mut context = self.prompts.search_context(message, &formatted);
        let outgoing = self
            .prompts
            .outgoing_message(message, &context, is_first_turn);
        let mut history = self.history_entries(workspace_id);

        // AwaitingModel.
        let mut reply = self
            .llm
            .send_message(&history, &outgoing, &context)
            .await
            .map_err(|e| {
                error!(error = ?e, "LLM call failed; aborting turn");
                ChatError::Llm(e)
            })?;

        for _ in 0..MAX_FOLLOW_UP_ROUNDS {
            let Some(follow_up) = parse_reply(&reply).directive else {
                break;
            };
            info!(query = %follow_up, "model requested a follow-up search");

            let results = self.search.search(&follow_up).await;
            let formatted = format_search_results(&results);
            let additional = self.prompts.additional_context(&follow_up, &formatted);

            // The first reply (which carries the follow-up query) becomes a
            // prior model turn for round two.
            history.push(HistoryEntry {
                role: Role::Model,
                parts: reply,
            });
            context = format!("{}\n\n{}", context, additional);

            reply = self
                .llm
                .send_message(&history, &additional, &context)
                .await
                .map_err(|e| {
                    error!(error = ?e, "follow-up LLM call failed; aborting turn");
                    ChatError::Llm(e)
                })?;
        }

        let text = if language != DEFAULT_LANGUAGE {
            translate(&reply, language).await
        } else {
            reply
        };

        self.store.append_turn(
            workspace_id,
            Turn {
                role: Role::Model,
                content: text.clone(),
            },
        );

        Ok(TurnOutcome { workspace_id, text })
    }

    fn history_entries(&self, workspace_id: i64) -> Vec<HistoryEntry> {
        self.store
            .workspace(workspace_id)
            .map(|w| {
                w.history
                    .iter()
                    .map(|turn| HistoryEntry {
                        role: turn.role,
                        parts: turn.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Identity pass-through for non-default display languages.
/// TODO: wire a real translation backend once one is chosen.
async fn translate(message: &str, _target_lang: &str) -> String {
    message.to_string()
}
