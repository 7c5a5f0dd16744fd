//! Compact command handler.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use loopkeeper::agent::{CompactionResult, SessionCompactor};
use loopkeeper::config::Config;
use loopkeeper::session::{InMemorySessionStore, Message, SessionStore};

use super::common::{load_config, load_history};

/// Run one compaction over `history` with the configured compactor.
///
/// With `if_needed` the configured trigger decides, the run goes through a
/// throwaway in-memory session, and the stored summary message is logged.
async fn compact(
    config: &Config,
    history: &[Message],
    system_prompt: &str,
    max_tokens: Option<usize>,
    if_needed: bool,
    session: Option<String>,
) -> Result<CompactionResult> {
    let mut config = config.clone();
    if let Some(max) = max_tokens {
        config.compaction.context_limit = max;
    }
    let compactor = SessionCompactor::from_config(&config);

    if !if_needed {
        let budget = config.compaction.context_limit;
        return Ok(compactor
            .compact_session_async(history, system_prompt, budget)
            .await);
    }

    let session_id = session.unwrap_or_else(|| format!("cli:{}", uuid::Uuid::new_v4()));
    let store = Arc::new(InMemorySessionStore::new());
    for message in history {
        store.save_message(&session_id, message)?;
    }
    compactor.initialize(None, Some(store.clone()));

    let result = compactor
        .maybe_compact_async(&session_id, history, system_prompt)
        .await?;
    if result.performed {
        let stored = store.get_messages(&session_id)?;
        info!(
            session_id = %session_id,
            stored_messages = stored.len(),
            "Summary saved to session"
        );
    }
    Ok(result)
}

/// Compact a history file and print the result as JSON.
pub(crate) async fn cmd_compact(
    history_path: &Path,
    system_prompt: &str,
    max_tokens: Option<usize>,
    if_needed: bool,
    session: Option<String>,
) -> Result<()> {
    let config = load_config();
    let history = load_history(history_path)?;

    let result = compact(&config, &history, system_prompt, max_tokens, if_needed, session).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
