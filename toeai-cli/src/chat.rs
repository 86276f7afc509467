//! One prompt/response turn against the session store

use anyhow::Result;
use toeai_core::session::{MessageDraft, SessionStore};
use toeai_providers::{CancellationToken, GenerationClient};
use tracing::{info, warn};

/// How the reply is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Stream chunks as they are generated
    Stream,
    /// Wait for the complete reply
    Single,
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    pub audio_url: Option<String>,
    pub cancelled: bool,
}

/// Parameters of one turn
pub struct Turn<'a> {
    /// Session to continue; the active session (or a new one) when absent
    pub session_id: Option<&'a str>,
    pub prompt: &'a str,
    pub image_urls: Vec<String>,
    pub mode: ReplyMode,
}

/// Record the prompt, fetch a reply and record it.
///
/// The user message is stored before the request goes out. If generation
/// fails the error is returned and no assistant message is stored. A
/// cancelled stream keeps whatever text arrived before cancellation; a
/// cancelled single-shot request stores nothing.
pub async fn run_turn<F>(
    store: &mut SessionStore,
    client: &GenerationClient,
    turn: Turn<'_>,
    cancel: &CancellationToken,
    on_chunk: F,
) -> Result<TurnOutcome>
where
    F: FnMut(&str),
{
    let session_id = resolve_session(store, turn.session_id)?;
    store.push_message(
        &session_id,
        MessageDraft::user(turn.prompt).with_images(turn.image_urls),
    );

    let (reply, audio_url, cancelled) = match turn.mode {
        ReplyMode::Stream => {
            let summary = client
                .generate_stream(turn.prompt, cancel, on_chunk)
                .await
                .inspect_err(|e| warn!("Streaming reply for {} failed: {}", session_id, e))?;
            (summary.text, None, summary.cancelled)
        }
        ReplyMode::Single => {
            let generation = client
                .generate_cancellable(turn.prompt, cancel)
                .await
                .inspect_err(|e| warn!("Reply for {} failed: {}", session_id, e))?;
            (generation.text, generation.audio_url, generation.cancelled)
        }
    };

    if cancelled && reply.is_empty() {
        info!("Reply for {} cancelled before any text arrived", session_id);
    } else {
        store.push_message(&session_id, MessageDraft::assistant(reply.clone()));
    }

    Ok(TurnOutcome {
        session_id,
        reply,
        audio_url,
        cancelled,
    })
}

fn resolve_session(store: &mut SessionStore, requested: Option<&str>) -> Result<String> {
    if let Some(id) = requested {
        let id = store.require_session(id)?.id.clone();
        if store.active_session_id() != Some(id.as_str()) {
            store.set_active_session(Some(&id));
        }
        return Ok(id);
    }
    if let Some(active) = store.get_active_session() {
        return Ok(active.id.clone());
    }
    Ok(store.new_session().id.clone())
}
