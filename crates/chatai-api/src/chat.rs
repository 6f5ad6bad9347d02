use std::convert::Infallible;

use axum::{
    Extension,
    body::Body,
    extract::State,
    http::{HeaderName, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatai_db::models::NewMessage;
use chatai_types::api::{ChatRequest, Claims};
use chatai_types::models::{ChatMessage, Role};

use crate::error::{ApiError, blocking};
use crate::extract::ValidJson;
use crate::state::AppState;
use crate::validate::{check_message, conversation_title};

pub const CONVERSATION_ID_HEADER: HeaderName = HeaderName::from_static("x-conversation-id");

/// POST /ai/chat — relay a streamed completion to the caller.
///
/// The body is the plain concatenation of upstream text deltas, written as
/// they arrive. Once the upstream finishes, the exchange is persisted and
/// cached. If the caller hangs up first the body stream is dropped and
/// the exchange is lost.
pub async fn chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<ChatRequest>,
) -> Result<Response, ApiError> {
    check_message(&req.message)?;

    let conversation_id = match req.conversation_id {
        Some(id) => {
            ensure_not_foreign(&state, id, claims.sub).await?;
            id
        }
        None => Uuid::new_v4(),
    };

    let mut history = state.cache.get(conversation_id).await;
    history.push(ChatMessage::user(req.message.clone()));
    debug!(
        "Chat in {} for {} with {} messages of context",
        conversation_id,
        claims.email,
        history.len() - 1
    );

    // Open the upstream before committing to a 200 so its failures can
    // still be reported as errors.
    let mut deltas = state
        .provider
        .stream_chat(req.model, history)
        .await
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("upstream chat request")))?;

    let user_id = claims.sub;
    let prompt = req.message;
    let stream = async_stream::stream! {
        let mut reply = String::new();

        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(text) => {
                    reply.push_str(&text);
                    yield Ok::<Bytes, Infallible>(Bytes::from(text));
                }
                Err(e) => {
                    warn!("Upstream stream for {} ended early: {}", conversation_id, e);
                    break;
                }
            }
        }

        finish_exchange(&state, user_id, conversation_id, prompt, reply).await;
    };

    let headers = [
        (header::CONTENT_TYPE, "text/event-stream".to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (CONVERSATION_ID_HEADER, conversation_id.to_string()),
    ];

    Ok((headers, Body::from_stream(stream)).into_response())
}

/// Reject a supplied conversation id that belongs to someone else. Unknown
/// ids are allowed: the conversation is created under that id.
async fn ensure_not_foreign(state: &AppState, conversation_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
    let db = state.clone();
    let cid = conversation_id.to_string();
    let existing = blocking(move || db.db.get_conversation(&cid)).await?;

    match existing {
        Some(row) if row.user_id != user_id.to_string() => {
            warn!("{} tried to post into conversation {} of {}", user_id, conversation_id, row.user_id);
            Err(ApiError::Forbidden)
        }
        _ => Ok(()),
    }
}

/// Write the finished exchange to the database, then cache it. A rejected
/// write (for example the id was taken by another user mid-stream) leaves
/// the cache untouched.
async fn finish_exchange(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    prompt: String,
    reply: String,
) {
    let db = state.clone();
    let (user_text, reply_text) = (prompt.clone(), reply.clone());
    let result = blocking(move || {
        let cid = conversation_id.to_string();
        let prompt_id = Uuid::new_v4().to_string();
        let reply_id = Uuid::new_v4().to_string();
        db.db.record_exchange(
            &cid,
            &user_id.to_string(),
            &conversation_title(&user_text),
            &[
                NewMessage { id: &prompt_id, role: Role::User.as_str(), content: &user_text },
                NewMessage { id: &reply_id, role: Role::Assistant.as_str(), content: &reply_text },
            ],
        )
    })
    .await;

    match result {
        Ok(created) => {
            if created {
                info!("Conversation {} created for {}", conversation_id, user_id);
            } else {
                debug!("Conversation {} updated", conversation_id);
            }
            state.cache.add(conversation_id, ChatMessage::user(prompt)).await;
            state.cache.add(conversation_id, ChatMessage::assistant(reply)).await;
        }
        Err(e) => error!("Failed to persist exchange for {}: {:?}", conversation_id, e),
    }
}
