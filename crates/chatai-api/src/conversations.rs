use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatai_db::models::{ConversationRow, MessageRow};
use chatai_types::api::{
    Claims, ConversationResponse, ConversationWithMessages, ConversationsResponse,
    DeleteConversationResponse,
};
use chatai_types::models::{Conversation, Message, Role};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// GET /ai/conversations — the caller's conversations, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();
    let rows = blocking(move || db.db.list_conversations(&uid)).await?;

    let conversations = rows.into_iter().map(conversation_from_row).collect();
    Ok(Json(ConversationsResponse { conversations }))
}

/// GET /ai/conversations/{conversation_id} — one conversation with its
/// messages, or `null` when the caller does not own it.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(conversation_id) = path_id(&raw_id) else {
        return Ok(Json(ConversationResponse { conversation: None }));
    };

    let db = state.clone();
    let cid = conversation_id.to_string();
    let uid = claims.sub.to_string();

    let found = blocking(move || {
        let Some(row) = db.db.get_conversation(&cid)? else {
            return Ok(None);
        };
        if row.user_id != uid {
            return Ok(None);
        }
        let messages = db.db.get_messages(&cid)?;
        Ok(Some((row, messages)))
    })
    .await?;

    let conversation = found.map(|(row, messages)| {
        let Conversation { id, user_id, title, created_at } = conversation_from_row(row);
        ConversationWithMessages {
            id,
            user_id,
            title,
            created_at,
            messages: messages.into_iter().map(message_from_row).collect(),
        }
    });

    Ok(Json(ConversationResponse { conversation }))
}

/// DELETE /ai/conversations/{conversation_id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(conversation_id) = path_id(&raw_id) else {
        return Ok(Json(DeleteConversationResponse { success: false }));
    };

    let db = state.clone();
    let cid = conversation_id.to_string();
    let uid = claims.sub.to_string();
    let deleted = blocking(move || db.db.delete_conversation(&cid, &uid)).await?;

    if deleted {
        state.cache.remove(conversation_id).await;
        info!("{} deleted conversation {}", claims.email, conversation_id);
    }

    Ok(Json(DeleteConversationResponse { success: deleted }))
}

/// Ids are UUIDs, so anything else cannot name a stored conversation.
fn path_id(raw: &str) -> Option<Uuid> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            debug!("Conversation id '{}' is not a UUID", raw);
            None
        }
    }
}

fn conversation_from_row(row: ConversationRow) -> Conversation {
    Conversation {
        id: parse_id(&row.id, "conversation id"),
        user_id: parse_id(&row.user_id, "user_id"),
        created_at: parse_timestamp(&row.created_at),
        title: row.title,
    }
}

fn message_from_row(row: MessageRow) -> Message {
    let role = row.role.parse().unwrap_or_else(|e| {
        warn!("Corrupt role on message '{}': {}", row.id, e);
        Role::Assistant
    });

    Message {
        id: parse_id(&row.id, "message id"),
        conversation_id: parse_id(&row.conversation_id, "conversation_id"),
        role,
        content: row.content,
        created_at: parse_timestamp(&row.created_at),
    }
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC and convert.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
