use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message, Model};

// -- JWT Claims --

/// JWT claims issued by `/auth/signin` and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitiateSigninRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct InitiateSigninResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    pub message: String,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigninRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub success: bool,
}

impl SigninResponse {
    pub fn granted(token: String, user_id: Uuid, email: String) -> Self {
        Self {
            token: Some(token),
            user_id: Some(user_id),
            email: Some(email),
            message: None,
            success: true,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            token: None,
            user_id: None,
            email: None,
            message: Some(message.into()),
            success: false,
        }
    }
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    pub model: Model,
    pub message: String,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationWithMessages {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// `conversation` is `null` when the id is unknown or owned by someone else.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Option<ConversationWithMessages>,
}

#[derive(Debug, Serialize)]
pub struct DeleteConversationResponse {
    pub success: bool,
}
