use std::sync::Arc;

use chatai_db::Database;
use chatai_llm::ChatProvider;

use crate::cache::ConversationCache;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub cache: ConversationCache,
    pub provider: Arc<dyn ChatProvider>,
    pub auth: AuthSettings,
}

/// Token and passcode settings, fixed at start-up.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// Return the passcode from `/auth/initiate_signin`; there is no mailer.
    pub expose_otp: bool,
}

impl AuthSettings {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl: chrono::Duration::days(30),
            expose_otp: true,
        }
    }
}
