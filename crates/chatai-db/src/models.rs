/// Database row types — these map directly to SQLite rows.
/// Distinct from chatai-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// A message about to be written. Ids are generated by the caller.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub role: &'a str,
    pub content: &'a str,
}
