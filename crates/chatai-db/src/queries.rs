use crate::models::{ConversationRow, MessageRow, NewMessage, UserRow};
use crate::Database;
use anyhow::{Result, bail};
use rusqlite::{Connection, Row};

impl Database {
    // -- Users --

    /// Look the user up by email, inserting it with `new_id` when unknown.
    /// Returns the stored row and whether it was created by this call.
    pub fn get_or_create_user(&self, new_id: &str, email: &str) -> Result<(UserRow, bool)> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, email) VALUES (?1, ?2)",
                (new_id, email),
            )?;

            match query_user_by_email(conn, email)? {
                Some(user) => Ok((user, inserted > 0)),
                None => bail!("User vanished after insert: {}", email),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, title, created_at FROM conversations WHERE id = ?1",
                [id],
                conversation_from_row,
            )
            .optional()
        })
    }

    /// All conversations of a user, newest first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, created_at
                 FROM conversations
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a conversation (and, through the cascade, its messages) if it
    /// belongs to `user_id`. Returns whether anything was deleted.
    pub fn delete_conversation(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(deleted > 0)
        })
    }

    // -- Messages --

    /// Messages of a conversation in the order they were written.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id))
    }

    /// Persist one chat exchange atomically: create the conversation when it
    /// does not exist yet, then append `messages` in order.
    ///
    /// Fails without writing anything if the conversation exists but is owned
    /// by another user. Returns whether the conversation was created.
    pub fn record_exchange(
        &self,
        conversation_id: &str,
        user_id: &str,
        title: &str,
        messages: &[NewMessage<'_>],
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let created = tx.execute(
                "INSERT OR IGNORE INTO conversations (id, user_id, title) VALUES (?1, ?2, ?3)",
                (conversation_id, user_id, title),
            )? > 0;

            let owner: String = tx.query_row(
                "SELECT user_id FROM conversations WHERE id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            if owner != user_id {
                bail!(
                    "Conversation {} belongs to {}, not {}",
                    conversation_id,
                    owner,
                    user_id
                );
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (id, conversation_id, role, content) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for msg in messages {
                    stmt.execute((msg.id, conversation_id, msg.role, msg.content))?;
                }
            }

            tx.commit()?;
            Ok(created)
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, email, created_at FROM users WHERE email = ?1",
        [email],
        user_from_row,
    )
    .optional()
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<MessageRow>> {
    // rowid breaks ties between messages written within the same second
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, role, content, created_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
