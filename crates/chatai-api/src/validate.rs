use crate::error::ApiError;

/// Longest chat message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Characters of the first message used as a conversation title.
const TITLE_CHARS: usize = 20;

/// Loose syntactic check: one `@`, a non-empty local part, a dotted domain
/// with non-empty labels, and no whitespace anywhere.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

pub fn check_email(email: &str) -> Result<(), ApiError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(ApiError::invalid("Invalid email address"))
    }
}

pub fn check_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::invalid("Message must not be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::invalid(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

/// Title for a conversation started by `message`.
pub fn conversation_title(message: &str) -> String {
    let mut title: String = message.chars().take(TITLE_CHARS).collect();
    title.push_str("...");
    title
}
