use replygate_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind discriminant for deferred reply actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Public reply posted under a comment.
    CommentReply,
    /// Private direct message to a platform user.
    DirectMessage,
}

impl ActionKind {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommentReply => "comment_reply",
            Self::DirectMessage => "direct_message",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "comment_reply" => Ok(Self::CommentReply),
            "direct_message" => Ok(Self::DirectMessage),
            _ => Err(AppError::Validation(format!(
                "unknown action kind '{value}'"
            ))),
        }
    }
}

/// One reply action executed against the social platform.
///
/// The core never inspects the message content; it only routes on the kind
/// and hands the whole action to the executor port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyAction {
    /// Reply to one comment thread.
    CommentReply {
        /// Platform identifier of the comment being answered.
        comment_id: String,
        /// Message text to post.
        message: String,
    },
    /// Direct message to one user.
    DirectMessage {
        /// Platform identifier of the recipient.
        recipient_id: String,
        /// Message text to send.
        message: String,
    },
}

impl ReplyAction {
    /// Returns the kind discriminant.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::CommentReply { .. } => ActionKind::CommentReply,
            Self::DirectMessage { .. } => ActionKind::DirectMessage,
        }
    }

    /// Validates platform identifiers and message content.
    pub fn validate(&self) -> AppResult<()> {
        let (target, message) = match self {
            Self::CommentReply {
                comment_id,
                message,
            } => (comment_id, message),
            Self::DirectMessage {
                recipient_id,
                message,
            } => (recipient_id, message),
        };

        if target.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "{} target id must not be empty",
                self.kind().as_str()
            )));
        }

        if message.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "{} message must not be empty",
                self.kind().as_str()
            )));
        }

        Ok(())
    }

    /// Serializes the action for durable storage.
    pub fn to_value(&self) -> AppResult<Value> {
        serde_json::to_value(self).map_err(|error| {
            AppError::Internal(format!("failed to serialize reply action: {error}"))
        })
    }

    /// Deserializes one stored action.
    pub fn from_value(value: &Value) -> AppResult<Self> {
        serde_json::from_value(value.clone()).map_err(|error| {
            AppError::Validation(format!("invalid stored reply action: {error}"))
        })
    }
}
