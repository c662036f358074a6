use crate::types::{ChatMessage, PlayerId};

/// Why a chat message was refused
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("message text must not be empty")]
    EmptyText,
    #[error("sender is the AI-controlled player and cannot chat directly")]
    SenderRestricted,
}

/// Append-only chat record for the current round.
///
/// While a round is running the AI-controlled player is a restricted sender:
/// their client-submitted messages are refused so the bot speaks only through
/// the coordinator's generation path. Generated and system messages enter via
/// [`MessageLog::push_unrestricted`].
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
    restricted_sender: Option<PlayerId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a client-submitted message. Text must be non-empty and the
    /// sender must not be the restricted (AI-controlled) player.
    pub fn append(&mut self, message: ChatMessage) -> Result<&ChatMessage, AppendError> {
        if message.text.trim().is_empty() {
            return Err(AppendError::EmptyText);
        }
        if self.restricted_sender.as_deref() == Some(message.sender_id.as_str()) {
            return Err(AppendError::SenderRestricted);
        }
        Ok(self.push(message))
    }

    /// Append bypassing the sender restriction: system announcements and the
    /// coordinator-generated AI turns.
    pub fn push_unrestricted(&mut self, message: ChatMessage) -> &ChatMessage {
        self.push(message)
    }

    fn push(&mut self, mut message: ChatMessage) -> &ChatMessage {
        // Timestamps are wall-clock but must never go backwards within the log
        if let Some(last) = self.entries.last() {
            message.timestamp = message.timestamp.max(last.timestamp);
        }
        self.entries.push(message);
        self.entries.last().expect("just pushed")
    }

    /// The last `n` messages in arrival order
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    pub fn all(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn set_restricted_sender(&mut self, sender: Option<PlayerId>) {
        self.restricted_sender = sender;
    }
}
