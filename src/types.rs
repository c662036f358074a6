use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type MessageId = String;

/// Sender id used for coordinator-authored announcements
pub const SYSTEM_SENDER: &str = "system";

/// Generate a fresh opaque id
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A roster entry as stored by the coordinator. Identity is caller-supplied;
/// the coordinator does not mint ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
}

/// A roster entry as rendered for one specific viewer. `is_ai_controlled` is
/// true only on the AI player's own record in their own view; every other
/// record reads false for every viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    #[serde(rename = "isAIControlled")]
    pub is_ai_controlled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: PlayerId,
    pub sender_name: String,
    pub text: String,
    /// Epoch ms, clamped non-decreasing within the log
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Active,
    Voting,
    Results,
}

/// Outcome of one round, computed once at tally close and retained until the
/// next round starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub ai_player_id: PlayerId,
    pub ai_player_name: String,
    pub most_voted_player_id: Option<PlayerId>,
    pub most_voted_player_name: Option<String>,
    pub vote_counts: HashMap<PlayerId, u32>,
    pub correct: bool,
}

/// Full session snapshot as sent to one viewer. The player list is redacted
/// against the viewer's own id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub round: u64,
    pub players: Vec<PlayerView>,
    pub messages: Vec<ChatMessage>,
    pub voting_open: bool,
    pub next_phase_deadline: i64,
    pub round_result: Option<RoundResult>,
}
