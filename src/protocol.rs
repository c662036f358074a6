use crate::types::*;
use serde::{Deserialize, Serialize};

/// Inbound events. The wire format is JSON with a `type` tag, matching what
/// the browser client sends (`{"type":"joinGame","player":{...}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinGame {
        player: Player,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: PlayerId,
    },
    ChatMessage {
        message: ChatMessage,
    },
    SubmitPrompt {
        prompt: String,
    },
    CreateGame,
    #[serde(rename_all = "camelCase")]
    Vote {
        voter_id: PlayerId,
        voted_for_id: PlayerId,
    },
    Ping,
    GetState,
    Reset,
}

/// Outbound events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    GameState {
        data: SessionSnapshot,
    },
    PlayersUpdate {
        players: Vec<PlayerView>,
    },
    NewMessage {
        message: ChatMessage,
    },
    JoinConfirmed {
        player: Player,
    },
    PromptConfirmed {
        prompt: String,
    },
    #[serde(rename_all = "camelCase")]
    VoteConfirmed {
        voted_for_id: PlayerId,
    },
    ErrorMessage {
        message: String,
    },
    Pong {
        timestamp: i64,
    },
}
