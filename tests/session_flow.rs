use async_trait::async_trait;
use decoy::config::SessionConfig;
use decoy::llm::{
    GenerateRequest, GenerateResponse, LlmManager, LlmResult, ResponseMetadata, TextGenerator,
};
use decoy::protocol::{ClientMessage, ServerMessage};
use decoy::session::{self, ConnId, SessionHandle};
use decoy::types::{new_id, now_ms, ChatMessage, Phase, Player, SessionSnapshot};
use std::time::Duration;
use tokio::sync::mpsc;

fn fast_config() -> SessionConfig {
    SessionConfig {
        lobby_countdown: Duration::from_millis(100),
        lobby_recheck: Duration::from_millis(100),
        active_duration: Duration::from_millis(300),
        voting_duration: Duration::from_secs(5),
        tick_interval: Duration::from_millis(20),
        min_players: 2,
        ai_turn_probability: 0.0,
        chat_reply_probability: 0.0,
        // Keep the scheduled opening AI turn out of the way unless a test
        // explicitly wants it
        first_turn_delay: (Duration::from_secs(60), Duration::from_secs(60)),
        thinking_delay: (Duration::ZERO, Duration::ZERO),
        recent_context: 10,
        generation_timeout: Duration::from_secs(1),
    }
}

fn attach(handle: &SessionHandle) -> (ConnId, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (handle.attach(tx), rx)
}

fn join(handle: &SessionHandle, conn: ConnId, id: &str, name: &str) {
    handle.client(
        conn,
        ClientMessage::JoinGame {
            player: Player {
                id: id.into(),
                name: name.into(),
            },
        },
    );
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> ServerMessage {
    let json = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    serde_json::from_str(&json).expect("valid server frame")
}

async fn wait_for_frame(
    rx: &mut mpsc::UnboundedReceiver<String>,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let frame = next_frame(rx).await;
        if pred(&frame) {
            return frame;
        }
    }
}

async fn wait_for_snapshot(
    rx: &mut mpsc::UnboundedReceiver<String>,
    mut pred: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    loop {
        if let ServerMessage::GameState { data } = next_frame(rx).await {
            if pred(&data) {
                return data;
            }
        }
    }
}

fn chat_message(sender_id: &str, sender_name: &str, text: &str) -> ChatMessage {
    ChatMessage {
        id: new_id(),
        sender_id: sender_id.into(),
        sender_name: sender_name.into(),
        text: text.into(),
        timestamp: now_ms(),
    }
}

/// End-to-end flow for one complete round: join, phase transitions, the
/// per-viewer AI redaction, chat policy, voting and the result.
#[tokio::test]
async fn test_full_round_flow() {
    let handle = session::spawn(fast_config(), None);

    let (conn_a, mut rx_a) = attach(&handle);
    let (conn_b, mut rx_b) = attach(&handle);

    // Every connection receives a full snapshot immediately on registration
    match next_frame(&mut rx_a).await {
        ServerMessage::GameState { data } => assert_eq!(data.phase, Phase::Lobby),
        other => panic!("expected initial gameState, got {:?}", other),
    }

    join(&handle, conn_a, "p1", "Alice");
    join(&handle, conn_b, "p2", "Bob");

    wait_for_frame(&mut rx_a, |f| {
        matches!(f, ServerMessage::JoinConfirmed { player } if player.id == "p1")
    })
    .await;

    // The countdown elapses and the round starts
    let snapshot_a = wait_for_snapshot(&mut rx_a, |s| s.phase == Phase::Active).await;
    let snapshot_b = wait_for_snapshot(&mut rx_b, |s| s.phase == Phase::Active).await;
    assert_eq!(snapshot_a.round, 1);

    // Redaction: each viewer can see the flag only on their own record, and
    // exactly one of the two is the AI
    let flag = |s: &SessionSnapshot, id: &str| {
        s.players
            .iter()
            .find(|p| p.id == id)
            .expect("player present")
            .is_ai_controlled
    };
    let a_is_ai = flag(&snapshot_a, "p1");
    let b_is_ai = flag(&snapshot_b, "p2");
    assert!(a_is_ai ^ b_is_ai, "exactly one player is told they are the AI");
    assert!(!flag(&snapshot_a, "p2"), "a never sees b's flag");
    assert!(!flag(&snapshot_b, "p1"), "b never sees a's flag");

    let (ai_id, ai_conn, mut ai_rx, human_id, human_conn, mut human_rx) = if a_is_ai {
        ("p1", conn_a, rx_a, "p2", conn_b, rx_b)
    } else {
        ("p2", conn_b, rx_b, "p1", conn_a, rx_a)
    };

    // The AI-controlled player cannot chat through a raw client
    handle.client(
        ai_conn,
        ClientMessage::ChatMessage {
            message: chat_message(ai_id, "whoever", "hello, i am totally human"),
        },
    );
    wait_for_frame(&mut ai_rx, |f| {
        matches!(f, ServerMessage::ErrorMessage { message } if message.contains("cannot send"))
    })
    .await;

    // A human chat message is appended and broadcast to everyone
    handle.client(
        human_conn,
        ClientMessage::ChatMessage {
            message: chat_message(human_id, "Human", "hi everyone"),
        },
    );
    for rx in [&mut ai_rx, &mut human_rx] {
        wait_for_frame(rx, |f| {
            matches!(f, ServerMessage::NewMessage { message } if message.text == "hi everyone")
        })
        .await;
    }

    // The chat window closes and voting opens
    let voting = wait_for_snapshot(&mut human_rx, |s| s.phase == Phase::Voting).await;
    assert!(voting.voting_open);

    // Voting as the AI is rejected
    handle.client(
        ai_conn,
        ClientMessage::Vote {
            voter_id: ai_id.into(),
            voted_for_id: human_id.into(),
        },
    );
    wait_for_frame(&mut ai_rx, |f| {
        matches!(f, ServerMessage::ErrorMessage { message } if message.contains("cannot vote"))
    })
    .await;

    // The only eligible voter votes for the AI: voting closes early and the
    // players win
    handle.client(
        human_conn,
        ClientMessage::Vote {
            voter_id: human_id.into(),
            voted_for_id: ai_id.into(),
        },
    );
    wait_for_frame(&mut human_rx, |f| {
        matches!(f, ServerMessage::VoteConfirmed { voted_for_id } if voted_for_id == ai_id)
    })
    .await;

    let finished = wait_for_snapshot(&mut human_rx, |s| s.round_result.is_some()).await;
    let result = finished.round_result.expect("round result");
    assert_eq!(result.ai_player_id, ai_id);
    assert_eq!(result.most_voted_player_id.as_deref(), Some(ai_id));
    assert_eq!(result.vote_counts.get(ai_id), Some(&1));
    assert!(result.correct);

    // The session cycles back to the lobby with the result retained
    wait_for_snapshot(&mut human_rx, |s| {
        s.phase == Phase::Lobby && s.round_result.is_some()
    })
    .await;
}

struct CannedProvider;

#[async_trait]
impl TextGenerator for CannedProvider {
    async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
        Ok(GenerateResponse {
            text: "so, how is everyone doing tonight".to_string(),
            metadata: ResponseMetadata {
                provider: "canned".into(),
                model: "canned".into(),
                latency_ms: 1,
            },
        })
    }

    fn name(&self) -> &str {
        "canned"
    }
}

/// The scheduled opening AI turn goes through the generator and lands in the
/// chat as the AI-controlled player.
#[tokio::test]
async fn test_ai_turn_uses_the_text_generator() {
    let config = SessionConfig {
        first_turn_delay: (Duration::ZERO, Duration::ZERO),
        active_duration: Duration::from_secs(10),
        ..fast_config()
    };
    let generator = LlmManager::new(vec![Box::new(CannedProvider)]);
    let handle = session::spawn(config, Some(generator));

    let (conn_a, mut rx_a) = attach(&handle);
    let (conn_b, _rx_b) = attach(&handle);
    join(&handle, conn_a, "p1", "Alice");
    join(&handle, conn_b, "p2", "Bob");

    let active = wait_for_snapshot(&mut rx_a, |s| s.phase == Phase::Active).await;
    assert_eq!(active.round, 1);

    let frame = wait_for_frame(&mut rx_a, |f| {
        matches!(f, ServerMessage::NewMessage { message }
            if message.text == "so, how is everyone doing tonight")
    })
    .await;
    match frame {
        ServerMessage::NewMessage { message } => {
            assert!(
                message.sender_id == "p1" || message.sender_id == "p2",
                "AI turn is attributed to a roster player"
            );
        }
        _ => unreachable!(),
    }
}

/// Housekeeping commands: ping answers pong, getState returns a snapshot and
/// reset wipes the session.
#[tokio::test]
async fn test_ping_get_state_and_reset() {
    let handle = session::spawn(fast_config(), None);
    let (conn, mut rx) = attach(&handle);
    join(&handle, conn, "p1", "Alice");

    handle.client(conn, ClientMessage::Ping);
    wait_for_frame(&mut rx, |f| matches!(f, ServerMessage::Pong { .. })).await;

    handle.client(conn, ClientMessage::GetState);
    let snapshot = wait_for_snapshot(&mut rx, |s| !s.players.is_empty()).await;
    assert_eq!(snapshot.players[0].id, "p1");

    handle.client(conn, ClientMessage::Reset);
    let snapshot = wait_for_snapshot(&mut rx, |s| s.players.is_empty()).await;
    assert_eq!(snapshot.phase, Phase::Lobby);
    assert!(snapshot.messages.is_empty());
}

/// A prompt submitted by a client is confirmed back and deduplicated into the
/// persona library (observable via the confirmation frames).
#[tokio::test]
async fn test_prompt_submission_confirms() {
    let handle = session::spawn(fast_config(), None);
    let (conn, mut rx) = attach(&handle);

    handle.client(
        conn,
        ClientMessage::SubmitPrompt {
            prompt: "a sleepy barista".into(),
        },
    );
    wait_for_frame(&mut rx, |f| {
        matches!(f, ServerMessage::PromptConfirmed { prompt } if prompt == "a sleepy barista")
    })
    .await;
}
