//! The session coordinator: a single-writer actor that owns all game state.
//!
//! WebSocket read loops and the timer tick only enqueue [`Command`]s; one task
//! drains the queue and applies every mutation, so client events and
//! timer-driven phase transitions are totally ordered. Text generation is the
//! only suspend point and runs outside the actor; its result re-enters the
//! queue and is validated against the current round before being applied.

mod hub;
mod log;
mod roster;
mod tally;

pub use hub::{BroadcastHub, ConnId, OutboundSink};
pub use log::{AppendError, MessageLog};
pub use roster::Roster;
pub use tally::{VoteError, VoteTally};

use crate::config::SessionConfig;
use crate::llm::{self, GenerateRequest, LlmManager};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::*;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Persona used when the prompt library is empty
const DEFAULT_PERSONA: &str = "Be a normal, friendly person chatting with others.";

/// Token budget for one generated chat turn
const GENERATION_MAX_TOKENS: u32 = 100;

/// Commands entering the single-writer queue
#[derive(Debug)]
pub enum Command {
    /// A new connection came up; it immediately receives a full snapshot
    Attach { conn: ConnId, sink: OutboundSink },
    /// A connection closed or was evicted by its writer task
    Detach { conn: ConnId },
    /// An inbound client event
    Client { conn: ConnId, message: ClientMessage },
    /// A finished text generation re-entering the queue. Validated against
    /// the current round before being applied; stale results are dropped.
    AiSpeech {
        round: u64,
        player_id: PlayerId,
        text: String,
    },
}

/// Cloneable handle for enqueueing commands into the coordinator
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_conn: Arc<AtomicU64>,
}

impl SessionHandle {
    /// Register a connection and return its id. The connection receives a
    /// full `gameState` snapshot as its first frame.
    pub fn attach(&self, sink: OutboundSink) -> ConnId {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Attach { conn, sink });
        conn
    }

    pub fn detach(&self, conn: ConnId) {
        self.send(Command::Detach { conn });
    }

    pub fn client(&self, conn: ConnId, message: ClientMessage) {
        self.send(Command::Client { conn, message });
    }

    fn send(&self, command: Command) {
        // Err only if the coordinator task is gone, i.e. we are shutting down
        let _ = self.commands.send(command);
    }
}

/// Spawn the coordinator task and return a handle to it
pub fn spawn(config: SessionConfig, generator: Option<LlmManager>) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        commands: tx.clone(),
        next_conn: Arc::new(AtomicU64::new(1)),
    };
    let coordinator = Coordinator::new(config, generator.map(Arc::new), tx);
    tokio::spawn(run(coordinator, rx));
    handle
}

async fn run(mut coordinator: Coordinator, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut ticker = tokio::time::interval(coordinator.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => coordinator.handle(command),
                None => break,
            },
            _ = ticker.tick() => coordinator.on_tick(now_ms()),
        }
    }
    tracing::info!("session coordinator stopped");
}

struct Coordinator {
    config: SessionConfig,
    generator: Option<Arc<LlmManager>>,
    /// Self-handle so spawned generation tasks can post results back
    commands: mpsc::UnboundedSender<Command>,

    hub: BroadcastHub,
    roster: Roster,
    log: MessageLog,
    tally: VoteTally,

    phase: Phase,
    round: u64,
    ai_player: Option<Player>,
    round_result: Option<RoundResult>,
    next_phase_deadline: i64,
    /// Scheduled opening AI turn; once fired, later turns come from the
    /// per-tick random draw
    first_ai_turn_at: Option<i64>,
    generation_in_flight: bool,
    prompts: Vec<String>,
}

impl Coordinator {
    fn new(
        config: SessionConfig,
        generator: Option<Arc<LlmManager>>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let next_phase_deadline = now_ms() + config.lobby_countdown.as_millis() as i64;
        Self {
            config,
            generator,
            commands,
            hub: BroadcastHub::new(),
            roster: Roster::new(),
            log: MessageLog::new(),
            tally: VoteTally::new(),
            phase: Phase::Lobby,
            round: 0,
            ai_player: None,
            round_result: None,
            next_phase_deadline,
            first_ai_turn_at: None,
            generation_in_flight: false,
            prompts: Vec::new(),
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Attach { conn, sink } => {
                self.hub.register(conn, sink);
                tracing::info!(conn, total = self.hub.len(), "connection attached");
                let snapshot = self.snapshot_for(None);
                let evicted = self
                    .hub
                    .send_to(conn, &ServerMessage::GameState { data: snapshot });
                self.reap(evicted);
            }
            Command::Detach { conn } => {
                tracing::info!(conn, "connection detached");
                if let Some(player) = self.hub.unregister(conn) {
                    self.reap(vec![player]);
                }
            }
            Command::Client { conn, message } => self.on_client(conn, message, now_ms()),
            Command::AiSpeech {
                round,
                player_id,
                text,
            } => self.on_ai_speech(round, player_id, text, now_ms()),
        }
    }

    fn on_client(&mut self, conn: ConnId, message: ClientMessage, now: i64) {
        match message {
            ClientMessage::JoinGame { player } => self.on_join(conn, player),
            ClientMessage::PlayerLeft { player_id } => self.on_leave(&player_id, now),
            ClientMessage::ChatMessage { message } => self.on_chat(conn, message),
            ClientMessage::SubmitPrompt { prompt } => self.on_submit_prompt(conn, prompt),
            ClientMessage::CreateGame => self.on_create_game(conn, now),
            ClientMessage::Vote {
                voter_id,
                voted_for_id,
            } => self.on_vote(conn, voter_id, voted_for_id, now),
            ClientMessage::Ping => {
                let evicted = self
                    .hub
                    .send_to(conn, &ServerMessage::Pong { timestamp: now });
                self.reap(evicted);
            }
            ClientMessage::GetState => {
                let viewer = self.hub.viewer(conn).cloned();
                let snapshot = self.snapshot_for(viewer.as_deref());
                let evicted = self
                    .hub
                    .send_to(conn, &ServerMessage::GameState { data: snapshot });
                self.reap(evicted);
            }
            ClientMessage::Reset => self.on_reset(now),
        }
    }

    fn on_join(&mut self, conn: ConnId, player: Player) {
        let added = self.roster.join(player.clone());
        if added {
            tracing::info!(id = %player.id, name = %player.name, "player joined");
        } else {
            tracing::debug!(id = %player.id, "duplicate join re-confirmed");
        }
        self.hub.bind_player(conn, player.id.clone());
        let evicted = self
            .hub
            .send_to(conn, &ServerMessage::JoinConfirmed { player });
        self.reap(evicted);
        self.broadcast_players();
    }

    fn on_leave(&mut self, player_id: &str, now: i64) {
        match self.roster.leave(player_id) {
            Some(player) => {
                tracing::info!(id = %player.id, name = %player.name, "player left");
                if self.is_current_ai(&player.id) {
                    self.abort_round(
                        &format!(
                            "{} left the game. The round has been cancelled; a new game starts soon.",
                            player.name
                        ),
                        now,
                    );
                } else {
                    self.broadcast_players();
                }
            }
            None => tracing::debug!(%player_id, "leave for unknown player ignored"),
        }
    }

    fn on_chat(&mut self, conn: ConnId, message: ChatMessage) {
        let sender_id = message.sender_id.clone();
        let appended = match self.log.append(message) {
            Ok(appended) => appended.clone(),
            Err(AppendError::SenderRestricted) => {
                tracing::debug!(%sender_id, "chat from AI-controlled player rejected");
                self.error_to(
                    conn,
                    "You are the AI-controlled player for this game and cannot send messages.",
                );
                return;
            }
            Err(AppendError::EmptyText) => {
                self.error_to(conn, "Message text must not be empty.");
                return;
            }
        };

        let evicted = self.hub.publish(&ServerMessage::NewMessage { message: appended });
        self.reap(evicted);

        // Maybe have the AI react to what was just said
        if self.phase == Phase::Active
            && self.ai_player.is_some()
            && !self.generation_in_flight
            && rand::rng().random::<f64>() < self.config.chat_reply_probability
        {
            let delay = random_delay(self.config.thinking_delay);
            self.spawn_ai_turn(Some(delay));
        }
    }

    fn on_submit_prompt(&mut self, conn: ConnId, prompt: String) {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return;
        }
        if !self.prompts.contains(&prompt) {
            self.prompts.push(prompt.clone());
            tracing::info!(total = self.prompts.len(), "persona prompt added");
        }
        let evicted = self
            .hub
            .send_to(conn, &ServerMessage::PromptConfirmed { prompt });
        self.reap(evicted);
    }

    fn on_create_game(&mut self, conn: ConnId, now: i64) {
        if self.phase != Phase::Lobby {
            self.error_to(conn, "A game is already in progress.");
            return;
        }
        self.log.clear();
        self.tally.reset();
        self.round_result = None;
        self.next_phase_deadline = now + self.config.lobby_countdown.as_millis() as i64;
        tracing::info!("new game scheduled");
        self.broadcast_state();
    }

    fn on_vote(&mut self, conn: ConnId, voter_id: PlayerId, voted_for_id: PlayerId, now: i64) {
        if self.phase != Phase::Voting {
            self.error_to(conn, "Voting is not currently open.");
            return;
        }
        match self.tally.record(voter_id, voted_for_id.clone()) {
            Ok(()) => {
                let evicted = self
                    .hub
                    .send_to(conn, &ServerMessage::VoteConfirmed { voted_for_id });
                self.reap(evicted);

                let ai_id = self.ai_player.as_ref().map(|p| p.id.clone());
                let everyone_voted = self.tally.all_voted(
                    self.roster
                        .ids()
                        .filter(|id| Some(id.as_str()) != ai_id.as_deref()),
                );
                if everyone_voted {
                    tracing::info!("all eligible voters have voted; closing early");
                    self.finish_voting(now);
                }
            }
            Err(VoteError::VotingClosed) => self.error_to(conn, "Voting is not currently open."),
            Err(VoteError::VoterIsAi) => {
                self.error_to(conn, "As the AI-controlled player, you cannot vote.")
            }
        }
    }

    fn on_reset(&mut self, now: i64) {
        tracing::info!("session state reset");
        self.roster.clear();
        self.log.clear();
        self.log.set_restricted_sender(None);
        self.tally.reset();
        self.round_result = None;
        self.ai_player = None;
        self.phase = Phase::Lobby;
        self.first_ai_turn_at = None;
        self.generation_in_flight = false;
        self.next_phase_deadline = now + self.config.lobby_countdown.as_millis() as i64;
        self.broadcast_state();
    }

    /// Timer tick: the only driver of deadline-based transitions. Guards are
    /// re-evaluated here, so an overtaken deadline is simply a no-op.
    fn on_tick(&mut self, now: i64) {
        match self.phase {
            Phase::Lobby => {
                if now >= self.next_phase_deadline {
                    if self.roster.len() >= self.config.min_players {
                        self.start_round(now);
                    } else {
                        self.next_phase_deadline =
                            now + self.config.lobby_recheck.as_millis() as i64;
                        tracing::debug!(
                            players = self.roster.len(),
                            "not enough players; countdown pushed back"
                        );
                        self.broadcast_state();
                    }
                }
            }
            Phase::Active => {
                if now >= self.next_phase_deadline {
                    self.begin_voting(now);
                } else if self.ai_player.is_some() && !self.generation_in_flight {
                    match self.first_ai_turn_at {
                        Some(at) if now >= at => {
                            self.first_ai_turn_at = None;
                            self.spawn_ai_turn(None);
                        }
                        Some(_) => {}
                        None => {
                            if rand::rng().random::<f64>() < self.config.ai_turn_probability {
                                self.spawn_ai_turn(None);
                            }
                        }
                    }
                }
            }
            Phase::Voting => {
                if now >= self.next_phase_deadline {
                    self.finish_voting(now);
                }
            }
            // Results is transient; finish_voting falls straight back to Lobby
            Phase::Results => {}
        }
    }

    fn start_round(&mut self, now: i64) {
        let pick = {
            let mut rng = rand::rng();
            let index = rng.random_range(0..self.roster.len());
            self.roster.iter().nth(index).cloned()
        };
        let Some(ai) = pick else {
            tracing::error!("round start with empty roster");
            return;
        };

        self.round += 1;
        self.phase = Phase::Active;
        self.log.clear();
        self.log.set_restricted_sender(Some(ai.id.clone()));
        self.tally.reset();
        self.round_result = None;
        self.generation_in_flight = false;
        self.next_phase_deadline = now + self.config.active_duration.as_millis() as i64;
        self.first_ai_turn_at =
            Some(now + random_delay(self.config.first_turn_delay).as_millis() as i64);
        tracing::info!(round = self.round, ai = %ai.name, "round started");
        self.ai_player = Some(ai);

        self.broadcast_state();
        self.system_announce(
            format!(
                "Game #{} has started! One player is being controlled by AI. Chat and try to identify who it is.",
                self.round
            ),
            now,
        );
    }

    fn begin_voting(&mut self, now: i64) {
        let Some(ai) = self.ai_player.clone() else {
            tracing::error!("entering voting without an AI player assigned");
            self.abort_round("The round has been cancelled; a new game starts soon.", now);
            return;
        };
        self.phase = Phase::Voting;
        self.tally.open(ai.id);
        self.next_phase_deadline = now + self.config.voting_duration.as_millis() as i64;
        self.first_ai_turn_at = None;
        tracing::info!(round = self.round, "voting opened");

        self.broadcast_state();
        self.system_announce(
            "Time to vote! Select the player you think is being controlled by AI.".to_string(),
            now,
        );
    }

    fn finish_voting(&mut self, now: i64) {
        // A second trigger (deadline after early close, or vice versa) is a no-op
        if !self.tally.is_open() {
            return;
        }
        let result = self.tally.close(&self.roster);
        self.phase = Phase::Results;
        self.round_result = Some(result.clone());
        self.log.set_restricted_sender(None);
        tracing::info!(
            round = self.round,
            correct = result.correct,
            most_voted = ?result.most_voted_player_id,
            "voting closed"
        );
        self.broadcast_state();

        let most_voted = result
            .most_voted_player_name
            .clone()
            .unwrap_or_else(|| "no one".to_string());
        let outcome = if result.correct {
            "The players found the AI!"
        } else {
            "The AI fooled the players!"
        };
        self.system_announce(
            format!(
                "Voting has ended! The AI-controlled player was {}. Most votes: {}. {}",
                result.ai_player_name, most_voted, outcome
            ),
            now,
        );

        // Results is transient: fall straight back to the lobby, keeping the
        // result visible until the next round starts
        self.ai_player = None;
        self.phase = Phase::Lobby;
        self.next_phase_deadline = now + self.config.lobby_countdown.as_millis() as i64;
        self.broadcast_state();
    }

    /// Cancel the current round and return to the lobby. Used when the
    /// AI-controlled player disappears mid-round.
    fn abort_round(&mut self, reason: &str, now: i64) {
        if self.phase == Phase::Lobby {
            return;
        }
        tracing::warn!(round = self.round, reason, "round aborted");
        self.system_announce(reason.to_string(), now);
        self.ai_player = None;
        self.phase = Phase::Lobby;
        self.log.set_restricted_sender(None);
        self.tally.reset();
        self.first_ai_turn_at = None;
        self.generation_in_flight = false;
        self.next_phase_deadline = now + self.config.lobby_countdown.as_millis() as i64;
        self.broadcast_state();
    }

    /// Kick off a text generation task. The aggregate is not held during the
    /// wait: the task works on cloned inputs and posts the result back as a
    /// command, which is re-validated on receipt.
    fn spawn_ai_turn(&mut self, delay: Option<Duration>) {
        if self.generation_in_flight {
            return;
        }
        let Some(ai) = self.ai_player.clone() else {
            return;
        };
        self.generation_in_flight = true;

        let request = GenerateRequest {
            persona: self.pick_persona(),
            player_name: ai.name.clone(),
            player_id: ai.id.clone(),
            history: self.log.recent(self.config.recent_context).to_vec(),
            max_tokens: GENERATION_MAX_TOKENS,
            timeout: self.config.generation_timeout,
        };
        let round = self.round;
        let generator = self.generator.clone();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let text = match &generator {
                Some(manager) => match manager.generate_chat(request).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "text generation failed; using fallback");
                        llm::fallback_message().to_string()
                    }
                },
                None => llm::fallback_message().to_string(),
            };
            let _ = commands.send(Command::AiSpeech {
                round,
                player_id: ai.id,
                text,
            });
        });
    }

    fn on_ai_speech(&mut self, round: u64, player_id: PlayerId, text: String, now: i64) {
        self.generation_in_flight = false;

        // The world may have changed while generation was outstanding
        let still_valid = self.phase == Phase::Active
            && self.round == round
            && self.is_current_ai(&player_id);
        if !still_valid {
            tracing::debug!(round, "discarding stale AI speech");
            return;
        }
        let Some(ai) = self.roster.get(&player_id).cloned() else {
            tracing::error!(%player_id, "AI-controlled player missing from roster");
            self.abort_round("The round has been cancelled; a new game starts soon.", now);
            return;
        };

        let text = if text.trim().is_empty() {
            llm::fallback_message().to_string()
        } else {
            text
        };
        tracing::info!(ai = %ai.name, %text, "AI turn");
        let message = ChatMessage {
            id: new_id(),
            sender_id: ai.id,
            sender_name: ai.name,
            text,
            timestamp: now,
        };
        let message = self.log.push_unrestricted(message).clone();
        let evicted = self.hub.publish(&ServerMessage::NewMessage { message });
        self.reap(evicted);
    }

    fn pick_persona(&self) -> String {
        if self.prompts.is_empty() {
            return DEFAULT_PERSONA.to_string();
        }
        let mut rng = rand::rng();
        self.prompts[rng.random_range(0..self.prompts.len())].clone()
    }

    fn is_current_ai(&self, player_id: &str) -> bool {
        self.ai_player.as_ref().is_some_and(|p| p.id == player_id)
    }

    fn snapshot_for(&self, viewer: Option<&str>) -> SessionSnapshot {
        let ai = self.ai_player.as_ref().map(|p| p.id.as_str());
        SessionSnapshot {
            phase: self.phase,
            round: self.round,
            players: self.roster.view_for(viewer, ai),
            messages: self.log.all().to_vec(),
            voting_open: self.tally.is_open(),
            next_phase_deadline: self.next_phase_deadline,
            round_result: self.round_result.clone(),
        }
    }

    /// Send every connection a snapshot rendered for its own viewer
    fn broadcast_state(&mut self) {
        let mut evicted = Vec::new();
        for (conn, viewer) in self.hub.viewers() {
            let snapshot = self.snapshot_for(viewer.as_deref());
            evicted.extend(
                self.hub
                    .send_to(conn, &ServerMessage::GameState { data: snapshot }),
            );
        }
        self.reap(evicted);
    }

    fn broadcast_players(&mut self) {
        let ai = self.ai_player.as_ref().map(|p| p.id.clone());
        let mut evicted = Vec::new();
        for (conn, viewer) in self.hub.viewers() {
            let players = self.roster.view_for(viewer.as_deref(), ai.as_deref());
            evicted.extend(
                self.hub
                    .send_to(conn, &ServerMessage::PlayersUpdate { players }),
            );
        }
        self.reap(evicted);
    }

    fn system_announce(&mut self, text: String, now: i64) {
        let message = ChatMessage {
            id: new_id(),
            sender_id: SYSTEM_SENDER.to_string(),
            sender_name: "System".to_string(),
            text,
            timestamp: now,
        };
        let message = self.log.push_unrestricted(message).clone();
        let evicted = self.hub.publish(&ServerMessage::NewMessage { message });
        self.reap(evicted);
    }

    fn error_to(&mut self, conn: ConnId, message: &str) {
        let evicted = self.hub.send_to(
            conn,
            &ServerMessage::ErrorMessage {
                message: message.to_string(),
            },
        );
        self.reap(evicted);
    }

    /// Handle players whose connections were evicted during fan-out: they
    /// leave the roster exactly as if they had sent `playerLeft`.
    fn reap(&mut self, evicted: Vec<PlayerId>) {
        if evicted.is_empty() {
            return;
        }
        let mut removed = false;
        let mut lost_ai: Option<String> = None;
        for player_id in evicted {
            if let Some(player) = self.roster.leave(&player_id) {
                tracing::info!(id = %player.id, name = %player.name, "evicted player removed from roster");
                removed = true;
                if self.is_current_ai(&player.id) {
                    lost_ai = Some(player.name);
                }
            }
        }
        if let Some(name) = lost_ai {
            self.abort_round(
                &format!(
                    "{} left the game. The round has been cancelled; a new game starts soon.",
                    name
                ),
                now_ms(),
            );
        } else if removed {
            self.broadcast_players();
        }
    }
}

fn random_delay((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    let mut rng = rand::rng();
    min + Duration::from_millis(rng.random_range(0..=span))
}
