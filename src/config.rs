//! Environment-driven configuration for the server and the session timing knobs.

use std::time::Duration;

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8765 }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8765),
        }
    }
}

/// Timing and probability knobs for the session coordinator
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lobby countdown before a round may start
    pub lobby_countdown: Duration,
    /// How far the deadline is pushed when the roster is too small at fire time
    pub lobby_recheck: Duration,
    /// Chat window length once a round is running
    pub active_duration: Duration,
    /// How long voting stays open unless everyone votes earlier
    pub voting_duration: Duration,
    /// Timer loop granularity
    pub tick_interval: Duration,
    /// Minimum roster size to start a round
    pub min_players: usize,
    /// Per-tick chance of an unprompted AI turn during the chat window
    pub ai_turn_probability: f64,
    /// Chance the AI replies to a human chat message
    pub chat_reply_probability: f64,
    /// Delay range before the AI's opening message
    pub first_turn_delay: (Duration, Duration),
    /// Simulated typing delay range for chat-triggered replies
    pub thinking_delay: (Duration, Duration),
    /// How many recent messages are handed to the text generator
    pub recent_context: usize,
    /// Upper bound on one generation call
    pub generation_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lobby_countdown: Duration::from_secs(30),
            lobby_recheck: Duration::from_secs(20),
            active_duration: Duration::from_secs(60),
            voting_duration: Duration::from_secs(15),
            tick_interval: Duration::from_secs(1),
            min_players: 2,
            ai_turn_probability: 0.05,
            chat_reply_probability: 0.3,
            first_turn_delay: (Duration::from_secs(3), Duration::from_secs(8)),
            thinking_delay: (Duration::from_millis(1000), Duration::from_millis(2500)),
            recent_context: 10,
            generation_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lobby_countdown: env_secs("GAME_LOBBY_COUNTDOWN_SECS", defaults.lobby_countdown),
            lobby_recheck: env_secs("GAME_LOBBY_RECHECK_SECS", defaults.lobby_recheck),
            active_duration: env_secs("GAME_ACTIVE_SECS", defaults.active_duration),
            voting_duration: env_secs("GAME_VOTING_SECS", defaults.voting_duration),
            min_players: std::env::var("GAME_MIN_PLAYERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_players),
            ai_turn_probability: env_f64("GAME_AI_TURN_PROBABILITY", defaults.ai_turn_probability),
            chat_reply_probability: env_f64(
                "GAME_CHAT_REPLY_PROBABILITY",
                defaults.chat_reply_probability,
            ),
            generation_timeout: env_secs("GAME_GENERATION_TIMEOUT_SECS", defaults.generation_timeout),
            ..defaults
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(default)
}
