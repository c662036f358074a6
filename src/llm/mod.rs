mod ollama;
mod openai;

use crate::types::{ChatMessage, PlayerId};
use async_trait::async_trait;
use std::time::Duration;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Result type for text-generation operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during text generation
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("response parsing failed: {0}")]
    ParseError(String),
}

/// Request to generate one chat turn for the AI-controlled player
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Persona description the AI is playing
    pub persona: String,
    /// Display name of the AI-controlled player
    pub player_name: String,
    /// Roster id of the AI-controlled player (to tell its own past messages
    /// apart from the humans' in the history)
    pub player_id: PlayerId,
    /// Recent chat history, oldest first
    pub history: Vec<ChatMessage>,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: u32,
    /// Timeout for the request
    pub timeout: Duration,
}

/// Response from a text-generation provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Metadata about the generated response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
}

/// Trait that all text-generation providers implement
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate the AI player's next chat message
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Name of this provider
    fn name(&self) -> &str;
}

/// Manager holding providers in priority order
pub struct LlmManager {
    pub providers: Vec<Box<dyn TextGenerator>>,
}

impl LlmManager {
    pub fn new(providers: Vec<Box<dyn TextGenerator>>) -> Self {
        Self { providers }
    }

    /// Try each provider in order and return the first successful reply,
    /// cleaned of speaker prefixes. Errs only when every provider failed.
    pub async fn generate_chat(&self, request: GenerateRequest) -> LlmResult<String> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(response) => {
                    tracing::debug!(
                        provider = provider.name(),
                        model = %response.metadata.model,
                        latency_ms = response.metadata.latency_ms,
                        "generated AI chat turn"
                    );
                    return Ok(clean_reply(&response.text));
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "provider failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| LlmError::ConfigError("no providers configured".into())))
    }
}

/// System prompt shared by all providers
pub(crate) fn persona_system_prompt(player_name: &str, persona: &str) -> String {
    format!(
        "You are playing a game called 'Find the AI' where humans try to identify which player \
         is an AI. You are playing as {player_name}, an AI pretending to be a human based on \
         this prompt: \"{persona}\". Your entire response must be the message text only, with no \
         name or letter followed by a colon in front of it. Write a single short message (one or \
         two sentences) that sounds natural for the described character. Use casual language and \
         imperfect capitalization unless the persona calls for formality, never reveal that you \
         are an AI, and don't introduce yourself if the conversation is already ongoing."
    )
}

/// One transcript line per history message, attributed so the model can tell
/// its own past turns from the humans'
pub(crate) fn transcript_line(message: &ChatMessage, ai_player_id: &str) -> String {
    if message.sender_id == ai_player_id {
        format!("You said: {}", message.text)
    } else {
        format!("A player named {} said: {}", message.sender_name, message.text)
    }
}

pub(crate) const NEXT_TURN_NUDGE: &str =
    "What would you say next in this conversation as this character? Respond with only your message text.";

/// Strip a leading "name:" speaker prefix the model sometimes adds despite
/// instructions (equivalent of the `^\w+:\s*` cleanup in the game prompt)
pub(crate) fn clean_reply(text: &str) -> String {
    let trimmed = text.trim();
    if let Some((prefix, rest)) = trimmed.split_once(':') {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return rest.trim_start().to_string();
        }
    }
    trimmed.to_string()
}

/// Canned lines used whenever generation fails or no provider is configured.
/// Failures are never surfaced to players; the round just proceeds.
const FALLBACK_MESSAGES: &[&str] = &[
    "What do you all think about this game so far?",
    "Anyone else having trouble figuring out who's who?",
    "I've played similar games before but this one is pretty unique.",
    "I think we should share something about ourselves. I'll go first: I love hiking on weekends.",
    "Has anyone else played this game before? It's my first time.",
    "I wonder who the AI might be in this round.",
    "The timer goes by so quickly!",
    "What strategies are you all using to identify the AI?",
    "I'm not very good at these kinds of games, but I'm enjoying it!",
    "Anyone have any good weekend plans? I'm thinking of checking out that new movie.",
];

pub fn fallback_message() -> &'static str {
    use rand::Rng;
    let mut rng = rand::rng();
    FALLBACK_MESSAGES[rng.random_range(0..FALLBACK_MESSAGES.len())]
}

/// Configuration for text-generation providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub ollama_base_url: Option<String>,
    pub ollama_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: None,
            ollama_model: "llama3.2".to_string(),
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let non_empty = |value: String| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };

        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().and_then(non_empty),
            openai_model: std::env::var("OPENAI_MODEL")
                .ok()
                .and_then(non_empty)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            ollama_base_url: std::env::var("OLLAMA_BASE_URL").ok().and_then(non_empty),
            ollama_model: std::env::var("OLLAMA_MODEL")
                .ok()
                .and_then(non_empty)
                .unwrap_or_else(|| "llama3.2".to_string()),
        }
    }

    /// Build an LlmManager with all configured providers, OpenAI first
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn TextGenerator>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )));
        }

        if providers.is_empty() {
            return Err(LlmError::ConfigError(
                "no providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
            ));
        }

        Ok(LlmManager::new(providers))
    }
}
