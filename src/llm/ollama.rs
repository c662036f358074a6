use super::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Ollama provider implementation
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the given base URL and model
    pub fn new(base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
            client,
        }
    }

    /// Ollama's generate endpoint takes one flat prompt, so the system prompt,
    /// transcript and nudge are concatenated
    fn build_prompt(&self, request: &GenerateRequest) -> String {
        let mut prompt = persona_system_prompt(&request.player_name, &request.persona);
        if !request.history.is_empty() {
            prompt.push_str("\n\nThe conversation so far:\n");
            for message in &request.history {
                prompt.push_str(&transcript_line(message, &request.player_id));
                prompt.push('\n');
            }
        }
        prompt.push('\n');
        prompt.push_str(NEXT_TURN_NUDGE);
        prompt
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl TextGenerator for OllamaProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let start = Instant::now();

        let ollama_request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: self.build_prompt(&request),
            stream: false,
            options: Some(OllamaOptions {
                num_predict: request.max_tokens,
            }),
        };

        let url = format!("{}/api/generate", self.base_url);

        // Execute with timeout
        let response = tokio::time::timeout(
            request.timeout,
            self.client.post(&url).json(&ollama_request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout(request.timeout))?
        .map_err(|e| LlmError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError(format!(
                "Ollama API returned status: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(GenerateResponse {
            text: ollama_response.response.trim().to_string(),
            metadata: ResponseMetadata {
                provider: "ollama".to_string(),
                model: self.model.clone(),
                latency_ms,
            },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
