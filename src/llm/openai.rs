use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Instant;

/// OpenAI provider implementation
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with the given API key and model
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self { client, model }
    }
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let start = Instant::now();

        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(persona_system_prompt(&request.player_name, &request.persona))
                .build()
                .map_err(|e| LlmError::ApiError(e.to_string()))?
                .into(),
        );

        // Recent chat history; the AI's own past turns go in as assistant
        // messages so the model keeps a consistent voice
        for message in &request.history {
            if message.sender_id == request.player_id {
                messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.text.clone())
                        .build()
                        .map_err(|e| LlmError::ApiError(e.to_string()))?
                        .into(),
                );
            } else {
                messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(transcript_line(message, &request.player_id))
                        .build()
                        .map_err(|e| LlmError::ApiError(e.to_string()))?
                        .into(),
                );
            }
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(NEXT_TURN_NUDGE)
                .build()
                .map_err(|e| LlmError::ApiError(e.to_string()))?
                .into(),
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        // Execute with timeout
        let response =
            tokio::time::timeout(request.timeout, self.client.chat().create(chat_request))
                .await
                .map_err(|_| LlmError::Timeout(request.timeout))?
                .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::ParseError("no content in response".to_string()))?;

        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(GenerateResponse {
            text: text.trim().to_string(),
            metadata: ResponseMetadata {
                provider: "openai".to_string(),
                model: self.model.clone(),
                latency_ms,
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with an actual API key
    async fn test_openai_generate() {
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let provider = OpenAiProvider::new(api_key, "gpt-4o-mini".to_string());

        let request = GenerateRequest {
            persona: "a college student who loves bad puns".to_string(),
            player_name: "Sam".to_string(),
            player_id: "p-sam".to_string(),
            history: vec![],
            max_tokens: 100,
            timeout: Duration::from_secs(30),
        };

        let response = provider.generate(request).await.unwrap();

        assert!(!response.text.is_empty());
        assert_eq!(response.metadata.provider, "openai");
        println!("Generated text: {}", response.text);
    }
}
