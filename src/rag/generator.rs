use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are an expert credit analyst assistant specializing in LSTA credit agreements, credit applications, and compliance certificates.

Answer questions about credit documents with precision and proper citations.

RULES:
1. Always cite the specific document name and section or page reference.
2. Format citations as [Document Name, Section X.X] or [Document Name, Page X].
3. Highlight financial terms (dollar amounts, percentages, ratios) and dates using **bold**.
4. State your confidence: \"I can confirm...\", \"It appears...\", \"I found partial information...\".
5. If the information is not in the provided context, say exactly: \"I cannot find that in the documents available.\"
6. When comparing covenants, use a table.
7. Keep a professional, formal tone.";

/// Produces an answer from a question and the retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &str) -> Result<String>;
}

/// Chat-completions answer generator for OpenAI-compatible endpoints.
pub struct OpenAiAnswerGenerator {
    client: Client<OpenAIConfig>,
    config: GenerationConfig,
}

impl OpenAiAnswerGenerator {
    pub fn new(config: GenerationConfig) -> Self {
        let mut openai = OpenAIConfig::new();
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base);
            if std::env::var("OPENAI_API_KEY").is_err() {
                openai = openai.with_api_key("unused");
            }
        }

        Self {
            client: Client::with_config(openai),
            config,
        }
    }
}

pub(crate) fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Context from documents:\n{}\n\nQuestion: {}\n\nProvide a detailed answer with proper citations, confidence level, and formatting:",
        context, question
    )
}

#[async_trait]
impl AnswerGenerator for OpenAiAnswerGenerator {
    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(|e| RagError::Generation(format!("Failed to build system message: {}", e)))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt(question, context))
                .build()
                .map_err(|e| RagError::Generation(format!("Failed to build user message: {}", e)))?
                .into(),
        ];

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(self.config.model.clone())
            .messages(messages)
            .temperature(self.config.temperature);
        if let Some(max_tokens) = self.config.max_tokens {
            request_builder.max_tokens(max_tokens);
        }
        let request = request_builder
            .build()
            .map_err(|e| RagError::Generation(format!("Failed to build chat request: {}", e)))?;

        debug!(model = %self.config.model, context_chars = context.len(), "Requesting answer");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| RagError::Generation(format!("Chat completion failed: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("Empty response from model".to_string()))
    }
}
