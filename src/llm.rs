//! Language-model collaborators: query rewriting and summarization.
//!
//! Both are thin capability traits over an OpenAI-compatible chat
//! completions API (DeepSeek by default). The two system prompts are the
//! only prompting this crate does; everything else treats the model as
//! `text -> text`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

const QUERY_PROMPT: &str = "You are a search query generator for Telegram chats that may contain \
OCR-extracted text. Generate concise search queries (1-3 words) based on user questions. \
IMPORTANT: Consider that text may have OCR errors where similar characters get confused. \
For Ukrainian text, consider these common OCR mistakes: з/ц, и/і, а/о, н/п, е/є, р/p, у/y. \
If the user mentions 'резензія', also consider 'рецензія' (review). \
Focus on the core meaning and use the most likely correct spelling. \
Extract the main subject or keyword from the question. \
Respond with a JSON object: {\"query\": \"<search query>\"}.";

const SUMMARY_PROMPT: &str = "You are a message summarizer for Telegram chats. \
Answer the user's question based on the provided messages. \
IMPORTANT: Always respond in the same language as the user's question. \
If the question is in Ukrainian, respond in Ukrainian. \
If the question is in English, respond in English. \
Be concise and directly answer what was asked.";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("llm returned an empty response")]
    EmptyResponse,
}

/// Turns a natural-language question into a short keyword phrase.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn generate_query(&self, question: &str) -> Result<String, LlmError>;
}

/// Produces an answer/summary from a prompt, matching its language.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct QueryJson {
    query: String,
}

pub struct DeepSeekClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl DeepSeekClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response: ChatResponse = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Extract the query phrase from a rewriter response. Models usually obey
/// the JSON instruction; when they don't, the trimmed raw content (minus
/// code fences and quotes) is used as-is.
fn parse_query_response(content: &str) -> String {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(parsed) = serde_json::from_str::<QueryJson>(trimmed) {
        return parsed.query.trim().to_string();
    }

    trimmed.trim_matches('"').trim().to_string()
}

#[async_trait]
impl QueryRewriter for DeepSeekClient {
    async fn generate_query(&self, question: &str) -> Result<String, LlmError> {
        let content = self.chat(QUERY_PROMPT, question).await?;
        let query = parse_query_response(&content);
        if query.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(query)
    }
}

#[async_trait]
impl Summarizer for DeepSeekClient {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        self.chat(SUMMARY_PROMPT, prompt).await
    }
}
