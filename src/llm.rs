//! Language model clients
//!
//! `openai` calls the Chat Completions API with the retrieved passages as
//! context. `local` does not run inference: it checks the model file and
//! answers with the retrieved passages directly.

use crate::config::{ModelType, Settings};
use crate::error::{Result, TalkError};
use crate::index::SearchResult;
use crate::searcher::format_context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Rough characters-per-token ratio used to size the context
const CHARS_PER_TOKEN: usize = 4;

/// Tokens held back from the context for the question and the answer
const RESERVED_TOKENS: usize = 1024;

const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about a codebase. \
Use the provided source excerpts to answer. If the excerpts do not contain the answer, say so \
instead of guessing. Refer to files by path when it helps.";

/// Produces an answer from a question and retrieved passages
pub trait ChatModel: Send {
    /// Model identifier for logs
    fn name(&self) -> &str;

    fn answer(&self, question: &str, context: &[SearchResult]) -> Result<String>;
}

/// Build the model selected by the configuration
pub fn chat_model(settings: &Settings) -> Result<Box<dyn ChatModel>> {
    match settings.model_type {
        ModelType::OpenAi => Ok(Box::new(OpenAiChat::new(settings)?)),
        ModelType::Local => Ok(Box::new(ExcerptAnswerer::new(settings)?)),
    }
}

/// Context budget in characters for a model with `max_tokens` of context
pub fn context_budget(max_tokens: usize) -> usize {
    max_tokens.saturating_sub(RESERVED_TOKENS).max(256) * CHARS_PER_TOKEN
}

/// User message combining retrieved passages and the question
pub fn build_prompt(question: &str, context: &[SearchResult], max_tokens: usize) -> String {
    let excerpts = format_context(context, context_budget(max_tokens));
    if excerpts.is_empty() {
        format!("No source excerpts matched.\n\nQuestion: {}", question)
    } else {
        format!("Source excerpts:\n\n{}Question: {}", excerpts, question)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI Chat Completions client
pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    retry_base: Duration,
}

impl OpenAiChat {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| TalkError::Config("API key not configured".to_string()))?;
        let model = settings
            .model_name
            .clone()
            .ok_or_else(|| TalkError::Config("Model name not configured".to_string()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: OPENAI_CHAT_URL.to_string(),
            api_key,
            model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            retry_base: RETRY_BASE_DELAY,
        })
    }

    /// Point the client at an OpenAI-compatible server
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request(&self, question: &str, context: &[SearchResult]) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(question, context, self.max_tokens),
                },
            ],
        }
    }
}

impl ChatModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    /// 429 and 5xx responses and transport errors are retried with
    /// exponential backoff; other client errors fail immediately.
    fn answer(&self, question: &str, context: &[SearchResult]) -> Result<String> {
        let body = self.request(question, context);
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_base * (1 << (attempt - 1));
                debug!("Retrying chat completion in {:?}", delay);
                std::thread::sleep(delay);
            }

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response.json()?;
                        return parse_answer(parsed);
                    }

                    let body_text = response.text().unwrap_or_default();
                    let err = TalkError::Model(format!("OpenAI API error {}: {}", status, body_text));

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!("{}", err);
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    warn!("Chat completion request failed: {}", e);
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| TalkError::Model("Chat completion failed after retries".to_string())))
    }
}

fn parse_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .ok_or_else(|| TalkError::Model("Response contained no choices".to_string()))
}

/// Backs the `local` model type: answers with the retrieved passages
/// themselves, without running the model.
///
/// The configured model file must exist; it is checked when the session
/// builds its handle so a bad path fails early.
pub struct ExcerptAnswerer {
    label: String,
    max_tokens: usize,
}

impl ExcerptAnswerer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let model_path = settings
            .model_path
            .clone()
            .ok_or_else(|| TalkError::Config("Model path not configured".to_string()))?;

        // Relative paths are tried against the tool's checkout first.
        let resolved = match &settings.repo_path {
            Some(repo) if model_path.is_relative() && repo.join(&model_path).exists() => {
                repo.join(&model_path)
            }
            _ => model_path,
        };

        if !resolved.exists() {
            return Err(TalkError::InvalidPath(format!(
                "Local model not found at {:?}",
                resolved
            )));
        }

        let label = resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "local".to_string());

        Ok(Self {
            label,
            max_tokens: settings.max_tokens,
        })
    }
}

impl ChatModel for ExcerptAnswerer {
    fn name(&self) -> &str {
        &self.label
    }

    fn answer(&self, question: &str, context: &[SearchResult]) -> Result<String> {
        if context.is_empty() {
            return Ok(format!("No indexed source matched \"{}\".", question));
        }

        Ok(format!(
            "Most relevant source for \"{}\":\n\n{}",
            question,
            format_context(context, context_budget(self.max_tokens)).trim_end()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::config::{validate, Configuration};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;
    use tempfile::tempdir;

    fn hit(path: &str, text: &str) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: 1,
                text: text.to_string(),
                file_path: path.to_string(),
                start_line: 3,
                end_line: 3,
                file_hash: "h".to_string(),
                language: None,
            },
            score: 0.8,
        }
    }

    fn local_settings(model_path: &str) -> Settings {
        let mut config = Configuration::defaults();
        config.set("model_type", Some("local".to_string()));
        config.set("model_path", Some(model_path.to_string()));
        validate(&config).unwrap().settings().clone()
    }

    #[test]
    fn test_build_prompt_places_context_before_question() {
        let prompt = build_prompt("what does foo do", &[hit("src/foo.py", "def foo(): pass")], 16000);

        assert!(prompt.starts_with("Source excerpts:"));
        assert!(prompt.contains("src/foo.py:3"));
        assert!(prompt.ends_with("Question: what does foo do"));

        let empty = build_prompt("anything", &[], 16000);
        assert!(empty.starts_with("No source excerpts matched."));
    }

    #[test]
    fn test_context_budget_has_a_floor() {
        assert_eq!(context_budget(16000), (16000 - 1024) * 4);
        assert_eq!(context_budget(100), 256 * 4);
    }

    #[test]
    fn test_parse_answer() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "  foo returns 42 \n"}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_answer(response).unwrap(), "foo returns 42");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parse_answer(empty).is_err());
    }

    #[test]
    fn test_openai_request_shape() {
        let mut config = Configuration::defaults();
        config.set("api_key", Some("sk-test".to_string()));
        let settings = validate(&config).unwrap().settings().clone();

        let chat = OpenAiChat::new(&settings).unwrap();
        let json = serde_json::to_value(chat.request("why", &[])).unwrap();

        assert_eq!(json["model"], "gpt-3.5-turbo-16k-0613");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json["messages"][1]["content"]
            .as_str()
            .unwrap()
            .ends_with("Question: why"));
    }

    #[test]
    fn test_local_model_requires_existing_file() {
        assert!(ExcerptAnswerer::new(&local_settings("/definitely/not/here.bin")).is_err());

        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"weights").unwrap();

        let model = ExcerptAnswerer::new(&local_settings(path.to_str().unwrap())).unwrap();
        assert_eq!(model.name(), "model.bin");

        let answer = model.answer("foo", &[hit("src/foo.py", "def foo(): pass")]).unwrap();
        assert!(answer.contains("src/foo.py:3"));
        assert!(answer.contains("def foo(): pass"));

        let none = model.answer("foo", &[]).unwrap();
        assert!(none.contains("No indexed source matched"));
    }

    const ANSWER_BODY: &str =
        r#"{"choices": [{"message": {"role": "assistant", "content": "foo returns 42"}}]}"#;

    /// Answers one connection per scripted response, then stops listening.
    /// The join handle yields the number of requests served.
    fn scripted_server(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let mut served = 0;
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);

                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request_body = vec![0; content_length];
                reader.read_exact(&mut request_body).unwrap();

                let reason = match status {
                    200 => "OK",
                    400 => "Bad Request",
                    _ => "Internal Server Error",
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let mut stream = reader.into_inner();
                stream.write_all(response.as_bytes()).unwrap();
                served += 1;
            }
            served
        });

        (url, handle)
    }

    fn chat_against(endpoint: &str) -> OpenAiChat {
        let mut config = Configuration::defaults();
        config.set("api_key", Some("sk-test".to_string()));
        let settings = validate(&config).unwrap().settings().clone();

        let mut chat = OpenAiChat::new(&settings).unwrap().with_endpoint(endpoint);
        chat.client = reqwest::blocking::Client::builder()
            .no_proxy()
            .build()
            .unwrap();
        chat.retry_base = Duration::from_millis(1);
        chat
    }

    #[test]
    fn test_server_error_is_retried() {
        let (url, server) = scripted_server(vec![(500, r#"{"error": "busy"}"#), (200, ANSWER_BODY)]);

        let answer = chat_against(&url).answer("what does foo do", &[]).unwrap();
        assert_eq!(answer, "foo returns 42");
        assert_eq!(server.join().unwrap(), 2);
    }

    #[test]
    fn test_client_error_fails_without_retry() {
        let (url, server) = scripted_server(vec![(400, r#"{"error": "bad request"}"#)]);

        let err = chat_against(&url).answer("what does foo do", &[]).unwrap_err();
        match err {
            TalkError::Model(message) => assert!(message.contains("400")),
            other => panic!("expected a model error, got {:?}", other),
        }
        assert_eq!(server.join().unwrap(), 1);
    }

    #[test]
    fn test_empty_choices_is_a_model_error() {
        let (url, server) = scripted_server(vec![(200, r#"{"choices": []}"#)]);

        let err = chat_against(&url).answer("what does foo do", &[]).unwrap_err();
        assert!(matches!(err, TalkError::Model(_)));
        assert_eq!(server.join().unwrap(), 1);
    }
}
