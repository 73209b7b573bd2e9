use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::error::AssistantError;

/// Text-in, text-out generative model.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(
        &self,
        model_id: &str,
        system_instructions: &str,
        prompt: &str,
    ) -> Result<String, AssistantError>;
}

const TEMPERATURE: f32 = 0.2;
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);
const BLOCKED_HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini models served by Vertex AI's `generateContent` endpoint.
pub struct VertexAiClient {
    http: reqwest::Client,
    tokens: Arc<AccessTokenProvider>,
    endpoint: String,
    project_id: String,
    location: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl VertexAiClient {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        tokens: Arc<AccessTokenProvider>,
    ) -> Result<Self, AssistantError> {
        let location = location.into();
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http,
            tokens,
            endpoint: format!("https://{}-aiplatform.googleapis.com/v1", location),
            project_id: project_id.into(),
            location,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self, model_id: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            self.location,
            model_id
        )
    }
}

fn invocation_error(message: impl Into<String>) -> AssistantError {
    AssistantError::ModelInvocation {
        message: message.into(),
    }
}

#[async_trait]
impl GenerativeModel for VertexAiClient {
    async fn generate(
        &self,
        model_id: &str,
        system_instructions: &str,
        prompt: &str,
    ) -> Result<String, AssistantError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_instructions,
                }],
            },
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
            safety_settings: BLOCKED_HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: *category,
                    threshold: "BLOCK_LOW_AND_ABOVE",
                })
                .collect(),
        };

        debug!("Calling {} with a {} character prompt", model_id, prompt.len());

        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| invocation_error(e.to_string()))?;
        let response = self
            .http
            .post(self.url(model_id))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| invocation_error(format!("Failed to send request to {}: {}", model_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(invocation_error(format!(
                "{} returned {}: {}",
                model_id, status, body
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| invocation_error(format!("Failed to parse {} response: {}", model_id, e)))?;

        extract_text(body).map_err(invocation_error)
    }
}

fn extract_text(body: GenerateContentResponse) -> Result<String, String> {
    let candidate = match body.candidates.into_iter().next() {
        Some(candidate) => candidate,
        None => {
            let reason = body
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(format!("Prompt was not answered: {}", reason));
        }
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(format!(
            "Model returned no text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        ));
    }

    Ok(text)
}
