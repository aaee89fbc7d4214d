//! Treatment advice from an OpenAI-compatible chat completion service
//!
//! The remedy is best effort: every failure collapses into a fixed fallback
//! message so a prediction is never lost because the text service is down.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_REMEDY_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_REMEDY_MODEL: &str = "llama-3.3-70b-versatile";

const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.9;
const MAX_TOKENS: u32 = 600;

const SYSTEM_PROMPT: &str = "You are an expert plant pathologist with extensive knowledge of plant \
diseases, their treatments, and prevention strategies. Provide clear, actionable advice.";

/// Produces treatment advice for a detected disease
#[async_trait]
pub trait RemedyGenerator: Send + Sync {
    async fn generate(&self, disease_name: &str) -> Result<String>;
}

/// Message returned whenever the remedy service cannot answer
pub fn fallback_remedy(disease_name: &str) -> String {
    format!(
        "Unable to generate remedy at this time. Please consult with a local agricultural \
         extension office for treatment advice for {}.",
        disease_name
    )
}

/// Ask `generator` for a remedy, falling back to the static text on any error
pub async fn remedy_or_fallback(generator: &dyn RemedyGenerator, disease_name: &str) -> String {
    match generator.generate(disease_name).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!("Remedy service returned empty content for '{}'", disease_name);
            fallback_remedy(disease_name)
        }
        Err(e) => {
            warn!("Remedy generation failed for '{}': {:#}", disease_name, e);
            fallback_remedy(disease_name)
        }
    }
}

pub fn user_prompt(disease_name: &str) -> String {
    format!(
        r#"You are an expert plant pathologist and agricultural advisor. A plant disease has been detected: "{disease_name}".

Please provide a comprehensive, practical treatment plan in the following format:

**Disease Overview:**
- Brief description of the disease and its impact

**Immediate Treatment:**
- Step-by-step treatment instructions
- Recommended fungicides, pesticides, or organic treatments
- Application methods and frequency

**Cultural Practices:**
- Pruning and sanitation recommendations
- Watering and fertilization adjustments
- Environmental modifications

**Prevention Strategies:**
- Long-term prevention measures
- Crop rotation suggestions
- Resistant varieties (if applicable)

**Important Notes:**
- Safety precautions when applying treatments
- Expected recovery timeline

Keep the response clear, actionable, and under 400 words. Focus on practical solutions that home gardeners and farmers can implement."#
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Client for Groq's OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone)]
pub struct GroqRemedyClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl GroqRemedyClient {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl RemedyGenerator for GroqRemedyClient {
    async fn generate(&self, disease_name: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no API key configured for the remedy service"))?;

        let prompt = user_prompt(disease_name);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            top_p: TOP_P,
        };

        debug!("Requesting remedy for '{}' from {}", disease_name, self.url);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("remedy request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("remedy service answered {}", status);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("remedy response was not valid JSON")?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("remedy response had no content"))
    }
}
