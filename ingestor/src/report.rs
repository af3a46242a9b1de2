use crate::errors::{Error, Result};
use crate::model::{Reading, Report, ThresholdConfig};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SYSTEM_PROMPT: &str =
    "You are an IoT assistant that analyzes temperature and humidity data.";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_text(&self, prompt: &str) -> Result<String>;
}

pub struct ReportGenerator {
    backend: Arc<dyn TextGenerator>,
    timeout: Duration,
    marker: Option<String>,
}

impl ReportGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            marker: None,
        }
    }

    /// Only the text after `marker` is kept; a response without it is rejected.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub async fn generate(
        &self,
        reading: &Reading,
        config: &ThresholdConfig,
        history: &[Reading],
    ) -> Result<Report> {
        check_inputs(reading, config)?;
        let prompt = build_prompt(reading, config, history);
        debug!(
            device_id = %reading.device_id,
            backend = self.backend.name(),
            "Requesting report ({} chars of prompt)",
            prompt.len()
        );

        let raw = tokio::time::timeout(self.timeout, self.backend.generate_text(&prompt))
            .await
            .map_err(|_| {
                Error::Upstream(format!(
                    "{} did not answer within {:?}",
                    self.backend.name(),
                    self.timeout
                ))
            })??;

        let body = normalize(&raw, self.marker.as_deref())?;
        info!(device_id = %reading.device_id, "Generated report: {}", body);

        Ok(Report {
            id: Uuid::new_v4(),
            device_id: reading.device_id.clone(),
            generated_at: Utc::now(),
            body,
            source_reading: reading.clone(),
        })
    }
}

fn check_inputs(reading: &Reading, config: &ThresholdConfig) -> Result<()> {
    if reading.device_id.trim().is_empty() {
        return Err(Error::Validation("reading has no device_id".to_string()));
    }
    if reading.status.trim().is_empty() {
        return Err(Error::Validation("reading has no status".to_string()));
    }
    if !reading.temperature.is_finite() || !reading.humidity.is_finite() {
        return Err(Error::Validation("reading values must be finite".to_string()));
    }
    if !config.temp_min.is_finite() || !config.temp_max.is_finite() {
        return Err(Error::Validation("thresholds must be finite".to_string()));
    }
    if config.device_id != reading.device_id {
        return Err(Error::Validation(format!(
            "thresholds for '{}' do not belong to device '{}'",
            config.device_id, reading.device_id
        )));
    }
    Ok(())
}

pub fn build_prompt(reading: &Reading, config: &ThresholdConfig, history: &[Reading]) -> String {
    let mut prompt = String::with_capacity(768);
    let _ = writeln!(prompt, "System Reading:");
    let _ = writeln!(prompt, "- Device: {}", reading.device_id);
    let _ = writeln!(prompt, "- Temperature: {}°C", reading.temperature);
    let _ = writeln!(prompt, "- Humidity: {}%", reading.humidity);
    let _ = writeln!(prompt, "- Status: {}", reading.status);
    let _ = writeln!(prompt, "- Time: {}", reading.timestamp.format(TIMESTAMP_FORMAT));
    prompt.push('\n');
    let _ = writeln!(prompt, "User Settings:");
    let _ = writeln!(prompt, "- Minimum temperature: {}°C", config.temp_min);
    let _ = writeln!(prompt, "- Maximum temperature: {}°C", config.temp_max);

    if !history.is_empty() {
        prompt.push('\n');
        let _ = writeln!(prompt, "Recent Readings (oldest first):");
        for r in history {
            let _ = writeln!(
                prompt,
                "- {}: {}°C, {}%, {}",
                r.timestamp.format(TIMESTAMP_FORMAT),
                r.temperature,
                r.humidity,
                r.status
            );
        }
    }

    prompt.push('\n');
    prompt.push_str(
        "Please generate a short English report that:\n\
         1. Analyzes whether the current values are within the user-defined thresholds.\n\
         2. Evaluates whether the system behavior is appropriate.\n\
         3. Checks if the thresholds are reasonable and provides suggestions.\n\
         Do not repeat the input. Write a concise and helpful professional summary.",
    );
    prompt
}

fn normalize(raw: &str, marker: Option<&str>) -> Result<String> {
    let text = match marker {
        Some(marker) => match raw.split_once(marker) {
            Some((_, after)) => after,
            None => {
                return Err(Error::Validation(format!(
                    "response is missing the '{}' marker",
                    marker
                )))
            }
        },
        None => raw,
    };

    let body = text.trim();
    if body.is_empty() {
        return Err(Error::Validation("response is empty".to_string()));
    }
    Ok(body.to_string())
}

/// OpenAI-compatible `/chat/completions` backend.
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
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
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatCompletionsBackend {
    pub fn new(url: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsBackend {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
            max_tokens: 300,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("text generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "text generation service answered {}",
                status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("unparseable text generation payload: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Upstream("text generation payload has no content".to_string()))
    }
}

/// Offline fallback that fills a fixed summary from the prompt's facts.
pub struct TemplateBackend;

#[async_trait]
impl TextGenerator for TemplateBackend {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let fact = |label: &str| {
            prompt
                .lines()
                .find_map(|line| line.trim().strip_prefix(label))
                .map(str::trim)
                .unwrap_or("?")
                .to_string()
        };

        Ok(format!(
            "Room: {}\nTemp: {}\nHumidity: {}\nStatus: {}\nAI Suggestions:\n- Check thresholds ({} to {})\n- System running properly.",
            fact("- Device:"),
            fact("- Temperature:"),
            fact("- Humidity:"),
            fact("- Status:"),
            fact("- Minimum temperature:"),
            fact("- Maximum temperature:"),
        ))
    }
}
