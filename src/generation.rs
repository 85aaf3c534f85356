//! Structured-output calls to a hosted text-generation service.
//!
//! The service returns untyped text; everything it says is parsed against a
//! JSON schema and rejected if it does not fit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{DecisionError, Result};
use crate::retry::RetryPolicy;

/// Named JSON schema the response must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl StructuredSchema {
    /// Object schema with a single required string field.
    pub fn single_string(name: &'static str, field: &str, description: &str) -> Self {
        Self {
            name,
            schema: json!({
                "type": "object",
                "properties": {
                    field: { "type": "string", "description": description }
                },
                "required": [field],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// A JSON value the service claims conforms to `schema`, or `Parse` if it is not JSON.
    async fn generate_structured(&self, prompt: &str, schema: &StructuredSchema) -> Result<Value>;
}

/// OpenAI-compatible chat completions with `json_schema` response format
pub struct OpenAIGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAIGenerator {
    pub fn new(base_url: String, api_key: String, model: String, temperature: f32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DecisionError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            temperature,
        })
    }

    fn request_body(&self, prompt: &str, schema: &StructuredSchema) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {
                    "role": "system",
                    "content": "Reply only with JSON that matches the provided schema. No commentary."
                },
                { "role": "user", "content": prompt }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema
                }
            }
        })
    }
}

/// Pull the message content out of a completion and parse it as JSON.
fn parse_completion(body: &Value) -> Result<Value> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| DecisionError::Parse {
            message: "completion has no choices".to_string(),
        })?;
    if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
        return Err(DecisionError::Parse {
            message: format!("model refused: {}", refusal),
        });
    }
    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| DecisionError::Parse {
            message: "completion message has no text content".to_string(),
        })?;
    serde_json::from_str(content.trim()).map_err(|e| DecisionError::Parse {
        message: format!("content is not valid JSON: {}", e),
    })
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate_structured(&self, prompt: &str, schema: &StructuredSchema) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(
            "Structured generation (model={}, schema={}, prompt_chars={})",
            self.model,
            schema.name,
            prompt.len()
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, schema))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(DecisionError::Generation {
                message: format!("generation API error {}: {}", status, body_text),
            });
        }

        let body: Value = resp.json().await?;
        parse_completion(&body)
    }
}

/// Generation calls under a backoff policy, decoded into typed responses.
#[derive(Clone)]
pub struct GenerationClient {
    generator: Arc<dyn Generator>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(generator: Arc<dyn Generator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub async fn generate<T: DeserializeOwned>(
        &self,
        operation: &str,
        prompt: &str,
        schema: &StructuredSchema,
        cancel: &CancellationToken,
    ) -> Result<T> {
        // transport failures are retried; unusable content comes back as `Parse` at once
        let value = self
            .policy
            .run(operation, cancel, || {
                self.generator.generate_structured(prompt, schema)
            })
            .await?;
        serde_json::from_value(value).map_err(|e| DecisionError::Parse {
            message: format!("{} output does not match schema {}: {}", operation, schema.name, e),
        })
    }
}

/// True when the failure came from the service's output rather than the transport.
pub fn is_output_failure(err: &DecisionError) -> bool {
    match err {
        DecisionError::Parse { .. } => true,
        DecisionError::ExhaustedRetries(e) => is_output_failure(&e.last_error),
        _ => false,
    }
}

pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let system = &config.system;
    match system.generation_provider.as_str() {
        "openai" => {
            let key = config
                .runtime
                .openai_api_key
                .clone()
                .ok_or_else(|| DecisionError::Config {
                    message: "generation provider 'openai' requires OPENAI_API_KEY".to_string(),
                })?;
            info!("Using OpenAI-compatible generation (model={})", system.generation_model);
            Ok(Arc::new(OpenAIGenerator::new(
                system.generation_base_url.clone(),
                key,
                system.generation_model.clone(),
                system.generation_temperature,
            )?))
        }
        other => Err(DecisionError::Config {
            message: format!("Unknown generation provider '{}'", other),
        }),
    }
}
