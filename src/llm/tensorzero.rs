use super::TextGenerator;
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_FUNCTION: &str = "listing_copy";

/// Inference gateway settings. An empty `gateway_url` disables generation and
/// every call fails with [`LlmError::MissingGateway`].
#[derive(Debug, Clone, Default)]
pub struct GatewaySettings {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: Option<String>,
    pub model: Option<String>,
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            gateway_url: var("TENSORZERO_GATEWAY_URL").unwrap_or_default(),
            api_key: var("TENSORZERO_API_KEY"),
            function_name: var("TENSORZERO_FUNCTION"),
            model: var("TENSORZERO_MODEL"),
        }
    }

    fn inference_url(&self) -> Option<String> {
        let base = self.gateway_url.trim().trim_end_matches('/');
        (!base.is_empty()).then(|| format!("{base}/inference"))
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub struct LlmClient {
    http: Client,
    settings: GatewaySettings,
}

impl LlmClient {
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            http: build_client(),
            settings,
        }
    }

    pub fn from_env() -> Self {
        Self::new(GatewaySettings::from_env())
    }

    fn request_for<'a>(&'a self, prompt: &'a str, max_tokens: u32, temperature: f32) -> Inference<'a> {
        Inference {
            function_name: self.settings.function_name.as_deref().unwrap_or(DEFAULT_FUNCTION),
            model_name: self.settings.model.as_deref(),
            input: Input {
                messages: [Turn {
                    role: "user",
                    content: prompt,
                }],
            },
            params: Params {
                chat_completion: Sampling {
                    max_tokens,
                    temperature,
                },
            },
        }
    }

    async fn infer(&self, body: &Inference<'_>) -> Result<String, LlmError> {
        let url = self.settings.inference_url().ok_or(LlmError::MissingGateway)?;
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.settings.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Http(format!("HTTP {status}")));
        }

        let reply: Reply = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        reply.into_text()
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let body = self.request_for(prompt, max_tokens, temperature);
        let text = self.infer(&body).await?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".into()));
        }
        Ok(trimmed.to_string())
    }
}

#[derive(Serialize)]
struct Inference<'a> {
    function_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<&'a str>,
    input: Input<'a>,
    params: Params,
}

#[derive(Serialize)]
struct Input<'a> {
    messages: [Turn<'a>; 1],
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Params {
    chat_completion: Sampling,
}

#[derive(Serialize)]
struct Sampling {
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl Reply {
    /// Logs token usage, then yields the first text block.
    fn into_text(self) -> Result<String, LlmError> {
        if let Some(usage) = &self.usage {
            debug!(
                target = "woopl.transform",
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "llm_usage"
            );
        }
        self.first_text()
    }

    fn first_text(self) -> Result<String, LlmError> {
        self.content
            .into_iter()
            .find_map(|block| (block.kind == "text").then_some(block.text))
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))
    }
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
