use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation service not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslateError>;
}

/// LibreTranslate-compatible `POST /translate` client.
pub struct LibreTranslateClient {
    http: Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl LibreTranslateClient {
    pub fn from_env() -> Self {
        Self {
            http: build_client(),
            base_url: std::env::var("TRANSLATE_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            api_key: std::env::var("TRANSLATE_API_KEY").ok(),
        }
    }
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[async_trait]
impl Translator for LibreTranslateClient {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslateError> {
        let Some(base) = &self.base_url else {
            return Err(TranslateError::NotConfigured);
        };
        let mut body = json!({
            "q": text,
            "source": from,
            "target": to,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = json!(key);
        }
        let response = self
            .http
            .post(format!("{base}/translate"))
            .json(&body)
            .send()
            .await
            .map_err(|err| TranslateError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(TranslateError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let payload: TranslateResponse = response
            .json()
            .await
            .map_err(|err| TranslateError::InvalidResponse(err.to_string()))?;
        let translated = payload.translated_text.trim();
        if translated.is_empty() {
            return Err(TranslateError::InvalidResponse("empty translation".into()));
        }
        Ok(translated.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_refuses() {
        let client = LibreTranslateClient {
            http: Client::new(),
            base_url: None,
            api_key: None,
        };
        let err = client
            .translate("蓝牙耳机", "zh", "en")
            .await
            .expect_err("not configured");
        assert!(matches!(err, TranslateError::NotConfigured));
    }
}
