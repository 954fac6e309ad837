mod tensorzero;

use async_trait::async_trait;

pub use tensorzero::{LlmClient, LlmError};

/// Free-text completion used for listing copy.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;
}
