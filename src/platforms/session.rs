use super::{PlatformId, ScrapeError};
use crate::http::{build_scraper_client, retry_after};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// A page-loading session against one marketplace. Returns rendered HTML.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open(&self, url: &str) -> Result<String, ScrapeError>;
    async fn close(&self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn launch(&self, platform: PlatformId) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

/// Loads pages over HTTP, either directly or through a remote headless
/// browser exposing a `/content` style endpoint (`BROWSER_RENDER_URL`).
#[derive(Clone)]
pub struct HttpSessionFactory {
    client: Client,
    render_url: Option<String>,
}

impl HttpSessionFactory {
    pub fn from_env() -> Self {
        Self {
            client: build_scraper_client(),
            render_url: std::env::var("BROWSER_RENDER_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn launch(&self, platform: PlatformId) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let session = HttpSession {
            id: Uuid::new_v4(),
            platform,
            client: self.client.clone(),
            render_url: self.render_url.clone(),
            closed: AtomicBool::new(false),
        };
        info!(
            target = "woopl.scrape",
            platform = %platform,
            session = %session.id,
            rendered = session.render_url.is_some(),
            "session_opened"
        );
        Ok(Box::new(session))
    }
}

struct HttpSession {
    id: Uuid,
    platform: PlatformId,
    client: Client,
    render_url: Option<String>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn open(&self, url: &str) -> Result<String, ScrapeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScrapeError::Session(format!("session {} closed", self.id)));
        }
        debug!(target = "woopl.scrape", platform = %self.platform, url, "navigate");
        let request = match &self.render_url {
            Some(render) => self.client.post(render.as_str()).json(&json!({
                "url": url,
                "gotoOptions": { "waitUntil": "networkidle2" },
            })),
            None => self.client.get(url),
        };
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                ScrapeError::Transient(err.to_string())
            } else {
                ScrapeError::Navigation(err.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScrapeError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(ScrapeError::Transient(format!("HTTP {status} for {url}")));
        }
        if !status.is_success() {
            return Err(ScrapeError::Navigation(format!("HTTP {status} for {url}")));
        }
        response
            .text()
            .await
            .map_err(|err| ScrapeError::Transient(err.to_string()))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                target = "woopl.scrape",
                platform = %self.platform,
                session = %self.id,
                "session_closed"
            );
        }
    }
}
