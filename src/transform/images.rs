use crate::http::build_client;
use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported image url `{0}`")]
    Unsupported(String),
    #[error("image unreachable: {0}")]
    Unreachable(String),
}

/// Produces the storefront-ready URL for one source image.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn optimize(&self, url: &str) -> Result<String, ImageError>;
}

/// Normalizes marketplace CDN URLs; with `verify` set, each image is checked
/// with a `HEAD` request and unreachable ones are dropped.
pub struct HttpImageProcessor {
    http: Client,
    verify: bool,
}

impl HttpImageProcessor {
    pub fn new(verify: bool) -> Self {
        Self {
            http: build_client(),
            verify,
        }
    }
}

#[async_trait]
impl ImageProcessor for HttpImageProcessor {
    async fn optimize(&self, url: &str) -> Result<String, ImageError> {
        let normalized =
            normalize_image_url(url).ok_or_else(|| ImageError::Unsupported(url.to_string()))?;
        if self.verify {
            let response = self
                .http
                .head(&normalized)
                .send()
                .await
                .map_err(|err| ImageError::Unreachable(err.to_string()))?;
            if !response.status().is_success() {
                return Err(ImageError::Unreachable(format!(
                    "HTTP {} for {normalized}",
                    response.status()
                )));
            }
        }
        Ok(normalized)
    }
}

const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

/// Upgrades to https and strips CDN resize suffixes
/// (`a.jpg_220x220.jpg` -> `a.jpg`).
pub fn normalize_image_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let candidate = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_string(),
    };
    let mut url = Url::parse(&candidate).ok()?;
    match url.scheme() {
        "https" => {}
        "http" => url.set_scheme("https").ok()?,
        _ => return None,
    }
    url.host_str()?;
    let path = url.path().to_string();
    let lowered = path.to_lowercase();
    let cut = IMAGE_EXTENSIONS.iter().find_map(|ext| {
        lowered
            .find(&format!("{ext}_"))
            .map(|pos| pos + ext.len())
    });
    if let Some(cut) = cut {
        url.set_path(&path[..cut]);
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_upgrades_and_strips_suffixes() {
        assert_eq!(
            normalize_image_url("//ae01.alicdn.com/kf/earbuds.jpg_220x220.jpg").as_deref(),
            Some("https://ae01.alicdn.com/kf/earbuds.jpg")
        );
        assert_eq!(
            normalize_image_url("http://cbu01.alicdn.com/img/a.PNG_.webp?x=1").as_deref(),
            Some("https://cbu01.alicdn.com/img/a.PNG")
        );
        assert_eq!(
            normalize_image_url("https://img.example.com/plain.jpg").as_deref(),
            Some("https://img.example.com/plain.jpg")
        );
        assert_eq!(normalize_image_url("ftp://img.example.com/a.jpg"), None);
        assert_eq!(normalize_image_url("not a url"), None);
    }

    #[tokio::test]
    async fn unverified_processor_only_normalizes() {
        let processor = HttpImageProcessor::new(false);
        assert_eq!(
            processor
                .optimize("//img.example.com/a.jpg_50x50.jpg")
                .await
                .expect("optimize"),
            "https://img.example.com/a.jpg"
        );
        assert!(matches!(
            processor.optimize("data:image/png;base64,AA").await,
            Err(ImageError::Unsupported(_))
        ));
    }
}
