use super::config::{API_ROOT, CONSUMER_KEY, CONSUMER_SECRET, credentials_present};
use super::payload::{ListingPayload, VariationPayload};
use super::{CatalogApi, CatalogCategory, CatalogError, CatalogRecord};
use crate::http::{build_client, retry_after};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// WooCommerce REST v3 client authenticated with a consumer key/secret pair.
#[derive(Clone)]
pub struct WooCommerceClient {
    http: Client,
    root: String,
    authorization: String,
}

impl WooCommerceClient {
    /// `None` when any of `WOO_SITE_URL`, `WOO_CONSUMER_KEY` or
    /// `WOO_CONSUMER_SECRET` is missing.
    pub fn from_env() -> Option<Self> {
        if !credentials_present() {
            return None;
        }
        Some(Self::new(
            API_ROOT.as_str(),
            CONSUMER_KEY.as_str(),
            CONSUMER_SECRET.as_str(),
        ))
    }

    pub fn new(root: &str, key: &str, secret: &str) -> Self {
        Self {
            http: build_client(),
            root: root.trim_end_matches('/').to_string(),
            authorization: basic_auth_header(key, secret),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }
}

fn basic_auth_header(key: &str, secret: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{key}:{secret}")))
}

#[derive(Deserialize, Default)]
struct WooErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

async fn check(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(CatalogError::Auth(format!("HTTP {status}")))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(CatalogError::RateLimited {
            retry_after: retry_after(response.headers()),
        }),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {
            let body: WooErrorBody = response.json().await.unwrap_or_default();
            Err(classify_rejection(status, &body.code, &body.message))
        }
        _ => Err(CatalogError::Request(format!("HTTP {status}"))),
    }
}

fn classify_rejection(status: StatusCode, code: &str, message: &str) -> CatalogError {
    let detail = if message.is_empty() {
        format!("HTTP {status} {code}")
    } else {
        format!("{code}: {message}")
    };
    let code = code.to_lowercase();
    if status == StatusCode::CONFLICT
        || code.contains("duplicate")
        || code.contains("term_exists")
        || code.contains("invalid_sku")
    {
        CatalogError::Duplicate(detail)
    } else {
        CatalogError::Validation(detail)
    }
}

fn request_error(err: reqwest::Error) -> CatalogError {
    CatalogError::Request(err.to_string())
}

#[async_trait]
impl CatalogApi for WooCommerceClient {
    async fn create_listing(
        &self,
        payload: &ListingPayload,
    ) -> Result<CatalogRecord, CatalogError> {
        let response = self
            .http
            .post(self.url("products"))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(request_error)
    }

    async fn create_variation(
        &self,
        parent_id: u64,
        payload: &VariationPayload,
    ) -> Result<CatalogRecord, CatalogError> {
        let response = self
            .http
            .post(self.url(&format!("products/{parent_id}/variations")))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(request_error)
    }

    async fn list_categories(&self, search: &str) -> Result<Vec<CatalogCategory>, CatalogError> {
        let response = self
            .http
            .get(self.url("products/categories"))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .query(&[("search", search), ("per_page", "20")])
            .send()
            .await
            .map_err(request_error)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(request_error)
    }

    async fn create_category(&self, name: &str) -> Result<CatalogCategory, CatalogError> {
        let response = self
            .http
            .post(self.url("products/categories"))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(request_error)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(request_error)
    }

    async fn search_listings(
        &self,
        query: &str,
        per_page: u32,
    ) -> Result<Vec<CatalogRecord>, CatalogError> {
        let per_page = per_page.clamp(1, 100).to_string();
        let response = self
            .http
            .get(self.url("products"))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .query(&[("search", query), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(request_error)?;
        check(response)
            .await?
            .json()
            .await
            .map_err(request_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_is_basic_key_secret() {
        let client = WooCommerceClient::new("https://shop.example.com/wp-json/wc/v3/", "ck", "cs");
        assert_eq!(client.authorization, "Basic Y2s6Y3M=");
        assert_eq!(
            client.url("/products"),
            "https://shop.example.com/wp-json/wc/v3/products"
        );
    }

    #[test]
    fn rejections_are_classified() {
        assert!(matches!(
            classify_rejection(
                StatusCode::BAD_REQUEST,
                "woocommerce_rest_product_invalid_sku",
                "SKU already in use"
            ),
            CatalogError::Duplicate(_)
        ));
        assert!(matches!(
            classify_rejection(StatusCode::BAD_REQUEST, "term_exists", ""),
            CatalogError::Duplicate(_)
        ));
        match classify_rejection(
            StatusCode::BAD_REQUEST,
            "rest_invalid_param",
            "Invalid parameter(s): regular_price",
        ) {
            CatalogError::Validation(detail) => assert!(detail.contains("regular_price")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
