use once_cell::sync::Lazy;
use std::env;

pub static SITE_URL: Lazy<String> = Lazy::new(|| {
    env::var("WOO_SITE_URL")
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .unwrap_or_default()
});

pub static CONSUMER_KEY: Lazy<String> =
    Lazy::new(|| env::var("WOO_CONSUMER_KEY").unwrap_or_default());

pub static CONSUMER_SECRET: Lazy<String> =
    Lazy::new(|| env::var("WOO_CONSUMER_SECRET").unwrap_or_default());

pub static API_ROOT: Lazy<String> = Lazy::new(|| format!("{}/wp-json/wc/v3", *SITE_URL));

pub fn credentials_present() -> bool {
    !SITE_URL.is_empty() && !CONSUMER_KEY.is_empty() && !CONSUMER_SECRET.is_empty()
}
