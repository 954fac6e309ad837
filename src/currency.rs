use crate::http::build_client;
use crate::models::Money;
use crate::transform::Step;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("no rate for {from}->{to}")]
    UnknownPair { from: String, to: String },
    #[error("rate request failed: {0}")]
    Request(String),
    #[error("invalid rate payload: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn rate(&self, from: &str, to: &str) -> Result<f64, CurrencyError>;
}

/// Live rates from an exchangerate-api style `GET {base}/latest/{from}`.
pub struct HttpRateProvider {
    http: Client,
    base_url: String,
}

impl HttpRateProvider {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("RATES_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())?;
        Some(Self {
            http: build_client(),
            base_url,
        })
    }
}

#[derive(Deserialize)]
struct LatestRates {
    rates: HashMap<String, f64>,
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn rate(&self, from: &str, to: &str) -> Result<f64, CurrencyError> {
        let response = self
            .http
            .get(format!("{}/latest/{}", self.base_url, urlencoding::encode(from)))
            .send()
            .await
            .map_err(|err| CurrencyError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CurrencyError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let payload: LatestRates = response
            .json()
            .await
            .map_err(|err| CurrencyError::InvalidResponse(err.to_string()))?;
        payload
            .rates
            .get(to)
            .copied()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| CurrencyError::UnknownPair {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

/// Fixed table priced in GHS per unit; cross rates pivot through GHS.
#[derive(Debug, Clone)]
pub struct StaticRates {
    ghs_per_unit: HashMap<&'static str, f64>,
}

impl Default for StaticRates {
    fn default() -> Self {
        Self {
            ghs_per_unit: HashMap::from([
                ("GHS", 1.0),
                ("USD", 15.85),
                ("CNY", 2.18),
                ("EUR", 17.23),
                ("GBP", 19.45),
            ]),
        }
    }
}

impl StaticRates {
    pub fn supports(&self, code: &str) -> bool {
        self.ghs_per_unit.contains_key(code.trim().to_uppercase().as_str())
    }

    pub fn lookup(&self, from: &str, to: &str) -> Result<f64, CurrencyError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(1.0);
        }
        let unknown = || CurrencyError::UnknownPair {
            from: from.to_string(),
            to: to.to_string(),
        };
        let from_ghs = self
            .ghs_per_unit
            .get(from.to_uppercase().as_str())
            .ok_or_else(unknown)?;
        let to_ghs = self
            .ghs_per_unit
            .get(to.to_uppercase().as_str())
            .ok_or_else(unknown)?;
        Ok(from_ghs / to_ghs)
    }
}

#[async_trait]
impl RateProvider for StaticRates {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn rate(&self, from: &str, to: &str) -> Result<f64, CurrencyError> {
        self.lookup(from, to)
    }
}

#[derive(Clone)]
pub struct CurrencyConverter {
    live: Option<Arc<dyn RateProvider>>,
    fallback: StaticRates,
}

impl CurrencyConverter {
    pub fn new(live: Option<Arc<dyn RateProvider>>) -> Self {
        Self {
            live,
            fallback: StaticRates::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            HttpRateProvider::from_env().map(|provider| Arc::new(provider) as Arc<dyn RateProvider>),
        )
    }

    /// Live rate, then the static table, then the unconverted amount.
    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Step<Money> {
        let from = from.trim().to_uppercase();
        let to = to.trim().to_uppercase();
        let converted = |rate: f64| Money {
            amount: round_cents(amount * rate),
            currency: to.clone(),
        };
        if from == to {
            return Step::Ok(converted(1.0));
        }

        let mut reasons = Vec::new();
        if let Some(live) = &self.live {
            match live.rate(&from, &to).await {
                Ok(rate) => return Step::Ok(converted(rate)),
                Err(err) => {
                    warn!(
                        target = "woopl.transform",
                        provider = live.name(),
                        from = %from,
                        to = %to,
                        error = %err,
                        "live_rate_unavailable"
                    );
                    reasons.push(format!("{}: {err}", live.name()));
                }
            }
        }
        match self.fallback.lookup(&from, &to) {
            Ok(rate) if reasons.is_empty() => Step::Ok(converted(rate)),
            Ok(rate) => Step::Fallback(converted(rate), reasons.join("; ")),
            Err(err) => {
                reasons.push(format!("static: {err}"));
                Step::Fallback(
                    Money {
                        amount,
                        currency: from,
                    },
                    reasons.join("; "),
                )
            }
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownProvider;

    #[async_trait]
    impl RateProvider for DownProvider {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn rate(&self, _from: &str, _to: &str) -> Result<f64, CurrencyError> {
            Err(CurrencyError::Request("connection refused".into()))
        }
    }

    struct FixedProvider(f64);

    #[async_trait]
    impl RateProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn rate(&self, _from: &str, _to: &str) -> Result<f64, CurrencyError> {
            Ok(self.0)
        }
    }

    #[test]
    fn static_table_pivots_through_ghs() {
        let rates = StaticRates::default();
        assert_eq!(rates.lookup("USD", "GHS").expect("usd"), 15.85);
        let cny_usd = rates.lookup("cny", "usd").expect("cross");
        assert!((cny_usd - 2.18 / 15.85).abs() < 1e-12);
        assert!(rates.lookup("JPY", "GHS").is_err());
    }

    #[tokio::test]
    async fn live_rate_is_preferred() {
        let converter = CurrencyConverter::new(Some(Arc::new(FixedProvider(16.0))));
        let step = converter.convert(10.0, "usd", "ghs").await;
        assert_eq!(
            step,
            Step::Ok(Money {
                amount: 160.0,
                currency: "GHS".into()
            })
        );
    }

    #[tokio::test]
    async fn provider_outage_uses_static_table() {
        let converter = CurrencyConverter::new(Some(Arc::new(DownProvider)));
        match converter.convert(10.0, "USD", "GHS").await {
            Step::Fallback(money, reason) => {
                assert_eq!(money.amount, 158.5);
                assert_eq!(money.currency, "GHS");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_pair_keeps_source_amount() {
        let converter = CurrencyConverter::new(None);
        match converter.convert(12.5, "JPY", "GHS").await {
            Step::Fallback(money, _) => {
                assert_eq!(money.amount, 12.5);
                assert_eq!(money.currency, "JPY");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert!(matches!(
            converter.convert(3.0, "GHS", "GHS").await,
            Step::Ok(_)
        ));
    }
}
