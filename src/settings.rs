use crate::currency::StaticRates;
use crate::platforms::PlatformId;
use rand::Rng;
use std::{collections::HashMap, env, str::FromStr, time::Duration};
use tracing::warn;

const DEFAULT_LOCAL_INFO: &str = "\n\nDelivery Information for Ghana:\n\
- Fast delivery to all regions in Ghana\n\
- Estimated delivery: 7-14 business days\n\
- Cash on delivery available in Accra\n\
- Free shipping on orders above GHS 200\n\
- All prices include import duties\n\n\
Why Buy From Us:\n\
- Authentic products guaranteed\n\
- Local customer support\n\
- Easy returns within 7 days\n\
- Secure payment options";

/// Process-wide tunables. Business constants that used to be hard-coded
/// (markups, retry ceilings, detail cap) live here with their observed values
/// as defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target_currency: String,
    pub pricing: PricingPolicy,
    pub retry: RetryPolicy,
    pub platform_retry_attempts: HashMap<PlatformId, u32>,
    pub detail_fetch_cap: usize,
    pub queue_capacity: usize,
    pub stock_quantity: u32,
    pub verify_images: bool,
    pub local_info: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_currency: "GHS".into(),
            pricing: PricingPolicy::default(),
            retry: RetryPolicy::default(),
            platform_retry_attempts: HashMap::new(),
            detail_fetch_cap: 10,
            queue_capacity: 64,
            stock_quantity: 100,
            verify_images: false,
            local_info: DEFAULT_LOCAL_INFO.into(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let pricing = PricingPolicy::new(
            env_parse("REGULAR_MARKUP").unwrap_or(defaults.pricing.regular_markup),
            env_parse("SALE_MARKUP").unwrap_or(defaults.pricing.sale_markup),
        );
        let retry = RetryPolicy {
            max_attempts: env_parse::<u32>("RETRY_MAX_ATTEMPTS")
                .filter(|v| *v >= 1)
                .unwrap_or(defaults.retry.max_attempts),
            base_delay: env_parse::<u64>("RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: env_parse::<u64>("RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        };
        Self {
            target_currency: resolve_target_currency(
                env::var("TARGET_CURRENCY").ok(),
                env::var("RATES_URL").is_ok_and(|v| !v.trim().is_empty()),
                defaults.target_currency,
            ),
            pricing,
            retry,
            platform_retry_attempts: env::var("PLATFORM_RETRY_ATTEMPTS")
                .map(|raw| parse_platform_attempts(&raw))
                .unwrap_or_default(),
            detail_fetch_cap: env_parse::<usize>("DETAIL_FETCH_CAP")
                .filter(|v| *v >= 1)
                .unwrap_or(defaults.detail_fetch_cap),
            queue_capacity: env_parse::<usize>("QUEUE_CAPACITY")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.queue_capacity),
            stock_quantity: env_parse("STOCK_QUANTITY").unwrap_or(defaults.stock_quantity),
            verify_images: env_bool("IMAGE_VERIFY"),
            local_info: env::var("LOCAL_INFO_BLOCK")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| format!("\n\n{}", v.trim()))
                .unwrap_or(defaults.local_info),
        }
    }

    pub fn retry_for(&self, platform: PlatformId) -> RetryPolicy {
        match self.platform_retry_attempts.get(&platform) {
            Some(attempts) => RetryPolicy {
                max_attempts: *attempts,
                ..self.retry.clone()
            },
            None => self.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingPolicy {
    pub regular_markup: f64,
    pub sale_markup: f64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            regular_markup: 1.30,
            sale_markup: 1.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub regular: u64,
    pub sale: u64,
}

impl PricingPolicy {
    /// Falls back to the defaults unless `regular > sale > 0`.
    pub fn new(regular_markup: f64, sale_markup: f64) -> Self {
        if regular_markup > sale_markup && sale_markup > 0.0 {
            Self {
                regular_markup,
                sale_markup,
            }
        } else {
            warn!(
                target = "woopl.settings",
                regular_markup, sale_markup, "markup_rejected_using_defaults"
            );
            Self::default()
        }
    }

    /// Whole-unit storefront prices for a converted cost. The regular price is
    /// kept strictly above the sale price even when both round up to the same
    /// unit.
    pub fn quote(&self, cost: f64) -> PriceQuote {
        let cost = cost.max(0.0);
        let sale = ceil_units(cost * self.sale_markup);
        let regular = ceil_units(cost * self.regular_markup).max(sale + 1);
        PriceQuote { regular, sale }
    }
}

fn ceil_units(value: f64) -> u64 {
    // rounding to micro-units first keeps 13.000000000000002 from becoming 14
    let settled = (value * 1_000_000.0).round() / 1_000_000.0;
    settled.ceil().max(0.0) as u64
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the given zero-based attempt, plus up to 10% jitter.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let mut delay = exp.min(self.max_delay);
        if let Some(hint) = hint {
            delay = delay.max(hint.min(self.max_delay));
        }
        let jitter_ceiling = (delay.as_millis() / 10) as u64;
        if jitter_ceiling > 0 {
            delay += Duration::from_millis(rand::rng().random_range(0..=jitter_ceiling));
        }
        delay
    }
}

/// Without a live rate source the storefront currency must be one the static
/// table converts to.
fn resolve_target_currency(raw: Option<String>, live_rates: bool, default: String) -> String {
    let Some(code) = raw
        .map(|v| v.trim().to_uppercase())
        .filter(|v| !v.is_empty())
    else {
        return default;
    };
    let valid = code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic());
    if valid && (live_rates || StaticRates::default().supports(&code)) {
        return code;
    }
    warn!(
        target = "woopl.settings",
        requested = %code,
        fallback = %default,
        live_rates,
        "target_currency_unconvertible"
    );
    default
}

fn parse_platform_attempts(raw: &str) -> HashMap<PlatformId, u32> {
    let mut out = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(2, '=');
        let platform = parts.next().and_then(|p| PlatformId::from_str(p.trim()).ok());
        let attempts = parts
            .next()
            .and_then(|a| a.trim().parse::<u32>().ok())
            .filter(|a| *a >= 1);
        match (platform, attempts) {
            (Some(platform), Some(attempts)) => {
                out.insert(platform, attempts);
            }
            _ => warn!(
                target = "woopl.settings",
                "ignored malformed PLATFORM_RETRY_ATTEMPTS entry: {entry}"
            ),
        }
    }
    out
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

pub fn env_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_applies_markups_with_ceiling() {
        let policy = PricingPolicy::default();
        // 10 USD at 15.85 GHS/USD
        let quote = policy.quote(10.0 * 15.85);
        assert_eq!(quote.regular, 207); // 206.05
        assert_eq!(quote.sale, 183); // 182.275
    }

    #[test]
    fn quote_does_not_overshoot_exact_values() {
        let policy = PricingPolicy::default();
        let quote = policy.quote(10.0);
        assert_eq!(quote.regular, 13);
        assert_eq!(quote.sale, 12);
    }

    #[test]
    fn regular_price_stays_above_sale_price() {
        let policy = PricingPolicy::default();
        let mut rate = 0.001;
        while rate < 50.0 {
            let quote = policy.quote(10.0 * rate);
            assert!(
                quote.regular > quote.sale,
                "rate {rate}: regular {} sale {}",
                quote.regular,
                quote.sale
            );
            let expected_sale = ceil_units(10.0 * rate * 1.15);
            assert_eq!(quote.sale, expected_sale);
            rate *= 1.37;
        }
    }

    #[test]
    fn invalid_markups_fall_back_to_defaults() {
        let policy = PricingPolicy::new(1.1, 1.2);
        assert_eq!(policy, PricingPolicy::default());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        let first = policy.delay_for(0, None);
        let third = policy.delay_for(2, None);
        let tenth = policy.delay_for(9, None);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(440));
        assert!(tenth <= Duration::from_millis(1_100));
    }

    #[test]
    fn target_currency_must_be_convertible() {
        let default = || "GHS".to_string();
        assert_eq!(resolve_target_currency(Some(" eur ".into()), false, default()), "EUR");
        assert_eq!(resolve_target_currency(Some("NGN".into()), false, default()), "GHS");
        assert_eq!(resolve_target_currency(Some("NGN".into()), true, default()), "NGN");
        assert_eq!(resolve_target_currency(Some("cedis".into()), true, default()), "GHS");
        assert_eq!(resolve_target_currency(None, false, default()), "GHS");
    }

    #[test]
    fn platform_attempt_overrides_parse() {
        let parsed = parse_platform_attempts("1688=6, aliexpress=2, bogus=3, alibaba=x");
        assert_eq!(parsed.get(&PlatformId::Ali1688), Some(&6));
        assert_eq!(parsed.get(&PlatformId::AliExpress), Some(&2));
        assert_eq!(parsed.len(), 2);
    }
}
