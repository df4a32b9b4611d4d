use serde::Deserialize;
use std::time::Duration;

use crate::models::Tier;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Gemini API key. Absence is reported by the health endpoint and turns
    /// every model call into a fallback answer; it never stops the server.
    #[serde(default, alias = "gemini_api_key")]
    pub api_key: Option<String>,

    /// Gemini REST API base URL
    #[serde(default = "default_gemini_api_url")]
    pub gemini_api_url: String,

    /// Model used for the FREE and PRO tiers
    #[serde(default = "default_model")]
    pub model_default: String,

    /// Model used for the EXEC tier
    #[serde(default = "default_exec_model")]
    pub model_exec: String,

    /// Transport timeout for a single model call, in milliseconds
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,

    /// How long a request waits for the model before answering with fallbacks
    #[serde(default = "default_fast_timeout_ms")]
    pub fast_timeout_ms: u64,

    /// Response cache time-to-live, in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Maximum number of cached responses
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,

    /// Affiliate tag used when the request does not carry one
    #[serde(default = "default_affiliate_tag")]
    pub default_affiliate_tag: String,

    #[serde(default = "default_recs_free")]
    pub recs_free: usize,

    #[serde(default = "default_recs_pro")]
    pub recs_pro: usize,

    #[serde(default = "default_recs_exec")]
    pub recs_exec: usize,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_gemini_api_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_exec_model() -> String {
    "gemini-3-pro-preview".to_string()
}

fn default_model_timeout_ms() -> u64 {
    15_000
}

fn default_fast_timeout_ms() -> u64 {
    1_200
}

fn default_cache_ttl_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_cache_max_size() -> usize {
    500
}

fn default_affiliate_tag() -> String {
    crate::services::link_builder::DEFAULT_AFFILIATE_TAG.to_string()
}

fn default_recs_free() -> usize {
    3
}

fn default_recs_pro() -> usize {
    4
}

fn default_recs_exec() -> usize {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            gemini_api_url: default_gemini_api_url(),
            model_default: default_model(),
            model_exec: default_exec_model(),
            model_timeout_ms: default_model_timeout_ms(),
            fast_timeout_ms: default_fast_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_max_size: default_cache_max_size(),
            default_affiliate_tag: default_affiliate_tag(),
            recs_free: default_recs_free(),
            recs_pro: default_recs_pro(),
            recs_exec: default_recs_exec(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Whether a non-blank upstream credential is configured
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    pub fn fast_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn tier_limits(&self) -> TierLimits {
        TierLimits::new(self.recs_free, self.recs_pro, self.recs_exec)
    }
}

/// Number of recommendations returned per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    free: usize,
    pro: usize,
    exec: usize,
}

impl TierLimits {
    /// Counts are clamped to at least one card per tier.
    pub fn new(free: usize, pro: usize, exec: usize) -> Self {
        Self {
            free: free.max(1),
            pro: pro.max(1),
            exec: exec.max(1),
        }
    }

    pub fn count_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Exec => self.exec,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self::new(default_recs_free(), default_recs_pro(), default_recs_exec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_limits_clamp_to_one() {
        let limits = TierLimits::new(0, 4, 0);
        assert_eq!(limits.count_for(Tier::Free), 1);
        assert_eq!(limits.count_for(Tier::Pro), 4);
        assert_eq!(limits.count_for(Tier::Exec), 1);
    }

    #[test]
    fn test_blank_api_key_is_not_a_credential() {
        let mut config = Config::default();
        assert!(!config.has_credential());

        config.api_key = Some("   ".to_string());
        assert!(!config.has_credential());

        config.api_key = Some("abc".to_string());
        assert!(config.has_credential());
    }

    #[test]
    fn test_default_durations() {
        let config = Config::default();
        assert_eq!(config.fast_timeout(), Duration::from_millis(1_200));
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.tier_limits().count_for(Tier::Free), 3);
    }
}
