use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt::Display;

use crate::error::{AppError, AppResult};

/// Subscription level controlling recommendation count, persona and model
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Exec,
}

impl Tier {
    /// Parses both plan names (`FREE`/`PRO`/`EXEC`) and the older role names
    /// (`CUSTOMER`/`AFFILIATE_PRO`/`AFFILIATE_EXEC`), case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let upper = value.trim().to_uppercase();
        if upper.is_empty() {
            None
        } else if upper.contains("EXEC") {
            Some(Tier::Exec)
        } else if upper.contains("PRO") {
            Some(Tier::Pro)
        } else if upper == "FREE" || upper == "CUSTOMER" {
            Some(Tier::Free)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Pro => "PRO",
            Tier::Exec => "EXEC",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Affiliate identifiers as sent by older UI builds
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAffiliateIds {
    #[serde(default, deserialize_with = "lenient_string")]
    pub amazon_tag: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amazon: Option<String>,
}

/// Body of `POST /api/chat`
///
/// Every field is optional and a value of the wrong type reads as absent, so
/// a stray `"role": 1` never turns a usable request into a rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub plan: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub affiliate_tag: Option<String>,
    #[serde(default, deserialize_with = "lenient_affiliate")]
    pub affiliate: Option<LegacyAffiliateIds>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

fn lenient_affiliate<'de, D>(deserializer: D) -> Result<Option<LegacyAffiliateIds>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl ChatPayload {
    /// Validates the payload and resolves tier and affiliate tag.
    ///
    /// `plan` wins over `role` when both parse; anything unrecognized is FREE.
    pub fn into_request(self, default_tag: &str) -> AppResult<ChatRequest> {
        let message = self.message.as_deref().map(str::trim).unwrap_or_default();
        if message.is_empty() {
            return Err(AppError::InvalidInput("message is required".to_string()));
        }

        let tier = self
            .plan
            .as_deref()
            .and_then(Tier::parse)
            .or_else(|| self.role.as_deref().and_then(Tier::parse))
            .unwrap_or_default();

        let legacy_tag = self
            .affiliate
            .and_then(|ids| ids.amazon_tag.or(ids.amazon));

        let affiliate_tag = [self.affiliate_tag, legacy_tag]
            .into_iter()
            .flatten()
            .map(|tag| tag.trim().to_string())
            .find(|tag| !tag.is_empty())
            .unwrap_or_else(|| default_tag.to_string());

        Ok(ChatRequest::new(message, tier, affiliate_tag))
    }
}

/// A validated chat request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    message: String,
    tier: Tier,
    affiliate_tag: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, tier: Tier, affiliate_tag: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tier,
            affiliate_tag: affiliate_tag.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn affiliate_tag(&self) -> &str {
        &self.affiliate_tag
    }
}
