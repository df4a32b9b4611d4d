use serde::{Deserialize, Serialize};

use super::Tier;

/// Sentinel used when the price of a recommendation is unknown
pub const PRICE_VARIES: &str = "varies";

/// Card label, from a closed set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Cheapest,
    BestValue,
    Premium,
    Other,
}

impl Label {
    /// Classifies free label text by case-insensitive keyword search.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("cheap") || lower.contains("barat") {
            Label::Cheapest
        } else if lower.contains("value")
            || lower.contains("cost-benefit")
            || lower.contains("custo")
            || lower.contains("best_value")
        {
            Label::BestValue
        } else if lower.contains("premium") {
            Label::Premium
        } else {
            Label::Other
        }
    }
}

/// A single product recommendation card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub label: Label,
    pub title: String,
    pub rationale: String,
    pub search_query: String,
    pub price_hint: String,
    /// Always built by the link builder, never taken from upstream
    pub url: String,
}

/// How a response was produced
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// The model answered before the fast timeout
    Model,
    /// The fast timeout fired first
    Timeout,
    /// The model call failed or the pipeline hit an internal defect
    #[default]
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub cached: bool,
    pub latency_ms: u64,
    pub affiliate_tag_used: String,
    pub tier: Tier,
    pub mode: ReplyMode,
}

/// Canonical response of `POST /api/chat`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub text: String,
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub questions: Vec<String>,
    pub meta: ResponseMeta,
}
