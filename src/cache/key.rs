use sha2::{Digest, Sha256};
use std::fmt::Display;

use crate::models::ChatRequest;

/// Cache key for a chat response: SHA-256 over the normalized
/// `(message, tier, affiliate tag)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &ChatRequest) -> Self {
        let message = normalize_text(request.message()).to_lowercase();
        // The tag ends up verbatim in outbound URLs, so its case is kept.
        let tag = normalize_text(request.affiliate_tag());

        let mut hasher = Sha256::new();
        for part in [message.as_str(), request.tier().as_str(), tag.as_str()] {
            // Length prefix keeps ("a b", "c") and ("a", "b c") apart.
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chat:{}", self.0)
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
