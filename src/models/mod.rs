mod chat;
mod recommendation;

pub use chat::{ChatPayload, ChatRequest, LegacyAffiliateIds, Tier};
pub use recommendation::{
    ChatResponse, Label, Recommendation, ReplyMode, ResponseMeta, PRICE_VARIES,
};
