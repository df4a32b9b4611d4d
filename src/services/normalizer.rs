//! Upstream payload normalization
//!
//! The model is asked for JSON, but what comes back ranges from the canonical
//! shape, through several historical schemas (`results`/`items`/`cards`,
//! `rotulo`/`badge`, `nome`/`name`, ...), to plain prose or nothing at all.
//! Everything is funnelled into a [`ChatResponse`] with exactly `count`
//! recommendations, padding with deterministic fallback cards when needed.

use serde_json::{Map, Value};

use crate::{
    models::{
        ChatRequest, ChatResponse, Label, Recommendation, ReplyMode, ResponseMeta, PRICE_VARIES,
    },
    services::link_builder::{build_search_url, sanitize_query, DEFAULT_AFFILIATE_TAG},
};

pub const TITLE_MAX_CHARS: usize = 120;
pub const RATIONALE_MAX_CHARS: usize = 240;
const QUERY_MAX_CHARS: usize = 100;
const PRICE_MAX_CHARS: usize = 60;
const SUMMARY_MAX_CHARS: usize = 600;
const QUESTION_MAX_CHARS: usize = 200;
const MAX_QUESTIONS: usize = 3;

/// Keys that may hold the spoken/summary text, in priority order
const SUMMARY_KEYS: &[&str] = &["text", "summary", "speech", "reply", "answer", "entendimento"];

/// Keys that may hold the recommendation list, in priority order
const LIST_KEYS: &[&str] = &["recommendations", "results", "items", "cards", "products"];

const QUESTION_KEYS: &[&str] = &["questions", "perguntas"];

const DEFAULT_RATIONALE: &str = "Opção alinhada ao seu pedido.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Label,
    Title,
    Rationale,
    Query,
    Price,
}

/// Which candidate keys feed which canonical field. Within a rule the first
/// non-empty key wins.
struct FieldRule {
    field: Field,
    keys: &'static [&'static str],
}

const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        field: Field::Label,
        keys: &["label", "rotulo", "badge", "category"],
    },
    FieldRule {
        field: Field::Title,
        keys: &["title", "nome", "name", "product"],
    },
    FieldRule {
        field: Field::Rationale,
        keys: &["rationale", "why", "porque", "reason", "description", "observacoes", "notes"],
    },
    FieldRule {
        field: Field::Query,
        keys: &["searchQuery", "query", "search", "termo", "busca"],
    },
    FieldRule {
        field: Field::Price,
        keys: &["priceHint", "price", "preco", "priceRange", "faixa_preco"],
    },
];

/// Slot templates for synthesized cards, in fill order
const FALLBACK_SLOTS: &[(Label, &str, &str)] = &[
    (Label::Cheapest, "mais barato", "Opção de menor preço para comparar."),
    (Label::BestValue, "custo-benefício", "Equilíbrio entre preço e qualidade."),
    (Label::Premium, "premium", "Linha superior, para quem prioriza qualidade."),
];

#[derive(Debug, Default)]
struct CandidateFields {
    label: Option<String>,
    title: Option<String>,
    rationale: Option<String>,
    query: Option<String>,
    price: Option<String>,
}

/// Structured data recovered from a raw payload
#[derive(Debug, Default)]
struct Extracted {
    summary: Option<String>,
    candidates: Vec<Value>,
    questions: Vec<String>,
}

/// Normalizes a raw model payload into a complete [`ChatResponse`].
///
/// `raw = None` means "no data" (timeout or gateway failure). The result
/// always carries exactly `count` recommendations with non-empty titles and
/// tagged URLs. `meta` is filled with `cached = false`, zero latency and
/// [`ReplyMode::Fallback`]; the caller sets the final values.
pub fn normalize(raw: Option<&str>, request: &ChatRequest, count: usize) -> ChatResponse {
    let tag = effective_tag(request.affiliate_tag());
    let extracted = raw.map(extract).unwrap_or_default();

    let mut recommendations: Vec<Recommendation> = extracted
        .candidates
        .iter()
        .filter_map(|candidate| to_recommendation(candidate, request, tag))
        .collect();

    // Cheapest-like cards go first; otherwise upstream order is kept.
    recommendations.sort_by_key(|rec| rec.label != Label::Cheapest);
    recommendations.truncate(count);
    pad_with_fallbacks(&mut recommendations, request, tag, count);

    let text = extracted
        .summary
        .unwrap_or_else(|| acknowledgment(request.message()));

    ChatResponse {
        text,
        recommendations,
        questions: extracted.questions,
        meta: ResponseMeta {
            cached: false,
            latency_ms: 0,
            affiliate_tag_used: tag.to_string(),
            tier: request.tier(),
            mode: ReplyMode::Fallback,
        },
    }
}

/// Builds a response made only of fallback cards
pub fn fallback_response(request: &ChatRequest, count: usize) -> ChatResponse {
    normalize(None, request, count)
}

fn effective_tag(tag: &str) -> &str {
    match tag.trim() {
        "" => DEFAULT_AFFILIATE_TAG,
        tag => tag,
    }
}

fn acknowledgment(message: &str) -> String {
    format!(
        "Você pediu: {}. Separei opções para você comparar.",
        clamp(&collapse_whitespace(message), TITLE_MAX_CHARS)
    )
}

fn extract(raw: &str) -> Extracted {
    let body = strip_code_fence(raw);

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => extract_from_object(&map),
        Ok(Value::Array(items)) => Extracted {
            candidates: items,
            ..Default::default()
        },
        Ok(Value::String(text)) => Extracted {
            summary: non_blank(&text).map(|t| clamp(t, SUMMARY_MAX_CHARS)),
            ..Default::default()
        },
        Ok(_) => Extracted::default(),
        Err(e) => {
            tracing::debug!(error = %e, "Upstream payload is not JSON");
            // Prose is still a usable answer; half-written JSON is not.
            let looks_like_json = body.starts_with('{') || body.starts_with('[');
            Extracted {
                summary: non_blank(body)
                    .filter(|_| !looks_like_json)
                    .map(|t| clamp(t, SUMMARY_MAX_CHARS)),
                ..Default::default()
            }
        }
    }
}

fn extract_from_object(map: &Map<String, Value>) -> Extracted {
    let summary = first_text(map, SUMMARY_KEYS).map(|t| clamp(&t, SUMMARY_MAX_CHARS));

    let candidates = first_array(map, LIST_KEYS)
        .cloned()
        .unwrap_or_default();

    let questions = first_array(map, QUESTION_KEYS)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(non_blank)
                .take(MAX_QUESTIONS)
                .map(|q| clamp(q, QUESTION_MAX_CHARS))
                .collect()
        })
        .unwrap_or_default();

    Extracted {
        summary,
        candidates,
        questions,
    }
}

fn candidate_fields(candidate: &Value) -> Option<CandidateFields> {
    let map = match candidate {
        Value::Object(map) => map,
        // A bare string is read as a product title.
        Value::String(title) => {
            return Some(CandidateFields {
                title: non_blank(title).map(str::to_string),
                ..Default::default()
            })
        }
        _ => return None,
    };

    let mut fields = CandidateFields::default();
    for rule in FIELD_RULES {
        let value = first_text(map, rule.keys);
        match rule.field {
            Field::Label => fields.label = value,
            Field::Title => fields.title = value,
            Field::Rationale => fields.rationale = value,
            Field::Query => fields.query = value,
            Field::Price => fields.price = value,
        }
    }
    Some(fields)
}

/// Maps one upstream candidate onto a recommendation; `None` when it has
/// neither a title nor a search query.
fn to_recommendation(candidate: &Value, request: &ChatRequest, tag: &str) -> Option<Recommendation> {
    let fields = candidate_fields(candidate)?;

    let title = fields.title.clone().or_else(|| fields.query.clone())?;
    let title = clamp(&collapse_whitespace(&title), TITLE_MAX_CHARS);

    let mut search_query = search_query_for(fields.query.as_deref().unwrap_or(&title));
    if search_query.is_empty() {
        search_query = search_query_for(request.message());
    }

    let rationale = fields
        .rationale
        .map(|r| clamp(&collapse_whitespace(&r), RATIONALE_MAX_CHARS))
        .unwrap_or_else(|| DEFAULT_RATIONALE.to_string());

    let price_hint = fields
        .price
        .map(|p| clamp(&p, PRICE_MAX_CHARS))
        .unwrap_or_else(|| PRICE_VARIES.to_string());

    Some(Recommendation {
        label: Label::classify(fields.label.as_deref().unwrap_or_default()),
        url: build_search_url(&search_query, tag),
        title,
        rationale,
        search_query,
        price_hint,
    })
}

/// Appends deterministic cards until `recommendations` holds `count` items.
///
/// Slot templates whose label is already present are skipped; past the
/// templates, cards are labelled OTHER and numbered by position.
fn pad_with_fallbacks(
    recommendations: &mut Vec<Recommendation>,
    request: &ChatRequest,
    tag: &str,
    count: usize,
) {
    let base = clamp(&collapse_whitespace(request.message()), 90);
    let mut templates = FALLBACK_SLOTS.iter();

    while recommendations.len() < count {
        let template = templates
            .by_ref()
            .find(|(label, _, _)| recommendations.iter().all(|rec| rec.label != *label));

        let (label, suffix, rationale) = match template {
            Some((label, suffix, rationale)) => (*label, suffix.to_string(), *rationale),
            None => (
                Label::Other,
                format!("opção {}", recommendations.len() + 1),
                DEFAULT_RATIONALE,
            ),
        };

        let title = clamp(&format!("{} {}", base, suffix), TITLE_MAX_CHARS);
        let search_query = search_query_for(&title);

        recommendations.push(Recommendation {
            label,
            url: build_search_url(&search_query, tag),
            title,
            rationale: rationale.to_string(),
            search_query,
            price_hint: PRICE_VARIES.to_string(),
        });
    }
}

/// First non-empty array among `keys`; an empty list does not shadow later keys.
fn first_array<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|key| {
        map.get(*key)
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty())
    })
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(text) => non_blank(text).map(str::to_string),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn non_blank(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitized search term of at most `QUERY_MAX_CHARS` characters. Cut without
/// a marker so the value stays exactly what goes into the link.
fn search_query_for(text: &str) -> String {
    let sanitized = sanitize_query(text);
    let cut: String = sanitized.chars().take(QUERY_MAX_CHARS).collect();
    cut.trim_end().to_string()
}

/// Truncates to at most `max` characters, marking the cut with an ellipsis.
fn clamp(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.truncate(cut.trim_end().len());
    cut.push('…');
    cut
}

/// Removes a surrounding Markdown code fence (```json ... ```), if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((_language, body)) => body,
        None => rest.trim_start_matches("json"),
    };
    let body = body.trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}
