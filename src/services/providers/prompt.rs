use serde_json::{json, Value};

use crate::models::{ChatRequest, Tier};

const PERSONA_BASE: &str = "\
Você é o Mordomo.AI, assistente de compras focado na Amazon Brasil.
Seu trabalho é transformar o pedido do cliente em buscas precisas e rápidas.

Regras:
- Nunca escreva URLs, domínios ou links. Os links são montados pelo sistema.
- Para cada item, dê um termo de busca curto e específico (campo searchQuery).
- Comece o campo text com \"Você pediu:\" seguido de um resumo do pedido.
- No máximo duas frases curtas no campo text.
- Se o pedido estiver vago, inclua até 3 perguntas curtas em questions.
- Responda somente com JSON válido no formato pedido.";

fn tier_guidance(tier: Tier) -> &'static str {
    match tier {
        Tier::Free => "Cliente do plano gratuito: seja direto e objetivo.",
        Tier::Pro => {
            "Afiliado profissional: destaque argumentos de venda que ajudem a converter."
        }
        Tier::Exec => {
            "Afiliado executivo: além das opções, aponte o posicionamento de cada produto \
             e como apresentá-lo ao público."
        }
    }
}

/// System instruction for the given tier and card count
pub fn persona(tier: Tier, count: usize) -> String {
    format!(
        "{}\n\nFormato fixo: exatamente {} itens. O primeiro é o MAIS BARATO (label CHEAPEST); \
         use BEST_VALUE para custo-benefício e PREMIUM para a opção superior.\n{}\nPLANO ATUAL: {}.",
        PERSONA_BASE,
        count,
        tier_guidance(tier),
        tier
    )
}

/// User turn sent to the model
pub fn user_turn(request: &ChatRequest) -> String {
    format!("Pedido do cliente: {}", request.message())
}

/// JSON schema the model output is constrained to; mirrors the canonical
/// response shape minus the derived fields.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "text": { "type": "STRING" },
            "questions": { "type": "ARRAY", "items": { "type": "STRING" } },
            "recommendations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": {
                            "type": "STRING",
                            "enum": ["CHEAPEST", "BEST_VALUE", "PREMIUM", "OTHER"]
                        },
                        "title": { "type": "STRING" },
                        "rationale": { "type": "STRING" },
                        "searchQuery": { "type": "STRING" },
                        "priceHint": { "type": "STRING", "nullable": true }
                    },
                    "required": ["label", "title", "searchQuery", "rationale"]
                }
            }
        },
        "required": ["text", "recommendations"]
    })
}
