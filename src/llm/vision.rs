use crate::engine::identify::VisionGuess;
use crate::engine::types::IdentificationMethod;
use crate::llm::{ContentBlock, LlmClient, VisionMessage};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

const MAX_IMAGES: usize = 6;

const IDENTIFY_PROMPT: &str = r#"
You are a resale product identifier. Given photo URLs of a single secondhand item plus any
visible text the seller transcribed, respond with one JSON object:
{"name", "brand", "product_line", "variant", "style_code", "colorway", "size", "category",
 "confidence", "readable_text"}.
`confidence` is 0.0-1.0 and must reflect genuine certainty; use "Unknown" for the name rather
than guessing when the photos are ambiguous. `readable_text` is true when legible labels,
tags, or style codes were visible in the photos. Output JSON only.
"#;

const CONDITION_PROMPT: &str = r#"
You are a used-goods condition grader. Describe the item's condition in 2-4 plain sentences:
state whether it appears new or used, then name every visible flaw (scuffs, scratches, stains,
tears, yellowing, missing parts, box damage). Mention the packaging if visible. No JSON, no
markdown, no sales language.
"#;

#[derive(Debug, Deserialize)]
struct GuessPayload {
    name: Option<String>,
    brand: Option<String>,
    product_line: Option<String>,
    variant: Option<String>,
    style_code: Option<String>,
    colorway: Option<String>,
    size: Option<String>,
    category: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    readable_text: bool,
}

/// Ask the vision model to identify the item in the photos. Any failure maps
/// to None; the caller falls back to text-signal identification.
pub async fn identify(
    llm: &LlmClient,
    images: &[String],
    text_snippets: &[String],
) -> Option<VisionGuess> {
    if images.is_empty() {
        return None;
    }

    let mut content = image_blocks(images);
    if !text_snippets.is_empty() {
        content.push(ContentBlock::Text {
            text: json!({ "visible_text": text_snippets }).to_string(),
        });
    }
    let messages = [
        VisionMessage::system(IDENTIFY_PROMPT),
        VisionMessage::user(content),
    ];

    let reply = match llm.infer(&messages).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(target = "magpie.llm", error = %err, "vision identification failed");
            return None;
        }
    };

    let cleaned = strip_markdown_fence(&reply);
    match serde_json::from_str::<GuessPayload>(&cleaned) {
        Ok(parsed) => Some(map_guess(parsed)),
        Err(err) => {
            warn!(target = "magpie.llm", error = %err, "vision guess was not valid json");
            None
        }
    }
}

/// Ask the vision model for a plain-text condition narrative. None when the
/// model is unreachable; the caller grades from the seller's notes alone.
pub async fn condition_narrative(
    llm: &LlmClient,
    images: &[String],
    notes: Option<&str>,
) -> Option<String> {
    if images.is_empty() {
        return None;
    }

    let mut content = image_blocks(images);
    if let Some(notes) = notes.map(str::trim).filter(|notes| !notes.is_empty()) {
        content.push(ContentBlock::Text {
            text: format!("Seller notes: {notes}"),
        });
    }
    let messages = [
        VisionMessage::system(CONDITION_PROMPT),
        VisionMessage::user(content),
    ];

    match llm.infer(&messages).await {
        Ok(reply) => {
            let text = reply.trim().to_string();
            if text.is_empty() { None } else { Some(text) }
        }
        Err(err) => {
            warn!(target = "magpie.llm", error = %err, "condition narrative failed");
            None
        }
    }
}

fn image_blocks(images: &[String]) -> Vec<ContentBlock> {
    images
        .iter()
        .take(MAX_IMAGES)
        .map(|url| ContentBlock::Image { url: url.clone() })
        .collect()
}

fn map_guess(payload: GuessPayload) -> VisionGuess {
    let method = if payload.readable_text {
        IdentificationMethod::VisualText
    } else {
        IdentificationMethod::VisualOnly
    };
    VisionGuess {
        name: payload.name.unwrap_or_default().trim().to_string(),
        brand: non_empty(payload.brand),
        product_line: non_empty(payload.product_line),
        variant: non_empty(payload.variant),
        style_code: non_empty(payload.style_code),
        colorway: non_empty(payload.colorway),
        size: non_empty(payload.size),
        category_hint: non_empty(payload.category),
        method,
        confidence: payload.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json() {
        let fenced = "```json\n{\"name\":\"Air Force 1\"}\n```";
        assert_eq!(strip_markdown_fence(fenced), "{\"name\":\"Air Force 1\"}");
        assert_eq!(strip_markdown_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn readable_text_maps_to_visual_text_method() {
        let payload: GuessPayload = serde_json::from_str(
            r#"{"name":"Air Force 1 Low","brand":"Nike","confidence":0.91,"readable_text":true}"#,
        )
        .unwrap();
        let guess = map_guess(payload);
        assert_eq!(guess.method, IdentificationMethod::VisualText);
        assert_eq!(guess.confidence, 0.91);
        assert_eq!(guess.brand.as_deref(), Some("Nike"));
    }

    #[test]
    fn blank_fields_and_wild_confidence_are_normalized() {
        let payload: GuessPayload = serde_json::from_str(
            r#"{"name":" PS5 ","brand":"  ","confidence":3.5}"#,
        )
        .unwrap();
        let guess = map_guess(payload);
        assert_eq!(guess.name, "PS5");
        assert!(guess.brand.is_none());
        assert_eq!(guess.confidence, 1.0);
        assert_eq!(guess.method, IdentificationMethod::VisualOnly);
    }

    #[test]
    fn image_blocks_are_typed_and_capped() {
        let urls: Vec<String> = (0..10)
            .map(|i| format!("https://example.com/{i}.jpg"))
            .collect();
        let blocks = image_blocks(&urls);
        assert_eq!(blocks.len(), MAX_IMAGES);
        let value = serde_json::to_value(&blocks[0]).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["url"], "https://example.com/0.jpg");
    }

    #[tokio::test]
    async fn no_images_short_circuits_to_none() {
        let llm = LlmClient::new(crate::llm::LlmConfig {
            gateway_url: "http://localhost:1".into(),
            api_key: None,
            function_name: None,
            model: None,
        });
        assert!(identify(&llm, &[], &[]).await.is_none());
        assert!(condition_narrative(&llm, &[], None).await.is_none());
    }
}
