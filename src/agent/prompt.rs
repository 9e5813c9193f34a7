use crate::config::ExtractionMode;
use crate::llm::{ChatMessage, ContentPart, ImageUrl};
use serde_json::json;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant";

const TASK: &str = "\
[TASK]
Identify the item in the image using the image itself and any web content you can look up \
with the retrieve_item_information tool. Produce a canonical product name, pick the best \
category and condition from the lists given, and estimate a resale price in USD.

[GUIDELINES]
1. Name: prefer the most complete and informative title. Keep brand, product line, and \
model numbers that appear consistently. Drop promotional phrases. Use the general series \
name unless one model clearly dominates.
2. Category: choose exactly one entry from `categories`.
3. Condition: choose exactly one entry from `conditions` that best matches what the image \
shows, as an inventory audit or marketplace listing would.
4. Price: account for how the category depreciates, brand value, condition \
(Poor < Fair < Good < Very Good < Excellent < Like New), age, and demand. Use `prices` as \
a guide, not a bound. Round to whole dollars.";

const TEXT_FORMAT: &str = "\
[FORMAT]
Think through the image, the web content, and the inputs, then finish with this block \
and nothing after it:

[OUTPUT]
name: <product name, 10 words or less>
category: <one of categories>
condition: <one of conditions>
price: <estimated resale price in USD, digits only>
description: <short description, 10 words or less>

Example:
[OUTPUT]
name: IKEA Ekedalen Extendable Dining Table
category: Furniture
condition: Good
price: 180
description: Oak veneer extendable table seating four to six";

const JSON_FORMAT: &str = "\
[FORMAT]
Answer with a single JSON object and nothing else, using exactly these keys:
{\"name\": \"<product name, 10 words or less>\", \"category\": \"<one of categories>\", \
\"condition\": \"<one of conditions>\", \"price\": \"<estimated resale price in USD, digits only>\", \
\"description\": \"<short description, 10 words or less>\"}";

/// Task text for one image. Lists are embedded as JSON arrays.
pub fn inventory_prompt(
    titles: &[String],
    categories: &[String],
    conditions: &[String],
    prices: &[String],
    mode: ExtractionMode,
) -> String {
    let format = match mode {
        ExtractionMode::Structured => JSON_FORMAT,
        ExtractionMode::Text => TEXT_FORMAT,
    };
    format!(
        "{TASK}\n\n{format}\n\n[INPUT]\ntitles: {}\ncategories: {}\nconditions: {}\nprices: {}\n",
        json!(titles),
        json!(categories),
        json!(conditions),
        json!(prices),
    )
}

/// System message plus a user message carrying the task text and the image.
pub fn build_messages(image_url: &str, task: String) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user_parts(vec![
            ContentPart::Text { text: task },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_url.to_string(),
                    detail: Some("high".to_string()),
                },
            },
        ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageContent, Role};

    #[test]
    fn prompt_embeds_inputs_as_json_arrays() {
        let text = inventory_prompt(
            &["Oak \"Table\"".to_string()],
            &["Furniture".to_string(), "Decor".to_string()],
            &["Good".to_string()],
            &["$120".to_string(), "$99.50".to_string()],
            ExtractionMode::Text,
        );
        assert!(text.contains(r#"titles: ["Oak \"Table\""]"#));
        assert!(text.contains(r#"categories: ["Furniture","Decor"]"#));
        assert!(text.contains(r#"prices: ["$120","$99.50"]"#));
        assert!(text.contains("[OUTPUT]\nname:"));
    }

    #[test]
    fn structured_mode_asks_for_json() {
        let text = inventory_prompt(&[], &[], &[], &[], ExtractionMode::Structured);
        assert!(text.contains("single JSON object"));
        assert!(!text.contains("[OUTPUT]"));
    }

    #[test]
    fn messages_carry_high_detail_image() {
        let messages = build_messages("https://cdn.test/a.jpg", "task".into());
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text_content(), SYSTEM_PROMPT);
        let Some(MessageContent::Parts(parts)) = &messages[1].content else {
            panic!("expected parts");
        };
        assert!(matches!(
            &parts[1],
            ContentPart::ImageUrl { image_url } if image_url.detail.as_deref() == Some("high")
        ));
    }
}
