use crate::models::InventoryInfo;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const FIELDS: [&str; 5] = ["name", "category", "condition", "price", "description"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub info: InventoryInfo,
    /// Fields the answer did not provide; they are left as empty strings.
    pub missing: Vec<&'static str>,
    pub status: ExtractionStatus,
}

/// Reads the five item fields from a model answer, trying a JSON object first
/// and falling back to `label: value` scanning.
pub fn parse_answer(answer: &str) -> ExtractionResult {
    let values = json_fields(answer).unwrap_or_else(|| extract_fields(answer));
    let mut info = InventoryInfo::default();
    let mut missing = Vec::new();
    for field in FIELDS {
        let value = values.get(field).cloned().unwrap_or_default();
        if value.is_empty() {
            missing.push(field);
        }
        match field {
            "name" => info.name = value,
            "category" => info.category = value,
            "condition" => info.condition = value,
            "price" => info.price = value,
            _ => info.description = value,
        }
    }
    let status = if missing.is_empty() {
        ExtractionStatus::Complete
    } else {
        ExtractionStatus::Partial
    };
    ExtractionResult {
        info,
        missing,
        status,
    }
}

/// Scans `label: value` pairs. A label is a run of word characters at the
/// start of the text or of a line; its value runs until the next label line
/// or the end of the text. Later labels overwrite earlier ones.
pub fn extract_fields(text: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split('\n') {
        if let Some((label, rest)) = split_label(line) {
            if let Some((label, raw)) = current.take() {
                fields.insert(label, clean_value(&raw));
            }
            current = Some((label.to_string(), rest.to_string()));
        } else if let Some((_, raw)) = current.as_mut() {
            raw.push('\n');
            raw.push_str(line);
        }
    }
    if let Some((label, raw)) = current {
        fields.insert(label, clean_value(&raw));
    }
    fields
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    let (label, rest) = line.split_once(':')?;
    let is_word = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_word.then_some((label, rest))
}

fn clean_value(raw: &str) -> String {
    let unescaped = raw.trim().replace("\\n", "\n");
    let mut value = unescaped.as_str();
    if let Some(stripped) = value.strip_prefix(['"', '\'']) {
        value = stripped;
    }
    if let Some(stripped) = value.strip_suffix(['"', '\'']) {
        value = stripped;
    }
    value.trim().to_string()
}

fn json_fields(answer: &str) -> Option<HashMap<String, String>> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end < start {
        return None;
    }
    let object: Map<String, Value> = serde_json::from_str(&answer[start..=end]).ok()?;
    let fields: HashMap<String, String> = object
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((key.to_lowercase(), text))
        })
        .collect();
    FIELDS
        .iter()
        .any(|f| fields.contains_key(*f))
        .then_some(fields)
}
