use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InventoryRequest {
    pub image_urls: ImagesSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImagesSource {
    Single(String),
    Multiple(Vec<String>),
}

/// One enriched item per successfully processed image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryInfo {
    pub name: String,
    pub category: String,
    pub condition: String,
    pub price: String,
    pub description: String,
    pub image_url: String,
    pub similar_url: String,
}

/// A reverse-image-search hit. `price` always starts with `$`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateListing {
    pub title: String,
    pub url: String,
    pub price: String,
}

/// Row written to the `inventory` table. An unparsable price is left out.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub title: String,
    pub price: Option<f64>,
    pub category: String,
    pub image_url: String,
    pub similar_url: String,
    pub condition: String,
    pub description: String,
    pub catalog_id: String,
    pub seller_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryResponse {
    pub items: Vec<InventoryInfo>,
    pub submitted: usize,
    pub failed: usize,
}

impl InventoryResponse {
    pub fn new(submitted: usize, items: Vec<InventoryInfo>) -> Self {
        Self {
            failed: submitted.saturating_sub(items.len()),
            submitted,
            items,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct CatalogResponse {
    pub catalog_id: String,
    pub items: Vec<Value>,
    pub submitted: usize,
    pub produced: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_info_serializes_camel_case() {
        let info = InventoryInfo {
            name: "Oak Table".into(),
            image_url: "https://cdn.example.com/a.jpg".into(),
            similar_url: "https://www.wayfair.com/oak".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["imageUrl"], "https://cdn.example.com/a.jpg");
        assert_eq!(value["similarUrl"], "https://www.wayfair.com/oak");
        assert!(value.get("image_url").is_none());
    }

    #[test]
    fn request_accepts_single_or_many_urls() {
        let single: InventoryRequest =
            serde_json::from_str(r#"{"image_urls":"https://x/a.jpg"}"#).unwrap();
        assert!(matches!(
            single.image_urls,
            ImagesSource::Single(ref url) if url == "https://x/a.jpg"
        ));

        let many: InventoryRequest =
            serde_json::from_str(r#"{"image_urls":["https://x/a.jpg","https://x/b.jpg"]}"#)
                .unwrap();
        assert!(matches!(many.image_urls, ImagesSource::Multiple(ref urls) if urls.len() == 2));
    }

    #[test]
    fn response_counts_failures() {
        let resp = InventoryResponse::new(3, vec![InventoryInfo::default(); 2]);
        assert_eq!(resp.failed, 1);
        assert_eq!(resp.submitted, 3);
    }
}
