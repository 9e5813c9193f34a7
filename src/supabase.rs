use crate::http::build_client;
use crate::models::InventoryRow;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Controlled vocabularies (categories, conditions) exposed by the database.
#[async_trait]
pub trait VocabularySource: Send + Sync {
    async fn get_types(&self, enum_type: &str) -> Result<Vec<String>, SupabaseError>;
}

/// Persistence used by the catalog flow.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn seller_tier(&self, seller_id: &str) -> Result<String, SupabaseError>;
    async fn inventory_count(&self, seller_id: &str) -> Result<usize, SupabaseError>;
    /// Inserts a `catalogs` row and returns its id.
    async fn create_catalog(&self, seller_id: &str) -> Result<String, SupabaseError>;
    async fn insert_inventory(&self, row: &InventoryRow) -> Result<Value, SupabaseError>;
    async fn delete_catalog(&self, catalog_id: &str) -> Result<(), SupabaseError>;
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ProfileTier {
    tier: Option<String>,
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(base_url, service_key))
    }

    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            http: build_client(),
        }
    }

    fn rest(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, SupabaseError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Request(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, SupabaseError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))
    }

    /// Resolves a user access token to the user's id. `None` when the token is
    /// rejected.
    pub async fn user_id_for_token(&self, access_token: &str) -> Result<Option<String>, SupabaseError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;
        if matches!(response.status().as_u16(), 401 | 403) {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SupabaseError::Request(format!("HTTP {}", response.status())));
        }
        let user: AuthUser = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        Ok(Some(user.id))
    }
}

#[async_trait]
impl VocabularySource for SupabaseClient {
    async fn get_types(&self, enum_type: &str) -> Result<Vec<String>, SupabaseError> {
        let values: Vec<Value> = self
            .send_json(
                self.http
                    .post(self.rest("rpc/get_types"))
                    .json(&json!({ "enum_type": enum_type })),
            )
            .await?;
        let types = flatten_types(values);
        debug!(target = "furniflip.supabase", enum_type, count = types.len(), "types loaded");
        Ok(types)
    }
}

/// Accepts both `["a", "b"]` and `[{"get_types": "a"}, ...]` shapes.
fn flatten_types(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::String(s) => Some(s),
            Value::Object(map) => map.into_values().find_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            }),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl CatalogStore for SupabaseClient {
    async fn seller_tier(&self, seller_id: &str) -> Result<String, SupabaseError> {
        let mut rows: Vec<ProfileTier> = self
            .send_json(self.http.get(self.rest("profiles")).query(&[
                ("id", format!("eq.{seller_id}")),
                ("select", "tier".to_string()),
                ("limit", "1".to_string()),
            ]))
            .await?;
        let profile = rows
            .pop()
            .ok_or_else(|| SupabaseError::NotFound(format!("profile {seller_id}")))?;
        Ok(profile.tier.unwrap_or_default().to_lowercase())
    }

    async fn inventory_count(&self, seller_id: &str) -> Result<usize, SupabaseError> {
        let response = self
            .send(
                self.http
                    .head(self.rest("inventory"))
                    .query(&[
                        ("seller_id", format!("eq.{seller_id}")),
                        ("select", "id".to_string()),
                    ])
                    .header("Prefer", "count=exact"),
            )
            .await?;
        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SupabaseError::Deserialize("missing content-range".into()))?;
        parse_content_range_total(range)
            .ok_or_else(|| SupabaseError::Deserialize(format!("bad content-range `{range}`")))
    }

    async fn create_catalog(&self, seller_id: &str) -> Result<String, SupabaseError> {
        let mut rows: Vec<Value> = self
            .send_json(
                self.http
                    .post(self.rest("catalogs"))
                    .header("Prefer", "return=representation")
                    .json(&json!({ "seller_id": seller_id })),
            )
            .await?;
        let row = rows
            .pop()
            .ok_or_else(|| SupabaseError::Deserialize("catalog insert returned no row".into()))?;
        match &row["id"] {
            Value::String(id) => Ok(id.clone()),
            Value::Number(id) => Ok(id.to_string()),
            _ => Err(SupabaseError::Deserialize("catalog row has no id".into())),
        }
    }

    async fn insert_inventory(&self, row: &InventoryRow) -> Result<Value, SupabaseError> {
        let mut rows: Vec<Value> = self
            .send_json(
                self.http
                    .post(self.rest("inventory"))
                    .header("Prefer", "return=representation")
                    .json(row),
            )
            .await?;
        rows.pop()
            .ok_or_else(|| SupabaseError::Deserialize("inventory insert returned no row".into()))
    }

    async fn delete_catalog(&self, catalog_id: &str) -> Result<(), SupabaseError> {
        self.send(
            self.http
                .delete(self.rest("catalogs"))
                .query(&[("id", format!("eq.{catalog_id}"))]),
        )
        .await?;
        Ok(())
    }
}

/// Total from a PostgREST `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range_total(range: &str) -> Option<usize> {
    range.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[test]
    fn types_accept_plain_and_keyed_rows() {
        let plain = vec![json!("Furniture"), json!("Decor")];
        assert_eq!(flatten_types(plain), vec!["Furniture", "Decor"]);
        let keyed = vec![json!({"get_types": "New"}), json!({"get_types": "Good"}), json!(3)];
        assert_eq!(flatten_types(keyed), vec!["New", "Good"]);
    }

    #[test]
    fn rest_urls_drop_trailing_slash() {
        let client = SupabaseClient::new("https://db.test/", "key");
        assert_eq!(client.rest("rpc/get_types"), "https://db.test/rest/v1/rpc/get_types");
    }
}
