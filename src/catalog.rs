//! Seller catalogs: tier-limited inventory runs persisted to Supabase.

use crate::matcher::parse_price;
use crate::models::{CatalogResponse, InventoryInfo, InventoryRow};
use crate::pipeline::{InventoryPipeline, PipelineError};
use crate::supabase::{CatalogStore, SupabaseError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("seller with tier {tier} is limited to {limit} items in inventory. Current count: {current}")]
    LimitExceeded {
        tier: String,
        limit: usize,
        current: usize,
    },
    #[error("{0} is not set")]
    MissingLimit(&'static str),
    #[error(transparent)]
    Store(#[from] SupabaseError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<CatalogError> for PipelineError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::LimitExceeded { .. } => PipelineError::invalid_input("tier_limit", err.to_string()),
            CatalogError::Pipeline(inner) => inner,
            other => PipelineError::internal("catalog", other.to_string()),
        }
    }
}

/// Inventory caps per subscription tier. `None` means the tier's limit
/// variable is unset; tiers other than free and basic are unlimited.
#[derive(Debug, Clone, Default)]
pub struct TierLimits {
    pub free: Option<usize>,
    pub basic: Option<usize>,
}

impl TierLimits {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().and_then(|v| v.trim().parse().ok());
        Self {
            free: read("FREE_INVENTORY_LIMIT"),
            basic: read("BASIC_INVENTORY_LIMIT"),
        }
    }

    pub fn limit_for(&self, tier: &str) -> Result<usize, CatalogError> {
        match tier {
            "free" => self.free.ok_or(CatalogError::MissingLimit("FREE_INVENTORY_LIMIT")),
            "basic" => self.basic.ok_or(CatalogError::MissingLimit("BASIC_INVENTORY_LIMIT")),
            _ => Ok(usize::MAX),
        }
    }
}

pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    pipeline: InventoryPipeline,
    limits: TierLimits,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, pipeline: InventoryPipeline, limits: TierLimits) -> Self {
        Self {
            store,
            pipeline,
            limits,
        }
    }

    /// Creates a catalog for `seller_id` from `image_urls`. The catalog row is
    /// removed again if anything after its creation fails.
    pub async fn create_catalog(
        &self,
        seller_id: &str,
        image_urls: &[String],
    ) -> Result<CatalogResponse, PipelineError> {
        let (tier, limit) = self.tier_and_limit(seller_id).await?;
        let current = self.store.inventory_count(seller_id).await.map_err(CatalogError::from)?;
        if current.saturating_add(image_urls.len()) > limit {
            return Err(CatalogError::LimitExceeded {
                tier,
                limit,
                current,
            }
            .into());
        }

        let catalog_id = self
            .store
            .create_catalog(seller_id)
            .await
            .map_err(CatalogError::from)?;
        info!(target = "furniflip.catalog", seller_id, catalog_id = %catalog_id, images = image_urls.len(), "catalog created");

        match self.fill_catalog(seller_id, &catalog_id, image_urls).await {
            Ok(rows) => Ok(CatalogResponse {
                catalog_id,
                produced: rows.len(),
                submitted: image_urls.len(),
                items: rows,
            }),
            Err(err) => {
                error!(target = "furniflip.catalog", seller_id, catalog_id = %catalog_id, error = %err, "catalog creation failed");
                if let Err(cleanup) = self.store.delete_catalog(&catalog_id).await {
                    warn!(target = "furniflip.catalog", catalog_id = %catalog_id, error = %cleanup, "catalog rollback failed");
                }
                Err(err.into())
            }
        }
    }

    async fn tier_and_limit(&self, seller_id: &str) -> Result<(String, usize), CatalogError> {
        let tier = self.store.seller_tier(seller_id).await?;
        let limit = self.limits.limit_for(&tier)?;
        Ok((tier, limit))
    }

    async fn fill_catalog(
        &self,
        seller_id: &str,
        catalog_id: &str,
        image_urls: &[String],
    ) -> Result<Vec<serde_json::Value>, CatalogError> {
        let items = self.pipeline.inventory_agent(image_urls).await?;
        let mut inserted = Vec::with_capacity(items.len());
        for item in &items {
            let (tier, limit) = self.tier_and_limit(seller_id).await?;
            let current = self.store.inventory_count(seller_id).await?;
            if current >= limit {
                return Err(CatalogError::LimitExceeded {
                    tier,
                    limit,
                    current,
                });
            }
            let row = inventory_row(item, catalog_id, seller_id);
            inserted.push(self.store.insert_inventory(&row).await?);
        }
        Ok(inserted)
    }
}

pub fn inventory_row(item: &InventoryInfo, catalog_id: &str, seller_id: &str) -> InventoryRow {
    let price = parse_price(&item.price);
    InventoryRow {
        title: item.name.clone(),
        price: price.is_finite().then_some(price),
        category: item.category.clone(),
        image_url: item.image_url.clone(),
        similar_url: item.similar_url.clone(),
        condition: item.condition.clone(),
        description: item.description.clone(),
        catalog_id: catalog_id.to_string(),
        seller_id: seller_id.to_string(),
    }
}
