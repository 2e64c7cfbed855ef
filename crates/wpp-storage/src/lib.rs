//! Storage collaborator traits and the in-memory reference store.
//!
//! The search and registry crates only ever see these traits; swapping
//! the in-memory store for a real datastore is a caller decision.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;
use wpp_core::{MissingPartRecord, Product};

pub const CRATE_NAME: &str = "wpp-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the product catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn all_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Monotonic counter bumped on every catalog write. Index caches key
    /// rebuilds on it so they can never serve a catalog that has moved.
    async fn catalog_version(&self) -> Result<u64, StoreError>;
}

/// Persistence for missing-part aggregate records, keyed by identity
/// fingerprint. `save_missing` is a whole-record upsert.
#[async_trait]
pub trait MissingPartStore: Send + Sync {
    async fn missing_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<MissingPartRecord>, StoreError>;

    async fn missing_by_id(&self, id: Uuid) -> Result<Option<MissingPartRecord>, StoreError>;

    async fn save_missing(&self, record: &MissingPartRecord) -> Result<(), StoreError>;

    async fn list_missing(&self) -> Result<Vec<MissingPartRecord>, StoreError>;
}

/// Admin-configured numeric settings consumed by the search pipeline.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn visibility_threshold(&self) -> Result<i64, StoreError>;

    async fn min_visible_quantity(&self) -> Result<i64, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSettings {
    /// Direct lookups at or below this quantity report out-of-stock.
    #[serde(default)]
    pub visibility_threshold: i64,
    /// Browse results exclude products below this quantity entirely.
    #[serde(default = "default_min_visible_quantity")]
    pub min_visible_quantity: i64,
}

fn default_min_visible_quantity() -> i64 {
    1
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            visibility_threshold: 0,
            min_visible_quantity: default_min_visible_quantity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default)]
    pub settings: PortalSettings,
}

fn default_bind_port() -> u16 {
    8000
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bind_port: default_bind_port(),
            catalog_path: None,
            settings: PortalSettings::default(),
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_port: std::env::var("WPP_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_port),
            catalog_path: std::env::var("WPP_CATALOG_PATH").ok().map(PathBuf::from),
            settings: PortalSettings {
                visibility_threshold: std::env::var("WPP_VISIBILITY_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.settings.visibility_threshold),
                min_visible_quantity: std::env::var("WPP_MIN_VISIBLE_QUANTITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.settings.min_visible_quantity),
            },
        }
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Reference store: everything behind tokio RwLocks, catalog version
/// bumped atomically on writes.
pub struct MemoryStore {
    products: RwLock<Vec<Product>>,
    version: AtomicU64,
    missing: RwLock<HashMap<String, MissingPartRecord>>,
    settings: RwLock<PortalSettings>,
}

impl MemoryStore {
    pub fn new(settings: PortalSettings) -> Self {
        Self {
            products: RwLock::new(Vec::new()),
            version: AtomicU64::new(1),
            missing: RwLock::new(HashMap::new()),
            settings: RwLock::new(settings),
        }
    }

    pub async fn replace_catalog(&self, products: Vec<Product>) {
        let count = products.len();
        *self.products.write().await = products;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(count, version, "catalog replaced");
    }

    /// Seed the catalog from a JSON array of products.
    pub async fn load_catalog_json(&self, path: &Path) -> anyhow::Result<usize> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let products: Vec<Product> =
            serde_json::from_str(&text).with_context(|| format!("parsing catalog {}", path.display()))?;
        let count = products.len();
        self.replace_catalog(products).await;
        Ok(count)
    }

    pub async fn update_settings(&self, settings: PortalSettings) {
        *self.settings.write().await = settings;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(PortalSettings::default())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn all_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.products.read().await.clone())
    }

    async fn catalog_version(&self) -> Result<u64, StoreError> {
        Ok(self.version.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MissingPartStore for MemoryStore {
    async fn missing_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<MissingPartRecord>, StoreError> {
        Ok(self.missing.read().await.get(identity).cloned())
    }

    async fn missing_by_id(&self, id: Uuid) -> Result<Option<MissingPartRecord>, StoreError> {
        Ok(self
            .missing
            .read()
            .await
            .values()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn save_missing(&self, record: &MissingPartRecord) -> Result<(), StoreError> {
        self.missing
            .write()
            .await
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn list_missing(&self) -> Result<Vec<MissingPartRecord>, StoreError> {
        Ok(self.missing.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn visibility_threshold(&self) -> Result<i64, StoreError> {
        Ok(self.settings.read().await.visibility_threshold)
    }

    async fn min_visible_quantity(&self) -> Result<i64, StoreError> {
        Ok(self.settings.read().await.min_visible_quantity)
    }
}
