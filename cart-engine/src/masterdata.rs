//! The master-data / terminal cache (C5): a read-through, process-wide,
//! read-mostly cache over item, tax, payment, and terminal metadata.
//! Master-data CRUD itself is out of scope (§1 non-goal) — this module
//! only caches lookups against a `MasterDataSource` a real deployment
//! would back with the tenant document store or an external catalog
//! service.
//!
//! Invalidation is TTL-based plus an explicit `invalidate` hook for
//! update-triggered eviction (§5), mirroring the teacher's `rule_cache`
//! pattern generalized to four lookup kinds instead of one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use pos_shared::cart::TaxKind;
use pos_shared::money::RoundingMode;
use pos_shared::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMeta {
    pub item_code: String,
    pub description: String,
    pub unit_price: f64,
    pub tax_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxCodeMeta {
    pub tax_code: String,
    pub kind: TaxKind,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalMeta {
    pub rounding_mode: RoundingMode,
}

/// The upstream authority this cache reads through to on a miss. A real
/// deployment backs this with the item-catalog/tax-code/terminal-registry
/// services named as external collaborators in §1; tests provide an
/// in-memory stub seeded with fixtures.
#[async_trait]
pub trait MasterDataSource: Send + Sync {
    async fn load_item(&self, tenant_id: &str, item_code: &str) -> AppResult<ItemMeta>;
    async fn load_tax_code(&self, tenant_id: &str, tax_code: &str) -> AppResult<TaxCodeMeta>;
    async fn load_terminal(&self, tenant_id: &str, terminal_no: &str) -> AppResult<TerminalMeta>;
}

struct Cached<T> {
    value: T,
    expires_at: Instant,
}

const DEFAULT_TTL: Duration = Duration::from_secs(300);

pub struct MasterDataCache {
    source: Arc<dyn MasterDataSource>,
    items: DashMap<String, Cached<ItemMeta>>,
    tax_codes: DashMap<String, Cached<TaxCodeMeta>>,
    terminals: DashMap<String, Cached<TerminalMeta>>,
    ttl: Duration,
}

fn scoped_key(tenant_id: &str, code: &str) -> String {
    format!("{tenant_id}:{code}")
}

impl MasterDataCache {
    pub fn new(source: Arc<dyn MasterDataSource>) -> Self {
        Self {
            source,
            items: DashMap::new(),
            tax_codes: DashMap::new(),
            terminals: DashMap::new(),
            ttl: DEFAULT_TTL,
        }
    }

    pub async fn item(&self, tenant_id: &str, item_code: &str) -> AppResult<ItemMeta> {
        let key = scoped_key(tenant_id, item_code);
        if let Some(entry) = self.items.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.value.clone());
            }
        }
        let value = self
            .source
            .load_item(tenant_id, item_code)
            .await
            .map_err(|_| AppError::new(pos_shared::ErrorCode::ValidationFailed, format!("unknown item code {item_code}")))?;
        self.items.insert(key, Cached { value: value.clone(), expires_at: Instant::now() + self.ttl });
        Ok(value)
    }

    pub async fn tax_code(&self, tenant_id: &str, tax_code: &str) -> AppResult<TaxCodeMeta> {
        let key = scoped_key(tenant_id, tax_code);
        if let Some(entry) = self.tax_codes.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.value.clone());
            }
        }
        let value = self.source.load_tax_code(tenant_id, tax_code).await.map_err(|_| {
            AppError::new(pos_shared::ErrorCode::UnknownTaxCode, format!("unknown tax code {tax_code}"))
        })?;
        self.tax_codes.insert(key, Cached { value: value.clone(), expires_at: Instant::now() + self.ttl });
        Ok(value)
    }

    pub async fn terminal(&self, tenant_id: &str, terminal_no: &str) -> AppResult<TerminalMeta> {
        let key = scoped_key(tenant_id, terminal_no);
        if let Some(entry) = self.terminals.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.value.clone());
            }
        }
        let value = self.source.load_terminal(tenant_id, terminal_no).await?;
        self.terminals.insert(key, Cached { value: value.clone(), expires_at: Instant::now() + self.ttl });
        Ok(value)
    }

    /// Explicit invalidate-on-update hook (§5) — called by the (external,
    /// out-of-scope) master-data admin surface when an item/tax/terminal
    /// record changes.
    pub fn invalidate_item(&self, tenant_id: &str, item_code: &str) {
        self.items.remove(&scoped_key(tenant_id, item_code));
    }

    pub fn invalidate_tax_code(&self, tenant_id: &str, tax_code: &str) {
        self.tax_codes.remove(&scoped_key(tenant_id, tax_code));
    }

    pub fn invalidate_terminal(&self, tenant_id: &str, terminal_no: &str) {
        self.terminals.remove(&scoped_key(tenant_id, terminal_no));
    }
}

/// Default `MasterDataSource` backing the cache in a real deployment:
/// reads item/tax-code/terminal records out of the same tenant document
/// store everything else persists to, since master-data CRUD itself is
/// out of scope (§1) and no external catalog service is assumed.
pub struct DocumentMasterDataSource {
    store: crate::store::TenantStore,
}

impl DocumentMasterDataSource {
    pub fn new(store: crate::store::TenantStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MasterDataSource for DocumentMasterDataSource {
    async fn load_item(&self, tenant_id: &str, item_code: &str) -> AppResult<ItemMeta> {
        self.store
            .get(tenant_id, "item", item_code)
            .await?
            .ok_or_else(|| AppError::new(pos_shared::ErrorCode::ValidationFailed, format!("unknown item code {item_code}")))
    }

    async fn load_tax_code(&self, tenant_id: &str, tax_code: &str) -> AppResult<TaxCodeMeta> {
        self.store
            .get(tenant_id, "tax_code", tax_code)
            .await?
            .ok_or_else(|| AppError::new(pos_shared::ErrorCode::UnknownTaxCode, format!("unknown tax code {tax_code}")))
    }

    async fn load_terminal(&self, tenant_id: &str, terminal_no: &str) -> AppResult<TerminalMeta> {
        self.store
            .get(tenant_id, "terminal", terminal_no)
            .await?
            .ok_or_else(|| AppError::new(pos_shared::ErrorCode::ValidationFailed, format!("unknown terminal {terminal_no}")))
    }
}
