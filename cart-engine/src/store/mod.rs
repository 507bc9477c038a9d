//! The tenant-scoped document store (C1): one namespace/database pair per
//! tenant over an embedded surrealdb instance, selected before every query
//! (§6.4), with a generic optimistic-retry helper used by every CAS-style
//! write (§6.4's exponential back-off table).
//!
//! Grounded on the teacher's `db/repository/*` style — `.query().bind().take(0)`
//! for ad-hoc reads, `.select((table, id))` for point lookups — generalized
//! from the teacher's per-entity repositories into one tenant-scoped client
//! shared by every component that persists documents (C1, C4, C9, C10, C11).

mod retry;

pub use retry::{with_optimistic_retry, RetryConfig};

use std::sync::Arc;

use pos_shared::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use surrealdb::engine::local::{Db, RocksDb};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

/// Wraps a connected, unauthenticated-by-default local surrealdb engine.
/// Tenant isolation is namespace + database, not credentials — this
/// mirrors the teacher's embedded-engine usage (`kv-rocksdb`) rather than
/// a multi-tenant cloud cluster, appropriate for the illustrative scope
/// of this store.
#[derive(Clone)]
pub struct TenantStore {
    db: Arc<Surreal<Db>>,
    namespace_prefix: String,
}

impl TenantStore {
    pub async fn connect(work_dir: &str, namespace_prefix: impl Into<String>) -> AppResult<Self> {
        let db = Surreal::new::<RocksDb>(work_dir)
            .await
            .map_err(|e| AppError::internal(format!("failed to open document store: {e}")))?;
        // A single root login guards the whole embedded instance; tenant
        // separation happens at the namespace/database level below.
        let _ = db
            .signin(Root { username: "root", password: "root" })
            .await;
        Ok(Self {
            db: Arc::new(db),
            namespace_prefix: namespace_prefix.into(),
        })
    }

    /// Select the tenant's namespace/database pair (§6.4: "tenant-scoped
    /// databases named by a fixed prefix plus tenantId"). Cheap; safe to
    /// call before every tenant-scoped operation since `Surreal` is
    /// connection-pool-backed internally.
    async fn scope(&self, tenant_id: &str) -> AppResult<()> {
        let database = format!("{}_{tenant_id}", self.namespace_prefix);
        self.db
            .use_ns(&self.namespace_prefix)
            .use_db(&database)
            .await
            .map_err(|e| AppError::upstream(format!("failed to select tenant scope: {e}")))?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, tenant_id: &str, table: &str, id: &str) -> AppResult<Option<T>> {
        self.scope(tenant_id).await?;
        self.db
            .select((table, id))
            .await
            .map_err(|e| AppError::upstream(format!("document store read failed: {e}")))
    }

    pub async fn put<T: Serialize + 'static>(&self, tenant_id: &str, table: &str, id: &str, value: T) -> AppResult<()> {
        self.scope(tenant_id).await?;
        let _: Option<T> = self
            .db
            .upsert((table, id))
            .content(value)
            .await
            .map_err(|e| AppError::upstream(format!("document store write failed: {e}")))?;
        Ok(())
    }

    /// Run a raw query returning rows from the first statement's result set
    /// (the `.take(0)` idiom).
    pub async fn query<T: DeserializeOwned>(
        &self,
        tenant_id: &str,
        sql: &str,
        bindings: Vec<(&str, serde_json::Value)>,
    ) -> AppResult<Vec<T>> {
        self.scope(tenant_id).await?;
        let mut q = self.db.query(sql);
        for (key, value) in bindings {
            q = q.bind((key.to_string(), value));
        }
        let mut response = q
            .await
            .map_err(|e| AppError::upstream(format!("document store query failed: {e}")))?;
        response
            .take(0)
            .map_err(|e| AppError::upstream(format!("document store query decode failed: {e}")))
    }

    /// Compare-and-swap write guarded by the ambient entity tag (§3, §6.4):
    /// the write only lands if the stored document's `ambient.version`
    /// still matches `expected_version`. Used by the state machine's
    /// lost-update guard and by C9's void/return tombstoning (§4.4).
    pub async fn cas_put<T: Serialize + DeserializeOwned + 'static>(
        &self,
        tenant_id: &str,
        table: &str,
        id: &str,
        expected_version: i64,
        value: T,
    ) -> AppResult<()> {
        self.scope(tenant_id).await?;
        let mut response = self
            .db
            .query("UPDATE type::thing($tb, $id) CONTENT $value WHERE ambient.version = $expected RETURN AFTER")
            .bind(("tb", table.to_string()))
            .bind(("id", id.to_string()))
            .bind(("value", value))
            .bind(("expected", expected_version))
            .await
            .map_err(|e| AppError::upstream(format!("cas update failed: {e}")))?;
        let rows: Vec<T> = response
            .take(0)
            .map_err(|e| AppError::upstream(format!("cas decode failed: {e}")))?;
        if rows.is_empty() {
            return Err(AppError::concurrent_modification(id));
        }
        Ok(())
    }

    /// Atomically advance a named counter and return its new value (§4.4,
    /// §5: "strictly monotonic and gap-free" per `(terminal, businessDate)`).
    /// `UPSERT ... SET value += 1` is evaluated server-side as a single
    /// statement, so concurrent callers never observe the same value twice.
    pub async fn next_counter(&self, tenant_id: &str, counter_id: &str) -> AppResult<i64> {
        self.scope(tenant_id).await?;
        let mut response = self
            .db
            .query("UPSERT counter SET value = (value ?? 0) + 1 WHERE id = $id RETURN VALUE value")
            .bind(("id", surrealdb::sql::Thing::from(("counter", counter_id))))
            .await
            .map_err(|e| AppError::upstream(format!("counter increment failed: {e}")))?;
        let values: Vec<i64> = response
            .take(0)
            .map_err(|e| AppError::upstream(format!("counter decode failed: {e}")))?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| AppError::internal(format!("counter {counter_id} returned no value")))
    }

    /// Declare the secondary indexes C1 requires, run once at tenant
    /// provisioning (analogous to the teacher's `surrealdb-migrations`
    /// usage): `(terminalRef, businessDate)` for transaction lookup and
    /// `eventId` for the delivery ledger.
    pub async fn provision_indexes(&self, tenant_id: &str) -> AppResult<()> {
        self.scope(tenant_id).await?;
        let statements = [
            "DEFINE INDEX IF NOT EXISTS tx_by_terminal_date ON TABLE transaction COLUMNS terminal_ref, session.business_date",
            "DEFINE INDEX IF NOT EXISTS delivery_by_event ON TABLE delivery_status COLUMNS event_id UNIQUE",
            "DEFINE INDEX IF NOT EXISTS journal_by_terminal_date ON TABLE journal_entry COLUMNS terminal_ref, session.business_date",
        ];
        for stmt in statements {
            self.db
                .query(stmt)
                .await
                .map_err(|e| AppError::upstream(format!("index provisioning failed: {e}")))?;
        }
        Ok(())
    }
}
