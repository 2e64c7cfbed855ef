//! Missing-part aggregation: one counter-bearing record per distinct
//! query identity, updated under a per-identity lock so counters stay
//! correct under concurrent callers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;
use wpp_core::{
    MissingPartRecord, MissingSource, MissingStatus, PortalError, Requester, Result,
};
use wpp_search::normalize;
use wpp_storage::{MissingPartStore, StoreError};

pub const CRATE_NAME: &str = "wpp-registry";

/// Dedupe fingerprint for a missing query. Queries whose normalized key
/// is a reliable part fingerprint bucket by that key; short or empty
/// keys fall back to the trimmed lowercased literal so unrelated short
/// queries never collapse into one record.
pub fn missing_identity(query: &str) -> String {
    let normalized = normalize(query);
    if normalized.is_significant() {
        format!("pn:{}", normalized.key)
    } else {
        format!("txt:{}", query.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub quote_request_id: Option<String>,
    /// Catalog name/brand when the query matched a product that was
    /// merely out of stock, so admins see what the demand refers to.
    pub resolved_name: Option<String>,
    pub resolved_brand: Option<String>,
}

/// Aggregates missing-part occurrences through a [`MissingPartStore`].
///
/// The read-modify-write upsert for a given identity runs under that
/// identity's async mutex, so interleaved callers can never lose a
/// counter increment or a customer-set insertion.
pub struct MissingPartRegistry<S> {
    store: Arc<S>,
    /// Weak-value map: an identity's mutex lives only while some caller
    /// holds it, so a flood of one-off queries cannot grow this
    /// unboundedly. Dead entries are pruned on the next miss.
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl<S: MissingPartStore> MissingPartRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if let Some(existing) = locks.get(identity).and_then(Weak::upgrade) {
            return existing;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let fresh = Arc::new(Mutex::new(()));
        locks.insert(identity.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    /// Record one occurrence of an unmatched or under-stocked query.
    ///
    /// First occurrence creates the record with counters at 1 and status
    /// `New`; later occurrences of the same identity increment
    /// `total_requests`, grow the customer set, and refresh
    /// `last_requested_at`. A `Quote` occurrence upgrades a
    /// search-originated record and attaches the quote request id.
    /// Never fails for well-formed string input; anonymous requesters
    /// count under the guest sentinel.
    pub async fn record_missing(
        &self,
        query: &str,
        requester: &Requester,
        source: MissingSource,
        opts: RecordOptions,
    ) -> Result<MissingPartRecord> {
        let identity = missing_identity(query);
        let key_lock = self.lock_for(&identity).await;
        let _serialized = key_lock.lock().await;

        let now = Utc::now();
        let record = match self
            .store
            .missing_by_identity(&identity)
            .await
            .map_err(store_unavailable)?
        {
            Some(mut record) => {
                record.total_requests += 1;
                record
                    .customer_ids
                    .insert(requester.effective_id().to_string());
                record.last_requested_at = now;
                if source == MissingSource::Quote {
                    record.source = MissingSource::Quote;
                    if opts.quote_request_id.is_some() {
                        record.quote_request_id = opts.quote_request_id;
                    }
                }
                if opts.resolved_name.is_some() {
                    record.resolved_name = opts.resolved_name;
                }
                if opts.resolved_brand.is_some() {
                    record.resolved_brand = opts.resolved_brand;
                }
                record
            }
            None => MissingPartRecord {
                id: Uuid::new_v4(),
                query_text: query.trim().to_string(),
                identity: identity.clone(),
                resolved_name: opts.resolved_name,
                resolved_brand: opts.resolved_brand,
                status: MissingStatus::New,
                source,
                quote_request_id: opts.quote_request_id,
                total_requests: 1,
                customer_ids: BTreeSet::from([requester.effective_id().to_string()]),
                admin_notes: None,
                first_requested_at: now,
                last_requested_at: now,
            },
        };

        self.store
            .save_missing(&record)
            .await
            .map_err(store_unavailable)?;
        debug!(
            identity = %record.identity,
            total = record.total_requests,
            unique = record.unique_customers(),
            "missing part occurrence recorded"
        );
        Ok(record)
    }

    /// Admin transition: set workflow status and optionally replace
    /// notes. This is the only path to the terminal statuses.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: MissingStatus,
        notes: Option<String>,
    ) -> Result<MissingPartRecord> {
        let found = self
            .store
            .missing_by_id(id)
            .await
            .map_err(store_unavailable)?
            .ok_or(PortalError::MissingRecordNotFound)?;

        let key_lock = self.lock_for(&found.identity).await;
        let _serialized = key_lock.lock().await;

        // Re-read under the lock so a concurrent occurrence upsert is
        // not overwritten with the stale pre-lock snapshot.
        let mut record = self
            .store
            .missing_by_identity(&found.identity)
            .await
            .map_err(store_unavailable)?
            .ok_or(PortalError::MissingRecordNotFound)?;
        record.status = status;
        if notes.is_some() {
            record.admin_notes = notes;
        }
        self.store
            .save_missing(&record)
            .await
            .map_err(store_unavailable)?;
        Ok(record)
    }

    /// All records ordered by demand: total requests, then recency.
    pub async fn by_demand(&self) -> Result<Vec<MissingPartRecord>> {
        let mut records = self
            .store
            .list_missing()
            .await
            .map_err(store_unavailable)?;
        records.sort_by(|a, b| {
            b.total_requests
                .cmp(&a.total_requests)
                .then(b.last_requested_at.cmp(&a.last_requested_at))
        });
        Ok(records)
    }
}

fn store_unavailable(err: StoreError) -> PortalError {
    PortalError::StorageUnavailable(err.to_string())
}
