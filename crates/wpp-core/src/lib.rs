//! Core domain model for the Wholesale Parts Portal.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "wpp-core";

/// Sentinel customer id used when a requester has no account.
pub const GUEST_CUSTOMER_ID: &str = "guest";

/// Catalog product as read from the storage collaborator.
///
/// The search pipeline only reads these fields; derived matching keys
/// live in the index entries, never written back onto the product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub part_number: String,
    pub name: String,
    #[serde(default)]
    pub name_ar: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    pub price: f64,
    /// Explicit total-on-hand quantity. Preferred over `stock` when present.
    #[serde(default)]
    pub quantity_total: Option<i64>,
    /// Legacy stock field; some imports only carry this one.
    #[serde(default)]
    pub stock: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Resolve the quantity a caller may act on: `quantity_total`, else
    /// `stock`, else 0. This is the single fallback chain for the whole
    /// workspace; inline `a ?? b ?? 0` chains elsewhere are a bug.
    pub fn available_quantity(&self) -> i64 {
        self.quantity_total.or(self.stock).unwrap_or(0)
    }
}

/// Outcome of one part-number lookup. Exactly one variant per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    FoundAvailable {
        product: Product,
    },
    FoundOutOfStock {
        product: Product,
        message: String,
    },
    NotFound {
        query: String,
        message: String,
    },
}

impl SearchOutcome {
    pub fn not_found(query: &str) -> Self {
        Self::NotFound {
            query: query.to_string(),
            message: format!("No product matches \"{}\"", query.trim()),
        }
    }

    pub fn matched_product(&self) -> Option<&Product> {
        match self {
            Self::FoundAvailable { product } | Self::FoundOutOfStock { product, .. } => {
                Some(product)
            }
            Self::NotFound { .. } => None,
        }
    }

    /// True for the outcomes that should feed the missing-part registry.
    pub fn is_unfulfilled(&self) -> bool {
        !matches!(self, Self::FoundAvailable { .. })
    }
}

/// Workflow state of a missing-part record. `AddedToStock` and `Ignored`
/// are terminal and only ever set through the admin transition API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStatus {
    New,
    UnderReview,
    OrderPlanned,
    Ordered,
    AddedToStock,
    Ignored,
}

impl MissingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AddedToStock | Self::Ignored)
    }
}

/// Where a missing-part occurrence came from. Quote-originated signals
/// outrank ambient search noise, so `Quote` wins on upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSource {
    Search,
    Quote,
}

/// Aggregate record for one distinct unmatched query identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingPartRecord {
    pub id: Uuid,
    /// Raw text of the first occurrence, kept for display.
    pub query_text: String,
    /// Dedupe fingerprint: `pn:<normalized key>` or `txt:<literal>`.
    pub identity: String,
    #[serde(default)]
    pub resolved_name: Option<String>,
    #[serde(default)]
    pub resolved_brand: Option<String>,
    pub status: MissingStatus,
    pub source: MissingSource,
    #[serde(default)]
    pub quote_request_id: Option<String>,
    pub total_requests: u64,
    /// Deduplicated requesting customer ids; `unique_customers()` is its size.
    pub customer_ids: BTreeSet<String>,
    #[serde(default)]
    pub admin_notes: Option<String>,
    pub first_requested_at: DateTime<Utc>,
    pub last_requested_at: DateTime<Utc>,
}

impl MissingPartRecord {
    pub fn unique_customers(&self) -> usize {
        self.customer_ids.len()
    }
}

/// Requester attached to a missing-part occurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requester {
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
}

impl Requester {
    pub fn guest() -> Self {
        Self::default()
    }

    /// Effective id for deduplication; empty/absent ids collapse to the
    /// guest sentinel rather than erroring, since anonymous browsing is a
    /// supported flow.
    pub fn effective_id(&self) -> &str {
        match self.customer_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id,
            _ => GUEST_CUSTOMER_ID,
        }
    }
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("missing-part record not found")]
    MissingRecordNotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_product(quantity_total: Option<i64>, stock: Option<i64>) -> Product {
        Product {
            id: Uuid::new_v4(),
            part_number: "CN-102030".into(),
            name: "Front Brake Pads".into(),
            name_ar: None,
            brand: Some("Acme".into()),
            price: 19.5,
            quantity_total,
            stock,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn quantity_prefers_explicit_total_over_stock() {
        assert_eq!(mk_product(Some(7), Some(99)).available_quantity(), 7);
        assert_eq!(mk_product(None, Some(99)).available_quantity(), 99);
        assert_eq!(mk_product(None, None).available_quantity(), 0);
    }

    #[test]
    fn quantity_total_zero_is_not_a_fallback_trigger() {
        // An explicit zero means zero; it must not fall through to stock.
        assert_eq!(mk_product(Some(0), Some(50)).available_quantity(), 0);
    }

    #[test]
    fn guest_sentinel_covers_absent_and_blank_ids() {
        assert_eq!(Requester::guest().effective_id(), GUEST_CUSTOMER_ID);
        let blank = Requester {
            customer_id: Some("   ".into()),
            customer_name: None,
        };
        assert_eq!(blank.effective_id(), GUEST_CUSTOMER_ID);
        let real = Requester {
            customer_id: Some("cust-7".into()),
            customer_name: None,
        };
        assert_eq!(real.effective_id(), "cust-7");
    }

    #[test]
    fn terminal_statuses_are_exactly_added_and_ignored() {
        assert!(MissingStatus::AddedToStock.is_terminal());
        assert!(MissingStatus::Ignored.is_terminal());
        for s in [
            MissingStatus::New,
            MissingStatus::UnderReview,
            MissingStatus::OrderPlanned,
            MissingStatus::Ordered,
        ] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn unfulfilled_outcomes_feed_the_registry() {
        let p = mk_product(Some(3), None);
        assert!(!SearchOutcome::FoundAvailable { product: p.clone() }.is_unfulfilled());
        assert!(SearchOutcome::FoundOutOfStock {
            product: p,
            message: "out of stock".into()
        }
        .is_unfulfilled());
        assert!(SearchOutcome::not_found("CN-999999").is_unfulfilled());
    }
}
