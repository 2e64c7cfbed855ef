//! Axum JSON API over the search pipeline, catalog, and missing-part
//! registry.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;
use wpp_core::{MissingPartRecord, MissingSource, MissingStatus, PortalError, Product, Requester};
use wpp_index::{paginate, Page};
use wpp_registry::{MissingPartRegistry, RecordOptions};
use wpp_search::{browse, search, IndexCache, ProductIndex, SearchContext};
use wpp_storage::{CatalogStore, MemoryStore, PortalConfig, SettingsStore, StoreError};

pub const CRATE_NAME: &str = "wpp-web";

/// Browse queries never materialize more than this many matches before
/// pagination.
const BROWSE_RESULT_CAP: usize = 200;

const DEFAULT_PER_PAGE: usize = 20;

pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub registry: MissingPartRegistry<MemoryStore>,
    index_cache: IndexCache,
}

impl AppState {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            registry: MissingPartRegistry::new(Arc::clone(&store)),
            index_cache: IndexCache::new(),
            store,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/search", get(search_handler))
        .route("/api/browse", get(browse_handler))
        .route("/api/products", get(products_handler))
        .route(
            "/api/missing",
            get(missing_list_handler).post(missing_record_handler),
        )
        .route("/api/missing/{id}/status", post(missing_status_handler))
        .route("/api/catalog/duplicates", get(duplicates_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, config: &PortalConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.bind_port)).await?;
    info!(port = config.bind_port, "wpp web API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Fetch the index for the store's current catalog version, reusing the
/// cached build when the catalog has not moved.
async fn current_index(state: &AppState) -> Result<Arc<ProductIndex>, StoreError> {
    let version = state.store.catalog_version().await?;
    if let Some(index) = state.index_cache.get(version) {
        return Ok(index);
    }
    let products = state.store.all_products().await?;
    Ok(state.index_cache.get_or_build(version, move || products))
}

fn storage_unavailable(err: StoreError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn portal_error(err: PortalError) -> Response {
    let status = match &err {
        PortalError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortalError::MissingRecordNotFound => StatusCode::NOT_FOUND,
        PortalError::InvalidInput(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn bad_request(message: &str) -> Response {
    portal_error(PortalError::InvalidInput(message.to_string()))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "wpp-web" }))
}

#[derive(Debug, Deserialize, Default)]
struct SearchQuery {
    q: Option<String>,
    customer_id: Option<String>,
}

/// Direct part-number lookup. Unfulfilled outcomes (not found or out of
/// stock) are also recorded as missing-part demand; a registry failure
/// is logged, never surfaced to the searching customer.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let Some(q) = query.q.filter(|q| !q.trim().is_empty()) else {
        return bad_request("query parameter q is required");
    };

    let index = match current_index(&state).await {
        Ok(index) => index,
        Err(err) => return storage_unavailable(err),
    };
    let visibility_threshold = match state.store.visibility_threshold().await {
        Ok(threshold) => threshold,
        Err(err) => return storage_unavailable(err),
    };

    let outcome = search(
        &index,
        &q,
        &SearchContext {
            visibility_threshold,
        },
    );

    if outcome.is_unfulfilled() {
        let requester = Requester {
            customer_id: query.customer_id,
            customer_name: None,
        };
        let opts = match outcome.matched_product() {
            Some(product) => RecordOptions {
                resolved_name: Some(product.name.clone()),
                resolved_brand: product.brand.clone(),
                ..RecordOptions::default()
            },
            None => RecordOptions::default(),
        };
        if let Err(err) = state
            .registry
            .record_missing(&q, &requester, MissingSource::Search, opts)
            .await
        {
            warn!(error = %err, query = %q, "failed to record missing-part occurrence");
        }
    }

    Json(outcome).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct BrowseQuery {
    q: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ProductPage {
    total: usize,
    page: Page,
    products: Vec<Product>,
}

/// Customer free-text browse: word-intersection results with near-empty
/// stock filtered out, paginated.
async fn browse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> Response {
    let q = query.q.unwrap_or_default();
    let index = match current_index(&state).await {
        Ok(index) => index,
        Err(err) => return storage_unavailable(err),
    };
    let min_visible = match state.store.min_visible_quantity().await {
        Ok(min) => min,
        Err(err) => return storage_unavailable(err),
    };

    let matches: Vec<Product> = browse(&index, &q, min_visible, BROWSE_RESULT_CAP)
        .into_iter()
        .cloned()
        .collect();
    let page = paginate(
        matches.len(),
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(DEFAULT_PER_PAGE),
    );
    Json(ProductPage {
        total: matches.len(),
        page,
        products: matches[page.start..page.end].to_vec(),
    })
    .into_response()
}

#[derive(Debug, Deserialize, Default)]
struct ProductsQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn products_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductsQuery>,
) -> Response {
    let mut products = match state.store.all_products().await {
        Ok(products) => products,
        Err(err) => return storage_unavailable(err),
    };
    products.sort_by(|a, b| a.part_number.cmp(&b.part_number));
    let page = paginate(
        products.len(),
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(DEFAULT_PER_PAGE),
    );
    Json(ProductPage {
        total: products.len(),
        page,
        products: products[page.start..page.end].to_vec(),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct MissingRow {
    #[serde(flatten)]
    record: MissingPartRecord,
    unique_customers: usize,
}

async fn missing_list_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.by_demand().await {
        Ok(records) => Json(
            records
                .into_iter()
                .map(|record| MissingRow {
                    unique_customers: record.unique_customers(),
                    record,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => portal_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct RecordMissingBody {
    query: String,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    source: Option<MissingSource>,
    #[serde(default)]
    quote_request_id: Option<String>,
}

/// Explicit recording entry point, used by the quote-request flow.
async fn missing_record_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecordMissingBody>,
) -> Response {
    if body.query.trim().is_empty() {
        return bad_request("query must not be empty");
    }
    let requester = Requester {
        customer_id: body.customer_id,
        customer_name: body.customer_name,
    };
    let source = body
        .source
        .unwrap_or(if body.quote_request_id.is_some() {
            MissingSource::Quote
        } else {
            MissingSource::Search
        });
    match state
        .registry
        .record_missing(
            &body.query,
            &requester,
            source,
            RecordOptions {
                quote_request_id: body.quote_request_id,
                ..RecordOptions::default()
            },
        )
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => portal_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: MissingStatus,
    #[serde(default)]
    notes: Option<String>,
}

async fn missing_status_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<StatusBody>,
) -> Response {
    match state.registry.set_status(id, body.status, body.notes).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => portal_error(err),
    }
}

/// Duplicate normalized-key audit: catalog rows silently shadowed by
/// last-write-wins indexing.
async fn duplicates_handler(State(state): State<Arc<AppState>>) -> Response {
    match current_index(&state).await {
        Ok(index) => Json(index.duplicates().to_vec()).into_response(),
        Err(err) => storage_unavailable(err),
    }
}
