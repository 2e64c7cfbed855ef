//! Part-number normalization, catalog indexing, and the search decision
//! procedure: exact key match, numeric-core fallback, availability
//! classification, and customer browse filtering.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use strsim::jaro_winkler;
use tracing::warn;
use wpp_core::{Product, SearchOutcome};
use wpp_index::InvertedIndex;

pub const CRATE_NAME: &str = "wpp-search";

/// Normalized keys shorter than this are not reliable part fingerprints;
/// the engine refuses to match them rather than guess.
pub const MIN_SIGNIFICANT_CHARS: usize = 2;

/// Numeric cores shorter than this are shared by too many parts to be a
/// usable fallback signal, on either side of the comparison.
pub const MIN_NUMERIC_CORE_CHARS: usize = 3;

/// Canonical comparison form of a part-number-like string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedPart {
    /// Lowercased, punctuation-free identity key.
    pub key: String,
    /// Concatenated digits of the key, in order.
    pub numeric_core: String,
}

impl NormalizedPart {
    pub fn is_significant(&self) -> bool {
        self.key.chars().count() >= MIN_SIGNIFICANT_CHARS
    }

    pub fn has_usable_core(&self) -> bool {
        self.numeric_core.len() >= MIN_NUMERIC_CORE_CHARS
    }
}

/// Fold Arabic-Indic and Extended Arabic-Indic digits to ASCII so the
/// storefront's two numeral systems normalize identically.
fn fold_digit(c: char) -> char {
    match c {
        '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
        '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
        _ => c,
    }
}

/// Normalize a raw part-number-like string. Pure and idempotent:
/// `normalize(&normalize(s).key).key == normalize(s).key`. Whitespace,
/// punctuation, and case are identity-irrelevant; an empty result means
/// the query is invalid, never a wildcard.
pub fn normalize(raw: &str) -> NormalizedPart {
    let key: String = raw
        .chars()
        .map(fold_digit)
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    let numeric_core: String = key.chars().filter(|c| c.is_ascii_digit()).collect();
    NormalizedPart { key, numeric_core }
}

/// A catalog product with its derived matching keys, computed once at
/// index build. Derived fields live here, never on the source `Product`.
#[derive(Debug, Clone)]
pub struct IndexedProduct {
    pub product: Product,
    pub normalized: NormalizedPart,
}

/// Two catalog rows normalizing to the same key. Data-quality condition:
/// the index keeps the later row and records the collision for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKey {
    pub key: String,
    pub kept_part_number: String,
    pub shadowed_part_number: String,
}

/// Immutable index over one catalog snapshot. Rebuild whenever the
/// catalog changes; serving a stale index is a correctness bug.
pub struct ProductIndex {
    entries: Vec<IndexedProduct>,
    by_key: HashMap<String, usize>,
    words: InvertedIndex<usize>,
    duplicates: Vec<DuplicateKey>,
}

impl ProductIndex {
    pub fn build(products: Vec<Product>) -> Self {
        let entries: Vec<IndexedProduct> = products
            .into_iter()
            .map(|product| IndexedProduct {
                normalized: normalize(&product.part_number),
                product,
            })
            .collect();

        let mut by_key: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        let mut duplicates = Vec::new();
        for (pos, entry) in entries.iter().enumerate() {
            if entry.normalized.key.is_empty() {
                continue;
            }
            if let Some(shadowed) = by_key.insert(entry.normalized.key.clone(), pos) {
                let duplicate = DuplicateKey {
                    key: entry.normalized.key.clone(),
                    kept_part_number: entry.product.part_number.clone(),
                    shadowed_part_number: entries[shadowed].product.part_number.clone(),
                };
                warn!(
                    key = %duplicate.key,
                    kept = %duplicate.kept_part_number,
                    shadowed = %duplicate.shadowed_part_number,
                    "duplicate normalized part key in catalog; last write wins"
                );
                duplicates.push(duplicate);
            }
        }

        let words = InvertedIndex::build((0..entries.len()).collect::<Vec<usize>>(), |pos| {
            let entry = &entries[*pos];
            let mut fields = vec![entry.product.name.clone()];
            if let Some(name_ar) = &entry.product.name_ar {
                fields.push(name_ar.clone());
            }
            if let Some(brand) = &entry.product.brand {
                fields.push(brand.clone());
            }
            fields
        });

        Self {
            entries,
            by_key,
            words,
            duplicates,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexedProduct] {
        &self.entries
    }

    pub fn duplicates(&self) -> &[DuplicateKey] {
        &self.duplicates
    }

    pub fn lookup_key(&self, key: &str) -> Option<&IndexedProduct> {
        self.by_key.get(key).map(|pos| &self.entries[*pos])
    }

    /// Free-text word-intersection search over name, Arabic name, and brand.
    pub fn free_text(&self, query: &str, limit: usize) -> Vec<&IndexedProduct> {
        self.words
            .search(query, limit)
            .into_iter()
            .map(|pos| &self.entries[*pos])
            .collect()
    }
}

/// Per-query inputs to the decision procedure.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext {
    /// Quantities at or below this classify a direct hit as out of stock.
    pub visibility_threshold: i64,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self {
            visibility_threshold: 0,
        }
    }
}

/// Decide what one part-number query identifies.
///
/// Exact normalized-key match wins outright; otherwise the numeric-core
/// fallback picks the best candidate; otherwise `NotFound`. A no-match
/// is a valid outcome, never an error.
pub fn search(index: &ProductIndex, query: &str, ctx: &SearchContext) -> SearchOutcome {
    let normalized = normalize(query);
    if !normalized.is_significant() {
        return SearchOutcome::not_found(query);
    }

    if let Some(entry) = index.lookup_key(&normalized.key) {
        return classify(entry.product.clone(), ctx);
    }

    if let Some(entry) = best_fallback(index, &normalized) {
        return classify(entry.product.clone(), ctx);
    }

    SearchOutcome::not_found(query)
}

fn classify(product: Product, ctx: &SearchContext) -> SearchOutcome {
    if product.available_quantity() <= ctx.visibility_threshold {
        let message = format!(
            "\"{}\" exists but is currently out of stock",
            product.part_number
        );
        SearchOutcome::FoundOutOfStock { product, message }
    } else {
        SearchOutcome::FoundAvailable { product }
    }
}

/// Numeric-core fallback: exact core equality outranks substring
/// containment; ties break to the shortest normalized key, then the
/// highest Jaro-Winkler similarity to the query key, then key order.
/// Fully deterministic so the resolution is unit-testable.
fn best_fallback<'a>(index: &'a ProductIndex, query: &NormalizedPart) -> Option<&'a IndexedProduct> {
    if !query.has_usable_core() {
        return None;
    }

    let mut best: Option<(u8, usize, f64, &IndexedProduct)> = None;
    for entry in index.entries() {
        let core = &entry.normalized.numeric_core;
        let rank = if *core == query.numeric_core {
            0u8
        } else if core.len() >= MIN_NUMERIC_CORE_CHARS
            && (core.contains(query.numeric_core.as_str())
                || query.numeric_core.contains(core.as_str()))
        {
            1u8
        } else {
            continue;
        };

        let key_len = entry.normalized.key.chars().count();
        let similarity = jaro_winkler(&entry.normalized.key, &query.key);
        let better = match &best {
            None => true,
            Some((best_rank, best_len, best_sim, best_entry)) => {
                (rank, key_len) < (*best_rank, *best_len)
                    || ((rank, key_len) == (*best_rank, *best_len)
                        && (similarity > *best_sim
                            || (similarity == *best_sim
                                && entry.normalized.key < best_entry.normalized.key)))
            }
        };
        if better {
            best = Some((rank, key_len, similarity, entry));
        }
    }

    best.map(|(_, _, _, entry)| entry)
}

/// Customer free-text browse. Products below `min_visible_quantity` are
/// excluded entirely; unlike a direct part lookup, browsing never
/// surfaces near-empty inventory.
pub fn browse<'a>(
    index: &'a ProductIndex,
    query: &str,
    min_visible_quantity: i64,
    limit: usize,
) -> Vec<&'a Product> {
    index
        .free_text(query, index.len())
        .into_iter()
        .filter(|entry| entry.product.available_quantity() >= min_visible_quantity)
        .map(|entry| &entry.product)
        .take(limit)
        .collect()
}

/// Version-keyed cache around [`ProductIndex`]. The store bumps its
/// catalog version on every write; a version mismatch forces a rebuild,
/// so callers can never serve an index for a catalog that has moved.
#[derive(Default)]
pub struct IndexCache {
    inner: RwLock<Option<(u64, Arc<ProductIndex>)>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached index for exactly this catalog version, if present.
    pub fn get(&self, version: u64) -> Option<Arc<ProductIndex>> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .filter(|(cached_version, _)| *cached_version == version)
            .map(|(_, index)| Arc::clone(index))
    }

    pub fn get_or_build<F>(&self, version: u64, load: F) -> Arc<ProductIndex>
    where
        F: FnOnce() -> Vec<Product>,
    {
        {
            let guard = match self.inner.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some((cached_version, index)) = guard.as_ref() {
                if *cached_version == version {
                    return Arc::clone(index);
                }
            }
        }

        let index = Arc::new(ProductIndex::build(load()));
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some((version, Arc::clone(&index)));
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn mk_product(part_number: &str, name: &str, quantity: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            part_number: part_number.into(),
            name: name.into(),
            name_ar: None,
            brand: Some("Acme".into()),
            price: 10.0,
            quantity_total: Some(quantity),
            stock: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn normalization_is_case_and_punctuation_insensitive() {
        let a = normalize("CN-102030");
        let b = normalize("cn 102030");
        let c = normalize("CN102030");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.key, "cn102030");
        assert_eq!(a.numeric_core, "102030");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["CN-102030", "  A.b/C 99 ", "٣٤٥-XY", ""] {
            let once = normalize(raw);
            let twice = normalize(&once.key);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn arabic_indic_digits_fold_to_ascii() {
        assert_eq!(normalize("CN-١٠٢٠٣٠").key, normalize("cn102030").key);
        assert_eq!(normalize("۱۲۳").numeric_core, "123");
    }

    #[test]
    fn empty_and_whitespace_input_normalizes_to_empty() {
        assert_eq!(normalize("   ").key, "");
        assert!(!normalize(" - . / ").is_significant());
    }

    #[test]
    fn index_records_duplicate_keys_last_write_wins() {
        let index = ProductIndex::build(vec![
            mk_product("CN-102030", "Front Brake Pads", 5),
            mk_product("cn 102030", "Front Brake Pads (import)", 9),
        ]);
        assert_eq!(index.duplicates().len(), 1);
        assert_eq!(index.duplicates()[0].shadowed_part_number, "CN-102030");
        let hit = index.lookup_key("cn102030").expect("key indexed");
        assert_eq!(hit.product.part_number, "cn 102030");
    }

    #[test]
    fn exact_key_match_outranks_shared_numeric_core() {
        let index = ProductIndex::build(vec![
            mk_product("XX-102030", "Decoy Sharing Core", 5),
            mk_product("CN-102030", "Front Brake Pads", 5),
        ]);
        let outcome = search(&index, "cn102030", &SearchContext::default());
        let product = outcome.matched_product().expect("match");
        assert_eq!(product.part_number, "CN-102030");
    }

    #[test]
    fn fallback_matches_on_numeric_core_equality() {
        let index = ProductIndex::build(vec![mk_product("CN-102030", "Front Brake Pads", 5)]);
        // Different prefix, same digits: no exact key hit, core fallback lands.
        let outcome = search(&index, "ZZ-102030", &SearchContext::default());
        assert_eq!(
            outcome.matched_product().expect("match").part_number,
            "CN-102030"
        );
    }

    #[test]
    fn fallback_tie_breaks_to_shortest_normalized_key() {
        let index = ProductIndex::build(vec![
            mk_product("CN-102030-LONG-VARIANT", "Variant Pack", 5),
            mk_product("A-102030", "Front Brake Pads", 5),
        ]);
        let outcome = search(&index, "102030", &SearchContext::default());
        assert_eq!(
            outcome.matched_product().expect("match").part_number,
            "A-102030"
        );
    }

    #[test]
    fn short_numeric_cores_never_fallback_match() {
        let index = ProductIndex::build(vec![mk_product("CN-12", "Tiny Clip", 5)]);
        let outcome = search(&index, "XX-12", &SearchContext::default());
        assert!(matches!(outcome, SearchOutcome::NotFound { .. }));
    }

    #[test]
    fn availability_boundary_at_threshold_zero() {
        let ctx = SearchContext {
            visibility_threshold: 0,
        };
        let index = ProductIndex::build(vec![
            mk_product("CN-102030", "Front Brake Pads", 0),
            mk_product("CN-405060", "Rear Brake Pads", 1),
        ]);
        assert!(matches!(
            search(&index, "CN-102030", &ctx),
            SearchOutcome::FoundOutOfStock { .. }
        ));
        assert!(matches!(
            search(&index, "CN-405060", &ctx),
            SearchOutcome::FoundAvailable { .. }
        ));
    }

    #[test]
    fn empty_query_is_not_found_never_a_wildcard() {
        let index = ProductIndex::build(vec![mk_product("CN-102030", "Front Brake Pads", 5)]);
        let outcome = search(&index, "", &SearchContext::default());
        assert!(matches!(outcome, SearchOutcome::NotFound { .. }));
        let outcome = search(&index, " - ", &SearchContext::default());
        assert!(matches!(outcome, SearchOutcome::NotFound { .. }));
    }

    #[test]
    fn browse_hides_near_empty_stock_that_direct_lookup_reveals() {
        let index = ProductIndex::build(vec![
            mk_product("CN-102030", "Front Brake Pads", 1),
            mk_product("CN-405060", "Rear Brake Pads", 40),
        ]);

        let browsed = browse(&index, "brake pads", 5, 10);
        assert_eq!(browsed.len(), 1);
        assert_eq!(browsed[0].part_number, "CN-405060");

        // The near-empty product is still revealed by a direct lookup.
        let ctx = SearchContext {
            visibility_threshold: 1,
        };
        assert!(matches!(
            search(&index, "CN-102030", &ctx),
            SearchOutcome::FoundOutOfStock { .. }
        ));
    }

    #[test]
    fn browse_intersects_words_across_name_and_brand() {
        let index = ProductIndex::build(vec![
            mk_product("P-1", "Brake Pad Front", 10),
            mk_product("P-2", "Brake Disc Rear", 10),
        ]);
        let hits = browse(&index, "brake front", 0, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Brake Pad Front");
        // Brand tokens participate too.
        assert_eq!(browse(&index, "acme brake", 0, 10).len(), 2);
    }

    #[test]
    fn index_cache_rebuilds_only_when_version_moves() {
        let cache = IndexCache::new();
        let v1 = cache.get_or_build(1, || vec![mk_product("CN-102030", "Front Brake Pads", 5)]);
        let again = cache.get_or_build(1, || panic!("must not rebuild on same version"));
        assert!(Arc::ptr_eq(&v1, &again));

        let v2 = cache.get_or_build(2, || {
            vec![
                mk_product("CN-102030", "Front Brake Pads", 5),
                mk_product("CN-405060", "Rear Brake Pads", 5),
            ]
        });
        assert_eq!(v2.len(), 2);
        assert!(!Arc::ptr_eq(&v1, &v2));
    }
}
