//! Generic in-memory indexing and caller-side utilities: keyed lookup,
//! multi-field inverted index, bounded memoization, debounce/throttle,
//! pagination math.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

pub const CRATE_NAME: &str = "wpp-index";

/// Tokens shorter than this never enter an inverted index and never
/// participate in a query; they match too much to mean anything.
pub const MIN_TOKEN_CHARS: usize = 2;

/// Build a key → item map in one pass. Last write wins on duplicate
/// keys; callers that care about collisions must detect them upstream.
pub fn build_lookup<T, F>(items: Vec<T>, key_of: F) -> HashMap<String, T>
where
    F: Fn(&T) -> String,
{
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        map.insert(key_of(&item), item);
    }
    map
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS)
        .collect()
}

/// Word → item-set index over one or more text fields per item.
///
/// Queries use intersection semantics: an item matches only if every
/// query word matches (substring against the indexed tokens), so
/// "brake front" finds "Brake Pad Front" but not "Brake Disc Rear".
pub struct InvertedIndex<T> {
    items: Vec<T>,
    postings: HashMap<String, BTreeSet<usize>>,
}

impl<T> InvertedIndex<T> {
    /// Build from `items`, indexing every string `fields_of` yields per item.
    /// O(items × tokens) build; lookups touch only the posting lists.
    pub fn build<F>(items: Vec<T>, fields_of: F) -> Self
    where
        F: Fn(&T) -> Vec<String>,
    {
        let mut postings: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for (pos, item) in items.iter().enumerate() {
            for field in fields_of(item) {
                for token in tokenize(&field) {
                    postings.entry(token).or_default().insert(pos);
                }
            }
        }
        Self { items, postings }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Intersection search over all query words, capped at `limit`.
    /// An empty or all-too-short query returns nothing, never everything.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&T> {
        let words = tokenize(query);
        if words.is_empty() {
            return Vec::new();
        }

        let mut surviving: Option<BTreeSet<usize>> = None;
        for word in &words {
            let mut matched = BTreeSet::new();
            for (token, positions) in &self.postings {
                if token.contains(word.as_str()) {
                    matched.extend(positions.iter().copied());
                }
            }
            surviving = Some(match surviving.take() {
                None => matched,
                Some(acc) => acc.intersection(&matched).copied().collect(),
            });
            if surviving.as_ref().is_some_and(BTreeSet::is_empty) {
                return Vec::new();
            }
        }

        surviving
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .map(|pos| &self.items[pos])
            .collect()
    }
}

/// Fires the wrapped closure once, `wait` after the last call of a
/// burst. A newer call aborts the pending one, so only the final call's
/// closure (and captured arguments) ever runs. Requires a tokio runtime.
pub struct Debouncer {
    wait: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            pending: None,
        }
    }

    pub fn call<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        let wait = self.wait;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            f();
        }));
    }

    /// Drop any pending invocation without firing it.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// At most one firing per `wait` window, firing immediately on the first
/// call of a window. Suppressed calls are dropped, never queued.
pub struct Throttler {
    wait: Duration,
    last_fired: Option<Instant>,
}

impl Throttler {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            last_fired: None,
        }
    }

    /// Returns true if the closure fired.
    pub fn call<F: FnOnce()>(&mut self, f: F) -> bool {
        self.call_at(Instant::now(), f)
    }

    fn call_at<F: FnOnce()>(&mut self, now: Instant, f: F) -> bool {
        let open = match self.last_fired {
            None => true,
            Some(last) => now.duration_since(last) >= self.wait,
        };
        if open {
            self.last_fired = Some(now);
            f();
        }
        open
    }
}

/// Memoizes a pure function behind a size-bounded cache keyed by the
/// JSON serialization of the argument. Eviction is FIFO: once the cache
/// holds `capacity` entries, the oldest inserted key is dropped first.
/// Arguments that fail to serialize are computed without caching.
pub struct Memo<A, R, F> {
    f: F,
    cache: HashMap<String, R>,
    order: VecDeque<String>,
    capacity: usize,
    _arg: PhantomData<fn(&A)>,
}

impl<A, R, F> Memo<A, R, F>
where
    A: Serialize,
    R: Clone,
    F: Fn(&A) -> R,
{
    pub fn new(f: F, capacity: usize) -> Self {
        Self {
            f,
            cache: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            _arg: PhantomData,
        }
    }

    pub fn call(&mut self, arg: &A) -> R {
        let key = match serde_json::to_string(arg) {
            Ok(key) => key,
            Err(_) => return (self.f)(arg),
        };
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let value = (self.f)(arg);
        if self.capacity > 0 {
            if self.cache.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.cache.remove(&oldest);
                }
            }
            self.cache.insert(key.clone(), value.clone());
            self.order.push_back(key);
        }
        value
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Clamped pagination window over `total_items`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub current_page: usize,
    pub total_pages: usize,
    pub start: usize,
    pub end: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

/// Current page never falls below 1 or above the last page; an empty
/// collection yields a single empty page with no neighbours.
pub fn paginate(total_items: usize, requested_page: usize, page_size: usize) -> Page {
    let page_size = page_size.max(1);
    let total_pages = (total_items.div_ceil(page_size)).max(1);
    let current_page = requested_page.clamp(1, total_pages);
    let start = ((current_page - 1) * page_size).min(total_items);
    let end = (start + page_size).min(total_items);
    Page {
        current_page,
        total_pages,
        start,
        end,
        has_prev: current_page > 1,
        has_next: current_page < total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn lookup_is_last_write_wins() {
        let map = build_lookup(vec![("a", 1), ("a", 2), ("b", 3)], |(k, _)| k.to_string());
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], ("a", 2));
    }

    #[test]
    fn inverted_index_intersects_query_words() {
        let index = InvertedIndex::build(
            vec!["Brake Pad Front", "Brake Disc Rear"],
            |item| vec![item.to_string()],
        );
        let hits = index.search("brake front", 10);
        assert_eq!(hits, vec![&"Brake Pad Front"]);
        assert_eq!(index.search("brake", 10).len(), 2);
    }

    #[test]
    fn inverted_index_never_wildcards_on_empty_query() {
        let index = InvertedIndex::build(vec!["Brake Pad"], |item| vec![item.to_string()]);
        assert!(index.search("", 10).is_empty());
        assert!(index.search("a", 10).is_empty());
        assert!(index.search("   ", 10).is_empty());
    }

    #[test]
    fn inverted_index_caps_results() {
        let items: Vec<String> = (0..20).map(|i| format!("widget number{i}")).collect();
        let index = InvertedIndex::build(items, |item| vec![item.clone()]);
        assert_eq!(index.search("widget", 5).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collapses_a_burst_to_the_last_call() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        for i in 1..=5 {
            let fired = Arc::clone(&fired);
            debouncer.call(move || {
                fired.store(i, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_cancel_drops_the_pending_call() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let counter = Arc::clone(&fired);
        debouncer.call(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn throttle_fires_first_and_drops_inside_the_window() {
        let mut throttler = Throttler::new(Duration::from_millis(100));
        let t0 = Instant::now();
        let mut count = 0;
        assert!(throttler.call_at(t0, || count += 1));
        assert!(!throttler.call_at(t0 + Duration::from_millis(30), || count += 1));
        assert!(!throttler.call_at(t0 + Duration::from_millis(90), || count += 1));
        assert!(throttler.call_at(t0 + Duration::from_millis(100), || count += 1));
        assert_eq!(count, 2);
    }

    #[test]
    fn memo_caches_and_evicts_oldest_first() {
        let calls = AtomicUsize::new(0);
        let mut memo = Memo::new(
            |n: &u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                n * 2
            },
            2,
        );
        assert_eq!(memo.call(&1), 2);
        assert_eq!(memo.call(&1), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        memo.call(&2);
        memo.call(&3); // evicts the entry for 1
        assert_eq!(memo.cached_entries(), 2);
        memo.call(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn pagination_clamps_out_of_range_pages() {
        let page = paginate(0, 5, 10);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.total_pages, 1);
        assert_eq!((page.start, page.end), (0, 0));
        assert!(!page.has_prev);
        assert!(!page.has_next);
    }

    #[test]
    fn pagination_windows_are_consistent() {
        let page = paginate(25, 2, 10);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!((page.start, page.end), (10, 20));
        assert!(page.has_prev);
        assert!(page.has_next);

        let last = paginate(25, 99, 10);
        assert_eq!(last.current_page, 3);
        assert_eq!((last.start, last.end), (20, 25));
        assert!(!last.has_next);
    }
}
