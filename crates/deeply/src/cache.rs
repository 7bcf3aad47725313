use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum number of compiled patterns kept alive at once.
pub const REGEX_CACHE_CAPACITY: usize = 1000;

static REGEX_CACHE: Lazy<Mutex<LruCache<String, Arc<Regex>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_CAPACITY).expect("regex cache capacity must be non-zero"),
    ))
});

/// Compile `pattern`, memoizing the result in a process-wide bounded LRU.
///
/// Concurrent callers racing on a cold pattern may compile it more than once;
/// the cache converges on a single entry and never exceeds its capacity.
pub fn get_regex(pattern: &str) -> Result<Arc<Regex>, regex::Error> {
    if let Some(re) = REGEX_CACHE
        .lock()
        .expect("regex cache lock poisoned")
        .get(pattern)
    {
        return Ok(Arc::clone(re));
    }

    let compiled = Arc::new(Regex::new(pattern)?);
    REGEX_CACHE
        .lock()
        .expect("regex cache lock poisoned")
        .put(pattern.to_owned(), Arc::clone(&compiled));

    Ok(compiled)
}

/// Drop every cached pattern. Intended for test isolation.
pub fn clear_regex_cache() {
    REGEX_CACHE
        .lock()
        .expect("regex cache lock poisoned")
        .clear();
}

/// Current number of cached patterns and the fixed capacity.
pub fn regex_cache_stats() -> (usize, usize) {
    let cache = REGEX_CACHE.lock().expect("regex cache lock poisoned");
    (cache.len(), cache.cap().get())
}
