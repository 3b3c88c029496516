//! Compiler driver & artifact cache, plus the process-wide
//! engine cache. Both are single-mutex-guarded maps, using
//! `once_cell::sync::Lazy` for the statics, the same pattern `petty-core`
//! and `readstor` use for lazily-initialized global state.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use once_cell::sync::Lazy;

use crate::host::Artifact;

const RECORD_SEPARATOR: char = '\u{1e}';

/// Stable hash over the concatenation of generated sources, in bundle
/// order, separated by a record separator.
pub fn fingerprint(sources: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (i, src) in sources.iter().enumerate() {
        if i > 0 {
            RECORD_SEPARATOR.hash(&mut hasher);
        }
        src.hash(&mut hasher);
    }
    hasher.finish()
}

/// Hash over `(name, content)` pairs, used as the engine-cache key for
/// `process_template`/`process_file`.
pub fn content_key(items: &[(String, String)]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (name, content) in items {
        name.hash(&mut hasher);
        RECORD_SEPARATOR.hash(&mut hasher);
        content.hash(&mut hasher);
        RECORD_SEPARATOR.hash(&mut hasher);
    }
    hasher.finish()
}

static ARTIFACT_CACHE: Lazy<Mutex<HashMap<u64, Artifact>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Look up a fingerprint in the process-wide artifact cache.
pub fn artifact_get(key: u64) -> Option<Artifact> {
    ARTIFACT_CACHE.lock().expect("artifact cache lock poisoned").get(&key).cloned()
}

/// Insert a freshly-compiled artifact. Never called for a failed compile:
/// a failed compile must never be cached, or every subsequent caller would
/// see the same stale failure.
pub fn artifact_insert(key: u64, artifact: Artifact) {
    ARTIFACT_CACHE.lock().expect("artifact cache lock poisoned").insert(key, artifact);
}

/// Run `compile` under the artifact cache's double-checked lock: if `key`
/// is already cached, the closure never runs; otherwise it runs at most
/// once and the result is cached only on success.
pub fn artifact_get_or_compile(
    key: u64,
    compile: impl FnOnce() -> Result<Artifact, crate::error::Error>,
) -> Result<Artifact, crate::error::Error> {
    if let Some(hit) = artifact_get(key) {
        log::debug!("artifact cache hit for fingerprint {key:x}");
        return Ok(hit);
    }
    let mut guard = ARTIFACT_CACHE.lock().expect("artifact cache lock poisoned");
    if let Some(hit) = guard.get(&key) {
        return Ok(hit.clone());
    }
    log::debug!("artifact cache miss for fingerprint {key:x}, compiling");
    let artifact = compile()?;
    guard.insert(key, artifact.clone());
    Ok(artifact)
}

type EngineSlot<E> = Arc<OnceLock<Arc<E>>>;

/// Process-wide, single-flight keyed map from content hash to engine.
/// `get_or_insert` is the only mutator and guarantees the factory runs at
/// most once per key.
pub struct EngineCache<E> {
    slots: Mutex<HashMap<u64, EngineSlot<E>>>,
}

impl<E> Default for EngineCache<E> {
    fn default() -> Self {
        EngineCache { slots: Mutex::new(HashMap::new()) }
    }
}

impl<E> EngineCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached engine for `key`, building it with `factory` at
    /// most once if absent. Readers for *other* keys never block on this
    /// call (the map mutex is only held briefly to fetch-or-insert the
    /// slot; the potentially expensive `factory` runs outside the lock).
    pub fn get_or_insert(&self, key: u64, factory: impl FnOnce() -> Arc<E>) -> Arc<E> {
        let slot = {
            let mut slots = self.slots.lock().expect("engine cache lock poisoned");
            slots.entry(key).or_insert_with(|| Arc::new(OnceLock::new())).clone()
        };
        slot.get_or_init(factory).clone()
    }
}
