//! Label memory: a durable device-id → name cache and the resolver that
//! picks the best display label for any id.
//!
//! Backend device ids are often cryptic (driver paths, GUID blobs). Keeping
//! the last human-readable name the OS reported lets the device list stay
//! friendly while a device is asleep or unplugged, without ever regressing
//! a known name to a placeholder.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use parking_lot::Mutex;
use sotto_core::{APP_NAME, DeviceLabels, SYSTEM_DEFAULT_DEVICE_ID, is_reserved_id};
use tracing::{debug, warn};

use crate::Result;

/// Remembered device labels, id → base label.
pub type LabelCache = HashMap<String, String>;

/// File name of the label cache inside the app config directory.
const LABEL_CACHE_FILE: &str = "mic-labels.json";

/// Durable home for the label cache.
///
/// Loading fails soft and saving is best-effort: label memory is an
/// optimization, losing it only costs friendly names.
pub trait LabelStore: Send + Sync {
    /// Load the cache, or an empty one when missing or unreadable.
    fn load(&self) -> LabelCache;

    /// Persist the cache. Failures are logged, never surfaced.
    fn save(&self, cache: &LabelCache);
}

/// Label cache stored as a JSON object of id → label under the user config
/// directory.
pub struct JsonLabelStore {
    path: PathBuf,
}

impl JsonLabelStore {
    /// Creates a store at the default location.
    pub fn new() -> Result<Self> {
        let config_dir =
            dirs::config_dir().context("Failed to retrieve configuration directory")?;
        Ok(Self {
            path: config_dir.join(APP_NAME).join(LABEL_CACHE_FILE),
        })
    }

    /// Creates a store rooted at a specific directory.
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(LABEL_CACHE_FILE),
        }
    }

    fn try_load(&self) -> anyhow::Result<LabelCache> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read label cache at {:?}", self.path))?;
        let parsed: serde_json::Value =
            serde_json::from_str(&raw).context("Failed to parse label cache")?;

        // Salvage the well-formed entries, drop everything else.
        let mut cache = LabelCache::new();
        if let Some(entries) = parsed.as_object() {
            for (id, value) in entries {
                if id.is_empty() || is_reserved_id(id) {
                    continue;
                }
                if let Some(label) = value.as_str() {
                    if !label.is_empty() {
                        cache.insert(id.clone(), label.to_string());
                    }
                }
            }
        }
        Ok(cache)
    }

    fn try_save(&self, cache: &LabelCache) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.path))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory at {:?}", dir))?;

        let serialized = serde_json::to_string(cache).context("Failed to serialize label cache")?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write label cache at {:?}", self.path))?;

        Ok(())
    }
}

impl LabelStore for JsonLabelStore {
    fn load(&self) -> LabelCache {
        if !self.path.exists() {
            return LabelCache::new();
        }
        match self.try_load() {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Discarding unreadable label cache");
                LabelCache::new()
            }
        }
    }

    fn save(&self, cache: &LabelCache) {
        if let Err(e) = self.try_save(cache) {
            warn!(path = ?self.path, error = %e, "Failed to persist label cache");
        }
    }
}

/// In-memory label store, cheaply cloneable with shared contents. Useful
/// for tests and for running without durable label memory.
#[derive(Clone, Default)]
pub struct MemoryLabelStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    entries: Mutex<LabelCache>,
    saves: AtomicUsize,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with existing entries.
    pub fn with_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let store = Self::new();
        *store.inner.entries.lock() = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        store
    }

    /// Number of times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::Relaxed)
    }

    /// Snapshot of the stored entries.
    pub fn entries(&self) -> LabelCache {
        self.inner.entries.lock().clone()
    }
}

impl LabelStore for MemoryLabelStore {
    fn load(&self) -> LabelCache {
        self.inner.entries.lock().clone()
    }

    fn save(&self, cache: &LabelCache) {
        *self.inner.entries.lock() = cache.clone();
        self.inner.saves.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decides the best display label for a device id and whether a newly
/// observed label should update the cache.
///
/// Owns the in-memory cache; every accepted update writes through to the
/// injected store.
pub struct LabelResolver {
    store: Box<dyn LabelStore>,
    labels: DeviceLabels,
    cache: LabelCache,
}

impl LabelResolver {
    /// Creates a resolver over `store`, loading the cache once.
    pub fn new(store: impl LabelStore + 'static, labels: DeviceLabels) -> Self {
        let store = Box::new(store);
        let cache = store.load();
        debug!(entries = cache.len(), "Loaded label cache");
        Self {
            store,
            labels,
            cache,
        }
    }

    /// The display strings labels are assembled from.
    pub fn labels(&self) -> &DeviceLabels {
        &self.labels
    }

    /// Currently cached label for `id`, if any.
    pub fn cached_label(&self, id: &str) -> Option<&str> {
        self.cache.get(id).map(String::as_str)
    }

    /// Records an observed label for `id`, writing through to the store.
    ///
    /// Reserved ids and empty labels are ignored; a "(Disconnected)" suffix
    /// is presentation, not identity, and gets stripped; a specific cached
    /// label is never replaced by the generic placeholder; an unchanged
    /// value does not trigger a write.
    pub fn remember(&mut self, id: &str, observed: &str) {
        if is_reserved_id(id) {
            return;
        }

        let base = self.base_label(observed);
        if base.is_empty() {
            return;
        }

        if let Some(existing) = self.cache.get(id) {
            if !existing.is_empty() && !self.is_generic(existing) && self.is_generic(&base) {
                return;
            }
            if *existing == base {
                return;
            }
        }

        self.cache.insert(id.to_string(), base);
        self.store.save(&self.cache);
    }

    /// Best display label for `id`: the system-default name for the literal
    /// default id, then the cached name, then the generic placeholder for
    /// technical-looking ids, then the id itself.
    pub fn preferred_base_label(&self, id: &str) -> String {
        if id == SYSTEM_DEFAULT_DEVICE_ID {
            return self.labels.system_default.clone();
        }

        if let Some(cached) = self.cache.get(id) {
            if !cached.is_empty() {
                return cached.clone();
            }
        }

        if is_technical_id(id) {
            return self.labels.generic.clone();
        }

        id.to_string()
    }

    /// `preferred_base_label` with the disconnected marker appended, for
    /// rendering devices that are remembered but absent.
    pub fn missing_label(&self, id: &str) -> String {
        format!(
            "{}{}",
            self.preferred_base_label(id),
            self.labels.disconnected_suffix()
        )
    }

    fn base_label(&self, observed: &str) -> String {
        let trimmed = observed.trim();
        let suffix = self.labels.disconnected_suffix();
        let base = trimmed.strip_suffix(suffix.as_str()).unwrap_or(trimmed);
        base.trim().to_string()
    }

    fn is_generic(&self, label: &str) -> bool {
        normalize(label) == normalize(&self.labels.generic)
    }
}

/// Backend-generated ids that would read as noise in a device list.
fn is_technical_id(id: &str) -> bool {
    id.contains(":{")
        || id.starts_with("wasapi:")
        || id.starts_with("coreaudio:")
        || id.starts_with("alsa:")
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}
