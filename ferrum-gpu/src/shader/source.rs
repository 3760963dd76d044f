use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Loads and pins shader sources, keyed by their path relative to the
/// shader root. Internally synchronized; sources are immutable once
/// inserted, so the include handler can hold them across compilations.
pub struct ShaderSourceCache {
    root: PathBuf,
    sources: Mutex<FxHashMap<String, Arc<str>>>,
}

impl ShaderSourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the pinned source of `name`, loading it on first use.
    pub fn get_source(&self, name: &str) -> Result<Arc<str>, fe::ErrorKind> {
        let key = name.replace('\\', "/");

        let mut sources = self.sources.lock();
        if let Some(source) = sources.get(&key) {
            return Ok(Arc::clone(source));
        }

        let path = self.root.join(&key);
        let text = std::fs::read_to_string(&path).map_err(|error| {
            log::error!("failed to read shader source {}: {error}", path.display());
            fe::ErrorKind::IoError
        })?;

        let source: Arc<str> = text.into();
        sources.insert(key, Arc::clone(&source));
        Ok(source)
    }

    /// Inserts a source directly, bypassing the filesystem. Used by tests
    /// and generated shaders.
    pub fn insert(&self, name: &str, text: &str) {
        let key = name.replace('\\', "/");
        self.sources.lock().insert(key, text.into());
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_are_pinned_and_deduplicated() {
        let cache = ShaderSourceCache::new("shaders");
        cache.insert("common.hlsli", "float4 one() { return 1; }");

        let first = cache.get_source("common.hlsli").unwrap();
        let second = cache.get_source("common.hlsli").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn separators_normalize_into_one_key() {
        let cache = ShaderSourceCache::new("shaders");
        cache.insert("pbr\\brdf.hlsli", "x");
        assert!(cache.get_source("pbr/brdf.hlsli").is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let cache = ShaderSourceCache::new("/nonexistent-shader-root");
        assert_eq!(
            cache.get_source("missing.hlsl").unwrap_err(),
            fe::ErrorKind::IoError
        );
    }
}
