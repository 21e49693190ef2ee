//! `ManifestLoader` — resolves a provider id to a [`ProtocolManifest`]
//! through a layered search path, validates once, and caches the result
//! behind a lock-free [`ArcSwap`] so concurrent readers never block and
//! hot reload never hands out a half-updated manifest.

use crate::error::CoreError;
use crate::manifest::schema::ProtocolManifest;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock;

/// Where a manifest was ultimately found, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// Registered in-process via [`ManifestLoader::register`].
    Registered,
    /// Loaded from `$AI_PROTOCOL_PATH`.
    ProtocolPathEnv(PathBuf),
    /// Loaded from one of the configured well-known local directories.
    WellKnownDir(PathBuf),
}

struct CacheEntry {
    manifest: Arc<ProtocolManifest>,
    source: ManifestSource,
}

/// Resolves, validates, and caches [`ProtocolManifest`]s by provider id.
///
/// Lookup order (first hit wins):
/// 1. A manifest previously registered in-process via [`Self::register`].
/// 2. `$AI_PROTOCOL_PATH`, if set.
/// 3. The ordered list of well-known local directories passed to
///    [`Self::new`].
///
/// Within a chosen root, `dist/v1/providers/<id>.json` is tried before
/// `v1/providers/<id>.yaml` for backward compatibility.
pub struct ManifestLoader {
    well_known_dirs: Vec<PathBuf>,
    protocol_path_env: Option<PathBuf>,
    strict_streaming: bool,
    cache: RwLock<HashMap<String, Arc<ArcSwap<CacheEntry>>>>,
}

impl ManifestLoader {
    /// Creates a loader with the given well-known search directories and
    /// strict-streaming validation mode (see `AI_LIB_STRICT_STREAMING`).
    #[must_use]
    pub fn new(well_known_dirs: Vec<PathBuf>, strict_streaming: bool) -> Self {
        Self {
            well_known_dirs,
            protocol_path_env: std::env::var_os("AI_PROTOCOL_PATH").map(PathBuf::from),
            strict_streaming,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a manifest directly, bypassing filesystem resolution.
    /// Registered manifests take priority over any filesystem-resolved
    /// manifest with the same id.
    pub fn register(&self, manifest: ProtocolManifest) -> Result<(), CoreError> {
        manifest.validate(self.strict_streaming)?;
        let id = manifest.id.clone();
        let entry = CacheEntry {
            manifest: Arc::new(manifest),
            source: ManifestSource::Registered,
        };
        self.cache
            .write()
            .expect("manifest cache lock poisoned")
            .insert(id, Arc::new(ArcSwap::from_pointee(entry)));
        Ok(())
    }

    /// Resolves `id` to a validated manifest, consulting the cache first.
    pub fn load(&self, id: &str) -> Result<Arc<ProtocolManifest>, CoreError> {
        if let Some(entry) = self.cached(id) {
            return Ok(entry.load().manifest.clone());
        }

        let (manifest, source) = self.resolve_from_filesystem(id)?;
        manifest.validate(self.strict_streaming)?;
        let manifest = Arc::new(manifest);
        let entry = CacheEntry {
            manifest: manifest.clone(),
            source,
        };
        self.cache
            .write()
            .expect("manifest cache lock poisoned")
            .insert(id.to_string(), Arc::new(ArcSwap::from_pointee(entry)));
        Ok(manifest)
    }

    /// Re-resolves `id` from the filesystem and atomically swaps the
    /// cached entry, per the hot-reload contract in §4.2: readers always
    /// see a consistent snapshot, never a torn update.
    ///
    /// Re-validates under the *current* `strict_streaming` mode. If the
    /// manifest would have failed under the mode active when it was first
    /// cached, this still succeeds — strictness tightened since load time
    /// only produces a caller-visible warning, not retroactive
    /// invalidation (see `DESIGN.md`, "strict streaming + hot reload").
    pub fn reload(&self, id: &str) -> Result<(), CoreError> {
        let (manifest, source) = self.resolve_from_filesystem(id)?;
        if let Err(err) = manifest.validate(self.strict_streaming) {
            tracing::warn!(
                target: "ai_protocol_core::manifest",
                provider_id = id,
                error = %err,
                "reloaded manifest failed validation under current strictness; keeping prior cached value"
            );
            return Err(err);
        }
        let manifest = Arc::new(manifest);
        let swap = self.cache.read().expect("manifest cache lock poisoned").get(id).cloned();
        match swap {
            Some(swap) => {
                swap.store(Arc::new(CacheEntry { manifest, source }));
            }
            None => {
                self.cache
                    .write()
                    .expect("manifest cache lock poisoned")
                    .insert(id.to_string(), Arc::new(ArcSwap::from_pointee(CacheEntry { manifest, source })));
            }
        }
        Ok(())
    }

    /// Returns where the given id's currently cached manifest came from,
    /// if it has been loaded.
    #[must_use]
    pub fn source_of(&self, id: &str) -> Option<ManifestSource> {
        self.cached(id).map(|entry| entry.load().source.clone())
    }

    fn cached(&self, id: &str) -> Option<Arc<ArcSwap<CacheEntry>>> {
        self.cache.read().expect("manifest cache lock poisoned").get(id).cloned()
    }

    fn resolve_from_filesystem(&self, id: &str) -> Result<(ProtocolManifest, ManifestSource), CoreError> {
        if let Some(root) = &self.protocol_path_env {
            if let Some((manifest, path)) = try_load_from_root(root, id) {
                return Ok((manifest?, ManifestSource::ProtocolPathEnv(path)));
            }
        }
        for root in &self.well_known_dirs {
            if let Some((manifest, path)) = try_load_from_root(root, id) {
                return Ok((manifest?, ManifestSource::WellKnownDir(path)));
            }
        }
        Err(CoreError::manifest_not_found(id))
    }
}

/// Tries `dist/v1/providers/<id>.json` then `v1/providers/<id>.yaml` under
/// `root`. Returns `None` if neither file exists; `Some(Err(_))` if a file
/// exists but fails to parse.
fn try_load_from_root(root: &Path, id: &str) -> Option<(Result<ProtocolManifest, CoreError>, PathBuf)> {
    let json_path = root.join("dist/v1/providers").join(format!("{id}.json"));
    if json_path.is_file() {
        return Some((parse_manifest_file(&json_path), json_path));
    }
    let yaml_path = root.join("v1/providers").join(format!("{id}.yaml"));
    if yaml_path.is_file() {
        return Some((parse_manifest_file(&yaml_path), yaml_path));
    }
    None
}

fn parse_manifest_file(path: &Path) -> Result<ProtocolManifest, CoreError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CoreError::manifest_invalid(path.display().to_string(), format!("failed to read: {e}")))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
            .map_err(|e| CoreError::manifest_invalid(path.display().to_string(), format!("invalid YAML: {e}"))),
        _ => serde_json::from_str(&contents)
            .map_err(|e| CoreError::manifest_invalid(path.display().to_string(), format!("invalid JSON: {e}"))),
    }
}
