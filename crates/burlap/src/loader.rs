//! Source loading and the transform chain
//!
//! Reads raw source text for a canonical location (the traversal
//! guarantees at most one read per location) and runs it through the
//! configured source-to-source transforms: the global chain for modules
//! outside any `node_modules` subtree, plus whatever per-package
//! transforms the caller's picker selects from the owning package's
//! `package.json`. Each transform consumes the previous stage's complete
//! output; an empty chain forwards raw text unchanged.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use log::{trace, warn};

use crate::error::WalkError;

/// A source-to-source rewriter applied before dependency extraction.
pub trait Transform: Send + Sync {
    /// Name used in error reporting when the transform fails.
    fn name(&self) -> &str;

    /// Rewrite the complete source of one module.
    fn apply(&self, file: &Path, source: String) -> anyhow::Result<String>;
}

impl fmt::Debug for dyn Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform({})", self.name())
    }
}

/// Selects additional transforms from a package's parsed `package.json`.
pub type TransformPicker =
    Box<dyn Fn(&serde_json::Value) -> Vec<Arc<dyn Transform>> + Send + Sync>;

pub struct SourceLoader {
    /// Global transforms, applied to top-level modules only
    transforms: Vec<Arc<dyn Transform>>,
    /// Optional per-package transform selection
    picker: Option<TransformPicker>,
    /// Parsed package metadata per package directory; `None` entries cache
    /// directories with no usable manifest
    manifest_cache: IndexMap<PathBuf, Option<Arc<serde_json::Value>>>,
}

impl fmt::Debug for SourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLoader")
            .field("transforms", &self.transforms.len())
            .field("picker", &self.picker.is_some())
            .field("manifest_cache", &self.manifest_cache.len())
            .finish()
    }
}

impl SourceLoader {
    pub fn new(transforms: Vec<Arc<dyn Transform>>, picker: Option<TransformPicker>) -> Self {
        Self {
            transforms,
            picker,
            manifest_cache: IndexMap::new(),
        }
    }

    /// Read the raw source text for a canonical location.
    pub fn load(&self, file: &Path) -> Result<String, WalkError> {
        trace!("loading {}", file.display());
        std::fs::read_to_string(file).map_err(|source| WalkError::Io {
            file: file.to_path_buf(),
            source,
        })
    }

    /// Run the full transform chain for one module.
    pub fn apply_transforms(
        &mut self,
        file: &Path,
        mut source: String,
    ) -> Result<String, WalkError> {
        let mut chain: Vec<Arc<dyn Transform>> = if is_top_level(file) {
            self.transforms.clone()
        } else {
            Vec::new()
        };
        chain.extend(self.package_transforms(file));

        for transform in chain {
            trace!("applying '{}' to {}", transform.name(), file.display());
            source = transform
                .apply(file, source)
                .map_err(|source| WalkError::Transform {
                    file: file.to_path_buf(),
                    transform: transform.name().to_string(),
                    source,
                })?;
        }
        Ok(source)
    }

    /// Transforms declared by the module's own package metadata.
    fn package_transforms(&mut self, file: &Path) -> Vec<Arc<dyn Transform>> {
        if self.picker.is_none() {
            return Vec::new();
        }
        // Look up the manifest before re-borrowing the picker; the cache
        // walk needs the loader mutably.
        let Some(manifest) = self.nearest_manifest(file) else {
            return Vec::new();
        };
        match self.picker.as_ref() {
            Some(picker) => picker(&manifest),
            None => Vec::new(),
        }
    }

    /// Walk ancestors of a module file until a parseable `package.json`
    /// turns up, caching per directory.
    fn nearest_manifest(&mut self, file: &Path) -> Option<Arc<serde_json::Value>> {
        let mut dir = file.parent();
        while let Some(current) = dir {
            if let Some(cached) = self.manifest_cache.get(current) {
                return cached.clone();
            }
            let manifest = current.join("package.json");
            if manifest.is_file() {
                let parsed = read_manifest(&manifest).map(Arc::new);
                self.manifest_cache
                    .insert(current.to_path_buf(), parsed.clone());
                return parsed;
            }
            dir = current.parent();
        }
        None
    }
}

/// Global transforms only apply outside `node_modules` subtrees, matching
/// how vendored packages opt in through their own metadata instead.
fn is_top_level(file: &Path) -> bool {
    !file
        .components()
        .any(|c| c.as_os_str() == "node_modules")
}

fn read_manifest(manifest: &Path) -> Option<serde_json::Value> {
    let text = std::fs::read_to_string(manifest).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("ignoring malformed {}: {err}", manifest.display());
            None
        }
    }
}
