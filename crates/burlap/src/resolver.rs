//! Module reference resolution
//!
//! Maps a requested module reference plus its requesting context to a
//! canonical filesystem location, applying package-path aliasing,
//! relative-path normalization and conventional extension probing
//! (exact file, then `.js`, then directory index). The resolver also owns
//! the identity table: the first requester that introduces a location
//! decides the identity token every later record for that location reuses.

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, warn};

use crate::error::WalkError;

/// The requesting side of a resolution: where the reference occurred and
/// which identity token that requester itself carries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Canonical location of the requesting module
    pub file: PathBuf,
    /// Identity token of the requesting module
    pub id: String,
}

impl RequestContext {
    /// Synthetic root context used when resolving entry references.
    pub fn root() -> Self {
        Self {
            file: PathBuf::from("/"),
            id: "/".to_string(),
        }
    }

    fn is_root(&self) -> bool {
        self.id == "/"
    }
}

/// Split a reference into its resource-qualifier prefix (through the last
/// `!`) and the bare path that is actually resolved on disk.
fn split_qualifier(reference: &str) -> (Option<&str>, &str) {
    match reference.rfind('!') {
        Some(i) => (Some(&reference[..=i]), &reference[i + 1..]),
        None => (None, reference),
    }
}

/// Collapse `.` and `..` components lexically, without touching the
/// filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Lexical normalization in identity space, where separators are always
/// forward slashes regardless of platform.
fn normalize_id(id: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in id.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[derive(Debug)]
pub struct ModuleResolver {
    /// Alias table: leading reference segment -> filesystem base path
    package_paths: IndexMap<String, PathBuf>,
    /// Base directory entry references resolve against
    base_dir: PathBuf,
    /// Canonical location -> identity token, first-writer-wins
    identities: IndexMap<PathBuf, String>,
}

impl ModuleResolver {
    pub fn new(base_dir: PathBuf, package_paths: IndexMap<String, PathBuf>) -> Self {
        Self {
            package_paths,
            base_dir,
            identities: IndexMap::new(),
        }
    }

    /// Resolve a reference from the given context to a canonical location.
    ///
    /// Records the identity token for the location as a side effect; the
    /// token assigned by the first requester wins.
    pub fn resolve(
        &mut self,
        reference: &str,
        ctx: &RequestContext,
    ) -> Result<PathBuf, WalkError> {
        let (qualifier, bare) = split_qualifier(reference);

        let mut candidate = self.apply_alias(bare);
        if candidate.is_relative() {
            let base = if ctx.is_root() {
                self.base_dir.clone()
            } else {
                ctx.file
                    .parent()
                    .map_or_else(|| self.base_dir.clone(), Path::to_path_buf)
            };
            candidate = base.join(candidate);
        }
        let candidate = normalize_path(&candidate);

        let resolved = self.probe(&candidate).ok_or_else(|| WalkError::NotFound {
            reference: reference.to_string(),
            requester: ctx.file.display().to_string(),
        })?;

        let id = self
            .package_relative_id(reference, qualifier, bare, ctx)
            .unwrap_or_else(|| reference.to_string());
        debug!("resolved \"{reference}\" -> {} (id {id})", resolved.display());
        self.identities.entry(resolved.clone()).or_insert(id);

        Ok(resolved)
    }

    /// Identity token previously recorded for a canonical location.
    pub fn identity_of(&self, file: &Path) -> Option<&str> {
        self.identities.get(file).map(String::as_str)
    }

    /// Substitute a configured package path for the reference's leading
    /// segment, or for the whole reference when it matches a key exactly.
    fn apply_alias(&self, bare: &str) -> PathBuf {
        if let Some(i) = bare.find('/') {
            if let Some(base) = self.package_paths.get(&bare[..i]) {
                return base.join(&bare[i + 1..]);
            }
        } else if let Some(base) = self.package_paths.get(bare) {
            return base.clone();
        }
        PathBuf::from(bare)
    }

    /// Rewrite the identity of a dot-relative (or qualified dot-relative)
    /// reference against the requester's package-relative root rather than
    /// its filesystem path, so text resources nested inside a package
    /// resolve to siblings within that package instead of escaping it.
    ///
    /// The trigger condition (a `!.` marker or a leading dot) mirrors the
    /// original behavior exactly; it is known-fragile and pinned by tests.
    fn package_relative_id(
        &self,
        reference: &str,
        qualifier: Option<&str>,
        bare: &str,
        ctx: &RequestContext,
    ) -> Option<String> {
        if ctx.is_root() {
            return None;
        }
        if !(reference.contains("!.") || reference.starts_with('.')) {
            return None;
        }

        // Requester's id with its trailing segment removed is the package
        // subtree the reference must stay inside of.
        let parent = match ctx.id.rfind('/') {
            Some(i) => &ctx.id[..i],
            None => ctx.id.as_str(),
        };
        let needle = match parent.find('/') {
            Some(i) => &parent[..=i],
            None => parent,
        };

        let joined = normalize_id(&format!("{parent}/{bare}"));
        let rebased = match joined.find(needle) {
            Some(i) if !needle.is_empty() => &joined[i..],
            _ => joined.as_str(),
        };

        Some(match qualifier {
            Some(q) => format!("{q}{rebased}"),
            None => rebased.to_string(),
        })
    }

    /// Extension-resolved existence probe: exact file, then `.js`, then
    /// directory (`package.json` main, then `index.js`).
    fn probe(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(self.canonicalize_path(candidate));
        }

        let mut with_ext = candidate.as_os_str().to_os_string();
        with_ext.push(".js");
        let with_ext = PathBuf::from(with_ext);
        if with_ext.is_file() {
            return Some(self.canonicalize_path(&with_ext));
        }

        if candidate.is_dir() {
            if let Some(main) = self.package_main(candidate) {
                let target = normalize_path(&candidate.join(main));
                if target.is_file() {
                    return Some(self.canonicalize_path(&target));
                }
                let mut target_js = target.into_os_string();
                target_js.push(".js");
                let target_js = PathBuf::from(target_js);
                if target_js.is_file() {
                    return Some(self.canonicalize_path(&target_js));
                }
            }
            let index = candidate.join("index.js");
            if index.is_file() {
                return Some(self.canonicalize_path(&index));
            }
        }

        None
    }

    /// Read the `main` field of a directory's `package.json`, if any.
    fn package_main(&self, dir: &Path) -> Option<String> {
        let manifest = dir.join("package.json");
        let text = std::fs::read_to_string(&manifest).ok()?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => value
                .get("main")
                .and_then(|m| m.as_str())
                .map(String::from),
            Err(err) => {
                warn!("ignoring malformed {}: {err}", manifest.display());
                None
            }
        }
    }

    /// Canonicalize a path, keeping the lexical form when the filesystem
    /// refuses.
    fn canonicalize_path(&self, path: &Path) -> PathBuf {
        match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("failed to canonicalize path {}: {e}", path.display());
                path.to_path_buf()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    fn create_test_file(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn resolver_at(root: &Path) -> ModuleResolver {
        ModuleResolver::new(root.to_path_buf(), IndexMap::new())
    }

    #[test]
    fn test_exact_file_preferred_over_extension() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("mod"), "// extensionless")?;
        create_test_file(&root.join("mod.js"), "// with extension")?;

        let mut resolver = resolver_at(root);
        let resolved = resolver.resolve("./mod", &RequestContext::root())?;
        assert_eq!(resolved, root.join("mod").canonicalize()?);

        Ok(())
    }

    #[test]
    fn test_extension_then_directory_index() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("a.js"), "")?;
        create_test_file(&root.join("lib/index.js"), "")?;

        let mut resolver = resolver_at(root);
        assert_eq!(
            resolver.resolve("./a", &RequestContext::root())?,
            root.join("a.js").canonicalize()?
        );
        assert_eq!(
            resolver.resolve("./lib", &RequestContext::root())?,
            root.join("lib/index.js").canonicalize()?
        );

        Ok(())
    }

    #[test]
    fn test_package_json_main_wins_over_index() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("pkg/package.json"), r#"{"main": "lib/entry.js"}"#)?;
        create_test_file(&root.join("pkg/lib/entry.js"), "")?;
        create_test_file(&root.join("pkg/index.js"), "")?;

        let mut resolver = resolver_at(root);
        assert_eq!(
            resolver.resolve("./pkg", &RequestContext::root())?,
            root.join("pkg/lib/entry.js").canonicalize()?
        );

        Ok(())
    }

    #[test]
    fn test_alias_substitutes_leading_segment() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("vendor/ace/lib/editor.js"), "")?;

        let mut package_paths = IndexMap::new();
        package_paths.insert("ace".to_string(), root.join("vendor/ace/lib"));
        let mut resolver = ModuleResolver::new(root.to_path_buf(), package_paths);

        assert_eq!(
            resolver.resolve("ace/editor", &RequestContext::root())?,
            root.join("vendor/ace/lib/editor.js").canonicalize()?
        );

        Ok(())
    }

    #[test]
    fn test_whole_reference_alias() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("jam/events/events.js"), "")?;

        let mut package_paths = IndexMap::new();
        package_paths.insert("events".to_string(), root.join("jam/events/events.js"));
        let mut resolver = ModuleResolver::new(root.to_path_buf(), package_paths);

        assert_eq!(
            resolver.resolve("events", &RequestContext::root())?,
            root.join("jam/events/events.js").canonicalize()?
        );

        Ok(())
    }

    #[test]
    fn test_relative_resolves_against_requester_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("deep/nested/main.js"), "")?;
        create_test_file(&root.join("deep/sibling.js"), "")?;

        let mut resolver = resolver_at(root);
        let ctx = RequestContext {
            file: root.join("deep/nested/main.js").canonicalize()?,
            id: "deep/nested/main".to_string(),
        };
        assert_eq!(
            resolver.resolve("../sibling", &ctx)?,
            root.join("deep/sibling.js").canonicalize()?
        );

        Ok(())
    }

    #[test]
    fn test_not_found_carries_reference_and_requester() {
        let temp_dir = TempDir::new().expect("tempdir");
        let mut resolver = resolver_at(temp_dir.path());

        let err = resolver
            .resolve("./missing", &RequestContext::root())
            .expect_err("missing module should not resolve");
        match err {
            WalkError::NotFound {
                reference,
                requester,
            } => {
                assert_eq!(reference, "./missing");
                assert_eq!(requester, "/");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_identity_first_writer_wins() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("shared.js"), "")?;
        create_test_file(&root.join("a.js"), "")?;
        create_test_file(&root.join("b.js"), "")?;

        let mut resolver = resolver_at(root);
        let ctx_a = RequestContext {
            file: root.join("a.js").canonicalize()?,
            id: "pkg/a".to_string(),
        };
        let ctx_b = RequestContext {
            file: root.join("b.js").canonicalize()?,
            id: "pkg/b".to_string(),
        };

        let first = resolver.resolve("./shared", &ctx_a)?;
        let second = resolver.resolve("./shared", &ctx_b)?;
        assert_eq!(first, second);
        assert_eq!(resolver.identity_of(&first), Some("pkg/shared"));

        Ok(())
    }

    #[test]
    fn test_qualified_reference_rebased_to_package_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("plugins/c9.editor/skin.xml"), "<skin/>")?;
        create_test_file(&root.join("plugins/c9.editor/editor.js"), "")?;

        let mut resolver = resolver_at(root);
        let ctx = RequestContext {
            file: root.join("plugins/c9.editor/editor.js").canonicalize()?,
            id: "plugins/c9.editor/editor".to_string(),
        };

        let resolved = resolver.resolve("text!./skin.xml", &ctx)?;
        assert_eq!(resolved, root.join("plugins/c9.editor/skin.xml").canonicalize()?);
        // Identity stays inside the requester's package subtree and keeps
        // the qualifier.
        assert_eq!(
            resolver.identity_of(&resolved),
            Some("text!plugins/c9.editor/skin.xml")
        );

        Ok(())
    }

    #[test]
    fn test_dot_relative_identity_rewritten() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("plugins/c9.editor/util.js"), "")?;
        create_test_file(&root.join("plugins/c9.editor/editor.js"), "")?;

        let mut resolver = resolver_at(root);
        let ctx = RequestContext {
            file: root.join("plugins/c9.editor/editor.js").canonicalize()?,
            id: "plugins/c9.editor/editor".to_string(),
        };

        let resolved = resolver.resolve("./util", &ctx)?;
        assert_eq!(
            resolver.identity_of(&resolved),
            Some("plugins/c9.editor/util")
        );

        Ok(())
    }

    #[test]
    fn test_rebase_clips_at_first_occurrence_of_repeated_segment() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("plugins/sub/plugins/thing.js"), "")?;
        create_test_file(&root.join("plugins/sub/plugins/helper.js"), "")?;

        let mut resolver = resolver_at(root);
        let ctx = RequestContext {
            file: root.join("plugins/sub/plugins/thing.js").canonicalize()?,
            id: "plugins/sub/plugins/thing".to_string(),
        };

        // The requester's leading segment repeats inside its identity;
        // clipping at the earliest occurrence keeps the full subtree
        // instead of collapsing to the inner repeat.
        let resolved = resolver.resolve("./helper", &ctx)?;
        assert_eq!(
            resolver.identity_of(&resolved),
            Some("plugins/sub/plugins/helper")
        );

        Ok(())
    }

    #[test]
    fn test_bare_reference_keeps_its_own_identity() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        create_test_file(&root.join("vendor/ace/lib/editor.js"), "")?;
        create_test_file(&root.join("main.js"), "")?;

        let mut package_paths = IndexMap::new();
        package_paths.insert("ace".to_string(), root.join("vendor/ace/lib"));
        let mut resolver = ModuleResolver::new(root.to_path_buf(), package_paths);

        let ctx = RequestContext {
            file: root.join("main.js").canonicalize()?,
            id: "main".to_string(),
        };
        let resolved = resolver.resolve("ace/editor", &ctx)?;
        assert_eq!(resolver.identity_of(&resolved), Some("ace/editor"));

        Ok(())
    }

    #[test]
    fn test_normalize_id_collapses_dots() {
        assert_eq!(normalize_id("a/b/./c"), "a/b/c");
        assert_eq!(normalize_id("a/b/../c"), "a/c");
        assert_eq!(normalize_id("./a//b"), "a/b");
    }
}
