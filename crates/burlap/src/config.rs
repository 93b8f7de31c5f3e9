//! TOML configuration for the CLI layer
//!
//! The core walk takes already-parsed inputs; this config is the external
//! collaborator that produces them. Legacy configs that embed a literal
//! package list inside executable source are deliberately unsupported,
//! the list lives in plain TOML here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Entry module references seeding the traversal
    pub entries: Vec<String>,
    /// Directory entry references resolve against; defaults to the
    /// config file's own directory when loaded from disk
    pub base_dir: Option<PathBuf>,
    /// Alias table: leading reference segment -> filesystem base path
    pub package_paths: IndexMap<String, PathBuf>,
    /// References containing any of these substrings are never walked
    pub skip: Vec<String>,
    /// Output artifact path
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            base_dir: None,
            package_paths: IndexMap::new(),
            skip: Vec::new(),
            output: PathBuf::from("build.js"),
        }
    }
}

impl Config {
    /// Load a config file, defaulting `base_dir` to the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if config.base_dir.is_none() {
            config.base_dir = path.parent().map(Path::to_path_buf);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.entries.is_empty());
        assert_eq!(config.output, PathBuf::from("build.js"));
    }

    #[test]
    fn test_parse_full_config() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            entries = ["./main", "plugins/editor"]
            skip = ["ace"]
            output = "dist/app.js"

            [package_paths]
            plugins = "plugins-client"
            "#,
        )?;
        assert_eq!(config.entries, vec!["./main", "plugins/editor"]);
        assert_eq!(config.skip, vec!["ace"]);
        assert_eq!(config.output, PathBuf::from("dist/app.js"));
        assert_eq!(
            config.package_paths.get("plugins"),
            Some(&PathBuf::from("plugins-client"))
        );
        Ok(())
    }

    #[test]
    fn test_load_defaults_base_dir_to_config_dir() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let path = temp_dir.path().join("burlap.toml");
        std::fs::write(&path, "entries = [\"./main\"]\n")?;

        let config = Config::load(&path)?;
        assert_eq!(config.base_dir.as_deref(), Some(temp_dir.path()));
        Ok(())
    }

    #[test]
    fn test_wrong_field_type_rejected() {
        // serde(default) still surfaces type errors in known fields
        let result: Result<Config, _> = toml::from_str("entries = 3");
        assert!(result.is_err());
    }
}
