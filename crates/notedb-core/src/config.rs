use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Site configuration read from `etc/notedb.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesConfig {
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub repos: ReposConfig,
}

/// Migration phase switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Serve reads from the notes log instead of the legacy store.
    #[serde(default)]
    pub read_changes: bool,
    #[serde(default)]
    pub write_changes: bool,
    /// Rebuild stale notes on read.
    #[serde(default = "default_true")]
    pub auto_rebuild: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            read_changes: false,
            write_changes: false,
            auto_rebuild: default_true(),
        }
    }
}

impl MigrationConfig {
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.read_changes || self.write_changes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Ids per legacy batch read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReposConfig {
    /// Repository holding per-account data such as draft comments.
    #[serde(default = "default_all_users")]
    pub all_users: String,
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            all_users: default_all_users(),
        }
    }
}

/// Load `<site>/etc/notedb.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed, or when
/// `scan.batch_size` is zero.
pub fn load_config(site_dir: &Path) -> Result<NotesConfig> {
    let path = site_dir.join("etc/notedb.toml");
    if !path.exists() {
        return Ok(NotesConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<NotesConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if config.scan.batch_size == 0 {
        bail!("{}: scan.batch_size must be at least 1", path.display());
    }
    Ok(config)
}

/// Load the site config and apply `NOTEDB_READ_CHANGES` and
/// `NOTEDB_AUTO_REBUILD` overrides.
///
/// # Errors
///
/// Fails on config load errors or unparseable override values.
pub fn resolve_config(site_dir: &Path) -> Result<NotesConfig> {
    let mut config = load_config(site_dir)?;
    apply_overrides(
        &mut config,
        env::var("NOTEDB_READ_CHANGES").ok(),
        env::var("NOTEDB_AUTO_REBUILD").ok(),
    )?;
    Ok(config)
}

fn apply_overrides(
    config: &mut NotesConfig,
    read_changes: Option<String>,
    auto_rebuild: Option<String>,
) -> Result<()> {
    if let Some(raw) = read_changes {
        config.migration.read_changes =
            parse_flag(&raw).with_context(|| "Invalid NOTEDB_READ_CHANGES")?;
    }
    if let Some(raw) = auto_rebuild {
        config.migration.auto_rebuild =
            parse_flag(&raw).with_context(|| "Invalid NOTEDB_AUTO_REBUILD")?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => bail!("expected true|false|1|0, got {other:?}"),
    }
}

const fn default_true() -> bool {
    true
}

const fn default_cache_capacity() -> usize {
    crate::notes::cache::DEFAULT_CAPACITY
}

const fn default_batch_size() -> usize {
    30
}

fn default_all_users() -> String {
    "All-Users".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) {
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(&etc).expect("mkdir");
        std::fs::write(etc.join("notedb.toml"), body).expect("write");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_config(dir.path()).expect("load");
        assert_eq!(config, NotesConfig::default());
        assert!(!config.migration.enabled());
        assert!(config.migration.auto_rebuild);
        assert_eq!(config.scan.batch_size, 30);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.repos.all_users, "All-Users");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let dir = TempDir::new().expect("tempdir");
        write_config(&dir, "[migration]\nread_changes = true\n\n[scan]\nbatch_size = 5\n");
        let config = load_config(dir.path()).expect("load");
        assert!(config.migration.read_changes);
        assert!(config.migration.enabled());
        assert!(config.migration.auto_rebuild);
        assert_eq!(config.scan.batch_size, 5);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        write_config(&dir, "[scan]\nbatch_size = 0\n");
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn invalid_toml_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        write_config(&dir, "[migration\n");
        let err = load_config(dir.path()).expect_err("parse error");
        assert!(format!("{err:#}").contains("notedb.toml"));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = NotesConfig::default();
        apply_overrides(&mut config, Some("1".into()), Some("false".into())).expect("apply");
        assert!(config.migration.read_changes);
        assert!(!config.migration.auto_rebuild);

        assert!(apply_overrides(&mut config, Some("maybe".into()), None).is_err());
    }
}
