use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Policy for handling an existing sitemap file that cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedSitemapPolicy {
    /// Abort the run with a parse error.
    #[default]
    Fail,
    /// Replace the file with a fresh document containing the configured URLs.
    Rebuild,
}

impl MalformedSitemapPolicy {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "fail" => Ok(Self::Fail),
            "rebuild" => Ok(Self::Rebuild),
            other => Err(Error::config_invalid_value(
                "on_malformed_sitemap",
                Some(other.to_string()),
                "Expected 'fail' or 'rebuild'",
            )),
        }
    }
}

/// Raw resource mappings as written in the document: local relative path to
/// remote absolute path. BTreeMap keeps per-node iteration deterministic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResources {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub dirs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSitemap {
    pub path: String,
    #[serde(default)]
    pub loc: Vec<String>,
    #[serde(default)]
    pub target: Option<String>,
}

/// One configuration document, as parsed. Paths inside `resources` and
/// `sitemaps` are untouched here; they resolve at merge time against the
/// declaring node's directory (or project root, for sitemaps).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub remote_host: Option<String>,
    #[serde(default)]
    pub temp_dir: Option<String>,
    #[serde(default)]
    pub transfer_workers: Option<usize>,
    #[serde(default)]
    pub on_malformed_sitemap: Option<String>,
    #[serde(default)]
    pub resources: RawResources,
    #[serde(default)]
    pub local_pre_commands: Vec<String>,
    #[serde(default)]
    pub pre_commands: Vec<String>,
    #[serde(default)]
    pub post_commands: Vec<String>,
    #[serde(default)]
    pub local_post_commands: Vec<String>,
    #[serde(default)]
    pub sitemaps: Vec<RawSitemap>,
    #[serde(default)]
    pub include: Vec<String>,
}

/// Capability interface for loading a raw configuration document.
///
/// Production parsing is YAML; the resolver only depends on this trait, so
/// tests can feed it in-memory documents.
pub trait ConfigSource {
    fn load(&self, path: &Path) -> Result<RawConfig>;
}

/// YAML-backed config source.
pub struct YamlConfigSource;

impl YamlConfigSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YamlConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, path: &Path) -> Result<RawConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.display().to_string())
            } else {
                Error::internal_io(e.to_string(), Some("read config file".to_string()))
            }
        })?;

        // An empty document is an empty config, not a parse error.
        if content.trim().is_empty() {
            log_status!("config", "Configuration file {} is empty", path.display());
            return Ok(RawConfig::default());
        }

        serde_yml::from_str(&content)
            .map_err(|e| Error::config_parse(path.display().to_string(), e.to_string()))
    }
}

/// A loaded configuration node: the raw document plus its location and its
/// `include` entries resolved to absolute paths (the resolver's dedup keys).
#[derive(Debug, Clone)]
pub struct ConfigNode {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub raw: RawConfig,
    pub includes: Vec<PathBuf>,
}

/// Load one configuration node from `path`.
pub fn load_node(path: &Path, source: &dyn ConfigSource) -> Result<ConfigNode> {
    let raw = source.load(path)?;

    // Canonical path so the same file reached via different spellings
    // deduplicates; the file exists at this point, but fall back to the
    // given path if canonicalization is denied.
    let abs = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let dir = abs
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let includes = raw
        .include
        .iter()
        .map(|entry| resolve_include_path(entry, &dir))
        .collect();

    Ok(ConfigNode {
        path: abs,
        dir,
        raw,
        includes,
    })
}

/// Resolve an `include` entry to an absolute path against the including
/// file's directory. Missing targets stay as joined paths; loading them
/// reports the proper not-found error with the include chain.
fn resolve_include_path(entry: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(entry).to_string();
    let candidate = if Path::new(&expanded).is_absolute() {
        PathBuf::from(expanded)
    } else {
        base_dir.join(expanded)
    };
    fs::canonicalize(&candidate).unwrap_or(candidate)
}
