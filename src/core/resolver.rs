use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{load_node, ConfigNode, ConfigSource, MalformedSitemapPolicy};
use crate::error::{Error, Result};
use crate::utils::shell::normalize_command;

/// One resolved resource entry: absolute local path to absolute remote path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapping {
    pub local_path: PathBuf,
    pub remote_path: String,
}

/// A sitemap update task after merging: absolute local path, ordered URL set,
/// optional remote upload target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapTask {
    pub path: PathBuf,
    pub loc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// The fully merged, deduplicated configuration, ready for execution.
/// Built once per run and immutable afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
    pub remote_host: String,
    pub temp_dir: String,
    pub transfer_workers: usize,
    pub on_malformed_sitemap: MalformedSitemapPolicy,
    pub files: Vec<ResourceMapping>,
    pub dirs: Vec<ResourceMapping>,
    pub local_pre_commands: Vec<String>,
    pub pre_commands: Vec<String>,
    pub post_commands: Vec<String>,
    pub local_post_commands: Vec<String>,
    pub sitemaps: Vec<SitemapTask>,
}

/// Sitemap entry waiting for path resolution: relative paths resolve against
/// the project root, which may be claimed by any node in the traversal, so
/// resolution happens after the walk completes.
struct PendingSitemap {
    raw_path: String,
    declaring_dir: PathBuf,
    loc: Vec<String>,
    target: Option<String>,
}

/// Mutable accumulator threaded through the include traversal.
///
/// Scalars are claimed at visit time (first node in traversal order wins);
/// list merges happen post-order, so included children land before the
/// parent's own entries.
#[derive(Default)]
struct ResolvedConfigBuilder {
    project_root: Option<String>,
    project_root_origin: Option<PathBuf>,
    remote_host: Option<String>,
    temp_dir: Option<String>,
    transfer_workers: Option<usize>,
    on_malformed_sitemap: Option<String>,

    files: Vec<ResourceMapping>,
    files_index: HashMap<String, usize>,
    dirs: Vec<ResourceMapping>,
    dirs_index: HashMap<String, usize>,

    local_pre_commands: Vec<String>,
    pre_commands: Vec<String>,
    post_commands: Vec<String>,
    local_post_commands: Vec<String>,

    sitemaps: Vec<PendingSitemap>,
}

impl ResolvedConfigBuilder {
    /// Claim scalar fields from a node at visit time. First non-empty value
    /// in traversal order wins; conflicting later values are logged and
    /// ignored.
    fn claim_scalars(&mut self, node: &ConfigNode) {
        claim(
            &mut self.remote_host,
            node.raw.remote_host.as_deref(),
            "remote_host",
            &node.path,
        );
        claim(
            &mut self.temp_dir,
            node.raw.temp_dir.as_deref(),
            "temp_dir",
            &node.path,
        );
        claim(
            &mut self.on_malformed_sitemap,
            node.raw.on_malformed_sitemap.as_deref(),
            "on_malformed_sitemap",
            &node.path,
        );

        if let Some(root) = node.raw.project_root.as_deref().filter(|v| !v.is_empty()) {
            if self.project_root.is_none() {
                self.project_root = Some(root.to_string());
                self.project_root_origin = Some(node.dir.clone());
            } else if self.project_root.as_deref() != Some(root) {
                log_status!(
                    "config",
                    "Ignoring project_root from {} (already set)",
                    node.path.display()
                );
            }
        }

        if let Some(workers) = node.raw.transfer_workers {
            if self.transfer_workers.is_none() {
                self.transfer_workers = Some(workers);
            } else if self.transfer_workers != Some(workers) {
                log_status!(
                    "config",
                    "Ignoring transfer_workers from {} (already set)",
                    node.path.display()
                );
            }
        }
    }

    /// Merge a node's own resources, commands, and sitemap tasks into the
    /// accumulator. Called post-order: all of the node's includes have
    /// already been merged.
    fn merge_node(&mut self, node: &ConfigNode) {
        for (local, remote) in &node.raw.resources.files {
            let mapping = resolve_mapping(local, remote, &node.dir);
            upsert(&mut self.files, &mut self.files_index, mapping);
        }
        for (local, remote) in &node.raw.resources.dirs {
            let mapping = resolve_mapping(local, remote, &node.dir);
            upsert(&mut self.dirs, &mut self.dirs_index, mapping);
        }

        append_commands(&mut self.local_pre_commands, &node.raw.local_pre_commands);
        append_commands(&mut self.pre_commands, &node.raw.pre_commands);
        append_commands(&mut self.post_commands, &node.raw.post_commands);
        append_commands(
            &mut self.local_post_commands,
            &node.raw.local_post_commands,
        );

        for sitemap in &node.raw.sitemaps {
            self.sitemaps.push(PendingSitemap {
                raw_path: sitemap.path.clone(),
                declaring_dir: node.dir.clone(),
                loc: sitemap.loc.clone(),
                target: sitemap.target.clone(),
            });
        }
    }

    fn finish(self, root_dir: &Path) -> Result<ResolvedConfig> {
        let remote_host = self.remote_host.ok_or_else(|| {
            Error::config_invalid_value(
                "remote_host",
                None,
                "No remote_host defined in the configuration or its includes",
            )
        })?;

        let transfer_workers = self.transfer_workers.unwrap_or(1);
        if transfer_workers == 0 {
            return Err(Error::config_invalid_value(
                "transfer_workers",
                Some("0".to_string()),
                "Worker count must be at least 1",
            ));
        }

        let on_malformed_sitemap = match self.on_malformed_sitemap.as_deref() {
            Some(value) => MalformedSitemapPolicy::parse(value)?,
            None => MalformedSitemapPolicy::default(),
        };

        let origin = self.project_root_origin;
        let project_root = self.project_root.map(|raw| {
            let expanded = shellexpand::tilde(&raw).to_string();
            let path = PathBuf::from(expanded);
            if path.is_absolute() {
                path
            } else {
                origin.as_deref().unwrap_or(root_dir).join(path)
            }
        });

        let sitemaps = dedup_sitemaps(self.sitemaps, project_root.as_deref());

        Ok(ResolvedConfig {
            project_root,
            remote_host,
            temp_dir: self.temp_dir.unwrap_or_else(|| "/tmp".to_string()),
            transfer_workers,
            on_malformed_sitemap,
            files: self.files,
            dirs: self.dirs,
            local_pre_commands: self.local_pre_commands,
            pre_commands: self.pre_commands,
            post_commands: self.post_commands,
            local_post_commands: self.local_post_commands,
            sitemaps,
        })
    }
}

fn claim(slot: &mut Option<String>, value: Option<&str>, key: &str, node_path: &Path) {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return;
    };
    if slot.is_none() {
        *slot = Some(value.to_string());
    } else if slot.as_deref() != Some(value) {
        log_status!(
            "config",
            "Ignoring {} from {} (already set)",
            key,
            node_path.display()
        );
    }
}

/// Resolve a local resource key against the declaring node's directory.
fn resolve_mapping(local: &str, remote: &str, declaring_dir: &Path) -> ResourceMapping {
    let expanded = shellexpand::tilde(local).to_string();
    let local_path = if Path::new(&expanded).is_absolute() {
        PathBuf::from(expanded)
    } else {
        declaring_dir.join(expanded)
    };
    ResourceMapping {
        local_path,
        remote_path: remote.to_string(),
    }
}

/// Insert keyed by remote path, last-write-wins on collision.
fn upsert(
    mappings: &mut Vec<ResourceMapping>,
    index: &mut HashMap<String, usize>,
    mapping: ResourceMapping,
) {
    if let Some(&idx) = index.get(&mapping.remote_path) {
        mappings[idx] = mapping;
    } else {
        index.insert(mapping.remote_path.clone(), mappings.len());
        mappings.push(mapping);
    }
}

/// Append commands, deduplicated by normalized string value, preserving
/// first-occurrence order within the phase list.
fn append_commands(list: &mut Vec<String>, commands: &[String]) {
    for command in commands {
        let normalized = normalize_command(command);
        if normalized.is_empty() {
            continue;
        }
        if !list.contains(&normalized) {
            list.push(normalized);
        }
    }
}

/// Resolve sitemap paths and deduplicate by (path, target) identity,
/// unioning `loc` sets in encounter order.
fn dedup_sitemaps(pending: Vec<PendingSitemap>, project_root: Option<&Path>) -> Vec<SitemapTask> {
    let mut tasks: Vec<SitemapTask> = Vec::new();
    let mut index: HashMap<(PathBuf, Option<String>), usize> = HashMap::new();

    for entry in pending {
        let expanded = shellexpand::tilde(&entry.raw_path).to_string();
        let path = if Path::new(&expanded).is_absolute() {
            PathBuf::from(expanded)
        } else {
            project_root
                .unwrap_or(&entry.declaring_dir)
                .join(expanded)
        };

        let key = (path.clone(), entry.target.clone());
        match index.get(&key) {
            Some(&idx) => {
                let existing = &mut tasks[idx];
                for url in entry.loc {
                    if !existing.loc.contains(&url) {
                        existing.loc.push(url);
                    }
                }
            }
            None => {
                let mut loc = Vec::new();
                for url in entry.loc {
                    if !loc.contains(&url) {
                        loc.push(url);
                    }
                }
                index.insert(key, tasks.len());
                tasks.push(SitemapTask {
                    path,
                    loc,
                    target: entry.target,
                });
            }
        }
    }

    tasks
}

struct Frame {
    node: ConfigNode,
    next_include: usize,
}

/// Resolve a root configuration and everything reachable through `include`
/// into one [`ResolvedConfig`].
///
/// Explicit iterative depth-first traversal with a visited set: each config
/// file is loaded and merged at most once, so cycles and diamond includes
/// terminate without repeated entries. Children merge before the including
/// parent's own entries.
pub fn resolve(root_path: &Path, source: &dyn ConfigSource) -> Result<ResolvedConfig> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut builder = ResolvedConfigBuilder::default();

    let root = load_node(root_path, source)?;
    let root_dir = root.dir.clone();
    seen.insert(root.path.clone());
    builder.claim_scalars(&root);

    let mut stack = vec![Frame {
        node: root,
        next_include: 0,
    }];

    while !stack.is_empty() {
        let top = stack.len() - 1;
        let next_include = {
            let frame = &mut stack[top];
            if frame.next_include < frame.node.includes.len() {
                let path = frame.node.includes[frame.next_include].clone();
                frame.next_include += 1;
                Some(path)
            } else {
                None
            }
        };

        let Some(include_path) = next_include else {
            let frame = stack.pop().expect("stack is non-empty");
            builder.merge_node(&frame.node);
            continue;
        };

        if seen.contains(&include_path) {
            continue;
        }

        let node = match load_node(&include_path, source) {
            Ok(node) => node,
            Err(err) => {
                let chain: Vec<String> = stack
                    .iter()
                    .map(|f| f.node.path.display().to_string())
                    .collect();
                return Err(Error::config_include(
                    include_path.display().to_string(),
                    chain,
                    err,
                ));
            }
        };

        // The canonical path can differ from the include entry (symlinks);
        // re-check so a file is never merged twice.
        if !seen.insert(node.path.clone()) {
            continue;
        }
        builder.claim_scalars(&node);
        stack.push(Frame {
            node,
            next_include: 0,
        });
    }

    builder.finish(&root_dir)
}
