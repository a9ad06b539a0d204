use std::path::{Path, PathBuf};

use crate::config::MalformedSitemapPolicy;
use crate::error::Result;
use crate::local_files::FileSystem;
use crate::resolver::ResolvedConfig;
use crate::sitemap;

/// What gets uploaded for one transfer entry.
#[derive(Debug, Clone)]
pub enum TransferSource {
    /// A file on the local disk.
    File(PathBuf),
    /// An in-memory document (updated sitemaps), labeled with the local
    /// path it was derived from.
    Content { origin: PathBuf, content: String },
}

#[derive(Debug, Clone)]
pub struct TransferEntry {
    pub source: TransferSource,
    pub remote_path: String,
}

impl TransferEntry {
    pub fn local_label(&self) -> Option<String> {
        match &self.source {
            TransferSource::File(path) => Some(path.display().to_string()),
            TransferSource::Content { origin, .. } => Some(origin.display().to_string()),
        }
    }
}

/// Expand the resolved resource mappings and sitemap tasks into the final
/// list of transfer entries.
///
/// Declared files that do not exist locally are logged and skipped rather
/// than failing the run; directories expand recursively, mirroring their
/// layout under the remote path. Updated sitemap documents are written back
/// to disk and, when a target is configured, added as content entries.
pub fn build_transfer_set(
    config: &ResolvedConfig,
    fs: &dyn FileSystem,
    date: &str,
) -> Result<Vec<TransferEntry>> {
    let mut entries = Vec::new();

    for mapping in &config.files {
        if !fs.exists(&mapping.local_path) {
            log_status!(
                "pack",
                "Skipping missing file {}",
                mapping.local_path.display()
            );
            continue;
        }
        entries.push(TransferEntry {
            source: TransferSource::File(mapping.local_path.clone()),
            remote_path: mapping.remote_path.clone(),
        });
    }

    for mapping in &config.dirs {
        if !fs.is_dir(&mapping.local_path) {
            log_status!(
                "pack",
                "Skipping missing directory {}",
                mapping.local_path.display()
            );
            continue;
        }
        let remote_base = mapping.remote_path.trim_end_matches('/');
        for file in fs.walk_files(&mapping.local_path)? {
            let rel = file
                .strip_prefix(&mapping.local_path)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            entries.push(TransferEntry {
                source: TransferSource::File(file.clone()),
                remote_path: format!("{}/{}", remote_base, rel),
            });
        }
    }

    for task in &config.sitemaps {
        let content =
            update_sitemap(&task.path, &task.loc, config.on_malformed_sitemap, fs, date)?;
        if let Some(target) = &task.target {
            entries.push(TransferEntry {
                source: TransferSource::Content {
                    origin: task.path.clone(),
                    content,
                },
                remote_path: target.clone(),
            });
        }
    }

    Ok(entries)
}

/// Merge a task's URLs into its on-disk sitemap, write the result back
/// atomically, and return the updated document.
fn update_sitemap(
    path: &Path,
    loc: &[String],
    policy: MalformedSitemapPolicy,
    fs: &dyn FileSystem,
    date: &str,
) -> Result<String> {
    let origin = path.display().to_string();
    let existing = if fs.exists(path) {
        Some(fs.read(path)?)
    } else {
        log_status!("sitemap", "Creating new sitemap {}", origin);
        None
    };

    let merged = match sitemap::merge(existing.as_deref(), loc, date, &origin) {
        Ok(merged) => merged,
        Err(err) if err.code == crate::error::ErrorCode::SitemapParse => match policy {
            MalformedSitemapPolicy::Fail => return Err(err),
            MalformedSitemapPolicy::Rebuild => {
                log_status!("sitemap", "Rebuilding malformed sitemap {}", origin);
                sitemap::build_document(loc, date)
            }
        },
        Err(err) => return Err(err),
    };

    if existing.as_deref() != Some(merged.as_str()) {
        fs.write(path, &merged)?;
        log_status!("sitemap", "Updated {}", origin);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_files::local;
    use crate::resolver::{ResourceMapping, SitemapTask};
    use std::fs as std_fs;
    use tempfile::tempdir;

    const DATE: &str = "2024-05-01";

    fn base_config() -> ResolvedConfig {
        ResolvedConfig {
            project_root: None,
            remote_host: "deploy@web1".to_string(),
            temp_dir: "/tmp".to_string(),
            transfer_workers: 1,
            on_malformed_sitemap: MalformedSitemapPolicy::Fail,
            files: Vec::new(),
            dirs: Vec::new(),
            local_pre_commands: Vec::new(),
            pre_commands: Vec::new(),
            post_commands: Vec::new(),
            local_post_commands: Vec::new(),
            sitemaps: Vec::new(),
        }
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = tempdir().unwrap();
        let mut config = base_config();
        config.files.push(ResourceMapping {
            local_path: dir.path().join("absent.txt"),
            remote_path: "/srv/absent.txt".to_string(),
        });

        let entries = build_transfer_set(&config, &local(), DATE).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn directory_expands_recursively_with_remote_layout() {
        let dir = tempdir().unwrap();
        std_fs::create_dir_all(dir.path().join("assets/css")).unwrap();
        std_fs::write(dir.path().join("assets/app.js"), "js").unwrap();
        std_fs::write(dir.path().join("assets/css/site.css"), "css").unwrap();

        let mut config = base_config();
        config.dirs.push(ResourceMapping {
            local_path: dir.path().join("assets"),
            remote_path: "/srv/www/assets/".to_string(),
        });

        let entries = build_transfer_set(&config, &local(), DATE).unwrap();
        let remotes: Vec<&str> = entries.iter().map(|e| e.remote_path.as_str()).collect();
        assert_eq!(
            remotes,
            vec!["/srv/www/assets/app.js", "/srv/www/assets/css/site.css"]
        );
    }

    #[test]
    fn sitemap_task_writes_file_and_adds_content_entry() {
        let dir = tempdir().unwrap();
        let sitemap_path = dir.path().join("sitemap.xml");

        let mut config = base_config();
        config.sitemaps.push(SitemapTask {
            path: sitemap_path.clone(),
            loc: vec!["https://example.com/".to_string()],
            target: Some("/srv/www/sitemap.xml".to_string()),
        });

        let entries = build_transfer_set(&config, &local(), DATE).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].remote_path, "/srv/www/sitemap.xml");

        let written = std_fs::read_to_string(&sitemap_path).unwrap();
        assert!(written.contains("https://example.com/"));
        match &entries[0].source {
            TransferSource::Content { content, .. } => assert_eq!(content, &written),
            TransferSource::File(_) => panic!("expected content entry"),
        }
    }

    #[test]
    fn sitemap_without_target_only_updates_disk() {
        let dir = tempdir().unwrap();
        let sitemap_path = dir.path().join("sitemap.xml");

        let mut config = base_config();
        config.sitemaps.push(SitemapTask {
            path: sitemap_path.clone(),
            loc: vec!["https://example.com/".to_string()],
            target: None,
        });

        let entries = build_transfer_set(&config, &local(), DATE).unwrap();
        assert!(entries.is_empty());
        assert!(sitemap_path.exists());
    }

    #[test]
    fn malformed_sitemap_fails_or_rebuilds_per_policy() {
        let dir = tempdir().unwrap();
        let sitemap_path = dir.path().join("sitemap.xml");
        std_fs::write(&sitemap_path, "<garbage>").unwrap();

        let mut config = base_config();
        config.sitemaps.push(SitemapTask {
            path: sitemap_path.clone(),
            loc: vec!["https://example.com/".to_string()],
            target: None,
        });

        let err = build_transfer_set(&config, &local(), DATE).unwrap_err();
        assert_eq!(err.code.as_str(), "sitemap.parse_error");

        config.on_malformed_sitemap = MalformedSitemapPolicy::Rebuild;
        build_transfer_set(&config, &local(), DATE).unwrap();
        let rebuilt = std_fs::read_to_string(&sitemap_path).unwrap();
        assert!(rebuilt.starts_with("<?xml"));
        assert!(rebuilt.contains("https://example.com/"));
    }
}
