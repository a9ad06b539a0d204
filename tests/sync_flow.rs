//! End-to-end sync against localhost: the SSH session detects a local target
//! and runs everything through the local shell, so the whole pipeline is
//! exercised without a network.

#![cfg(unix)]

use std::fs;

use qsync::config::YamlConfigSource;
use qsync::local_files;
use qsync::pipeline::{Pipeline, RunStatus};
use qsync::resolver;
use qsync::shell::SystemShell;
use qsync::ssh::SshExecutor;
use tempfile::tempdir;

#[test]
fn sync_to_localhost_places_files_and_runs_commands() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("site");
    fs::create_dir_all(src.join("assets")).unwrap();
    fs::write(src.join("index.html"), "<html></html>").unwrap();
    fs::write(src.join("assets/app.js"), "app").unwrap();

    let dest = dir.path().join("remote");
    let staging = dir.path().join("staging");
    fs::create_dir_all(&staging).unwrap();
    let marker = dir.path().join("post-ran");

    let config_path = dir.path().join("deploy.yml");
    fs::write(
        &config_path,
        format!(
            concat!(
                "remote_host: ci@localhost\n",
                "temp_dir: {staging}\n",
                "resources:\n",
                "  files:\n",
                "    site/index.html: {dest}/index.html\n",
                "  dirs:\n",
                "    site/assets: {dest}/assets\n",
                "post_commands:\n",
                "  - touch {marker}\n",
            ),
            staging = staging.display(),
            dest = dest.display(),
            marker = marker.display(),
        ),
    )
    .unwrap();

    let resolved = resolver::resolve(&config_path, &YamlConfigSource::new()).unwrap();

    let executor = SshExecutor::new();
    let shell = SystemShell::new();
    let fs_impl = local_files::local();
    let pipeline = Pipeline {
        executor: &executor,
        local_shell: &shell,
        fs: &fs_impl,
    };

    let report = pipeline.run(&resolved, "2024-05-01").unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.transferred, 2);
    assert_eq!(
        fs::read_to_string(dest.join("index.html")).unwrap(),
        "<html></html>"
    );
    assert_eq!(
        fs::read_to_string(dest.join("assets/app.js")).unwrap(),
        "app"
    );
    assert!(marker.exists());

    // Staging area drained: uploads were moved into place, not left behind.
    assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
}

#[test]
fn failing_remote_pre_command_stops_before_transfer() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "payload").unwrap();

    let dest = dir.path().join("remote");
    let config_path = dir.path().join("deploy.yml");
    fs::write(
        &config_path,
        format!(
            concat!(
                "remote_host: ci@localhost\n",
                "temp_dir: {staging}\n",
                "resources:\n",
                "  files:\n",
                "    a.txt: {dest}/a.txt\n",
                "pre_commands:\n",
                "  - 'exit 9'\n",
            ),
            staging = dir.path().display(),
            dest = dest.display(),
        ),
    )
    .unwrap();

    let resolved = resolver::resolve(&config_path, &YamlConfigSource::new()).unwrap();

    let executor = SshExecutor::new();
    let shell = SystemShell::new();
    let fs_impl = local_files::local();
    let pipeline = Pipeline {
        executor: &executor,
        local_shell: &shell,
        fs: &fs_impl,
    };

    let err = pipeline.run(&resolved, "2024-05-01").unwrap_err();
    assert_eq!(err.code.as_str(), "command.failed");
    assert_eq!(err.details["phase"], serde_json::json!("pre_commands"));
    assert_eq!(err.details["exitCode"], serde_json::json!(9));
    assert!(!dest.exists());
}
