use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use qsync::config::YamlConfigSource;
use qsync::local_files;
use qsync::pipeline::{Pipeline, RunReport};
use qsync::resolver::{self, ResolvedConfig};
use qsync::shell::SystemShell;
use qsync::ssh::SshExecutor;

use super::CmdResult;

#[derive(Args)]
pub struct SyncArgs {
    /// Configuration file(s) to run, in order
    #[arg(required = true)]
    pub config_paths: Vec<PathBuf>,

    /// Resolve and print the plan without executing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunOutput {
    pub config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ResolvedConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutput {
    pub dry_run: bool,
    pub runs: Vec<SyncRunOutput>,
}

pub fn run(args: SyncArgs) -> CmdResult<SyncOutput> {
    let source = YamlConfigSource::new();
    let mut runs = Vec::new();

    for config_path in &args.config_paths {
        let resolved = resolver::resolve(config_path, &source)?;

        if args.dry_run {
            runs.push(SyncRunOutput {
                config_path: config_path.display().to_string(),
                plan: Some(resolved),
                report: None,
            });
            continue;
        }

        let executor = SshExecutor::new();
        let shell = SystemShell::new();
        let fs = local_files::local();
        let pipeline = Pipeline {
            executor: &executor,
            local_shell: &shell,
            fs: &fs,
        };

        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        let report = pipeline.run(&resolved, &date)?;
        runs.push(SyncRunOutput {
            config_path: config_path.display().to_string(),
            plan: None,
            report: Some(report),
        });
    }

    Ok((
        SyncOutput {
            dry_run: args.dry_run,
            runs,
        },
        0,
    ))
}
