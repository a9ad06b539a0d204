use serde::Serialize;

use crate::error::{CommandFailedDetails, Error, Result};
use crate::executor::{is_timeout, RemoteExecutor, RemoteSession};
use crate::local_files::FileSystem;
use crate::resolver::ResolvedConfig;
use crate::shell::LocalShell;
use crate::transfer::{build_transfer_set, TransferEntry, TransferSource};
use crate::utils::shell;

/// Ordered pipeline phases. Each phase is all-or-nothing: the first failing
/// command or transfer aborts the phase and the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LocalPre,
    Package,
    RemotePre,
    Transfer,
    RemotePost,
    LocalPost,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::LocalPre => "local_pre_commands",
            Phase::Package => "package",
            Phase::RemotePre => "pre_commands",
            Phase::Transfer => "transfer",
            Phase::RemotePost => "post_commands",
            Phase::LocalPost => "local_post_commands",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub remote_host: String,
    pub status: RunStatus,
    pub local_pre_commands: usize,
    pub pre_commands: usize,
    pub post_commands: usize,
    pub local_post_commands: usize,
    pub transferred: usize,
    pub sitemaps: usize,
}

/// The execution pipeline over its collaborators. The remote session is
/// acquired once per run, shared by all remote phases, and released on every
/// exit path.
pub struct Pipeline<'a> {
    pub executor: &'a dyn RemoteExecutor,
    pub local_shell: &'a dyn LocalShell,
    pub fs: &'a dyn FileSystem,
}

impl Pipeline<'_> {
    /// Run all phases in order against a resolved configuration.
    ///
    /// `date` stamps new sitemap entries; passing it in keeps packaging
    /// deterministic for a given day.
    pub fn run(&self, config: &ResolvedConfig, date: &str) -> Result<RunReport> {
        self.run_local_phase(Phase::LocalPre, &config.local_pre_commands)?;

        log_status!("sync", "Packaging transfer set");
        let entries = build_transfer_set(config, self.fs, date)?;

        let session = self.executor.connect(&config.remote_host)?;
        let remote_result = self.run_remote_phases(session.as_ref(), config, &entries);
        session.close();
        remote_result?;

        self.run_local_phase(Phase::LocalPost, &config.local_post_commands)?;

        log_status!("sync", "Sync to {} complete", config.remote_host);
        Ok(RunReport {
            remote_host: config.remote_host.clone(),
            status: RunStatus::Succeeded,
            local_pre_commands: config.local_pre_commands.len(),
            pre_commands: config.pre_commands.len(),
            post_commands: config.post_commands.len(),
            local_post_commands: config.local_post_commands.len(),
            transferred: entries.len(),
            sitemaps: config.sitemaps.len(),
        })
    }

    /// Phases 3-5: remote pre, transfer, remote post.
    fn run_remote_phases(
        &self,
        session: &dyn RemoteSession,
        config: &ResolvedConfig,
        entries: &[TransferEntry],
    ) -> Result<()> {
        self.run_remote_phase(session, Phase::RemotePre, &config.pre_commands)?;
        transfer_entries(session, &config.temp_dir, config.transfer_workers, entries)?;
        self.run_remote_phase(session, Phase::RemotePost, &config.post_commands)?;
        Ok(())
    }

    fn run_local_phase(&self, phase: Phase, commands: &[String]) -> Result<()> {
        for command in commands {
            log_status!("sync", "[{}] > {}", phase.as_str(), command);
            let output = self.local_shell.run(command);
            if !output.success {
                return Err(Error::command_failed(CommandFailedDetails {
                    phase: phase.as_str().to_string(),
                    command: command.clone(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    host: None,
                }));
            }
        }
        Ok(())
    }

    fn run_remote_phase(
        &self,
        session: &dyn RemoteSession,
        phase: Phase,
        commands: &[String],
    ) -> Result<()> {
        for command in commands {
            log_status!("sync", "[{}] $ {}", phase.as_str(), command);
            let output = session.run(command);
            if !output.success {
                if is_timeout(&output) {
                    return Err(Error::command_timeout(
                        phase.as_str(),
                        command.clone(),
                        Some(session.host().to_string()),
                    ));
                }
                return Err(Error::command_failed(CommandFailedDetails {
                    phase: phase.as_str().to_string(),
                    command: command.clone(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    host: Some(session.host().to_string()),
                }));
            }
        }
        Ok(())
    }
}

/// Phase 4: upload every entry, staging through `temp_dir` and moving into
/// place for atomic replacement. Entries are independent, so they run in
/// bounded parallel batches of `workers`; every entry completes (or one
/// fails) before the next phase starts.
fn transfer_entries(
    session: &dyn RemoteSession,
    temp_dir: &str,
    workers: usize,
    entries: &[TransferEntry],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    log_status!("sync", "Transferring {} entries", entries.len());

    if workers <= 1 {
        for (idx, entry) in entries.iter().enumerate() {
            transfer_one(session, temp_dir, idx, entry)?;
        }
        return Ok(());
    }

    for (batch_start, batch) in entries.chunks(workers).enumerate() {
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .enumerate()
                .map(|(offset, entry)| {
                    let idx = batch_start * workers + offset;
                    scope.spawn(move || transfer_one(session, temp_dir, idx, entry))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::internal_io(
                            "Transfer worker panicked",
                            Some("transfer".to_string()),
                        ))
                    })
                })
                .collect()
        });
        for result in results {
            result?;
        }
    }

    Ok(())
}

fn transfer_one(
    session: &dyn RemoteSession,
    temp_dir: &str,
    idx: usize,
    entry: &TransferEntry,
) -> Result<()> {
    let filename = entry
        .remote_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("entry");
    let staging_path = format!(
        "{}/.qsync-upload-{}-{}.{}",
        temp_dir.trim_end_matches('/'),
        idx,
        filename,
        std::process::id()
    );

    match &entry.source {
        TransferSource::File(path) => {
            log_status!(
                "sync",
                "Uploading {} -> {}",
                path.display(),
                entry.remote_path
            );
            session.upload_file(path, &staging_path)?;
        }
        TransferSource::Content { origin, content } => {
            log_status!(
                "sync",
                "Uploading {} (updated) -> {}",
                origin.display(),
                entry.remote_path
            );
            session.upload_bytes(content.as_bytes(), &staging_path)?;
        }
    }

    let parent = match entry.remote_path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    };
    let move_cmd = format!(
        "mkdir -p {} && mv -f {} {}",
        shell::quote_path(&parent),
        shell::quote_path(&staging_path),
        shell::quote_path(&entry.remote_path)
    );
    let output = session.run(&move_cmd);
    if !output.success {
        if is_timeout(&output) {
            return Err(Error::command_timeout(
                Phase::Transfer.as_str(),
                move_cmd,
                Some(session.host().to_string()),
            ));
        }
        return Err(Error::transfer_failed(
            entry.local_label(),
            entry.remote_path.clone(),
            output.error_text().to_string(),
        ));
    }
    Ok(())
}
