use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::executor::{RemoteExecutor, RemoteSession};
use crate::shell::{execute_local_command, CommandOutput};
use crate::utils::shell;

/// Remote executor backed by the system `ssh`/`scp` binaries.
pub struct SshExecutor;

impl SshExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteExecutor for SshExecutor {
    fn connect(&self, host: &str) -> Result<Box<dyn RemoteSession>> {
        SshSession::open(host).map(|session| Box::new(session) as Box<dyn RemoteSession>)
    }
}

/// A connection target for one run. The transport is subprocess-per-command,
/// so "closing" releases nothing on the wire; the session exists to scope
/// remote work to a single validated host.
pub struct SshSession {
    target: String,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the target host is localhost/127.0.0.1/::1.
    is_local: bool,
}

impl SshSession {
    pub fn open(target: &str) -> Result<Self> {
        if target.trim().is_empty() || target.contains(char::is_whitespace) {
            return Err(Error::ssh_connect_failed(
                target,
                "Connection string must be 'user@host' with no whitespace",
            ));
        }

        let host_part = target.rsplit('@').next().unwrap_or(target);
        let is_local = is_local_host(host_part);
        if is_local {
            log_status!("ssh", "Target '{}' is localhost, using local execution", target);
        }

        Ok(Self {
            target: target.to_string(),
            is_local,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        // Timeout and keepalive options prevent hangs on stalled
        // connections or unexpected prompts.
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ];
        args.push(self.target.clone());
        args.push(command.to_string());
        args
    }

    fn execute_with_retry(&self, command: &str, max_attempts: u32) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3

        for attempt in 0..max_attempts {
            let result = self.execute_once(command);

            // Only retry on transient connection errors, not command failures
            if result.success || attempt + 1 >= max_attempts || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = backoff_secs.get(attempt as usize + 1).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "Connection failed (attempt {}/{}), retrying in {}s...",
                attempt + 1,
                max_attempts,
                delay
            );
            std::thread::sleep(std::time::Duration::from_secs(delay));
        }

        CommandOutput {
            stdout: String::new(),
            stderr: "SSH retry exhausted".to_string(),
            success: false,
            exit_code: -1,
        }
    }

    fn execute_once(&self, command: &str) -> CommandOutput {
        if self.is_local {
            return execute_local_command(command);
        }

        let output = Command::new("ssh").args(self.build_ssh_args(command)).output();
        match output {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput {
                stdout: String::new(),
                stderr: format!("SSH error: {}", e),
                success: false,
                exit_code: -1,
            },
        }
    }

    /// Stream content to `cat > path` on the remote side.
    fn pipe_to_remote(&self, content: &[u8], remote_path: &str) -> CommandOutput {
        let remote_command = format!("cat > {}", shell::quote_path(remote_path));

        let mut cmd = if self.is_local {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", &remote_command]);
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.build_ssh_args(&remote_command));
            cmd
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput {
                    stdout: String::new(),
                    stderr: format!("SSH error: {}", e),
                    success: false,
                    exit_code: -1,
                }
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(content) {
                return CommandOutput {
                    stdout: String::new(),
                    stderr: format!("Failed to stream upload content: {}", e),
                    success: false,
                    exit_code: -1,
                };
            }
        }

        match child.wait_with_output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput {
                stdout: String::new(),
                stderr: format!("SSH error: {}", e),
                success: false,
                exit_code: -1,
            },
        }
    }
}

impl RemoteSession for SshSession {
    fn run(&self, command: &str) -> CommandOutput {
        self.execute_with_retry(command, 3)
    }

    fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let output = if self.is_local {
            execute_local_command(&format!(
                "cp {} {}",
                shell::quote_path(&local_path.to_string_lossy()),
                shell::quote_path(remote_path)
            ))
        } else {
            let scp_output = Command::new("scp")
                .args([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "ConnectTimeout=10".to_string(),
                    local_path.to_string_lossy().to_string(),
                    format!("{}:{}", self.target, shell::quote_path(remote_path)),
                ])
                .output();
            match scp_output {
                Ok(out) => CommandOutput {
                    stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                    success: out.status.success(),
                    exit_code: out.status.code().unwrap_or(-1),
                },
                Err(e) => CommandOutput {
                    stdout: String::new(),
                    stderr: format!("SCP error: {}", e),
                    success: false,
                    exit_code: -1,
                },
            }
        };

        if output.success {
            Ok(())
        } else {
            Err(Error::transfer_failed(
                Some(local_path.display().to_string()),
                remote_path,
                output.error_text().to_string(),
            ))
        }
    }

    fn upload_bytes(&self, content: &[u8], remote_path: &str) -> Result<()> {
        let output = self.pipe_to_remote(content, remote_path);
        if output.success {
            Ok(())
        } else {
            Err(Error::transfer_failed(
                None,
                remote_path,
                output.error_text().to_string(),
            ))
        }
    }

    fn close(&self) {
        // Subprocess transport holds no persistent connection.
        log_status!("ssh", "Session to {} released", self.target);
    }

    fn host(&self) -> &str {
        &self.target
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    // SSH exit code 255 = connection error (not a remote command failure)
    let is_connection_exit = output.exit_code == 255;

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "could not resolve hostname",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    is_connection_exit || transient_patterns.iter().any(|p| stderr.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_malformed_connection_string() {
        assert!(SshSession::open("").is_err());
        assert!(SshSession::open("user@host extra").is_err());
        assert!(SshSession::open("deploy@web1").is_ok());
    }

    #[test]
    fn localhost_target_runs_locally() {
        let session = SshSession::open("me@localhost").unwrap();
        let output = session.run("echo local");
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "local");
    }

    #[test]
    fn localhost_upload_bytes_writes_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("uploaded.txt");
        let session = SshSession::open("me@localhost").unwrap();

        session
            .upload_bytes(b"payload", &dest.to_string_lossy())
            .unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
    }

    #[test]
    fn localhost_upload_file_copies() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        std::fs::write(&src, "content").unwrap();

        let session = SshSession::open("me@localhost").unwrap();
        session.upload_file(&src, &dest.to_string_lossy()).unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "content");
    }

    #[test]
    fn transient_errors_are_classified() {
        let transient = CommandOutput {
            stdout: String::new(),
            stderr: "ssh: connect to host web1 port 22: Connection refused".to_string(),
            success: false,
            exit_code: 255,
        };
        assert!(is_transient_ssh_error(&transient));

        let command_failure = CommandOutput {
            stdout: String::new(),
            stderr: "No such file or directory".to_string(),
            success: false,
            exit_code: 1,
        };
        assert!(!is_transient_ssh_error(&command_failure));
    }
}
