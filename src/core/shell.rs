use std::process::Command;

/// Captured output of a local or remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Prefer stderr for error reporting, falling back to stdout when the
    /// command wrote its diagnostics there.
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Capability interface for running commands on the local machine.
///
/// The pipeline's local-pre and local-post phases go through this trait so
/// tests can substitute a recording fake.
pub trait LocalShell {
    fn run(&self, command: &str) -> CommandOutput;
}

/// Production shell: runs commands through `sh -c` (or `cmd /C` on Windows).
pub struct SystemShell;

impl SystemShell {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemShell {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalShell for SystemShell {
    fn run(&self, command: &str) -> CommandOutput {
        execute_local_command(command)
    }
}

pub fn execute_local_command(command: &str) -> CommandOutput {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput {
            stdout: String::new(),
            stderr: format!("Command error: {}", e),
            success: false,
            exit_code: -1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_command_and_captures_stdout() {
        let shell = SystemShell::new();
        let output = shell.run("echo hello");
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_reported() {
        let shell = SystemShell::new();
        let output = shell.run("exit 3");
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = CommandOutput {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            success: false,
            exit_code: 1,
        };
        assert_eq!(output.error_text(), "err");

        let output = CommandOutput {
            stdout: "out".to_string(),
            stderr: "  ".to_string(),
            success: false,
            exit_code: 1,
        };
        assert_eq!(output.error_text(), "out");
    }
}
