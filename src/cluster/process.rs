//! Local process adapters: SSH to external hosts and installer tooling

use crate::domain::ports::{CommandRunner, ExecOutput, LocalCommand, RemoteShell};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

impl From<Output> for ExecOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

// =============================================================================
// SSH Shell
// =============================================================================

/// Runs commands on remote hosts through the system `ssh`/`scp` binaries
#[derive(Debug, Clone)]
pub struct SshShell {
    user: String,
    identity: Option<PathBuf>,
}

impl SshShell {
    pub fn new(user: impl Into<String>, identity: Option<PathBuf>) -> Self {
        Self {
            user: user.into(),
            identity,
        }
    }

    fn base(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "BatchMode=yes",
            "-o",
            "ConnectTimeout=30",
        ]);
        if let Some(key) = &self.identity {
            cmd.arg("-i").arg(key);
        }
        cmd
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, host: &str, command: &str) -> Result<ExecOutput> {
        debug!(host = %host, command = %command, "Executing remote command");
        let output = self
            .base("ssh")
            .arg(self.target(host))
            .arg(command)
            .output()
            .await
            .map_err(|e| Error::command_failed(format!("ssh {}", host), e.to_string()))?;
        let output = ExecOutput::from(output);
        if !output.success() {
            warn!(host = %host, exit_code = output.exit_code, "Remote command failed: {}", output.stderr.trim());
        }
        Ok(output)
    }

    async fn upload(&self, host: &str, local: &Path, remote: &str) -> Result<()> {
        debug!(host = %host, "Uploading {} to {}", local.display(), remote);
        let output = self
            .base("scp")
            .arg(local)
            .arg(format!("{}:{}", self.target(host), remote))
            .output()
            .await
            .map_err(|e| Error::command_failed(format!("scp {}", host), e.to_string()))?;
        ExecOutput::from(output).into_result(&format!("scp {} {}", local.display(), host))?;
        Ok(())
    }
}

// =============================================================================
// Process Runner
// =============================================================================

/// Runs installer tooling (`openshift-install`, `subctl`) on the local host
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &LocalCommand) -> Result<ExecOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        debug!(command = %command.display(), "Executing local command");
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::command_failed(command.display(), e.to_string()))?;

        ExecOutput::from(output).into_result(&command.display())
    }
}
