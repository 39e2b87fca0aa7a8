use super::connection::Connection;
use crate::error::{Error, Result};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;

/// Captured output of one executed remote command
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Run one command over a fresh exec channel on `connection`.
///
/// Stdout and stderr are drained into growing buffers until the remote
/// process completes, then the exit status is collected. The timeout bounds
/// every blocking operation on the transport, so a hung remote command fails
/// instead of blocking the caller forever. No retries: the command may have
/// side effects.
pub fn run_command(
    connection: &Connection,
    command: &str,
    timeout: Duration,
) -> Result<CommandResult> {
    let ssh = connection.lock();
    ssh.set_timeout(timeout.as_millis() as u32);

    tracing::debug!(
        "Executing command (session {}): {}",
        connection.session_key(),
        command
    );

    let mut channel = ssh
        .channel_session()
        .map_err(|e| Error::Connection(format!("Failed to open exec channel: {}", e)))?;

    channel
        .exec(command)
        .map_err(|e| Error::Connection(format!("Failed to start command: {}", e)))?;

    let mut stdout = String::new();
    channel
        .stream(0)
        .read_to_string(&mut stdout)
        .map_err(|e| Error::Connection(format!("Failed to read stdout: {}", e)))?;

    let mut stderr = String::new();
    channel
        .stream(ssh2::EXTENDED_DATA_STDERR)
        .read_to_string(&mut stderr)
        .map_err(|e| Error::Connection(format!("Failed to read stderr: {}", e)))?;

    channel
        .wait_close()
        .map_err(|e| Error::Connection(format!("Failed to close channel: {}", e)))?;

    let exit_status = channel
        .exit_status()
        .map_err(|e| Error::Connection(format!("Failed to read exit status: {}", e)))?;

    tracing::debug!(
        "Command finished (session {}): exit_status={} stdout_len={} stderr_len={}",
        connection.session_key(),
        exit_status,
        stdout.len(),
        stderr.len()
    );

    Ok(CommandResult {
        stdout,
        stderr,
        exit_status,
    })
}
