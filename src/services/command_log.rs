//! Remote commands mirrored into the task log

use crate::remote::{CommandOutput, HostShell, RemoteError};
use crate::tasks::{LogLevel, TaskLogEntry, TaskLogger};

/// Run `command`, logging it and its stdout at `debug` and its stderr at
/// `error`, each tagged with the host.
pub async fn run_logged(
    shell: &HostShell,
    log: &TaskLogger,
    host: &str,
    command: &str,
) -> Result<CommandOutput, RemoteError> {
    let wire = shell.wrap(command);
    log.entry(TaskLogEntry::new(LogLevel::Debug, wire).with("host", host)).await;

    let output = shell.run(command).await?;
    if !output.stdout.trim().is_empty() {
        log.entry(TaskLogEntry::new(LogLevel::Debug, output.stdout.trim()).with("host", host))
            .await;
    }
    if !output.stderr.trim().is_empty() {
        log.entry(TaskLogEntry::new(LogLevel::Error, output.stderr.trim()).with("host", host))
            .await;
    }
    Ok(output)
}
