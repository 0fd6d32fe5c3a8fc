//! Site build step
//!
//! Runs the configured build command to completion before the preview
//! server starts. A build is all-or-nothing: any non-zero exit aborts the
//! run, since there is nothing meaningful to serve or capture.

use crate::{Error, Result};
use tokio::process::Command;

/// Build a `Command` that runs `command` through the platform shell.
///
/// Shell interpretation keeps configured commands like
/// `npm run build && npm run postbuild` working unchanged.
pub(crate) fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

/// Run the site build command and wait for it to finish.
pub async fn build_site(command: &str) -> Result<()> {
    log::info!("building site: {}", command);
    let status = shell_command(command)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| Error::BuildFailed(format!("failed to spawn '{}': {}", command, e)))?;

    if !status.success() {
        return Err(Error::BuildFailed(format!(
            "'{}' exited with {}",
            command, status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_build_passes() {
        build_site("true").await.unwrap();
    }

    #[tokio::test]
    async fn failing_build_reports_exit_status() {
        let err = build_site("false").await.unwrap_err();
        match err {
            Error::BuildFailed(msg) => assert!(msg.contains("false"), "got: {}", msg),
            other => panic!("expected BuildFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_build_failure() {
        let err = build_site("exit 3").await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed(_)));
    }
}
