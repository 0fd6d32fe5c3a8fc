//! Preview server lifecycle
//!
//! Spawns the configured serve command as a child process and polls the
//! expected origin over HTTP until it answers. Any response counts as
//! readiness; a server that serves 404s is still a server. [`PreviewServer::stop`]
//! asks the child to terminate and escalates to a hard kill only after a
//! grace period, and is safe to call more than once.

use crate::{Error, Result, RunConfig};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;

/// Per-request cap so one stalled probe cannot eat the whole probe budget.
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to the running preview server child process
#[derive(Debug)]
pub struct PreviewServer {
    child: Option<Child>,
    origin: String,
    term_grace: Duration,
}

impl PreviewServer {
    /// Spawn the preview server and wait until it accepts HTTP requests.
    pub async fn start(config: &RunConfig) -> Result<Self> {
        let command = config.preview_command();
        let origin = config.origin();
        log::info!("starting preview server: {}", command);

        let child = crate::site::shell_command(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ServerStart(format!("failed to spawn '{}': {}", command, e)))?;

        let mut server = Self {
            child: Some(child),
            origin,
            term_grace: config.server_term_grace,
        };

        match server.wait_until_ready(config).await {
            Ok(()) => Ok(server),
            Err(e) => {
                // Leave no orphan listening on the port
                let _ = server.stop().await;
                Err(e)
            }
        }
    }

    async fn wait_until_ready(&mut self, config: &RunConfig) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::ServerStart(format!("probe client: {}", e)))?;

        tokio::time::sleep(config.probe_initial_delay).await;

        for attempt in 1..=config.probe_attempts {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child
                    .try_wait()
                    .map_err(|e| Error::ServerStart(e.to_string()))?
                {
                    return Err(Error::ServerStart(format!(
                        "server process exited with {} before becoming ready",
                        status
                    )));
                }
            }

            if client.get(&self.origin).send().await.is_ok() {
                log::info!("preview server ready at {} (attempt {})", self.origin, attempt);
                return Ok(());
            }

            tokio::time::sleep(config.probe_interval).await;
        }

        Err(Error::ServerStartTimeout(config.probe_attempts))
    }

    /// Stop the preview server.
    ///
    /// Sends a termination signal first and waits up to the grace period
    /// before killing outright. Calling this on an already-stopped server
    /// is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };

        if let Ok(Some(status)) = child.try_wait() {
            log::debug!("preview server already exited with {}", status);
            return Ok(());
        }

        terminate(&child);

        match tokio::time::timeout(self.term_grace, child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("preview server exited with {}", status);
            }
            Ok(Err(e)) => {
                log::warn!("waiting for preview server: {}", e);
            }
            Err(_) => {
                log::warn!("preview server ignored termination, killing");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            log::warn!("SIGTERM to preview server failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {
    // No polite signal available, stop() falls through to kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(port: u16) -> RunConfig {
        RunConfig {
            port,
            serve_command: Some("sleep 30".to_string()),
            probe_initial_delay: Duration::from_millis(10),
            probe_interval: Duration::from_millis(50),
            probe_attempts: 5,
            server_term_grace: Duration::from_millis(500),
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn exited_child_is_reported_not_retried() {
        let config = RunConfig {
            serve_command: Some("false".to_string()),
            ..test_config(4191)
        };
        let started = std::time::Instant::now();
        let err = PreviewServer::start(&config).await.unwrap_err();
        assert!(matches!(err, Error::ServerStart(_)), "got: {:?}", err);
        // Early exit detection should beat the full probe budget
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn probe_exhaustion_reports_attempt_count() {
        // Nothing listens on the port; the sleeping child never serves
        let config = test_config(4192);
        let err = PreviewServer::start(&config).await.unwrap_err();
        match err {
            Error::ServerStartTimeout(attempts) => assert_eq!(attempts, 5),
            other => panic!("expected ServerStartTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut server = PreviewServer {
            child: None,
            origin: "http://localhost:4193".to_string(),
            term_grace: Duration::from_millis(100),
        };
        server.stop().await.unwrap();
        server.stop().await.unwrap();
    }
}
