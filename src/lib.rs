//! Pageshot: multi-viewport site screenshot pipeline
//!
//! Builds a static site, serves it over a local preview server, drives a
//! single headless Chrome instance across a set of device profiles, and
//! writes segmented full-page screenshots plus a JSON manifest describing
//! the run.
//!
//! # Features
//!
//! - **Device emulation**: each viewport profile gets its own isolated
//!   browsing context with width/height, pixel ratio and touch flags applied
//! - **Height splitting**: pages taller than the raster ceiling are captured
//!   as vertically-stacked segments named by pixel offset
//! - **Guaranteed cleanup**: the preview server and the browser are torn
//!   down on every exit path, including the hard global deadline
//!
//! # Example
//!
//! ```no_run
//! use pageshot::{run, RunConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> pageshot::Result<()> {
//! let config = RunConfig {
//!     pages: vec!["/".into(), "/about".into()],
//!     devices: vec!["mobile".into(), "desktop".into()],
//!     ..Default::default()
//! };
//!
//! let report = run::execute(&config).await?;
//! println!("captured {} targets", report.captured);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod browser;
pub mod capture;
pub mod manifest;
pub mod registry;
pub mod run;
pub mod server;
pub mod site;

// Re-export the pieces most callers touch
pub use browser::BrowserSession;
pub use manifest::{CaptureRecord, RunManifest};
pub use registry::{PageSpec, Selection, ViewportProfile};

/// Configuration for one screenshot run
///
/// The defaults reproduce the standard site workflow: `npm run build`, a
/// Vite preview server on port 4173, output under `untracked/screenshots`,
/// and a 180 second wall-clock ceiling for the whole run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Page paths to capture; empty means every registered page
    pub pages: Vec<String>,
    /// Viewport keys to capture; empty means every registered viewport
    pub devices: Vec<String>,
    /// Root directory for screenshots and the manifest
    pub output_root: PathBuf,
    /// Local port the preview server binds
    pub port: u16,
    /// Shell command that builds the site
    pub build_command: String,
    /// Shell command that serves the built output; `None` derives a
    /// `vite preview` invocation from `port`
    pub serve_command: Option<String>,
    /// Serve whatever is already built instead of running the build command
    pub skip_build: bool,
    /// Launch Chrome without its sandbox (required in some containers)
    pub no_sandbox: bool,
    /// Hard wall-clock ceiling for the whole run
    pub global_timeout: Duration,
    /// Upper bound on releasing resources after a deadline abort
    pub cleanup_grace: Duration,
    /// Delay before the first server readiness probe
    pub probe_initial_delay: Duration,
    /// Delay between server readiness probes
    pub probe_interval: Duration,
    /// Number of readiness probes before giving up
    pub probe_attempts: u32,
    /// How long the server gets to exit after SIGTERM before SIGKILL
    pub server_term_grace: Duration,
    /// Capture timings and limits
    pub capture: CaptureSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            devices: Vec::new(),
            output_root: PathBuf::from("untracked/screenshots"),
            port: 4173,
            build_command: "npm run build".to_string(),
            serve_command: None,
            skip_build: false,
            no_sandbox: false,
            global_timeout: Duration::from_secs(180),
            cleanup_grace: Duration::from_secs(10),
            probe_initial_delay: Duration::from_millis(500),
            probe_interval: Duration::from_millis(300),
            probe_attempts: 100,
            server_term_grace: Duration::from_secs(2),
            capture: CaptureSettings::default(),
        }
    }
}

impl RunConfig {
    /// HTTP origin the preview server answers on
    pub fn origin(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// The serve command, derived from the port unless overridden
    pub fn preview_command(&self) -> String {
        self.serve_command
            .clone()
            .unwrap_or_else(|| format!("npx vite preview --port {}", self.port))
    }
}

/// Timings and limits for capturing a single page
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Timeout for navigation and the load event
    pub navigation_timeout: Duration,
    /// Maximum height of a single raster; taller pages are split into
    /// segments of at most this many CSS pixels
    pub max_segment_height: u32,
    /// Upper bound on segments per page; pathological heights are truncated
    pub max_segments: u32,
    /// Poll interval while waiting for network quiescence
    pub quiescence_poll: Duration,
    /// How long the resource count must hold still to count as quiescent
    pub quiescence_settle: Duration,
    /// Give up waiting for quiescence after this long
    pub quiescence_timeout: Duration,
    /// Body class that marks the site's entrance fade-in as finished;
    /// waited on best-effort, absence is not an error
    pub ready_marker_class: Option<String>,
    /// Cap on waiting for the ready marker
    pub ready_marker_timeout: Duration,
    /// Fixed settle after load for CSS animations to finish
    pub animation_settle: Duration,
    /// Settle after each scroll before capturing, for lazy content
    pub scroll_settle: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            max_segment_height: 8000,
            max_segments: 20,
            quiescence_poll: Duration::from_millis(250),
            quiescence_settle: Duration::from_millis(500),
            quiescence_timeout: Duration::from_secs(10),
            ready_marker_class: Some("loaded".to_string()),
            ready_marker_timeout: Duration::from_secs(5),
            animation_settle: Duration::from_secs(2),
            scroll_settle: Duration::from_millis(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_site_workflow() {
        let config = RunConfig::default();
        assert_eq!(config.port, 4173);
        assert_eq!(config.origin(), "http://localhost:4173");
        assert_eq!(config.preview_command(), "npx vite preview --port 4173");
        assert_eq!(config.global_timeout, Duration::from_secs(180));
        assert_eq!(config.output_root, PathBuf::from("untracked/screenshots"));
    }

    #[test]
    fn serve_command_override_wins() {
        let config = RunConfig {
            serve_command: Some("python3 -m http.server 4173".to_string()),
            ..Default::default()
        };
        assert_eq!(config.preview_command(), "python3 -m http.server 4173");
    }

    #[test]
    fn capture_defaults_are_bounded() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.max_segment_height, 8000);
        assert!(settings.max_segments > 0);
        assert!(settings.quiescence_timeout > settings.quiescence_settle);
    }
}
