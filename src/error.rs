//! Error types for the screenshot pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating screenshots
#[derive(Error, Debug)]
pub enum Error {
    /// The site build command exited non-zero or could not be spawned
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// The preview server could not be spawned, or died before becoming ready
    #[error("Preview server failed to start: {0}")]
    ServerStart(String),

    /// The preview server never answered the readiness probe
    #[error("Preview server did not respond after {0} probe attempts")]
    ServerStartTimeout(u32),

    /// The headless browser could not be launched or a context not created
    #[error("Browser initialization failed: {0}")]
    BrowserInit(String),

    /// The browser worker is gone or has no open context
    #[error("Browser session unavailable: {0}")]
    SessionClosed(String),

    /// Navigating to a page failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// A page kept issuing network requests past the allowed window
    #[error("Page did not reach network quiescence within {0}ms")]
    QuiescenceTimeout(u64),

    /// Device metrics or touch emulation could not be applied
    #[error("Device emulation failed: {0}")]
    Emulation(String),

    /// In-page script evaluation failed
    #[error("Script execution failed: {0}")]
    Script(String),

    /// Screenshot capture or image write failed
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Requested pages/devices did not validate against the registries
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// The global deadline elapsed before the run finished
    #[error("Global deadline of {0}s exceeded")]
    DeadlineExceeded(u64),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
