//! Run controller
//!
//! Owns the whole pipeline: build, serve, capture, manifest. Everything
//! races a single global deadline, and the resources acquired along the
//! way are released on every exit path, success, failure or timeout, in
//! browser-then-server order. Cleanup itself is bounded so a wedged child
//! process cannot keep the run alive past the deadline.

use crate::browser::BrowserSession;
use crate::capture::CaptureEngine;
use crate::manifest::RunManifest;
use crate::registry::Selection;
use crate::server::PreviewServer;
use crate::{site, Error, Result, RunConfig};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Summary of a finished run
#[derive(Debug)]
pub struct RunReport {
    pub manifest_path: PathBuf,
    /// Targets captured cleanly
    pub captured: usize,
    /// Targets that produced an error record
    pub failed: usize,
    pub elapsed: Duration,
}

/// External resources held during a run
#[derive(Default)]
struct Resources {
    server: Option<PreviewServer>,
    browser: Option<BrowserSession>,
}

impl Resources {
    /// Release whatever is still held. Idempotent; holds are taken out
    /// before closing so a second call finds nothing to do, and close
    /// failures are logged rather than raised.
    async fn release(&mut self) {
        if let Some(browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                log::warn!("closing browser: {}", e);
            }
        }
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.stop().await {
                log::warn!("stopping preview server: {}", e);
            }
        }
    }
}

/// Run the screenshot pipeline described by `config`.
///
/// On a run that completed (even with failed targets) the manifest is
/// written under the output root and a report returned. Fatal errors and
/// the global deadline leave no manifest behind; the absence of
/// `manifest.json` is the failure signal for calling automation.
pub async fn execute(config: &RunConfig) -> Result<RunReport> {
    // Validate the request before acquiring anything
    let selection = Selection::resolve(&config.pages, &config.devices)?;

    let started = Instant::now();
    let mut resources = Resources::default();

    let outcome = tokio::select! {
        res = pipeline(config, &selection, &mut resources) => res,
        _ = tokio::time::sleep(config.global_timeout) => {
            eprintln!(
                "run exceeded the {}s deadline, aborting",
                config.global_timeout.as_secs()
            );
            Err(Error::DeadlineExceeded(config.global_timeout.as_secs()))
        }
    };

    if tokio::time::timeout(config.cleanup_grace, resources.release())
        .await
        .is_err()
    {
        log::warn!(
            "resource cleanup did not finish within {:?}",
            config.cleanup_grace
        );
    }

    let manifest = outcome?;

    let manifest_path = config.output_root.join("manifest.json");
    manifest.persist(&manifest_path)?;

    let failed = manifest.failed_count();
    Ok(RunReport {
        manifest_path,
        captured: manifest.screenshots.len() - failed,
        failed,
        elapsed: started.elapsed(),
    })
}

async fn pipeline(
    config: &RunConfig,
    selection: &Selection,
    resources: &mut Resources,
) -> Result<RunManifest> {
    let page_list: Vec<String> = selection.pages.iter().map(|p| p.path.clone()).collect();
    let device_list: Vec<String> = selection
        .viewports
        .iter()
        .map(|v| v.key.to_string())
        .collect();

    println!(
        "Generating screenshots for {} page(s) on {} device(s)",
        page_list.len(),
        device_list.len()
    );

    if config.skip_build {
        println!("Skipping build, serving existing output");
    } else {
        println!("Building site...");
        site::build_site(&config.build_command).await?;
    }

    println!("Starting preview server on port {}...", config.port);
    let server = PreviewServer::start(config).await?;
    resources.server = Some(server);

    println!("Launching browser...");
    let browser = BrowserSession::launch(config).await?;
    resources.browser = Some(browser.clone());

    let engine = CaptureEngine::new(
        config.origin(),
        config.output_root.clone(),
        config.capture.clone(),
    );
    let mut manifest = RunManifest::new(page_list, device_list);

    for profile in &selection.viewports {
        println!(
            "\n{} ({}x{})",
            profile.display_name, profile.width, profile.height
        );
        let page = browser.open_context(*profile).await?;

        for spec in &selection.pages {
            let record = engine.capture(&page, profile, spec).await;
            match &record.error {
                Some(error) => println!("  {} FAILED: {}", spec.path, error),
                None => println!("  {} -> {} file(s)", spec.path, record.files.len()),
            }
            manifest.append(record);
        }

        browser.close_context().await?;
    }

    Ok(manifest)
}
