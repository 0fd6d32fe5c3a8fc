//! Async browser facade backed by a dedicated worker thread
//!
//! The worker thread owns the synchronous `headless_chrome` handles and
//! executes commands sent from async tasks, so callers get an async
//! interface without the CDP transport needing to be driven from the
//! runtime. One browser process serves the whole run; each viewport gets a
//! fresh isolated context (an incognito profile) with its own tab.

use crate::registry::ViewportProfile;
use crate::{Error, Result, RunConfig};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::types::Method;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

pub(crate) enum Command {
    OpenContext(ViewportProfile, oneshot::Sender<Result<()>>),
    Goto(String, oneshot::Sender<Result<()>>),
    Eval(String, oneshot::Sender<Result<serde_json::Value>>),
    SetViewport(u32, u32, oneshot::Sender<Result<()>>),
    CaptureTo(PathBuf, oneshot::Sender<Result<u64>>),
    CloseContext(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Handle to the browser worker thread.
///
/// Cloneable; all clones talk to the same worker. At most one context is
/// open at a time, matching the one-viewport-at-a-time capture order.
#[derive(Clone)]
pub struct BrowserSession {
    cmd_tx: Sender<Command>,
}

/// Handle to the currently open page/context.
#[derive(Clone)]
pub struct PageHandle {
    cmd_tx: Sender<Command>,
}

impl BrowserSession {
    /// Launch the browser (spawns a background thread that owns the process).
    pub async fn launch(config: &RunConfig) -> Result<Self> {
        let no_sandbox = config.no_sandbox;
        let nav_timeout = config.capture.navigation_timeout;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::spawn(move || {
            // Launch on the worker thread; the handles stay here for good
            let browser = match launch_browser(no_sandbox) {
                Ok(b) => b,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let _ = init_tx.send(Ok(()));

            let mut current: Option<(Arc<Tab>, ViewportProfile)> = None;

            // Command loop
            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::OpenContext(profile, resp) => {
                        if let Some((tab, _)) = current.take() {
                            close_tab(&tab);
                        }
                        let res = match open_context(&browser, &profile, nav_timeout) {
                            Ok(tab) => {
                                current = Some((tab, profile));
                                Ok(())
                            }
                            Err(e) => Err(e),
                        };
                        let _ = resp.send(res);
                    }
                    Command::Goto(url, resp) => {
                        let res = with_tab(&current, |tab| goto(tab, &url));
                        let _ = resp.send(res);
                    }
                    Command::Eval(script, resp) => {
                        let res = with_tab(&current, |tab| eval(tab, &script));
                        let _ = resp.send(res);
                    }
                    Command::SetViewport(width, height, resp) => {
                        let res = match current.as_ref() {
                            Some((tab, profile)) => override_metrics(
                                tab,
                                width,
                                height,
                                profile.pixel_ratio,
                                profile.is_mobile,
                            ),
                            None => Err(Error::SessionClosed("no open context".to_string())),
                        };
                        let _ = resp.send(res);
                    }
                    Command::CaptureTo(path, resp) => {
                        let res = with_tab(&current, |tab| capture_to(tab, &path));
                        let _ = resp.send(res);
                    }
                    Command::CloseContext(resp) => {
                        if let Some((tab, _)) = current.take() {
                            close_tab(&tab);
                        }
                        let _ = resp.send(Ok(()));
                    }
                    Command::Close(resp) => {
                        if let Some((tab, _)) = current.take() {
                            close_tab(&tab);
                        }
                        // Dropping the browser handle shuts the process down
                        let _ = resp.send(Ok(()));
                        break;
                    }
                }
            }
        });

        // Wait for the worker to report launch success or failure
        let init_res = init_rx
            .await
            .map_err(|e| Error::BrowserInit(format!("worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    /// Open a fresh isolated context emulating `profile`, replacing any
    /// context opened earlier.
    pub async fn open_context(&self, profile: ViewportProfile) -> Result<PageHandle> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::OpenContext(profile, tx));
        rx.await
            .map_err(|e| Error::SessionClosed(format!("open context canceled: {}", e)))??;
        Ok(PageHandle {
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    /// Close the current context's tab. A no-op when nothing is open.
    pub async fn close_context(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::CloseContext(tx));
        rx.await
            .map_err(|e| Error::SessionClosed(format!("close context canceled: {}", e)))?
    }

    /// Shut down the worker and the browser process.
    ///
    /// Safe to call more than once; a session whose worker already exited
    /// reports success.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).is_err() {
            return Ok(());
        }
        match rx.await {
            Ok(res) => res,
            Err(_) => Ok(()),
        }
    }
}

impl PageHandle {
    /// Navigate to a URL and wait for the load event.
    pub async fn goto(&self, url: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Goto(url.to_string(), tx));
        rx.await
            .map_err(|e| Error::SessionClosed(format!("goto canceled: {}", e)))?
    }

    /// Evaluate JavaScript in the page and return the JSON value it produced.
    pub async fn eval(&self, script: &str) -> Result<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Eval(script.to_string(), tx));
        rx.await
            .map_err(|e| Error::SessionClosed(format!("eval canceled: {}", e)))?
    }

    /// Re-override the viewport dimensions, keeping the profile's scale
    /// factor and mobile flag.
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::SetViewport(width, height, tx));
        rx.await
            .map_err(|e| Error::SessionClosed(format!("set viewport canceled: {}", e)))?
    }

    /// Capture the visible viewport as PNG and write it to `path`.
    /// Returns the size of the written file in bytes.
    pub async fn capture_to(&self, path: &Path) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::CaptureTo(path.to_path_buf(), tx));
        rx.await
            .map_err(|e| Error::SessionClosed(format!("capture canceled: {}", e)))?
    }
}

#[cfg(test)]
impl PageHandle {
    /// A handle whose worker is already gone; every command reports a
    /// closed session.
    pub(crate) fn disconnected() -> Self {
        let (cmd_tx, _) = mpsc::channel();
        Self { cmd_tx }
    }

    /// A handle paired with the receiving end of its command channel, so a
    /// test can play the worker side of the protocol.
    pub(crate) fn scripted() -> (Self, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        (Self { cmd_tx }, cmd_rx)
    }
}

fn launch_browser(no_sandbox: bool) -> Result<Browser> {
    let launch_options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(!no_sandbox)
        .build()
        .map_err(|e| Error::BrowserInit(format!("failed to build launch options: {}", e)))?;

    Browser::new(launch_options)
        .map_err(|e| Error::BrowserInit(format!("failed to launch browser: {}", e)))
}

fn open_context(
    browser: &Browser,
    profile: &ViewportProfile,
    nav_timeout: Duration,
) -> Result<Arc<Tab>> {
    let context = browser
        .new_context()
        .map_err(|e| Error::BrowserInit(format!("failed to create browser context: {}", e)))?;

    let tab = context
        .new_tab()
        .map_err(|e| Error::BrowserInit(format!("failed to open tab: {}", e)))?;

    tab.set_default_timeout(nav_timeout);
    apply_profile(&tab, profile)?;
    Ok(tab)
}

fn apply_profile(tab: &Tab, profile: &ViewportProfile) -> Result<()> {
    override_metrics(
        tab,
        profile.width,
        profile.height,
        profile.pixel_ratio,
        profile.is_mobile,
    )?;

    tab.call_method(SetTouchEmulationEnabled {
        enabled: profile.has_touch,
        max_touch_points: profile.has_touch.then_some(5),
    })
    .map_err(|e| Error::Emulation(format!("touch emulation: {}", e)))?;

    Ok(())
}

fn override_metrics(
    tab: &Tab,
    width: u32,
    height: u32,
    pixel_ratio: f64,
    mobile: bool,
) -> Result<()> {
    tab.call_method(SetDeviceMetricsOverride {
        width,
        height,
        device_scale_factor: pixel_ratio,
        mobile,
    })
    .map_err(|e| Error::Emulation(format!("device metrics override: {}", e)))?;
    Ok(())
}

fn with_tab<T>(
    current: &Option<(Arc<Tab>, ViewportProfile)>,
    op: impl FnOnce(&Tab) -> Result<T>,
) -> Result<T> {
    match current.as_ref() {
        Some((tab, _)) => op(tab),
        None => Err(Error::SessionClosed("no open context".to_string())),
    }
}

fn goto(tab: &Tab, url: &str) -> Result<()> {
    tab.navigate_to(url)
        .map_err(|e| Error::Navigation(format!("navigation to {} failed: {}", url, e)))?;

    tab.wait_until_navigated()
        .map_err(|e| Error::Navigation(format!("load of {} did not complete: {}", url, e)))?;

    Ok(())
}

fn eval(tab: &Tab, script: &str) -> Result<serde_json::Value> {
    let result = tab
        .evaluate(script, false)
        .map_err(|e| Error::Script(format!("evaluation failed: {}", e)))?;

    Ok(result.value.unwrap_or(serde_json::Value::Null))
}

fn capture_to(tab: &Tab, path: &Path) -> Result<u64> {
    let data = tab
        .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|e| Error::Capture(format!("screenshot failed: {}", e)))?;

    std::fs::write(path, &data)
        .map_err(|e| Error::Capture(format!("writing {}: {}", path.display(), e)))?;

    Ok(data.len() as u64)
}

fn close_tab(tab: &Tab) {
    if let Err(e) = tab.close(false) {
        log::warn!("closing tab: {}", e);
    }
}

// Hand-rolled CDP commands for the Emulation domain. The wire shapes are
// stable even where the full generated structs are not.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetDeviceMetricsOverride {
    width: u32,
    height: u32,
    device_scale_factor: f64,
    mobile: bool,
}

impl Method for SetDeviceMetricsOverride {
    const NAME: &'static str = "Emulation.setDeviceMetricsOverride";
    type ReturnObject = serde_json::Value;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetTouchEmulationEnabled {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_touch_points: Option<u32>,
}

impl Method for SetTouchEmulationEnabled {
    const NAME: &'static str = "Emulation.setTouchEmulationEnabled";
    type ReturnObject = serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_metrics_serialize_in_wire_casing() {
        let params = serde_json::to_value(SetDeviceMetricsOverride {
            width: 375,
            height: 667,
            device_scale_factor: 2.0,
            mobile: true,
        })
        .unwrap();

        assert_eq!(params["width"], 375);
        assert_eq!(params["deviceScaleFactor"], 2.0);
        assert_eq!(params["mobile"], true);
    }

    #[test]
    fn absent_touch_points_stay_off_the_wire() {
        let params = serde_json::to_value(SetTouchEmulationEnabled {
            enabled: false,
            max_touch_points: None,
        })
        .unwrap();

        assert!(params.get("maxTouchPoints").is_none());
        assert_eq!(params["enabled"], false);

        let params = serde_json::to_value(SetTouchEmulationEnabled {
            enabled: true,
            max_touch_points: Some(5),
        })
        .unwrap();
        assert_eq!(params["maxTouchPoints"], 5);
    }

    #[tokio::test]
    async fn dead_worker_reports_closed_session() {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        drop(cmd_rx);

        let page = PageHandle {
            cmd_tx: cmd_tx.clone(),
        };
        let err = page.goto("http://localhost:1/").await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed(_)), "got: {:?}", err);

        // Closing an already-dead session succeeds
        let session = BrowserSession { cmd_tx };
        session.close().await.unwrap();
        session.close().await.unwrap();
    }
}
