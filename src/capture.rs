//! Page capture engine
//!
//! Drives one open page through the capture sequence: navigate, wait for
//! network quiescence, let animations settle, measure the rendered content,
//! then raster the page as one or more vertical segments. Pages taller
//! than the raster ceiling are scrolled and captured in slices, since some
//! image backends silently truncate beyond a maximum dimension.
//!
//! Capture failures never escape [`CaptureEngine::capture`]; they come back
//! as a [`CaptureRecord`] with the error recorded and no files, so one bad
//! page cannot sink the rest of the run.

use crate::browser::PageHandle;
use crate::manifest::CaptureRecord;
use crate::registry::{PageSpec, ViewportProfile};
use crate::{CaptureSettings, Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Instant;

/// Returns a JSON string so the value survives the CDP boundary as a
/// primitive; object results come back as opaque remote references.
const MEASURE_SCRIPT: &str = r#"
(() => {
    const doc = document.documentElement;
    const body = document.body;
    return JSON.stringify({
        width: Math.max(doc ? doc.scrollWidth : 0, body ? body.scrollWidth : 0),
        height: Math.max(doc ? doc.scrollHeight : 0, body ? body.scrollHeight : 0)
    });
})()
"#;

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

/// One vertical slice of a page raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Scroll offset from the top of the document, in CSS pixels
    pub offset: u32,
    /// Height of this slice, in CSS pixels
    pub height: u32,
}

/// Split a content height into capture segments of at most `ceiling` pixels.
///
/// A height at or under the ceiling yields a single full-height segment;
/// the boundary is inclusive, so `height == ceiling` does not grow an empty
/// second segment. `max_segments` caps runaway pages; anything past the cap
/// is dropped.
pub fn plan_segments(content_height: u32, ceiling: u32, max_segments: u32) -> Vec<Segment> {
    let height = content_height.max(1);
    let ceiling = ceiling.max(1);

    let mut segments = Vec::new();
    let mut offset = 0;
    while offset < height && (segments.len() as u32) < max_segments {
        let segment_height = ceiling.min(height - offset);
        segments.push(Segment {
            offset,
            height: segment_height,
        });
        offset += segment_height;
    }
    segments
}

/// Rendered document dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    width: f64,
    height: f64,
}

fn parse_content_size(value: &serde_json::Value) -> Result<ContentSize> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::Script(format!("size probe returned non-string: {}", value)))?;

    let raw: RawSize = serde_json::from_str(text)
        .map_err(|e| Error::Script(format!("size probe returned malformed JSON: {}", e)))?;

    Ok(ContentSize {
        width: raw.width.max(0.0) as u32,
        height: raw.height.max(0.0) as u32,
    })
}

/// Captures pages for one run
pub struct CaptureEngine {
    origin: String,
    output_root: PathBuf,
    settings: CaptureSettings,
}

impl CaptureEngine {
    pub fn new(origin: String, output_root: PathBuf, settings: CaptureSettings) -> Self {
        Self {
            origin,
            output_root,
            settings,
        }
    }

    /// Capture one page on one viewport.
    ///
    /// Always returns a record; errors are folded into it rather than
    /// raised. Afterwards the page is put back at the profile's viewport
    /// and scrolled to the top for the next target, best-effort: a restore
    /// failure is logged and never invalidates files already on disk.
    pub async fn capture(
        &self,
        page: &PageHandle,
        profile: &ViewportProfile,
        spec: &PageSpec,
    ) -> CaptureRecord {
        let outcome = self.try_capture(page, profile, spec).await;

        if let Err(restore) = self.restore_view(page, profile).await {
            log::debug!("viewport restore after {}: {}", spec.path, restore);
        }

        match outcome {
            Ok(files) => CaptureRecord::success(profile.key, &spec.path, files),
            Err(e) => {
                log::warn!("capture of {} on {} failed: {}", spec.path, profile.key, e);
                CaptureRecord::failure(profile.key, &spec.path, e.to_string())
            }
        }
    }

    async fn try_capture(
        &self,
        page: &PageHandle,
        profile: &ViewportProfile,
        spec: &PageSpec,
    ) -> Result<Vec<String>> {
        let url = format!("{}{}", self.origin, spec.path);
        page.goto(&url).await?;

        self.wait_for_quiescence(page).await?;
        self.wait_for_ready_marker(page).await;

        let settle = spec.settle.unwrap_or(self.settings.animation_settle);
        tokio::time::sleep(settle).await;

        let size = parse_content_size(&page.eval(MEASURE_SCRIPT).await?)?;
        let segments = plan_segments(
            size.height,
            self.settings.max_segment_height,
            self.settings.max_segments,
        );
        let covered: u32 = segments.iter().map(|s| s.height).sum();
        if covered < size.height {
            log::warn!(
                "{} on {}: content is {}px tall, capturing only the first {}px",
                spec.path,
                profile.key,
                size.height,
                covered
            );
        }

        let dir = self.output_root.join(profile.key).join(&spec.logical_name);
        std::fs::create_dir_all(&dir)?;

        let capture_width = size
            .width
            .min(self.settings.max_segment_height)
            .max(1);

        let mut files = Vec::with_capacity(segments.len());
        for segment in &segments {
            page.set_viewport(capture_width, segment.height).await?;
            page.eval(&format!("window.scrollTo(0, {})", segment.offset))
                .await?;
            tokio::time::sleep(self.settings.scroll_settle).await;

            let filename = format!("scroll-{}.png", segment.offset);
            let bytes = page.capture_to(&dir.join(&filename)).await?;
            log::debug!(
                "{}/{}/{}: {} bytes",
                profile.key,
                spec.logical_name,
                filename,
                bytes
            );
            files.push(format!("{}/{}/{}", profile.key, spec.logical_name, filename));
        }

        Ok(files)
    }

    /// Put the context back at the profile's dimensions, scrolled to the top.
    async fn restore_view(&self, page: &PageHandle, profile: &ViewportProfile) -> Result<()> {
        page.set_viewport(profile.width, profile.height).await?;
        page.eval("window.scrollTo(0, 0)").await?;
        Ok(())
    }

    /// Wait until the page stops fetching subresources.
    ///
    /// Polls the resource timing entry count and treats it as quiescent
    /// once it holds still for the settle window. Bounded; a page that
    /// never goes quiet fails this target only.
    async fn wait_for_quiescence(&self, page: &PageHandle) -> Result<()> {
        let started = Instant::now();
        let mut last_count = self.resource_count(page).await?;
        let mut stable_since = Instant::now();

        loop {
            if stable_since.elapsed() >= self.settings.quiescence_settle {
                return Ok(());
            }
            if started.elapsed() >= self.settings.quiescence_timeout {
                return Err(Error::QuiescenceTimeout(
                    self.settings.quiescence_timeout.as_millis() as u64,
                ));
            }

            tokio::time::sleep(self.settings.quiescence_poll).await;
            let count = self.resource_count(page).await?;
            if count != last_count {
                last_count = count;
                stable_since = Instant::now();
            }
        }
    }

    async fn resource_count(&self, page: &PageHandle) -> Result<u64> {
        let value = page.eval(RESOURCE_COUNT_SCRIPT).await?;
        value
            .as_u64()
            .ok_or_else(|| Error::Script(format!("resource count probe returned {}", value)))
    }

    /// Wait for the body to carry the configured ready class.
    ///
    /// Best-effort: sites without the marker just pay the bounded wait, and
    /// probe failures are not capture failures.
    async fn wait_for_ready_marker(&self, page: &PageHandle) {
        let class = match &self.settings.ready_marker_class {
            Some(class) => class.clone(),
            None => return,
        };

        let script = format!("document.body.classList.contains('{}')", class);
        let deadline = Instant::now() + self.settings.ready_marker_timeout;

        loop {
            match page.eval(&script).await {
                Ok(value) if value.as_bool() == Some(true) => return,
                Ok(_) => {}
                Err(e) => {
                    log::debug!("ready marker probe failed: {}", e);
                    return;
                }
            }
            if Instant::now() >= deadline {
                log::debug!("body never gained class '{}', continuing", class);
                return;
            }
            tokio::time::sleep(self.settings.quiescence_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Command;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn sub_ceiling_page_is_one_full_capture() {
        assert_eq!(
            plan_segments(500, 8000, 20),
            vec![Segment {
                offset: 0,
                height: 500
            }]
        );
    }

    #[test]
    fn exact_multiples_split_without_remainder() {
        for k in 1u32..=3 {
            let segments = plan_segments(8000 * k, 8000, 20);
            assert_eq!(segments.len(), k as usize, "k = {}", k);
            for (i, segment) in segments.iter().enumerate() {
                assert_eq!(segment.offset, 8000 * i as u32);
                assert_eq!(segment.height, 8000);
            }
        }
    }

    #[test]
    fn one_pixel_over_the_ceiling_grows_a_second_segment() {
        let segments = plan_segments(8001, 8000, 20);
        assert_eq!(
            segments,
            vec![
                Segment {
                    offset: 0,
                    height: 8000
                },
                Segment {
                    offset: 8000,
                    height: 1
                },
            ]
        );
    }

    #[test]
    fn segments_tile_the_height_exactly() {
        let height = 19_750;
        let segments = plan_segments(height, 8000, 20);

        let mut expected_offset = 0;
        for segment in &segments {
            assert_eq!(segment.offset, expected_offset);
            expected_offset += segment.height;
        }
        assert_eq!(expected_offset, height);
    }

    #[test]
    fn runaway_heights_hit_the_segment_cap() {
        let segments = plan_segments(1_000_000, 8000, 20);
        assert_eq!(segments.len(), 20);
        let covered: u32 = segments.iter().map(|s| s.height).sum();
        assert_eq!(covered, 160_000);
    }

    #[test]
    fn zero_height_still_captures_something() {
        assert_eq!(
            plan_segments(0, 8000, 20),
            vec![Segment {
                offset: 0,
                height: 1
            }]
        );
    }

    #[test]
    fn content_size_parses_from_probe_output() {
        let value = json!("{\"width\":1920.0,\"height\":4312.5}");
        let size = parse_content_size(&value).unwrap();
        assert_eq!(
            size,
            ContentSize {
                width: 1920,
                height: 4312
            }
        );
    }

    #[test]
    fn non_string_probe_output_is_rejected() {
        let err = parse_content_size(&json!({"width": 10})).unwrap_err();
        assert!(matches!(err, Error::Script(_)), "got: {:?}", err);

        let err = parse_content_size(&json!("not json")).unwrap_err();
        assert!(matches!(err, Error::Script(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn capture_errors_become_records() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CaptureEngine::new(
            "http://localhost:4173".to_string(),
            dir.path().to_path_buf(),
            CaptureSettings::default(),
        );

        let page = PageHandle::disconnected();
        let profile = crate::registry::VIEWPORTS[0];
        let spec = crate::registry::PageSpec::new("/about");

        let record = engine.capture(&page, &profile, &spec).await;
        assert_eq!(record.device, "mobile");
        assert_eq!(record.page, "/about");
        assert!(record.files.is_empty());
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn restore_failure_keeps_a_successful_record() {
        let dir = tempfile::tempdir().unwrap();
        let profile = crate::registry::VIEWPORTS[0];
        let (page, commands) = PageHandle::scripted();

        // Worker double: every step succeeds except putting the profile
        // viewport back after the capture.
        std::thread::spawn(move || {
            while let Ok(cmd) = commands.recv() {
                match cmd {
                    Command::Goto(_, resp) => {
                        let _ = resp.send(Ok(()));
                    }
                    Command::Eval(script, resp) => {
                        let value = if script.contains("getEntriesByType") {
                            json!(3)
                        } else if script.contains("scrollWidth") {
                            json!("{\"width\":600.0,\"height\":400.0}")
                        } else {
                            serde_json::Value::Null
                        };
                        let _ = resp.send(Ok(value));
                    }
                    Command::SetViewport(width, _, resp) => {
                        let res = if width == profile.width {
                            Err(Error::Emulation("metrics override refused".to_string()))
                        } else {
                            Ok(())
                        };
                        let _ = resp.send(res);
                    }
                    Command::CaptureTo(path, resp) => {
                        std::fs::write(&path, b"png").unwrap();
                        let _ = resp.send(Ok(3));
                    }
                    Command::OpenContext(_, resp) => {
                        let _ = resp.send(Ok(()));
                    }
                    Command::CloseContext(resp) | Command::Close(resp) => {
                        let _ = resp.send(Ok(()));
                    }
                }
            }
        });

        let settings = CaptureSettings {
            quiescence_poll: Duration::from_millis(1),
            quiescence_settle: Duration::from_millis(1),
            ready_marker_class: None,
            animation_settle: Duration::from_millis(1),
            scroll_settle: Duration::from_millis(1),
            ..CaptureSettings::default()
        };
        let engine = CaptureEngine::new(
            "http://localhost:4173".to_string(),
            dir.path().to_path_buf(),
            settings,
        );

        let record = engine
            .capture(&page, &profile, &crate::registry::PageSpec::new("/about"))
            .await;

        assert!(record.error.is_none(), "got: {:?}", record.error);
        assert_eq!(record.files, vec!["mobile/about/scroll-0.png".to_string()]);
        assert!(dir.path().join("mobile/about/scroll-0.png").is_file());
    }
}
