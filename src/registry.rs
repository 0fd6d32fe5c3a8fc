//! Static viewport and page registries
//!
//! Both tables are immutable configuration fixed at compile time. Runs
//! operate on a [`Selection`]: the registries filtered down to the requested
//! subsets, validated so that unknown keys fail before any side effect.

use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// A named device emulation profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportProfile {
    /// Stable identifier used on the CLI and in the output layout
    pub key: &'static str,
    /// Human-readable name for the progress trace
    pub display_name: &'static str,
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
}

/// Device profiles available for capture, in processing order
pub const VIEWPORTS: &[ViewportProfile] = &[
    ViewportProfile {
        key: "mobile",
        display_name: "Mobile",
        width: 375,
        height: 667,
        pixel_ratio: 2.0,
        is_mobile: true,
        has_touch: true,
    },
    ViewportProfile {
        key: "tablet",
        display_name: "Tablet",
        width: 768,
        height: 1024,
        pixel_ratio: 2.0,
        is_mobile: true,
        has_touch: true,
    },
    ViewportProfile {
        key: "desktop",
        display_name: "Desktop",
        width: 1920,
        height: 1080,
        pixel_ratio: 1.0,
        is_mobile: false,
        has_touch: false,
    },
];

/// Page paths registered for capture, in registry order
pub const PAGES: &[&str] = &["/", "/about", "/contact", "/articles"];

/// A site page eligible for capture
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    /// Site-relative path, always starting with `/`
    pub path: String,
    /// Filesystem-safe directory name derived from the path
    pub logical_name: String,
    /// Per-page override of the post-load animation settle
    pub settle: Option<Duration>,
}

impl PageSpec {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            logical_name: logical_name(path),
            settle: None,
        }
    }
}

/// Derive the output directory name for a page path.
///
/// Strips the leading slash and maps interior slashes to dashes; the root
/// path becomes `home`.
pub fn logical_name(path: &str) -> String {
    let name = path.strip_prefix('/').unwrap_or(path).replace('/', "-");
    if name.is_empty() {
        "home".to_string()
    } else {
        name
    }
}

/// The resolved set of profiles and pages for one run
#[derive(Debug, Clone)]
pub struct Selection {
    /// Requested profiles, in registry order
    pub viewports: Vec<ViewportProfile>,
    /// Requested pages, in requested order
    pub pages: Vec<PageSpec>,
}

impl Selection {
    /// Filter the registries down to the requested subsets.
    ///
    /// Empty subsets select everything. Unknown keys or paths produce an
    /// [`Error::InvalidSelection`] naming the valid options, and two pages
    /// that would share an output directory are rejected outright.
    pub fn resolve(pages: &[String], devices: &[String]) -> Result<Self> {
        let viewports = select_viewports(devices)?;
        let pages = select_pages(pages)?;
        ensure_unique_logical_names(&pages)?;
        Ok(Self { viewports, pages })
    }
}

fn select_viewports(requested: &[String]) -> Result<Vec<ViewportProfile>> {
    if requested.is_empty() {
        return Ok(VIEWPORTS.to_vec());
    }

    let unknown: Vec<&str> = requested
        .iter()
        .filter(|key| !VIEWPORTS.iter().any(|v| v.key == key.as_str()))
        .map(|key| key.as_str())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::InvalidSelection(format!(
            "unknown device(s): {}; valid devices: {}",
            unknown.join(", "),
            VIEWPORTS
                .iter()
                .map(|v| v.key)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    // Registry order, duplicates in the request collapse naturally
    Ok(VIEWPORTS
        .iter()
        .filter(|v| requested.iter().any(|key| key == v.key))
        .copied()
        .collect())
}

fn select_pages(requested: &[String]) -> Result<Vec<PageSpec>> {
    if requested.is_empty() {
        return Ok(PAGES.iter().map(|path| PageSpec::new(path)).collect());
    }

    let unknown: Vec<&str> = requested
        .iter()
        .filter(|path| !PAGES.contains(&path.as_str()))
        .map(|path| path.as_str())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::InvalidSelection(format!(
            "unknown page(s): {}; valid pages: {}",
            unknown.join(", "),
            PAGES.join(", ")
        )));
    }

    // Requested order, first occurrence wins
    let mut seen: Vec<&str> = Vec::new();
    let mut pages = Vec::new();
    for path in requested {
        if seen.contains(&path.as_str()) {
            continue;
        }
        seen.push(path.as_str());
        pages.push(PageSpec::new(path));
    }
    Ok(pages)
}

/// Two pages sharing one output directory would silently overwrite each
/// other's segments, so collisions abort before anything runs.
fn ensure_unique_logical_names(pages: &[PageSpec]) -> Result<()> {
    let mut by_name: HashMap<&str, &str> = HashMap::new();
    for page in pages {
        if let Some(previous) = by_name.insert(&page.logical_name, &page.path) {
            return Err(Error::InvalidSelection(format!(
                "pages {} and {} both map to output directory '{}'",
                previous, page.path, page.logical_name
            )));
        }
    }
    Ok(())
}
