//! Run manifest
//!
//! Accumulates one record per capture target and serializes the JSON
//! document that audits the run. Failed targets stay in the document with
//! their error recorded, so the manifest lists what was run, not just what
//! worked. Records land in capture order; the document is written exactly
//! once, at the end of a run that completed.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of capturing one page on one viewport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRecord {
    /// Viewport key
    pub device: String,
    /// Page path as requested
    pub page: String,
    /// Written files relative to the output root, in capture order;
    /// empty when the target failed
    pub files: Vec<String>,
    /// Why the target produced no files
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl CaptureRecord {
    pub fn success(device: &str, page: &str, files: Vec<String>) -> Self {
        Self {
            device: device.to_string(),
            page: page.to_string(),
            files,
            error: None,
        }
    }

    pub fn failure(device: &str, page: &str, error: String) -> Self {
        Self {
            device: device.to_string(),
            page: page.to_string(),
            files: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// The JSON document describing one full run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// When this manifest was started, ISO-8601
    pub generated: String,
    /// Page paths the run captured
    pub pages: Vec<String>,
    /// Viewport keys the run captured
    pub devices: Vec<String>,
    /// One record per (device, page) target, in capture order
    pub screenshots: Vec<CaptureRecord>,
}

impl RunManifest {
    /// An empty manifest stamped with the current time.
    pub fn new(pages: Vec<String>, devices: Vec<String>) -> Self {
        Self {
            generated: chrono::Utc::now().to_rfc3339(),
            pages,
            devices,
            screenshots: Vec::new(),
        }
    }

    pub fn append(&mut self, record: CaptureRecord) {
        self.screenshots.push(record);
    }

    pub fn failed_count(&self) -> usize {
        self.screenshots.iter().filter(|r| r.is_failure()).count()
    }

    /// Write the manifest to `path`, creating parent directories as needed.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("manifest serialization: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_use_the_documented_field_names() {
        let record = CaptureRecord::success(
            "mobile",
            "/about",
            vec!["mobile/about/scroll-0.png".to_string()],
        );
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["device"], "mobile");
        assert_eq!(json["page"], "/about");
        assert_eq!(json["files"][0], "mobile/about/scroll-0.png");
        // A clean record carries no error key at all
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failures_keep_their_error_and_no_files() {
        let record = CaptureRecord::failure("desktop", "/", "navigation failed".to_string());
        assert!(record.is_failure());
        assert!(record.files.is_empty());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["error"], "navigation failed");
        assert_eq!(json["files"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn generated_stamp_is_rfc3339() {
        let manifest = RunManifest::new(vec!["/".to_string()], vec!["mobile".to_string()]);
        chrono::DateTime::parse_from_rfc3339(&manifest.generated).unwrap();
    }

    #[test]
    fn append_preserves_capture_order() {
        let mut manifest = RunManifest::new(Vec::new(), Vec::new());
        manifest.append(CaptureRecord::success("mobile", "/", Vec::new()));
        manifest.append(CaptureRecord::failure("mobile", "/about", "boom".to_string()));
        manifest.append(CaptureRecord::success("desktop", "/", Vec::new()));

        let order: Vec<(&str, &str)> = manifest
            .screenshots
            .iter()
            .map(|r| (r.device.as_str(), r.page.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("mobile", "/"), ("mobile", "/about"), ("desktop", "/")]
        );
        assert_eq!(manifest.failed_count(), 1);
    }

    #[test]
    fn every_device_page_pair_appears_once() {
        let devices = ["mobile", "desktop"];
        let pages = ["/", "/about"];

        let mut manifest = RunManifest::new(
            pages.iter().map(|p| p.to_string()).collect(),
            devices.iter().map(|d| d.to_string()).collect(),
        );
        for device in &devices {
            for page in &pages {
                manifest.append(CaptureRecord::success(device, page, Vec::new()));
            }
        }

        assert_eq!(manifest.screenshots.len(), 4);
        let mut pairs: Vec<(String, String)> = manifest
            .screenshots
            .iter()
            .map(|r| (r.device.clone(), r.page.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn persist_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/manifest.json");

        let mut manifest = RunManifest::new(
            vec!["/".to_string(), "/about".to_string()],
            vec!["mobile".to_string()],
        );
        manifest.append(CaptureRecord::success(
            "mobile",
            "/",
            vec!["mobile/home/scroll-0.png".to_string()],
        ));
        manifest.persist(&path).unwrap();

        let reloaded: RunManifest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.generated, manifest.generated);
        assert_eq!(reloaded.pages, manifest.pages);
        assert_eq!(reloaded.screenshots, manifest.screenshots);
    }
}
