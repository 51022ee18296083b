//! Compatibility report model, rendering, and report directory lifecycle.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::revision::RevisionDescriptor;

/// Exit status of a compatible run.
pub const EXIT_COMPATIBLE: i32 = 0;
/// Exit status when at least one checked axis is incompatible.
pub const EXIT_INCOMPATIBLE: i32 = 1;
/// Exit status of a tooling or usage failure.
pub const EXIT_TOOLING_ERROR: i32 = 2;

/// Kind of a report line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Pass,
    Fail,
    Info,
}

/// One human-readable line of the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
    /// Multi-line detail printed under the message (brief-mode XML).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            detail: None,
        }
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(Severity::Pass, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Severity::Fail, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Findings of a run plus the per-axis and overall verdicts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatibilityReport {
    pub generated_at: DateTime<Utc>,
    pub old_revision: String,
    pub new_revision: String,
    pub findings: Vec<Finding>,
    /// `None` when the interface axis was not checked.
    pub interface_compatible: Option<bool>,
    /// `None` when the storage axis was not checked.
    pub storage_compatible: Option<bool>,
    /// Per-library reports kept on disk.
    pub retained_reports: Vec<PathBuf>,
    /// Settings the run was made with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RunConfig>,
}

impl CompatibilityReport {
    pub fn new(old: &RevisionDescriptor, new: &RevisionDescriptor) -> Self {
        Self {
            generated_at: Utc::now(),
            old_revision: old.pretty(),
            new_revision: new.pretty(),
            findings: Vec::new(),
            interface_compatible: None,
            storage_compatible: None,
            retained_reports: Vec::new(),
            config: None,
        }
    }

    /// First line of the narrative.
    pub fn header(&self) -> String {
        format!(
            "Checking evolution from {} to {}",
            self.old_revision, self.new_revision
        )
    }

    /// AND of the checked axes; an unchecked axis passes.
    pub fn is_compatible(&self) -> bool {
        self.interface_compatible.unwrap_or(true) && self.storage_compatible.unwrap_or(true)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_compatible() {
            EXIT_COMPATIBLE
        } else {
            EXIT_INCOMPATIBLE
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Fail)
    }
}

/// Console narrative: header, then one line per finding.
pub fn render_text(report: &CompatibilityReport) -> String {
    let mut out = report.header();
    out.push('\n');
    for finding in &report.findings {
        out.push_str(&finding.message);
        out.push('\n');
        if let Some(detail) = &finding.detail {
            out.push_str(detail.trim_end());
            out.push('\n');
        }
    }
    out
}

/// Write the report as pretty JSON.
pub fn write_summary_json(path: &Path, report: &CompatibilityReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize compatibility report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Delete `path`, treating a missing file as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// The directory receiving dumps and per-library reports.
///
/// Removed on drop when this run created it, not every report was to be
/// kept, and no failing report was retained inside it.
#[derive(Debug)]
pub struct ReportDir {
    path: PathBuf,
    removable: bool,
}

impl ReportDir {
    pub fn prepare(path: &Path, keep_all_reports: bool) -> std::io::Result<Self> {
        let existed = path.exists();
        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            removable: !(existed || keep_all_reports),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the comparator report for `artifact`.
    pub fn report_path(&self, artifact: &str, old: &RevisionDescriptor, new: &RevisionDescriptor) -> PathBuf {
        self.path.join(format!(
            "{}-{}-{}.html",
            artifact,
            old.file_label(),
            new.file_label()
        ))
    }

    /// A report inside must survive the run.
    pub fn retain(&mut self) {
        self.removable = false;
    }

    pub fn is_removable(&self) -> bool {
        self.removable
    }
}

impl Drop for ReportDir {
    fn drop(&mut self) {
        if !self.removable {
            return;
        }
        match std::fs::remove_dir(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed report directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Report directory left in place"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::VersionTag;
    use tempfile::tempdir;

    fn report() -> CompatibilityReport {
        let mut old = RevisionDescriptor::new(VersionTag::Old, "v1").unwrap();
        old.set_resolved_commit("aaaa");
        let new = RevisionDescriptor::new(VersionTag::New, "bbbb").unwrap();
        CompatibilityReport::new(&old, &new)
    }

    #[test]
    fn test_unchecked_axes_pass() {
        let report = report();
        assert!(report.is_compatible());
        assert_eq!(report.exit_code(), EXIT_COMPATIBLE);
    }

    #[test]
    fn test_any_failed_axis_fails() {
        let mut r = report();
        r.interface_compatible = Some(true);
        r.storage_compatible = Some(false);
        assert_eq!(r.exit_code(), EXIT_INCOMPATIBLE);

        let mut r = report();
        r.interface_compatible = Some(false);
        assert!(!r.is_compatible());
    }

    #[test]
    fn test_render_text() {
        let mut r = report();
        r.findings.push(Finding::pass("No compatibility issues for libfoo"));
        r.findings
            .push(Finding::fail("Compatibility issues found for libbar").with_detail("<reports />\n"));

        let text = render_text(&r);
        assert_eq!(
            text,
            "Checking evolution from v1 (aaaa) to bbbb\n\
             No compatibility issues for libfoo\n\
             Compatibility issues found for libbar\n\
             <reports />\n"
        );
        assert_eq!(r.failures().count(), 1);
    }

    #[test]
    fn test_write_summary_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let mut r = report();
        r.storage_compatible = Some(true);
        write_summary_json(&path, &r).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["old_revision"], "v1 (aaaa)");
        assert_eq!(value["storage_compatible"], true);
        assert!(value["interface_compatible"].is_null());
        assert!(value.get("config").is_none());
    }

    #[test]
    fn test_summary_json_records_run_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let mut r = report();
        r.config = Some(
            RunConfig::builder()
                .report_dir(dir.path().join("reports"))
                .brief(true)
                .check_storage(false)
                .missing_artifacts(crate::config::MissingArtifactPolicy::Fail)
                .build()
                .unwrap(),
        );
        write_summary_json(&path, &r).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["config"]["mode"], "brief");
        assert_eq!(value["config"]["check_storage"], false);
        assert_eq!(value["config"]["missing_artifacts"], "fail");

        let back: CompatibilityReport = serde_json::from_str(&content).unwrap();
        assert_eq!(back.config, r.config);
    }

    #[test]
    fn test_report_dir_created_by_run_is_removed() {
        let parent = tempdir().unwrap();
        let path = parent.path().join("reports");
        {
            let dir = ReportDir::prepare(&path, false).unwrap();
            assert!(dir.is_removable());
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_report_dir_kept_when_preexisting_or_retained() {
        let parent = tempdir().unwrap();
        let path = parent.path().join("reports");
        std::fs::create_dir(&path).unwrap();
        drop(ReportDir::prepare(&path, false).unwrap());
        assert!(path.is_dir());

        let fresh = parent.path().join("fresh");
        {
            let mut dir = ReportDir::prepare(&fresh, false).unwrap();
            dir.retain();
        }
        assert!(fresh.is_dir());

        let kept = parent.path().join("kept");
        drop(ReportDir::prepare(&kept, true).unwrap());
        assert!(kept.is_dir());
    }

    #[test]
    fn test_report_path_names_both_revisions() {
        let parent = tempdir().unwrap();
        let dir = ReportDir::prepare(parent.path(), false).unwrap();
        let old = RevisionDescriptor::new(VersionTag::Old, "v1").unwrap();
        let new = RevisionDescriptor::new(VersionTag::New, "feature/x").unwrap();
        assert_eq!(
            dir.report_path("libfoo", &old, &new),
            parent.path().join("libfoo-v1-feature_x.html")
        );
    }
}
