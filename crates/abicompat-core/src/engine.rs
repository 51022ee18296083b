//! The compatibility engine.
//!
//! Runs the old and then the new revision through
//! snapshot → build → dump (+ storage collection), each snapshot released
//! before the next one is created, then diffs the two results:
//!
//! ```text
//! INIT → OLD_SNAPSHOT → OLD_BUILD/DUMP/COLLECT
//!      → NEW_SNAPSHOT → NEW_BUILD/DUMP/COLLECT → DIFF → CLEANUP → DONE
//! ```
//!
//! Every disposable resource (snapshots, dump files, the report directory)
//! is held by a guard, so cleanup happens on every exit path.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn, Dispatch};

use crate::brief::prune_report_xml;
use crate::build::{ArtifactBuilder, ArtifactMap};
use crate::compare::{ComparatorOutcome, ComparisonRequest, InterfaceComparator};
use crate::config::{MissingArtifactPolicy, RunConfig};
use crate::dump::{DumpSet, InterfaceDumper};
use crate::error::{ComparatorError, Result};
use crate::report::{remove_file_if_exists, CompatibilityReport, Finding, ReportDir};
use crate::revision::RevisionDescriptor;
use crate::snapshot::{SnapshotLease, SnapshotProvider};
use crate::storage::{collect_storage_tests, diff_storage, StorageTestSet, TestGenerator};

/// The external collaborators a run is wired to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub snapshots: &'a dyn SnapshotProvider,
    pub builder: &'a dyn ArtifactBuilder,
    pub dumper: &'a dyn InterfaceDumper,
    pub generator: &'a dyn TestGenerator,
    pub comparator: &'a dyn InterfaceComparator,
}

/// Everything extracted from one revision.
#[derive(Debug, Default)]
pub struct RevisionAnalysis {
    pub artifacts: ArtifactMap,
    pub dumps: DumpSet,
    pub storage_tests: StorageTestSet,
}

/// Result of the interface diff stage.
#[derive(Debug, Default)]
struct InterfaceOutcome {
    findings: Vec<Finding>,
    compatible: bool,
    retained: Vec<PathBuf>,
}

/// Orchestrates one old-versus-new compatibility run.
pub struct CompatibilityEngine<'a> {
    config: RunConfig,
    old: RevisionDescriptor,
    new: RevisionDescriptor,
    tools: Collaborators<'a>,
    dispatch: Option<Dispatch>,
}

impl<'a> CompatibilityEngine<'a> {
    pub fn new(
        config: RunConfig,
        old: RevisionDescriptor,
        new: RevisionDescriptor,
        tools: Collaborators<'a>,
    ) -> Self {
        Self {
            config,
            old,
            new,
            tools,
            dispatch: None,
        }
    }

    /// Send this engine's diagnostics to `dispatch` instead of the ambient subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn old_revision(&self) -> &RevisionDescriptor {
        &self.old
    }

    pub fn new_revision(&self) -> &RevisionDescriptor {
        &self.new
    }

    /// Run the full comparison.
    ///
    /// An incompatibility is an `Ok` report with a failing verdict; `Err`
    /// is reserved for tooling failures.
    pub fn run(&mut self) -> Result<CompatibilityReport> {
        match self.dispatch.clone() {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || self.run_stages()),
            None => self.run_stages(),
        }
    }

    fn run_stages(&mut self) -> Result<CompatibilityReport> {
        let mut report_dir = if self.config.check_interface() {
            Some(ReportDir::prepare(
                self.config.report_dir(),
                self.config.keep_all_reports(),
            )?)
        } else {
            None
        };
        let dump_dir = report_dir.as_ref().map(|d| d.path().to_path_buf());

        let old = analyze_revision(&self.config, self.tools, &mut self.old, dump_dir.as_deref())?;
        let new = analyze_revision(&self.config, self.tools, &mut self.new, dump_dir.as_deref())?;

        let mut report = CompatibilityReport::new(&self.old, &self.new);
        report.config = Some(self.config.clone());
        info!("{}", report.header());

        if let Some(dir) = report_dir.as_mut() {
            let outcome = self.compare_interfaces(&old, &new, dir)?;
            report.findings.extend(outcome.findings);
            report.retained_reports.extend(outcome.retained);
            report.interface_compatible = Some(outcome.compatible);
        }

        if self.config.check_storage() {
            let diff = diff_storage(&old.storage_tests, &new.storage_tests);
            report.findings.extend(diff.findings());
            report.storage_compatible = Some(diff.is_compatible());
        }

        // Dumps go before the directory that holds them.
        drop(new);
        drop(old);
        drop(report_dir);

        info!(
            compatible = report.is_compatible(),
            failures = report.failures().count(),
            "Compatibility check finished"
        );
        Ok(report)
    }

    fn compare_interfaces(
        &self,
        old: &RevisionAnalysis,
        new: &RevisionAnalysis,
        report_dir: &mut ReportDir,
    ) -> Result<InterfaceOutcome> {
        let mut outcome = InterfaceOutcome {
            compatible: true,
            ..Default::default()
        };
        let brief = self.config.is_brief();

        for name in old.artifacts.keys().filter(|n| !new.artifacts.contains_key(*n)) {
            let message = format!(
                "Library {} is built by {} but not by {}; not compared",
                name,
                self.old.pretty(),
                self.new.pretty()
            );
            match self.config.missing_artifacts() {
                MissingArtifactPolicy::Ignore => outcome.findings.push(Finding::info(message)),
                MissingArtifactPolicy::Fail => {
                    outcome.compatible = false;
                    outcome.findings.push(Finding::fail(message));
                }
            }
        }
        for name in new.artifacts.keys().filter(|n| !old.artifacts.contains_key(*n)) {
            outcome.findings.push(Finding::info(format!(
                "Library {} is new in {}; not compared",
                name,
                self.new.pretty()
            )));
        }

        for name in old.artifacts.keys().filter(|n| new.artifacts.contains_key(*n)) {
            let old_dump = old
                .dumps
                .get(name)
                .ok_or_else(|| ComparatorError::MissingDump(name.clone()))?;
            let new_dump = new
                .dumps
                .get(name)
                .ok_or_else(|| ComparatorError::MissingDump(name.clone()))?;
            let report_path = report_dir.report_path(name, &self.old, &self.new);

            debug!(artifact = %name, "Comparing interfaces");
            let request = ComparisonRequest {
                artifact: name,
                old_dump,
                new_dump,
                report_path: &report_path,
                skip_file: self.config.skip_file(),
                brief,
            };
            match self.tools.comparator.compare(&request)? {
                ComparatorOutcome::Compatible => {
                    outcome
                        .findings
                        .push(Finding::pass(format!("No compatibility issues for {}", name)));
                    if brief || !self.config.keep_all_reports() {
                        discard_report(&report_path);
                    }
                }
                ComparatorOutcome::Incompatible { report } => {
                    outcome.compatible = false;
                    if brief {
                        info!("Compatibility issues found for {}", name);
                        let pruned = prune_report_xml(&report).map_err(|e| {
                            ComparatorError::MalformedReport {
                                artifact: name.clone(),
                                message: e.to_string(),
                            }
                        })?;
                        outcome.findings.push(
                            Finding::fail(format!("Compatibility issues found for {}", name))
                                .with_detail(pruned),
                        );
                        discard_report(&report_path);
                    } else {
                        report_dir.retain();
                        outcome.findings.push(Finding::fail(format!(
                            "Compatibility issues found for {}, for details see {}",
                            name,
                            report_path.display()
                        )));
                        outcome.retained.push(report_path);
                    }
                }
            }
        }
        Ok(outcome)
    }
}

/// Snapshot, build, dump and collect one revision.
///
/// The snapshot is released before returning, on success and on failure.
/// `dump_dir` is `Some` iff interface comparison is enabled.
pub fn analyze_revision(
    config: &RunConfig,
    tools: Collaborators<'_>,
    revision: &mut RevisionDescriptor,
    dump_dir: Option<&Path>,
) -> Result<RevisionAnalysis> {
    info!(revision = %revision.label(), side = %revision.tag(), "Analyzing revision");
    let lease = SnapshotLease::acquire(tools.snapshots, revision)?;
    let mut analysis = RevisionAnalysis::default();

    if let Some(dir) = dump_dir {
        analysis.artifacts = tools.builder.build(lease.snapshot())?;
        analysis.dumps = DumpSet::create(tools.dumper, &analysis.artifacts, revision, dir)?;
    }
    if config.check_storage() {
        analysis.storage_tests = collect_storage_tests(lease.snapshot(), tools.generator)?;
    }

    lease.release()?;
    Ok(analysis)
}

fn discard_report(path: &Path) {
    if let Err(e) = remove_file_if_exists(path) {
        warn!(path = %path.display(), error = %e, "Failed to delete report");
    }
}
