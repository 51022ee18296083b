//! In-memory fakes for the engine's collaborators (testing only)
//!
//! Each fake is keyed by revision label and records what it was asked to
//! do, so tests can drive the engine without git, make or the ABI tools.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::build::{ArtifactBuilder, ArtifactMap};
use crate::compare::{ComparatorOutcome, ComparisonRequest, InterfaceComparator};
use crate::dump::InterfaceDumper;
use crate::engine::Collaborators;
use crate::error::{BuildError, ComparatorError, DumpError, SnapshotError, ToolError};
use crate::revision::RevisionDescriptor;
use crate::snapshot::{Snapshot, SnapshotProvider};
use crate::storage::TestGenerator;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn tool_failure(program: &str, output: &str) -> ToolError {
    ToolError::Exit {
        program: program.to_string(),
        code: 2,
        output: output.to_string(),
    }
}

fn write_file(root: &Path, relative: &str, content: &str) -> std::io::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

// ---------------------------------------------------------------------------
// MemorySnapshots
// ---------------------------------------------------------------------------

/// Snapshots populated from in-memory file trees.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    trees: BTreeMap<String, Vec<(String, String)>>,
    commits: BTreeMap<String, String>,
    failing: BTreeSet<String>,
    materialized: Mutex<Vec<PathBuf>>,
    released: Mutex<Vec<String>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `content` at `relative` in every snapshot of `label`.
    pub fn with_file(mut self, label: &str, relative: &str, content: &str) -> Self {
        self.trees
            .entry(label.to_string())
            .or_default()
            .push((relative.to_string(), content.to_string()));
        self
    }

    pub fn with_commit(mut self, label: &str, commit: &str) -> Self {
        self.commits.insert(label.to_string(), commit.to_string());
        self
    }

    /// Materializing `label` fails.
    pub fn failing(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }

    /// Directories of every snapshot handed out so far.
    pub fn materialized(&self) -> Vec<PathBuf> {
        lock(&self.materialized).clone()
    }

    /// Labels of released snapshots, in release order.
    pub fn released(&self) -> Vec<String> {
        lock(&self.released).clone()
    }

    /// Snapshot directories still present on disk.
    pub fn leaked(&self) -> Vec<PathBuf> {
        self.materialized()
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    }
}

impl SnapshotProvider for MemorySnapshots {
    fn materialize(&self, revision: &mut RevisionDescriptor) -> Result<Snapshot, SnapshotError> {
        let label = revision.label().to_string();
        let mut snapshot = Snapshot::create(label.as_str())?;
        lock(&self.materialized).push(snapshot.path().to_path_buf());

        if self.failing.contains(&label) {
            self.release(&mut snapshot)?;
            return Err(SnapshotError::Git {
                revision: label,
                source: tool_failure("git", "fatal: invalid reference"),
            });
        }
        for (relative, content) in self.trees.get(&label).into_iter().flatten() {
            write_file(snapshot.path(), relative, content).map_err(SnapshotError::CreateDir)?;
        }
        if let Some(commit) = self.commits.get(&label) {
            revision.set_resolved_commit(commit.as_str());
        }
        Ok(snapshot)
    }

    fn release(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        if snapshot.is_released() {
            return Ok(());
        }
        snapshot.remove_dir()?;
        lock(&self.released).push(snapshot.label().to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StubBuilder
// ---------------------------------------------------------------------------

/// Writes one placeholder `.so` per configured library name.
#[derive(Debug, Default)]
pub struct StubBuilder {
    libraries: BTreeMap<String, Vec<String>>,
    failing: BTreeSet<String>,
    built: Mutex<Vec<String>>,
}

impl StubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_libraries(mut self, label: &str, names: &[&str]) -> Self {
        self.libraries.insert(
            label.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    /// Building `label` fails.
    pub fn failing(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }

    /// Labels built so far, in order.
    pub fn built(&self) -> Vec<String> {
        lock(&self.built).clone()
    }
}

impl ArtifactBuilder for StubBuilder {
    fn build(&self, snapshot: &Snapshot) -> Result<ArtifactMap, BuildError> {
        lock(&self.built).push(snapshot.label().to_string());
        if self.failing.contains(snapshot.label()) {
            return Err(BuildError::Failed {
                dir: snapshot.path().to_path_buf(),
                source: tool_failure("make", "error: compilation failed"),
            });
        }

        let mut artifacts = ArtifactMap::new();
        for name in self.libraries.get(snapshot.label()).into_iter().flatten() {
            let relative = format!("library/{}.so", name);
            write_file(snapshot.path(), &relative, name).map_err(|e| BuildError::Failed {
                dir: snapshot.path().to_path_buf(),
                source: ToolError::Spawn {
                    program: "make".to_string(),
                    source: e,
                },
            })?;
            artifacts.insert(name.clone(), snapshot.path().join(relative));
        }
        Ok(artifacts)
    }
}

// ---------------------------------------------------------------------------
// RecordingDumper
// ---------------------------------------------------------------------------

/// Writes a small text dump and records each request.
#[derive(Debug, Default)]
pub struct RecordingDumper {
    failing: BTreeSet<String>,
    dumps: Mutex<Vec<PathBuf>>,
}

impl RecordingDumper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dumping `artifact` fails for every revision.
    pub fn failing(mut self, artifact: &str) -> Self {
        self.failing.insert(artifact.to_string());
        self
    }

    /// Every dump path requested so far.
    pub fn dumps(&self) -> Vec<PathBuf> {
        lock(&self.dumps).clone()
    }
}

impl InterfaceDumper for RecordingDumper {
    fn dump(
        &self,
        artifact: &str,
        library: &Path,
        revision: &RevisionDescriptor,
        output: &Path,
    ) -> Result<(), DumpError> {
        lock(&self.dumps).push(output.to_path_buf());
        let tool_error = |source: ToolError| DumpError::Tool {
            artifact: artifact.to_string(),
            source,
        };
        if self.failing.contains(artifact) {
            return Err(tool_error(tool_failure("abi-dumper", "no debug info")));
        }
        let content = format!("{} {} {}\n", artifact, revision.pretty(), library.display());
        std::fs::write(output, content).map_err(|source| {
            tool_error(ToolError::Spawn {
                program: "abi-dumper".to_string(),
                source,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// StaticTestGenerator
// ---------------------------------------------------------------------------

/// Generator whose output files are fixed per revision label.
#[derive(Debug, Default)]
pub struct StaticTestGenerator {
    outputs: BTreeMap<String, Vec<(String, String)>>,
    failing: BTreeSet<String>,
    generated: Mutex<Vec<(String, Vec<String>)>>,
}

impl StaticTestGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generating for `label` writes `content` to `relative`.
    pub fn with_output(mut self, label: &str, relative: &str, content: &str) -> Self {
        self.outputs
            .entry(label.to_string())
            .or_default()
            .push((relative.to_string(), content.to_string()));
        self
    }

    /// Listing outputs for `label` fails.
    pub fn failing(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }

    /// `(label, files)` of every generate call.
    pub fn generated(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.generated).clone()
    }
}

impl TestGenerator for StaticTestGenerator {
    fn list(&self, snapshot: &Snapshot) -> Result<Vec<String>, ToolError> {
        if self.failing.contains(snapshot.label()) {
            return Err(tool_failure("generate_psa_tests.py", "Traceback"));
        }
        Ok(self
            .outputs
            .get(snapshot.label())
            .into_iter()
            .flatten()
            .map(|(file, _)| file.clone())
            .collect())
    }

    fn generate(&self, snapshot: &Snapshot, files: &[String]) -> Result<(), ToolError> {
        lock(&self.generated).push((snapshot.label().to_string(), files.to_vec()));
        for (relative, content) in self.outputs.get(snapshot.label()).into_iter().flatten() {
            if files.contains(relative) {
                write_file(snapshot.path(), relative, content).map_err(|source| ToolError::Spawn {
                    program: "generate_psa_tests.py".to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedComparator
// ---------------------------------------------------------------------------

/// What the scripted comparator answers for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedVerdict {
    Compatible,
    /// Incompatible, with this text as the comparator's stdout.
    Incompatible(String),
    /// Exit with a status other than 0 or 1.
    Crash(i32),
}

/// Comparator answering from a per-artifact script (compatible by default).
///
/// Like the real tool it writes a report file in full mode.
#[derive(Debug, Default)]
pub struct ScriptedComparator {
    verdicts: BTreeMap<String, ScriptedVerdict>,
    compared: Mutex<Vec<String>>,
}

impl ScriptedComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verdict(mut self, artifact: &str, verdict: ScriptedVerdict) -> Self {
        self.verdicts.insert(artifact.to_string(), verdict);
        self
    }

    /// Artifacts compared so far, in order.
    pub fn compared(&self) -> Vec<String> {
        lock(&self.compared).clone()
    }
}

impl InterfaceComparator for ScriptedComparator {
    fn compare(&self, request: &ComparisonRequest<'_>) -> Result<ComparatorOutcome, ComparatorError> {
        lock(&self.compared).push(request.artifact.to_string());
        let tool_error = |source: ToolError| ComparatorError::Tool {
            artifact: request.artifact.to_string(),
            source,
        };
        for dump in [request.old_dump, request.new_dump] {
            if !dump.is_file() {
                return Err(tool_error(tool_failure(
                    "abi-compliance-checker",
                    &format!("can't access '{}'", dump.display()),
                )));
            }
        }

        let verdict = self
            .verdicts
            .get(request.artifact)
            .cloned()
            .unwrap_or(ScriptedVerdict::Compatible);
        if let ScriptedVerdict::Crash(code) = verdict {
            return Err(tool_error(ToolError::Exit {
                program: "abi-compliance-checker".to_string(),
                code,
                output: "internal error".to_string(),
            }));
        }
        if !request.brief {
            std::fs::write(request.report_path, format!("<html>{}</html>", request.artifact))
                .map_err(|source| {
                    tool_error(ToolError::Spawn {
                        program: "abi-compliance-checker".to_string(),
                        source,
                    })
                })?;
        }
        Ok(match verdict {
            ScriptedVerdict::Incompatible(report) => ComparatorOutcome::Incompatible { report },
            _ => ComparatorOutcome::Compatible,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

/// All fakes together, ready to hand to the engine.
#[derive(Debug, Default)]
pub struct FakeToolchain {
    pub snapshots: MemorySnapshots,
    pub builder: StubBuilder,
    pub dumper: RecordingDumper,
    pub generator: StaticTestGenerator,
    pub comparator: ScriptedComparator,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            snapshots: &self.snapshots,
            builder: &self.builder,
            dumper: &self.dumper,
            generator: &self.generator,
            comparator: &self.comparator,
        }
    }
}
