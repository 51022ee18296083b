//! Storage format test cases.
//!
//! The persisted-data format is approximated by the test cases in the test
//! suite data files whose name contains [`STORAGE_FORMAT_MARKER`]. A test
//! case present in the old revision but absent from the new one means data
//! written by the old version may no longer be readable.
//!
//! Data file layout, one paragraph per test case:
//!
//! ```text
//! # comment
//! Human description of the test
//! depends_on:SOME_FEATURE
//! test_function:param1:param2
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StorageError, ToolError};
use crate::report::Finding;
use crate::snapshot::Snapshot;
use crate::tooling::ToolInvocation;

/// Substring identifying storage format test data files.
pub const STORAGE_FORMAT_MARKER: &str = "storage_format";

/// Glob, relative to the snapshot root, of hand-written and already generated data files.
pub const TEST_DATA_GLOB: &str = "tests/suites/test_suite_*storage_format*.data";

const COMMENT_PREFIX: &str = "#";
const DEPENDENCY_PREFIX: &str = "depends_on:";

/// Where a storage test case was found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    /// Data file, relative to the snapshot root.
    pub file: String,
    /// 1-based line number of the data line.
    pub line_number: usize,
    /// First line of the paragraph, if any.
    pub description: Option<String>,
}

/// Normalized test case identity to where it came from.
pub type StorageTestSet = BTreeMap<String, Provenance>;

/// Remove every whitespace character, so reformatting a line is not a change.
pub fn normalize_test_case(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whether the function name of a normalized test case contains the word `read`.
pub fn is_read_test(normalized: &str) -> bool {
    let function = normalized.split(':').next().unwrap_or_default();
    function.split('_').any(|word| word == "read")
}

/// Extract the test cases of one data file.
///
/// Hand-written files (`generated == false`) only contribute read tests;
/// generated files contribute every test case. Cases are returned in file
/// order.
pub fn parse_test_data(file: &str, content: &str, generated: bool) -> Vec<(String, Provenance)> {
    let mut cases = Vec::new();
    let mut at_paragraph_start = true;
    let mut description: Option<String> = None;

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            at_paragraph_start = true;
            continue;
        }
        if line.starts_with(COMMENT_PREFIX) {
            continue;
        }
        if at_paragraph_start {
            description = Some(line.to_string());
            at_paragraph_start = false;
            continue;
        }
        if line.starts_with(DEPENDENCY_PREFIX) {
            continue;
        }

        let identity = normalize_test_case(line);
        if !generated && !is_read_test(&identity) {
            continue;
        }
        cases.push((
            identity,
            Provenance {
                file: file.to_string(),
                line_number: index + 1,
                description: description.clone(),
            },
        ));
    }
    cases
}

/// The snapshot's test data generator.
pub trait TestGenerator {
    /// Files (relative to the snapshot root) the generator would write.
    fn list(&self, snapshot: &Snapshot) -> Result<Vec<String>, ToolError>;

    /// Regenerate exactly `files`.
    fn generate(&self, snapshot: &Snapshot, files: &[String]) -> Result<(), ToolError>;
}

/// Generator script shipped inside the snapshot.
#[derive(Debug, Clone)]
pub struct ScriptTestGenerator {
    script: PathBuf,
}

impl ScriptTestGenerator {
    /// `script` is relative to the snapshot root.
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    fn invocation(&self, snapshot: &Snapshot) -> ToolInvocation {
        let program = snapshot.path().join(&self.script);
        ToolInvocation::new(program.to_string_lossy().into_owned()).current_dir(snapshot.path())
    }
}

impl TestGenerator for ScriptTestGenerator {
    fn list(&self, snapshot: &Snapshot) -> Result<Vec<String>, ToolError> {
        let output = self.invocation(snapshot).arg("--list").run_checked()?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn generate(&self, snapshot: &Snapshot, files: &[String]) -> Result<(), ToolError> {
        self.invocation(snapshot).args(files.iter().cloned()).run_checked()?;
        Ok(())
    }
}

/// Existing storage format data files, relative to `root`.
fn existing_data_files(root: &Path) -> Result<BTreeSet<String>, StorageError> {
    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        TEST_DATA_GLOB
    );
    let mut files = BTreeSet::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        let relative = path.strip_prefix(root).unwrap_or(&path);
        files.insert(relative.to_string_lossy().into_owned());
    }
    Ok(files)
}

/// Collect the canonical storage test set of a snapshot.
///
/// Generated data files are regenerated first so the set reflects the
/// snapshot's revision rather than stale files. Files are read in sorted
/// order; when two lines normalize to the same identity, the later one wins.
pub fn collect_storage_tests(
    snapshot: &Snapshot,
    generator: &dyn TestGenerator,
) -> Result<StorageTestSet, StorageError> {
    let root = snapshot.path();
    let mut files = existing_data_files(root)?;

    let to_generate: BTreeSet<String> = generator
        .list(snapshot)
        .map_err(StorageError::Generator)?
        .into_iter()
        .filter(|name| name.contains(STORAGE_FORMAT_MARKER))
        .collect();
    if !to_generate.is_empty() {
        let names: Vec<String> = to_generate.iter().cloned().collect();
        debug!(files = ?names, "Regenerating storage format test data");
        generator
            .generate(snapshot, &names)
            .map_err(StorageError::Generator)?;
    }
    files.extend(to_generate.iter().cloned());

    let mut tests = StorageTestSet::new();
    for file in &files {
        let path = root.join(file);
        let content = std::fs::read_to_string(&path)
            .map_err(|source| StorageError::Read { path, source })?;
        for (identity, provenance) in parse_test_data(file, &content, to_generate.contains(file)) {
            if let Some(previous) = tests.insert(identity.clone(), provenance) {
                debug!(
                    test_case = %identity,
                    previous_file = %previous.file,
                    previous_line = previous.line_number,
                    "Duplicate storage test case, keeping the later one"
                );
            }
        }
    }
    info!(
        revision = %snapshot.label(),
        files = files.len(),
        test_cases = tests.len(),
        "Collected storage format tests"
    );
    Ok(tests)
}

/// Outcome of comparing two storage test sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageDiff {
    /// Identities present in the old set but not the new one, sorted.
    pub missing: Vec<(String, Provenance)>,
    pub old_total: usize,
    pub new_total: usize,
}

impl StorageDiff {
    /// Compatible iff no old identity disappeared.
    pub fn is_compatible(&self) -> bool {
        self.missing.is_empty()
    }

    /// One finding per missing case, then the verdict and size summary.
    pub fn findings(&self) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self
            .missing
            .iter()
            .map(|(identity, provenance)| {
                Finding::fail(format!(
                    "Test case from {} line {} \"{}\" has disappeared: {}",
                    provenance.file,
                    provenance.line_number,
                    provenance.description.as_deref().unwrap_or_default(),
                    identity
                ))
            })
            .collect();
        findings.push(if self.is_compatible() {
            Finding::pass(format!(
                "PASS: All {} storage format test cases are preserved.",
                self.old_total
            ))
        } else {
            Finding::fail(format!(
                "FAIL: {}/{} storage format test cases have changed or disappeared.",
                self.missing.len(),
                self.old_total
            ))
        });
        findings.push(Finding::info(format!(
            "Info: number of storage format tests cases: {} -> {}.",
            self.old_total, self.new_total
        )));
        findings
    }
}

/// `old − new` by identity. Descriptions and line numbers are ignored.
pub fn diff_storage(old: &StorageTestSet, new: &StorageTestSet) -> StorageDiff {
    let missing = old
        .iter()
        .filter(|(identity, _)| !new.contains_key(*identity))
        .map(|(identity, provenance)| (identity.clone(), provenance.clone()))
        .collect();
    StorageDiff {
        missing,
        old_total: old.len(),
        new_total: new.len(),
    }
}
