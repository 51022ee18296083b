//! Interface dumps of built artifacts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::build::ArtifactMap;
use crate::error::DumpError;
use crate::revision::RevisionDescriptor;
use crate::tooling::ToolInvocation;

/// Produces a structural fingerprint of one artifact.
pub trait InterfaceDumper {
    /// Dump `library` (artifact `artifact` of `revision`) to `output`.
    fn dump(
        &self,
        artifact: &str,
        library: &Path,
        revision: &RevisionDescriptor,
        output: &Path,
    ) -> Result<(), DumpError>;
}

/// Runs `abi-dumper`.
#[derive(Debug, Clone)]
pub struct AbiDumper {
    program: String,
}

impl AbiDumper {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl InterfaceDumper for AbiDumper {
    fn dump(
        &self,
        artifact: &str,
        library: &Path,
        revision: &RevisionDescriptor,
        output: &Path,
    ) -> Result<(), DumpError> {
        ToolInvocation::new(self.program.as_str())
            .path_arg(library)
            .arg("-o")
            .path_arg(output)
            .arg("-lver")
            .arg(revision.pretty())
            .run_checked()
            .map_err(|source| DumpError::Tool {
                artifact: artifact.to_string(),
                source,
            })?;
        Ok(())
    }
}

/// Where the dump of `artifact` for `revision` lives.
///
/// The name is built from artifact, revision label and version tag, so the
/// old and new dumps never collide even when both labels are equal.
pub fn dump_path(report_dir: &Path, artifact: &str, revision: &RevisionDescriptor) -> PathBuf {
    report_dir.join(format!(
        "{}-{}-{}.dump",
        artifact,
        revision.file_label(),
        revision.tag()
    ))
}

/// Dump files of one revision. Every file is deleted when the set is dropped.
#[derive(Debug, Default)]
pub struct DumpSet {
    dumps: BTreeMap<String, PathBuf>,
}

impl DumpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dump every artifact of `revision` into `report_dir`.
    ///
    /// If one dump fails, the ones already written are deleted.
    pub fn create(
        dumper: &dyn InterfaceDumper,
        artifacts: &ArtifactMap,
        revision: &RevisionDescriptor,
        report_dir: &Path,
    ) -> Result<Self, DumpError> {
        let mut set = Self::new();
        for (artifact, library) in artifacts {
            let output = dump_path(report_dir, artifact, revision);
            debug!(artifact = %artifact, output = %output.display(), "Dumping interface");
            // Registered first so a half-written file is still removed.
            set.dumps.insert(artifact.clone(), output.clone());
            dumper.dump(artifact, library, revision, &output)?;
            if !output.exists() {
                return Err(DumpError::Missing(output));
            }
        }
        Ok(set)
    }

    pub fn get(&self, artifact: &str) -> Option<&Path> {
        self.dumps.get(artifact).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.dumps.values().map(PathBuf::as_path)
    }
}

impl Drop for DumpSet {
    fn drop(&mut self) {
        for path in self.dumps.values() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete dump"),
            }
        }
    }
}
