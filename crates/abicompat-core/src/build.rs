//! Building shared libraries from a snapshot and discovering them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::BuildError;
use crate::snapshot::Snapshot;
use crate::tooling::ToolInvocation;

/// Library name (file name without extension) to its path in the snapshot.
pub type ArtifactMap = BTreeMap<String, PathBuf>;

/// Compiler flags for interface dumps: debug info, no optimization.
pub const DUMP_CFLAGS: &str = "-g -Og";

/// Extension of the artifacts that get compared.
pub const SHARED_LIBRARY_EXTENSION: &str = "so";

/// Turns a snapshot into shared-library artifacts.
pub trait ArtifactBuilder {
    fn build(&self, snapshot: &Snapshot) -> Result<ArtifactMap, BuildError>;
}

/// Builds with `make lib` under the fixed instrumented configuration.
#[derive(Debug, Clone)]
pub struct MakeBuilder {
    make: String,
    target: String,
    sub_component_dir: PathBuf,
}

impl MakeBuilder {
    pub fn new(make: impl Into<String>, sub_component_dir: impl Into<PathBuf>) -> Self {
        Self {
            make: make.into(),
            target: "lib".to_string(),
            sub_component_dir: sub_component_dir.into(),
        }
    }

    /// The build command for `snapshot`, with its environment.
    pub fn invocation(&self, snapshot: &Snapshot) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(self.make.as_str())
            .arg(self.target.as_str())
            .current_dir(snapshot.path())
            .env("CFLAGS", DUMP_CFLAGS)
            .env("SHARED", "1");
        if snapshot.has_sub_component(&self.sub_component_dir) {
            invocation = invocation.env("USE_CRYPTO_SUBMODULE", "1");
        }
        invocation
    }
}

impl ArtifactBuilder for MakeBuilder {
    fn build(&self, snapshot: &Snapshot) -> Result<ArtifactMap, BuildError> {
        info!(revision = %snapshot.label(), "Building shared libraries");
        self.invocation(snapshot)
            .run_checked()
            .map_err(|source| BuildError::Failed {
                dir: snapshot.path().to_path_buf(),
                source,
            })?;
        discover_shared_libraries(snapshot.path())
    }
}

/// Walk `root` for shared libraries, keyed by base name without extension.
///
/// Entries are visited in file-name order. When two files share a name, the
/// one visited last is kept and the collision is logged.
pub fn discover_shared_libraries(root: &Path) -> Result<ArtifactMap, BuildError> {
    let mut artifacts = ArtifactMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SHARED_LIBRARY_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if let Some(previous) = artifacts.insert(name.clone(), path.to_path_buf()) {
            warn!(
                artifact = %name,
                discarded = %previous.display(),
                kept = %path.display(),
                "Duplicate shared library name, keeping the later one"
            );
        }
    }
    debug!(count = artifacts.len(), "Discovered shared libraries");
    Ok(artifacts)
}
