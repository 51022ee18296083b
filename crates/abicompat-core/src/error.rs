//! Error taxonomy for abicompat.
//!
//! Every variant of [`CheckError`] is a tooling or usage failure and maps to
//! exit status 2. An incompatibility is never an error: it is a normal
//! [`crate::CompatibilityReport`] whose verdict is `false`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors detected while validating the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("checking API without ABI or vice versa is not supported")]
    InterfaceAxesDisagree,

    #[error("{0} is not a directory")]
    ReportDirNotDirectory(PathBuf),

    #[error("revision label must not be empty ({0} side)")]
    EmptyRevision(&'static str),

    #[error("{tool} not installed, aborting")]
    ToolNotInstalled { tool: String },

    #[error("{0} is not inside a git work tree")]
    NotAGitRepository(PathBuf),
}

/// Errors produced while running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {output}")]
    Exit {
        program: String,
        code: i32,
        output: String,
    },
}

/// Errors from materializing or releasing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("git command failed for revision {revision}: {source}")]
    Git {
        revision: String,
        #[source]
        source: ToolError,
    },

    #[error("git rev-parse returned empty output for revision {0}")]
    EmptyCommit(String),

    #[error("failed to remove snapshot {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from building the shared libraries of a snapshot.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build failed in {dir}: {source}")]
    Failed {
        dir: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("failed to walk build tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Errors from producing an interface dump.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("interface dump of {artifact} failed: {source}")]
    Tool {
        artifact: String,
        #[source]
        source: ToolError,
    },

    #[error("dumper reported success but produced no file at {0}")]
    Missing(PathBuf),
}

/// Errors from collecting storage format test cases.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid test data glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to enumerate test data files: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("test generator failed: {0}")]
    Generator(#[source] ToolError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the external interface comparator.
#[derive(Debug, Error)]
pub enum ComparatorError {
    #[error("comparator failed for {artifact}: {source}")]
    Tool {
        artifact: String,
        #[source]
        source: ToolError,
    },

    #[error("comparator report for {artifact} is not valid XML: {message}")]
    MalformedReport { artifact: String, message: String },

    #[error("no interface dump recorded for {0}")]
    MissingDump(String),
}

/// Top-level error for a compatibility run.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("dump error: {0}")]
    Dump(#[from] DumpError),

    #[error("storage test error: {0}")]
    Storage(#[from] StorageError),

    #[error("comparator error: {0}")]
    Comparator(#[from] ComparatorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        crate::EXIT_TOOLING_ERROR
    }
}

/// Result type for abicompat operations.
pub type Result<T> = std::result::Result<T, CheckError>;
