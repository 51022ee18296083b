//! abicompat core library
//!
//! Checks that a newer revision of a C library stays backward compatible
//! with an older one: binary and source interface of every shared library
//! both revisions build, and the storage format test cases that pin the
//! persisted-data format.

pub mod brief;
pub mod build;
pub mod compare;
pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod report;
pub mod revision;
pub mod snapshot;
pub mod storage;
pub mod telemetry;
pub mod tooling;
pub mod toolchain;

pub use build::{discover_shared_libraries, ArtifactBuilder, ArtifactMap, MakeBuilder};
pub use compare::{AbiComplianceChecker, ComparatorOutcome, ComparisonRequest, InterfaceComparator};
pub use config::{MissingArtifactPolicy, ReportMode, RunConfig, RunConfigBuilder, ToolPaths};
pub use dump::{AbiDumper, DumpSet, InterfaceDumper};
pub use engine::{analyze_revision, Collaborators, CompatibilityEngine, RevisionAnalysis};
pub use error::{
    BuildError, CheckError, ComparatorError, ConfigError, DumpError, Result, SnapshotError,
    StorageError, ToolError,
};
pub use report::{
    render_text, write_summary_json, CompatibilityReport, Finding, ReportDir, Severity,
    EXIT_COMPATIBLE, EXIT_INCOMPATIBLE, EXIT_TOOLING_ERROR,
};
pub use revision::{RevisionDescriptor, SubComponentPin, VersionTag};
pub use snapshot::{GitSnapshotProvider, Snapshot, SnapshotLease, SnapshotProvider};
pub use storage::{
    collect_storage_tests, diff_storage, Provenance, ScriptTestGenerator, StorageDiff,
    StorageTestSet, TestGenerator,
};
pub use toolchain::SystemToolchain;

/// Crate version, as reported by `abicompat --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
