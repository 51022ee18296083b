//! The production collaborators, wired from [`ToolPaths`].

use tracing::debug;

use crate::build::MakeBuilder;
use crate::compare::AbiComplianceChecker;
use crate::config::{RunConfig, ToolPaths};
use crate::dump::AbiDumper;
use crate::engine::Collaborators;
use crate::error::ConfigError;
use crate::snapshot::{ensure_git_repository, GitSnapshotProvider};
use crate::storage::ScriptTestGenerator;
use crate::tooling::ensure_installed;

/// External programs backing a real run.
#[derive(Debug, Clone)]
pub struct SystemToolchain {
    paths: ToolPaths,
    snapshots: GitSnapshotProvider,
    builder: MakeBuilder,
    dumper: AbiDumper,
    generator: ScriptTestGenerator,
    comparator: AbiComplianceChecker,
}

impl SystemToolchain {
    pub fn new(paths: ToolPaths, config: &RunConfig) -> Self {
        Self {
            snapshots: GitSnapshotProvider::new(
                paths.git.as_str(),
                config.repo_path(),
                config.sub_component_dir(),
            ),
            builder: MakeBuilder::new(paths.make.as_str(), config.sub_component_dir()),
            dumper: AbiDumper::new(paths.abi_dumper.as_str()),
            generator: ScriptTestGenerator::new(paths.test_generator.as_path()),
            comparator: AbiComplianceChecker::new(paths.abi_compliance_checker.as_str()),
            paths,
        }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    /// Verify the repository and the tools the enabled axes need.
    pub fn preflight(&self, config: &RunConfig) -> Result<(), ConfigError> {
        ensure_installed([self.paths.git.as_str()])?;
        ensure_git_repository(&self.paths.git, config.repo_path())?;
        if config.check_interface() {
            ensure_installed([
                self.paths.make.as_str(),
                self.paths.abi_dumper.as_str(),
                self.paths.abi_compliance_checker.as_str(),
            ])?;
        }
        debug!(paths = ?self.paths, "Preflight passed");
        Ok(())
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
