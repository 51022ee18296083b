//! Run configuration, validated at construction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default directory for dumps and reports.
pub const DEFAULT_REPORT_DIR: &str = "reports";

/// Name of the nested sub-component directory inside a snapshot.
pub const DEFAULT_SUB_COMPONENT_DIR: &str = "crypto";

/// How findings are rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// One report file per incompatible library, kept in the report directory.
    Full,
    /// Pruned XML printed with the findings; no report files.
    Brief,
}

/// What to do with a library built by the old revision but not the new one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingArtifactPolicy {
    /// Mention it in the report, do not fail.
    #[default]
    Ignore,
    /// Treat the disappearance as an interface incompatibility.
    Fail,
}

/// Executables used for each external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub git: String,
    pub make: String,
    pub abi_dumper: String,
    pub abi_compliance_checker: String,
    /// Test generator, relative to the snapshot root.
    pub test_generator: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            make: "make".to_string(),
            abi_dumper: "abi-dumper".to_string(),
            abi_compliance_checker: "abi-compliance-checker".to_string(),
            test_generator: PathBuf::from("tests/scripts/generate_psa_tests.py"),
        }
    }
}

/// Immutable configuration of one compatibility run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    repo_path: PathBuf,
    report_dir: PathBuf,
    keep_all_reports: bool,
    mode: ReportMode,
    check_interface: bool,
    check_storage: bool,
    skip_file: Option<PathBuf>,
    missing_artifacts: MissingArtifactPolicy,
    sub_component_dir: PathBuf,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn keep_all_reports(&self) -> bool {
        self.keep_all_reports
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    pub fn is_brief(&self) -> bool {
        self.mode == ReportMode::Brief
    }

    /// API and ABI comparison (always enabled or disabled together).
    pub fn check_interface(&self) -> bool {
        self.check_interface
    }

    pub fn check_storage(&self) -> bool {
        self.check_storage
    }

    pub fn skip_file(&self) -> Option<&Path> {
        self.skip_file.as_deref()
    }

    pub fn missing_artifacts(&self) -> MissingArtifactPolicy {
        self.missing_artifacts
    }

    pub fn sub_component_dir(&self) -> &Path {
        &self.sub_component_dir
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    repo_path: PathBuf,
    report_dir: PathBuf,
    keep_all_reports: bool,
    mode: ReportMode,
    check_abi: bool,
    check_api: bool,
    check_storage: bool,
    skip_file: Option<PathBuf>,
    missing_artifacts: MissingArtifactPolicy,
    sub_component_dir: PathBuf,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
            keep_all_reports: false,
            mode: ReportMode::Full,
            check_abi: true,
            check_api: true,
            check_storage: true,
            skip_file: None,
            missing_artifacts: MissingArtifactPolicy::Ignore,
            sub_component_dir: PathBuf::from(DEFAULT_SUB_COMPONENT_DIR),
        }
    }
}

impl RunConfigBuilder {
    pub fn repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_path = path.into();
        self
    }

    pub fn report_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_dir = path.into();
        self
    }

    pub fn keep_all_reports(mut self, keep: bool) -> Self {
        self.keep_all_reports = keep;
        self
    }

    pub fn brief(mut self, brief: bool) -> Self {
        self.mode = if brief {
            ReportMode::Brief
        } else {
            ReportMode::Full
        };
        self
    }

    pub fn check_abi(mut self, enabled: bool) -> Self {
        self.check_abi = enabled;
        self
    }

    pub fn check_api(mut self, enabled: bool) -> Self {
        self.check_api = enabled;
        self
    }

    pub fn check_storage(mut self, enabled: bool) -> Self {
        self.check_storage = enabled;
        self
    }

    pub fn skip_file(mut self, path: Option<PathBuf>) -> Self {
        self.skip_file = path;
        self
    }

    pub fn missing_artifacts(mut self, policy: MissingArtifactPolicy) -> Self {
        self.missing_artifacts = policy;
        self
    }

    pub fn sub_component_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sub_component_dir = dir.into();
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// Rejects API checking without ABI checking (and vice versa) and a
    /// report directory that names an existing plain file. The report
    /// directory is made absolute so later stages are independent of the
    /// working directory.
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        if self.check_abi != self.check_api {
            return Err(ConfigError::InterfaceAxesDisagree);
        }
        if self.report_dir.is_file() {
            return Err(ConfigError::ReportDirNotDirectory(self.report_dir));
        }
        let report_dir = if self.report_dir.is_absolute() {
            self.report_dir
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.report_dir))
                .unwrap_or(self.report_dir)
        };

        Ok(RunConfig {
            repo_path: self.repo_path,
            report_dir,
            keep_all_reports: self.keep_all_reports,
            mode: self.mode,
            check_interface: self.check_abi,
            check_storage: self.check_storage,
            skip_file: self.skip_file,
            missing_artifacts: self.missing_artifacts,
            sub_component_dir: self.sub_component_dir,
        })
    }
}
