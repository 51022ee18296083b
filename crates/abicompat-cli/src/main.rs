//! abicompat - backward compatibility checker
//!
//! Compares two git revisions of a C library and exits with
//!
//! - `0` when every checked axis is compatible
//! - `1` when at least one axis is incompatible
//! - `2` on tooling or usage errors
//!
//! Diagnostics go to stderr; the report narrative goes to stdout.

use std::path::PathBuf;

use abicompat_core::telemetry::{build_dispatch, init_global};
use abicompat_core::{
    render_text, write_summary_json, CompatibilityEngine, MissingArtifactPolicy,
    RevisionDescriptor, RunConfig, SystemToolchain, ToolPaths, VersionTag, EXIT_TOOLING_ERROR,
};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "abicompat")]
#[command(version = abicompat_core::VERSION)]
#[command(
    about = "Check ABI, API and storage format backward compatibility between two revisions",
    long_about = None
)]
struct Cli {
    /// Older revision (branch, tag or commit) to compare against
    #[arg(short = 'o', long)]
    old_rev: String,

    /// Newer revision to check
    #[arg(short = 'n', long)]
    new_rev: String,

    /// Repository to fetch the old revision from
    #[arg(long)]
    old_repo: Option<String>,

    /// Repository to fetch the new revision from
    #[arg(long)]
    new_repo: Option<String>,

    /// Revision of the nested crypto sub-component for the old side
    #[arg(long)]
    old_crypto_rev: Option<String>,

    /// Repository to fetch the old crypto revision from
    #[arg(long)]
    old_crypto_repo: Option<String>,

    /// Revision of the nested crypto sub-component for the new side
    #[arg(long)]
    new_crypto_rev: Option<String>,

    /// Repository to fetch the new crypto revision from
    #[arg(long)]
    new_crypto_repo: Option<String>,

    /// Directory for dumps and reports
    #[arg(short, long, default_value = abicompat_core::config::DEFAULT_REPORT_DIR)]
    report_dir: PathBuf,

    /// Keep reports of compatible libraries too
    #[arg(short, long)]
    keep_all_reports: bool,

    /// Check the binary interface (default)
    #[arg(long, overrides_with = "no_check_abi")]
    check_abi: bool,

    /// Skip the binary interface check
    #[arg(long, overrides_with = "check_abi")]
    no_check_abi: bool,

    /// Check the source interface (default)
    #[arg(long, overrides_with = "no_check_api")]
    check_api: bool,

    /// Skip the source interface check
    #[arg(long, overrides_with = "check_api")]
    no_check_api: bool,

    /// Check storage format test cases (default)
    #[arg(long, overrides_with = "no_check_storage")]
    check_storage: bool,

    /// Skip the storage format check
    #[arg(long, overrides_with = "check_storage")]
    no_check_storage: bool,

    /// File listing symbols and types to ignore
    #[arg(short, long)]
    skip_file: Option<PathBuf>,

    /// Print a pruned XML report instead of writing report files
    #[arg(short, long)]
    brief: bool,

    /// Fail when a library built by the old revision is not built by the new one
    #[arg(long)]
    fail_on_missing_library: bool,

    /// Also write the report as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Local git repository holding the revisions
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// git executable
    #[arg(long, env = "ABICOMPAT_GIT", default_value = "git", hide = true)]
    git: String,

    /// make executable
    #[arg(long, env = "ABICOMPAT_MAKE", default_value = "make", hide = true)]
    make: String,

    /// abi-dumper executable
    #[arg(long, env = "ABICOMPAT_ABI_DUMPER", default_value = "abi-dumper", hide = true)]
    abi_dumper: String,

    /// abi-compliance-checker executable
    #[arg(
        long,
        env = "ABICOMPAT_ABI_COMPLIANCE_CHECKER",
        default_value = "abi-compliance-checker",
        hide = true
    )]
    abi_compliance_checker: String,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let missing = if self.fail_on_missing_library {
            MissingArtifactPolicy::Fail
        } else {
            MissingArtifactPolicy::Ignore
        };
        let config = RunConfig::builder()
            .repo_path(&self.repo)
            .report_dir(&self.report_dir)
            .keep_all_reports(self.keep_all_reports)
            .brief(self.brief)
            .check_abi(!self.no_check_abi)
            .check_api(!self.no_check_api)
            .check_storage(!self.no_check_storage)
            .skip_file(self.skip_file.clone())
            .missing_artifacts(missing)
            .build()?;
        Ok(config)
    }

    fn revisions(&self) -> Result<(RevisionDescriptor, RevisionDescriptor)> {
        let old = RevisionDescriptor::new(VersionTag::Old, self.old_rev.as_str())?
            .with_repository(self.old_repo.clone())
            .with_sub_component(self.old_crypto_rev.clone(), self.old_crypto_repo.clone());
        let new = RevisionDescriptor::new(VersionTag::New, self.new_rev.as_str())?
            .with_repository(self.new_repo.clone())
            .with_sub_component(self.new_crypto_rev.clone(), self.new_crypto_repo.clone());
        Ok((old, new))
    }

    fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            git: self.git.clone(),
            make: self.make.clone(),
            abi_dumper: self.abi_dumper.clone(),
            abi_compliance_checker: self.abi_compliance_checker.clone(),
            ..ToolPaths::default()
        }
    }
}

fn run(cli: &Cli, dispatch: tracing::Dispatch) -> Result<i32> {
    let config = cli.run_config()?;
    let (old, new) = cli.revisions()?;

    let toolchain = SystemToolchain::new(cli.tool_paths(), &config);
    toolchain.preflight(&config)?;

    let mut engine = CompatibilityEngine::new(config, old, new, toolchain.collaborators())
        .with_dispatch(dispatch);
    let report = engine.run()?;

    print!("{}", render_text(&report));
    if let Some(path) = &cli.summary_json {
        write_summary_json(path, &report)
            .with_context(|| format!("write summary to {}", path.display()))?;
        info!(path = %path.display(), "Summary written");
    }
    Ok(report.exit_code())
}

/// Multi-line cause chain, plus a backtrace when `RUST_BACKTRACE` is set.
fn failure_report(e: &anyhow::Error) -> String {
    format!("{:?}", e)
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let dispatch = build_dispatch(cli.json, level);
    init_global(dispatch.clone());

    let code = match run(&cli, dispatch) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", failure_report(&e));
            EXIT_TOOLING_ERROR
        }
    };
    std::process::exit(code);
}
