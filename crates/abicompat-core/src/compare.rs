//! The external interface comparator.

use std::path::Path;

use crate::error::{ComparatorError, ToolError};
use crate::tooling::ToolInvocation;

/// Inputs of one library comparison.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonRequest<'a> {
    pub artifact: &'a str,
    pub old_dump: &'a Path,
    pub new_dump: &'a Path,
    /// Where a full report is written.
    pub report_path: &'a Path,
    /// Symbols and types excluded from the comparison.
    pub skip_file: Option<&'a Path>,
    /// Ask for the XML report on stdout instead of a report file.
    pub brief: bool,
}

/// What the comparator concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparatorOutcome {
    /// Exit status 0.
    Compatible,
    /// Exit status 1. `report` is the comparator's stdout (XML in brief mode).
    Incompatible { report: String },
}

/// Compares the interface dumps of two revisions of one library.
pub trait InterfaceComparator {
    /// Any exit status other than 0 or 1 is a [`ComparatorError`].
    fn compare(&self, request: &ComparisonRequest<'_>) -> Result<ComparatorOutcome, ComparatorError>;
}

/// Runs `abi-compliance-checker` in strict mode.
#[derive(Debug, Clone)]
pub struct AbiComplianceChecker {
    program: String,
}

impl AbiComplianceChecker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn invocation(&self, request: &ComparisonRequest<'_>) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(self.program.as_str())
            .args(["-l", request.artifact])
            .arg("-old")
            .path_arg(request.old_dump)
            .arg("-new")
            .path_arg(request.new_dump)
            .arg("-strict")
            .arg("-report-path")
            .path_arg(request.report_path);
        if let Some(skip) = request.skip_file {
            invocation = invocation
                .arg("-skip-symbols")
                .path_arg(skip)
                .arg("-skip-types")
                .path_arg(skip);
        }
        if request.brief {
            invocation = invocation.args(["-report-format", "xml", "-stdout"]);
        }
        invocation
    }
}

impl InterfaceComparator for AbiComplianceChecker {
    fn compare(&self, request: &ComparisonRequest<'_>) -> Result<ComparatorOutcome, ComparatorError> {
        let tool_error = |source: ToolError| ComparatorError::Tool {
            artifact: request.artifact.to_string(),
            source,
        };
        let output = self.invocation(request).run().map_err(tool_error)?;
        match output.exit_code {
            0 => Ok(ComparatorOutcome::Compatible),
            1 => Ok(ComparatorOutcome::Incompatible {
                report: output.stdout,
            }),
            code => Err(tool_error(ToolError::Exit {
                program: self.program.clone(),
                code,
                output: output.combined().trim_end().to_string(),
            })),
        }
    }
}
