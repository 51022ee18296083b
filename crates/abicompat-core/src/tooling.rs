//! Blocking execution of external tools.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use tracing::debug;

use crate::error::{ConfigError, ToolError};

/// Result of running an external tool to completion.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Program that was run.
    pub program: String,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Whether the tool exited with status 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Convert a non-zero exit into [`ToolError::Exit`].
    pub fn check(self) -> Result<ToolOutput, ToolError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(ToolError::Exit {
                output: self.combined().trim_end().to_string(),
                program: self.program,
                code: self.exit_code,
            })
        }
    }
}

/// A single invocation of an external tool.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run to completion and capture output, whatever the exit status.
    pub fn run(&self) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        debug!(program = %self.program, args = ?self.args, cwd = ?self.cwd, "Running tool");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let output = command.output().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let result = ToolOutput {
            program: self.program.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            program = %self.program,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Tool finished"
        );
        if !result.stdout.trim().is_empty() || !result.stderr.trim().is_empty() {
            debug!("{}", result.combined().trim_end());
        }
        Ok(result)
    }

    /// Run and require exit status 0.
    pub fn run_checked(&self) -> Result<ToolOutput, ToolError> {
        self.run()?.check()
    }
}

/// Fail unless every program can be found on `PATH` (or is an existing path).
pub fn ensure_installed<'a, I>(programs: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    for program in programs {
        if which::which(program).is_err() {
            return Err(ConfigError::ToolNotInstalled {
                tool: program.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_output_passed() {
        let output = ToolOutput {
            program: "make".to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 10,
        };
        assert!(output.passed());
        assert!(output.check().is_ok());
    }

    #[test]
    fn test_tool_output_failed_carries_output() {
        let output = ToolOutput {
            program: "make".to_string(),
            exit_code: 2,
            stdout: "cc -c foo.c".to_string(),
            stderr: "foo.c: error".to_string(),
            duration_ms: 10,
        };
        assert!(!output.passed());
        let err = output.check().unwrap_err();
        match err {
            ToolError::Exit { code, output, .. } => {
                assert_eq!(code, 2);
                assert_eq!(output, "cc -c foo.c\nfoo.c: error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_simple_command() {
        let output = ToolInvocation::new("echo")
            .arg("hello")
            .run()
            .expect("echo runs");
        assert!(output.passed());
        assert!(output.stdout.contains("hello"));
    }

    #[test]
    fn test_run_checked_failing_command() {
        let err = ToolInvocation::new("false").run_checked().unwrap_err();
        assert!(matches!(err, ToolError::Exit { .. }));
    }

    #[test]
    fn test_run_passes_environment() {
        let output = ToolInvocation::new("sh")
            .args(["-c", "echo $ABICOMPAT_ENV_CHECK"])
            .env("ABICOMPAT_ENV_CHECK", "env-value")
            .run_checked()
            .expect("sh runs");
        assert_eq!(output.stdout.trim(), "env-value");
    }

    #[test]
    fn test_spawn_missing_program() {
        let err = ToolInvocation::new("abicompat-no-such-tool")
            .run()
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_ensure_installed() {
        assert!(ensure_installed(["sh"]).is_ok());
        let err = ensure_installed(["sh", "abicompat-no-such-tool"]).unwrap_err();
        assert!(err.to_string().contains("abicompat-no-such-tool"));
    }
}
