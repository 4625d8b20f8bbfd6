//! Narrow capability interface over external CLI tools.
//!
//! Every subprocess this crate runs (ogr2ogr, ogrinfo, gdalwarp, gdaldem,
//! gdal_contour, nik4) goes through [`ToolRunner`], so components can be
//! tested with deterministic doubles that simulate tool success, failure and
//! absence without invoking real binaries.

use std::io;
use std::process::Command;

use crate::error::{Error, Result};

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait ToolRunner {
    /// Runs `program` with `args`, blocking until it exits.
    ///
    /// A missing binary maps to [`Error::ToolMissing`]; a non-zero exit is
    /// not an error at this level, callers inspect [`ToolOutput::success`].
    fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput>;

    /// True if `program` can be invoked at all.
    fn available(&self, program: &str) -> bool {
        self.run(program, &["--version"]).is_ok()
    }
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRunner;

impl ToolRunner for CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        let output = Command::new(program).args(args).output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ToolMissing(program.to_string())
            } else {
                Error::Io(e)
            }
        })?;

        Ok(ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use super::*;

    /// Scripted double: records invocations and answers from a fixed script.
    pub struct FakeRunner {
        pub missing: HashSet<String>,
        pub failing: HashSet<String>,
        pub stdout_for: Vec<(String, String)>,
        pub calls: RefCell<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self {
                missing: HashSet::new(),
                failing: HashSet::new(),
                stdout_for: Vec::new(),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub fn missing_tool(mut self, program: &str) -> Self {
            self.missing.insert(program.to_string());
            self
        }

        pub fn failing_tool(mut self, program: &str) -> Self {
            self.failing.insert(program.to_string());
            self
        }

        /// Canned stdout for any invocation of `program`.
        pub fn with_stdout(mut self, program: &str, stdout: &str) -> Self {
            self.stdout_for.push((program.to_string(), stdout.to_string()));
            self
        }

        pub fn invocations_of(&self, program: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| call[0] == program)
                .count()
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|a| a.to_string()));
            self.calls.borrow_mut().push(call);

            if self.missing.contains(program) {
                return Err(Error::ToolMissing(program.to_string()));
            }
            if self.failing.contains(program) {
                return Ok(ToolOutput {
                    status: 1,
                    stdout: String::new(),
                    stderr: format!("{program}: simulated failure"),
                });
            }
            let stdout = self
                .stdout_for
                .iter()
                .find(|(p, _)| p == program)
                .map(|(_, s)| s.clone())
                .unwrap_or_default();
            Ok(ToolOutput {
                status: 0,
                stdout,
                stderr: String::new(),
            })
        }
    }
}
