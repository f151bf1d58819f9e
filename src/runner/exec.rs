//! Launching isolation contexts.
//!
//! A [`CaseLauncher`] knows how to build the command that runs one case of a
//! suite in a fresh process. The supervisor does not care whether that process
//! is this very binary re-executed in child mode, another harness-built test
//! binary, or a legacy runner speaking the colon protocol.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HarnessError;
use crate::model::{signal_name, FaultKind, Termination};
use crate::protocol::WireFormat;

/// Exit status of a child whose case reported at least one failed assertion.
pub const FAILED_EXIT_CODE: i32 = 1;
/// Exit status of a child whose case panicked; also Rust's own panic status.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Builds one command per case.
pub trait CaseLauncher {
    /// Short description for logs and reports.
    fn describe(&self) -> String;

    /// Command that runs case `index` and writes its markers to stdout.
    fn command(&self, index: usize) -> Command;

    /// Native children close every case they run with `$$CASE_END`.
    fn protocol(&self) -> LaunchProtocol {
        LaunchProtocol::Native
    }
}

/// How a test executable expects to be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchProtocol {
    /// `--list`, `--case <i>`, `$$CASE_END` markers.
    #[default]
    Native,
    /// No arguments prints the case count; a bare index runs one case.
    Legacy,
}

/// A test executable on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalBinary {
    path: PathBuf,
    protocol: LaunchProtocol,
    wire: Option<WireFormat>,
}

impl ExternalBinary {
    pub fn new(path: impl Into<PathBuf>, protocol: LaunchProtocol) -> Self {
        Self {
            path: path.into(),
            protocol,
            wire: None,
        }
    }

    /// The running executable, re-executed in child mode.
    pub fn current(wire: WireFormat) -> Result<Self, HarnessError> {
        let path = env::current_exe()?;
        Ok(Self::new(path, LaunchProtocol::Native).with_wire(wire))
    }

    /// Asks a native child to write markers in `wire`.
    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = Some(wire);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name of the suite: the file stem, without any `test_` prefix.
    pub fn suite_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        match stem.strip_prefix("test_") {
            Some(rest) if !rest.is_empty() => rest.to_string(),
            _ => stem,
        }
    }

    /// Asks the executable which cases it declares.
    ///
    /// Legacy runners only report a count, so their cases get `#<index>`
    /// placeholder names until their own `$$CASE` markers rename them.
    pub fn cases(&self) -> Result<Vec<(usize, String)>, HarnessError> {
        let mut command = Command::new(&self.path);
        if self.protocol == LaunchProtocol::Native {
            command.arg("--list");
        }
        debug!(binary = %self.path.display(), "querying cases");
        let output = command
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| HarnessError::Launch {
                path: self.path.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let malformed = || HarnessError::MalformedCount {
            path: self.path.clone(),
            output: stdout.trim().to_string(),
        };
        if !output.status.success() {
            return Err(malformed());
        }
        match self.protocol {
            LaunchProtocol::Native => parse_listing(&stdout).ok_or_else(malformed),
            LaunchProtocol::Legacy => {
                let count: usize = stdout.trim().parse().map_err(|_| malformed())?;
                Ok((0..count).map(|index| (index, format!("#{}", index))).collect())
            }
        }
    }
}

impl CaseLauncher for ExternalBinary {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn command(&self, index: usize) -> Command {
        let mut command = Command::new(&self.path);
        match self.protocol {
            LaunchProtocol::Native => {
                command.arg("--case").arg(index.to_string());
                if let Some(wire) = self.wire {
                    command.arg("--wire").arg(wire.to_string());
                }
            }
            LaunchProtocol::Legacy => {
                command.arg(index.to_string());
            }
        }
        command
    }

    fn protocol(&self) -> LaunchProtocol {
        self.protocol
    }
}

/// Parses `--list` output: one `<index> <name>` per line.
pub fn parse_listing(text: &str) -> Option<Vec<(usize, String)>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (index, name) = line.trim().split_once(' ')?;
            Some((index.parse().ok()?, name.trim().to_string()))
        })
        .collect()
}

/// Maps how a child process ended to how its case ended.
pub fn termination_from_status(status: ExitStatus) -> Termination {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return Termination::Faulted(FaultKind::Signal {
                signo,
                name: signal_name(signo),
            });
        }
    }
    match status.code() {
        Some(0) | Some(FAILED_EXIT_CODE) => Termination::Completed,
        Some(PANIC_EXIT_CODE) => Termination::Faulted(FaultKind::Panic {
            message: format!("process exited with status {}", PANIC_EXIT_CODE),
        }),
        Some(code) => Termination::Faulted(FaultKind::Exit { code }),
        None => Termination::Faulted(FaultKind::Truncated),
    }
}

/// How a case ended when its process exited without writing `$$CASE_END`.
///
/// Only a legacy runner may end a case by exiting 0; a native child that
/// stops short of its closing marker left the case unfinished.
pub fn unterminated_case(status: ExitStatus, protocol: LaunchProtocol) -> Termination {
    match (status.code(), protocol) {
        (Some(0), LaunchProtocol::Legacy) => Termination::Completed,
        (Some(0), LaunchProtocol::Native) => Termination::Faulted(FaultKind::Truncated),
        (Some(FAILED_EXIT_CODE), _) => Termination::Faulted(FaultKind::Exit {
            code: FAILED_EXIT_CODE,
        }),
        _ => termination_from_status(status),
    }
}
