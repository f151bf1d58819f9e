//! Report data model.
//!
//! Everything here is produced by the run summary from the marker stream and
//! is serializable, so a report can be emitted as JSON and read back.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Result of a single assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail(String),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

/// One assertion, tied to the source location that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRecord {
    pub file: String,
    pub line: u32,
    pub outcome: Outcome,
}

// ============================================================================
// CASES
// ============================================================================

/// The fatal condition that ended a case early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// The isolation context was killed by a signal (SIGSEGV, SIGFPE, SIGABRT...).
    Signal { signo: i32, name: String },
    /// A Rust panic escaped setup, body or teardown.
    Panic { message: String },
    /// The isolation context exited with an unexpected status code.
    Exit { code: i32 },
    /// The case ran past its deadline and was killed.
    Timeout { ms: u64 },
    /// The record stream ended while the case was still open.
    Truncated,
    /// The isolation context could not be started.
    Launch { message: String },
}

impl FaultKind {
    /// Encodes the fault for a `$$CASE_END` marker.
    pub fn to_wire(&self) -> String {
        match self {
            FaultKind::Signal { signo, name } => format!("signal:{}:{}", signo, name),
            FaultKind::Panic { message } => format!("panic:{}", message),
            FaultKind::Exit { code } => format!("exit:{}", code),
            FaultKind::Timeout { ms } => format!("timeout:{}", ms),
            FaultKind::Truncated => "truncated".to_string(),
            FaultKind::Launch { message } => format!("launch:{}", message),
        }
    }

    /// Decodes the text written by [`FaultKind::to_wire`].
    pub fn from_wire(text: &str) -> Option<FaultKind> {
        let (kind, rest) = match text.split_once(':') {
            Some((kind, rest)) => (kind, rest),
            None => (text, ""),
        };
        match kind {
            "signal" => {
                let (signo, name) = rest.split_once(':').unwrap_or((rest, ""));
                let signo = signo.parse().ok()?;
                let name = if name.is_empty() {
                    signal_name(signo)
                } else {
                    name.to_string()
                };
                Some(FaultKind::Signal { signo, name })
            }
            "panic" => Some(FaultKind::Panic {
                message: rest.to_string(),
            }),
            "exit" => rest.parse().ok().map(|code| FaultKind::Exit { code }),
            "timeout" => rest.parse().ok().map(|ms| FaultKind::Timeout { ms }),
            "truncated" => Some(FaultKind::Truncated),
            "launch" => Some(FaultKind::Launch {
                message: rest.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Signal { signo, name } => write!(f, "{} (signal {})", name, signo),
            FaultKind::Panic { message } => write!(f, "panicked: {}", message),
            FaultKind::Exit { code } => write!(f, "exited with code 0x{:x}", code),
            FaultKind::Timeout { ms } => write!(f, "timed out after {} ms", ms),
            FaultKind::Truncated => write!(f, "output ended inside the case"),
            FaultKind::Launch { message } => write!(f, "failed to launch: {}", message),
        }
    }
}

/// Human name for a signal number.
pub fn signal_name(signo: i32) -> String {
    #[cfg(unix)]
    {
        let name = match signo {
            libc::SIGSEGV => Some("SIGSEGV"),
            libc::SIGBUS => Some("SIGBUS"),
            libc::SIGFPE => Some("SIGFPE"),
            libc::SIGILL => Some("SIGILL"),
            libc::SIGABRT => Some("SIGABRT"),
            libc::SIGTRAP => Some("SIGTRAP"),
            libc::SIGSYS => Some("SIGSYS"),
            libc::SIGKILL => Some("SIGKILL"),
            libc::SIGTERM => Some("SIGTERM"),
            libc::SIGINT => Some("SIGINT"),
            libc::SIGPIPE => Some("SIGPIPE"),
            _ => None,
        };
        if let Some(name) = name {
            return name.to_string();
        }
    }
    format!("SIG{}", signo)
}

/// How a case left the `Running` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "fault", rename_all = "snake_case")]
pub enum Termination {
    Completed,
    Faulted(FaultKind),
}

/// Everything observed for one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub name: String,
    pub records: Vec<AssertionRecord>,
    pub terminated_by: Termination,
}

impl CaseOutcome {
    pub fn failed_assertions(&self) -> usize {
        self.records.iter().filter(|r| !r.outcome.is_pass()).count()
    }

    pub fn fault(&self) -> Option<&FaultKind> {
        match &self.terminated_by {
            Termination::Faulted(kind) => Some(kind),
            Termination::Completed => None,
        }
    }

    /// A case passes only if it completed and none of its assertions failed.
    /// A case without assertions passes vacuously.
    pub fn passed(&self) -> bool {
        self.fault().is_none() && self.failed_assertions() == 0
    }
}

// ============================================================================
// RUNS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub run: usize,
    pub passed: usize,
    pub failed: usize,
    pub faulted: usize,
    pub skipped: usize,
    pub assertions: usize,
    pub failed_assertions: usize,
}

impl Totals {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn add(&mut self, other: &Totals) {
        self.run += other.run;
        self.passed += other.passed;
        self.failed += other.failed;
        self.faulted += other.faulted;
        self.skipped += other.skipped;
        self.assertions += other.assertions;
        self.failed_assertions += other.failed_assertions;
    }
}

/// Final report for one suite run. `totals` is always derived from
/// `outcomes` and `skipped`, never maintained by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub suite: String,
    pub outcomes: Vec<CaseOutcome>,
    pub skipped: Vec<String>,
    pub totals: Totals,
}

impl RunReport {
    pub fn new(suite: impl Into<String>, outcomes: Vec<CaseOutcome>, skipped: Vec<String>) -> Self {
        let mut totals = Totals {
            run: outcomes.len(),
            skipped: skipped.len(),
            ..Totals::default()
        };
        for outcome in &outcomes {
            totals.assertions += outcome.records.len();
            totals.failed_assertions += outcome.failed_assertions();
            if outcome.fault().is_some() {
                totals.faulted += 1;
            }
            if outcome.passed() {
                totals.passed += 1;
            } else {
                totals.failed += 1;
            }
        }
        Self {
            suite: suite.into(),
            outcomes,
            skipped,
            totals,
        }
    }

    pub fn success(&self) -> bool {
        !self.totals.has_failures()
    }

    /// Process exit code for a run: zero iff nothing failed or faulted.
    pub fn exit_code(reports: &[RunReport]) -> i32 {
        if reports.iter().all(RunReport::success) {
            0
        } else {
            1
        }
    }

    pub fn grand_totals(reports: &[RunReport]) -> Totals {
        let mut totals = Totals::default();
        for report in reports {
            totals.add(&report.totals);
        }
        totals
    }
}
