//! Isolation runner.
//!
//! Every case runs inside an isolation context so that a fatal fault ends
//! that case only:
//!
//! - [`Isolation::Process`] re-executes the current binary once per case and
//!   supervises it ([`supervisor`]); segfaults, aborts and hangs are all
//!   contained.
//! - [`Isolation::InProcess`] runs the case on the current thread and only
//!   contains panics ([`child`]).
//!
//! Per case: setup, then body, then teardown, then completed. A fault in
//! setup or body skips straight to a faulted outcome; teardown is still
//! attempted when the process survived the fault.

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod child;
pub mod exec;
pub mod supervisor;

pub use child::{execute, ChildExit};
pub use exec::{CaseLauncher, ExternalBinary, LaunchProtocol};
pub use supervisor::Supervisor;

use crate::config::RunConfig;
use crate::error::HarnessError;
use crate::model::RunReport;
use crate::registry::Suite;
use crate::reporter;
use crate::summary::Transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    #[default]
    Process,
    InProcess,
}

/// Where a running case currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Body,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Body => write!(f, "body"),
            Phase::Teardown => write!(f, "teardown"),
        }
    }
}

/// Runs the cases of a suite declared in this binary.
pub struct Runner<'a, F> {
    suite: &'a Suite<F>,
    config: &'a RunConfig,
}

impl<'a, F: Default> Runner<'a, F> {
    pub fn new(suite: &'a Suite<F>, config: &'a RunConfig) -> Self {
        Self { suite, config }
    }

    /// Runs every selected case and returns the report. `echo` receives the
    /// marker stream as it is produced.
    pub fn run(&self, echo: Option<&mut dyn Write>) -> Result<RunReport, HarnessError> {
        let (selected, skipped) = self.config.select(self.suite.names());
        debug!(
            suite = self.suite.name(),
            selected = selected.len(),
            skipped = skipped.len(),
            isolation = ?self.config.isolation,
            "running suite"
        );
        match self.config.isolation {
            Isolation::Process => {
                let launcher = ExternalBinary::current(self.config.wire)?;
                Supervisor::new(self.config.timeout, self.config.wire).run(
                    self.suite.name(),
                    &launcher,
                    &selected,
                    skipped,
                    echo,
                )
            }
            Isolation::InProcess => self.run_in_process(&selected, skipped, echo),
        }
    }

    fn run_in_process(
        &self,
        selected: &[(usize, String)],
        skipped: Vec<String>,
        echo: Option<&mut dyn Write>,
    ) -> Result<RunReport, HarnessError> {
        let previous = reporter::wire_format();
        reporter::set_wire_format(self.config.wire);
        let mut transcript = Transcript::new(echo, self.config.wire);
        let result = (|| {
            for (index, name) in selected {
                transcript.open(name);
                let (exit, out) = reporter::capture(|| execute(self.suite, *index));
                for line in out.lines() {
                    transcript.line(line)?;
                }
                transcript.close(exit?.termination())?;
            }
            Ok::<(), HarnessError>(())
        })();
        reporter::set_wire_format(previous);
        result?;
        Ok(transcript.finish(self.suite.name(), skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FaultKind, Termination};

    #[derive(Default)]
    struct Greeter {
        greeting: String,
    }

    fn setup(fx: &mut Greeter) {
        fx.greeting = "Hello world".to_string();
    }

    fn teardown(fx: &mut Greeter) {
        fx.greeting.clear();
    }

    fn case_hello_world(fx: &mut Greeter) {
        crate::expect_str!(fx.greeting.as_str(), "Hello world");
    }

    fn case_fault(_: &mut Greeter) {
        let divisor = std::hint::black_box(0);
        crate::expect_int!(10 / divisor, 1);
    }

    fn case_hello_world_again(fx: &mut Greeter) {
        crate::expect_str!(fx.greeting.as_str(), "Hello world");
    }

    fn case_no_assertions(_: &mut Greeter) {}

    fn config() -> RunConfig {
        RunConfig {
            isolation: Isolation::InProcess,
            use_colors: false,
            ..RunConfig::default()
        }
    }

    fn suite() -> Suite<Greeter> {
        crate::suite!(
            "helloworld",
            Greeter,
            setup,
            teardown,
            [case_hello_world, case_fault, case_hello_world_again, case_no_assertions]
        )
        .unwrap()
    }

    #[test]
    fn in_process_contains_panics() {
        let suite = suite();
        let config = config();
        let report = Runner::new(&suite, &config).run(None).unwrap();
        assert_eq!(report.totals.run, 4);
        assert_eq!(report.totals.passed, 3);
        assert_eq!(report.totals.failed, 1);

        let fault = &report.outcomes[1];
        assert_eq!(fault.name, "fault");
        assert!(matches!(
            &fault.terminated_by,
            Termination::Faulted(FaultKind::Panic { message }) if message.contains("divide by zero")
        ));
        assert_eq!(fault.records.len(), 1);
        assert!(report.outcomes[3].records.is_empty());
        assert!(report.outcomes[3].passed());
    }

    #[test]
    fn filtered_cases_are_skipped_not_run() {
        let suite = suite();
        let config = RunConfig {
            filter: Some("hello".to_string()),
            ..config()
        };
        let report = Runner::new(&suite, &config).run(None).unwrap();
        assert_eq!(report.totals.run, 2);
        assert_eq!(report.skipped, vec!["fault", "no_assertions"]);
        assert!(report.success());
    }

    #[test]
    fn echo_receives_the_stream() {
        let suite = suite();
        let config = RunConfig {
            filter: Some("again".to_string()),
            ..config()
        };
        let mut echoed = Vec::new();
        Runner::new(&suite, &config).run(Some(&mut echoed)).unwrap();
        let text = String::from_utf8(echoed).unwrap();
        assert!(text.starts_with("$$CASE|hello_world_again\n$$ASSERT_BEGIN|"));
        assert!(text.ends_with("$$ASSERT_END|OK\n$$CASE_END|OK\n"));
    }

    #[test]
    fn phases_display_lowercase() {
        assert_eq!(Phase::Teardown.to_string(), "teardown");
    }
}
