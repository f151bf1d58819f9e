//! Child mode: run one case and report how it ended.
//!
//! This is what a re-executed test binary does for `--case <i>`, and what the
//! in-process runner does on the current thread. Panics in setup, body or
//! teardown are contained here; signals are not, they end the process and are
//! seen by the supervisor.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use tracing::trace;

use super::exec::{FAILED_EXIT_CODE, PANIC_EXIT_CODE};
use super::Phase;
use crate::error::HarnessError;
use crate::model::{FaultKind, Termination};
use crate::protocol::Marker;
use crate::registry::Suite;
use crate::reporter;

/// How a case ended inside its isolation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildExit {
    Passed,
    /// Completed with at least one failed assertion.
    Failed,
    Panicked { phase: Phase, message: String },
}

impl ChildExit {
    pub fn code(&self) -> i32 {
        match self {
            ChildExit::Passed => 0,
            ChildExit::Failed => FAILED_EXIT_CODE,
            ChildExit::Panicked { .. } => PANIC_EXIT_CODE,
        }
    }

    pub fn termination(&self) -> Termination {
        match self {
            ChildExit::Passed | ChildExit::Failed => Termination::Completed,
            ChildExit::Panicked { message, .. } => Termination::Faulted(FaultKind::Panic {
                message: message.clone(),
            }),
        }
    }
}

/// Runs case `index` of `suite` with a fresh fixture, writing its markers
/// through the reporter.
pub fn execute<F: Default>(suite: &Suite<F>, index: usize) -> Result<ChildExit, HarnessError> {
    let case = suite.case(index)?;
    let name = case.name();
    reporter::emit(&Marker::Case {
        name: name.to_string(),
    });
    let failed_before = reporter::thread_failed_count();
    let mut fixture = F::default();
    let phase = Cell::new(Phase::Setup);

    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        trace!(case = name, "setup");
        (suite.setup())(&mut fixture);
        phase.set(Phase::Body);
        trace!(case = name, "body");
        (case.body())(&mut fixture);
    }));
    if let Err(payload) = run {
        let exit = panicked(phase.get(), &*payload);
        // Best effort, and silent: a faulted case produces no further records.
        let _ = reporter::capture(|| {
            panic::catch_unwind(AssertUnwindSafe(|| (suite.teardown())(&mut fixture)))
        });
        return Ok(exit);
    }

    phase.set(Phase::Teardown);
    trace!(case = name, "teardown");
    let teardown = panic::catch_unwind(AssertUnwindSafe(|| (suite.teardown())(&mut fixture)));
    if let Err(payload) = teardown {
        return Ok(panicked(Phase::Teardown, &*payload));
    }

    reporter::emit(&Marker::CaseEnd(Termination::Completed));
    if reporter::thread_failed_count() > failed_before {
        Ok(ChildExit::Failed)
    } else {
        Ok(ChildExit::Passed)
    }
}

fn panicked(phase: Phase, payload: &(dyn Any + Send)) -> ChildExit {
    let message = format!("{} (during {})", panic_message(payload), phase);
    let exit = ChildExit::Panicked { phase, message };
    reporter::emit(&Marker::CaseEnd(exit.termination()));
    exit
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::summarize;

    thread_local! {
        static TEARDOWNS: Cell<usize> = const { Cell::new(0) };
        static BODIES: Cell<usize> = const { Cell::new(0) };
    }

    fn bump(counter: &'static std::thread::LocalKey<Cell<usize>>) {
        counter.with(|c| c.set(c.get() + 1));
    }

    fn count(counter: &'static std::thread::LocalKey<Cell<usize>>) -> usize {
        counter.with(Cell::get)
    }

    #[derive(Default)]
    struct Journal {
        steps: Vec<&'static str>,
    }

    fn setup(fx: &mut Journal) {
        fx.steps.push("setup");
    }

    fn teardown(fx: &mut Journal) {
        bump(&TEARDOWNS);
        fx.steps.push("teardown");
        crate::expect!(fx.steps.first() == Some(&"setup"), "setup ran first");
    }

    fn setup_panics(_: &mut Journal) {
        panic!("no database");
    }

    fn teardown_panics(_: &mut Journal) {
        panic!("cannot unlink");
    }

    fn case_never_runs(_: &mut Journal) {
        bump(&BODIES);
    }

    fn case_quiet(fx: &mut Journal) {
        crate::expect_int!(fx.steps.len() as i32, 1);
    }

    /// Lines that follow the first `$$CASE_END`.
    fn after_case_end(out: &str) -> Vec<&str> {
        out.lines()
            .skip_while(|line| !line.starts_with("$$CASE_END"))
            .skip(1)
            .collect()
    }

    fn case_passes(fx: &mut Journal) {
        fx.steps.push("body");
        crate::expect_int!(fx.steps.len() as i32, 2);
    }

    fn case_fails(_: &mut Journal) {
        crate::expect_int!(4, 5);
        crate::expect_int!(5, 5);
    }

    fn case_panics(_: &mut Journal) {
        crate::expect_str!(
            {
                let empty: Vec<&str> = Vec::new();
                empty[3]
            },
            "never"
        );
    }

    fn suite() -> Suite<Journal> {
        crate::suite!(
            "journal",
            Journal,
            setup,
            teardown,
            [case_passes, case_fails, case_panics]
        )
        .unwrap()
    }

    #[test]
    fn passing_case_writes_case_and_end_markers() {
        let (exit, out) = reporter::capture(|| execute(&suite(), 0).unwrap());
        assert_eq!(exit, ChildExit::Passed);
        assert_eq!(exit.code(), 0);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.first(), Some(&"$$CASE|passes"));
        assert_eq!(lines.last(), Some(&"$$CASE_END|OK"));
        // body assertion plus teardown assertion
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn failed_assertions_complete_the_case() {
        let (exit, out) = reporter::capture(|| execute(&suite(), 1).unwrap());
        assert_eq!(exit.code(), FAILED_EXIT_CODE);
        let report = summarize("journal", out.as_bytes()).unwrap();
        let case = &report.outcomes[0];
        assert_eq!(case.terminated_by, Termination::Completed);
        assert_eq!(case.failed_assertions(), 1);
        assert_eq!(case.records.len(), 3);
    }

    #[test]
    fn panic_is_attributed_to_the_open_assertion() {
        let (exit, out) = reporter::capture(|| execute(&suite(), 2).unwrap());
        assert!(matches!(exit, ChildExit::Panicked { phase: Phase::Body, .. }));
        assert_eq!(exit.code(), PANIC_EXIT_CODE);

        let report = summarize("journal", out.as_bytes()).unwrap();
        let case = &report.outcomes[0];
        assert!(matches!(case.fault(), Some(FaultKind::Panic { message }) if message.contains("index out of bounds")));
        assert_eq!(case.records.len(), 1);
        assert!(!case.records[0].outcome.is_pass());
    }

    #[test]
    fn teardown_runs_silently_after_a_body_fault() {
        let before = count(&TEARDOWNS);
        let (exit, out) = reporter::capture(|| execute(&suite(), 2).unwrap());
        assert!(matches!(exit, ChildExit::Panicked { phase: Phase::Body, .. }));
        assert_eq!(count(&TEARDOWNS), before + 1);
        assert!(out.lines().last().is_some_and(|line| line.starts_with("$$CASE_END|FAULT|panic:")));
        assert!(after_case_end(&out).is_empty());
        assert_eq!(summarize("journal", out.as_bytes()).unwrap().outcomes.len(), 1);
    }

    #[test]
    fn fault_in_setup_belongs_to_the_case() {
        let suite = crate::suite!("fragile", Journal, setup_panics, teardown, [case_never_runs]).unwrap();
        let (bodies, teardowns) = (count(&BODIES), count(&TEARDOWNS));
        let (exit, out) = reporter::capture(|| execute(&suite, 0).unwrap());

        match &exit {
            ChildExit::Panicked { phase, message } => {
                assert_eq!(*phase, Phase::Setup);
                assert!(message.contains("no database"));
                assert!(message.contains("during setup"));
            }
            other => panic!("unexpected exit {:?}", other),
        }
        assert_eq!(count(&BODIES), bodies);
        assert_eq!(count(&TEARDOWNS), teardowns + 1);
        assert!(after_case_end(&out).is_empty());

        let report = summarize("fragile", out.as_bytes()).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].name, "never_runs");
        assert!(matches!(report.outcomes[0].fault(), Some(FaultKind::Panic { .. })));
    }

    #[test]
    fn fault_in_teardown_keeps_the_body_records() {
        let suite = crate::suite!("leaky", Journal, setup, teardown_panics, [case_quiet]).unwrap();
        let (exit, out) = reporter::capture(|| execute(&suite, 0).unwrap());
        assert!(matches!(exit, ChildExit::Panicked { phase: Phase::Teardown, .. }));
        assert_eq!(exit.code(), PANIC_EXIT_CODE);

        let report = summarize("leaky", out.as_bytes()).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        let case = &report.outcomes[0];
        assert_eq!(case.records.len(), 1);
        assert!(case.records[0].outcome.is_pass());
        assert!(matches!(case.fault(), Some(FaultKind::Panic { message }) if message.contains("during teardown")));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let err = execute(&suite(), 3).unwrap_err();
        assert!(matches!(err, HarnessError::CaseIndexOutOfRange { index: 3, count: 3 }));
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
