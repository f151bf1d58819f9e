//! Run summary.
//!
//! [`Collector`] turns a marker stream into case outcomes. It is fed line by
//! line (by the supervisor, while a child is still running) or all at once
//! through [`summarize`]. It never needs anything but the stream and, when a
//! supervisor is present, the way each isolation context ended.
//!
//! Closing rules:
//! - `$$CASE_END` closes the current case with the termination it carries;
//! - a new `$$CASE` closes an unterminated previous case, as completed when no
//!   assertion is open and as truncated otherwise (legacy runners never write
//!   `$$CASE_END`);
//! - the end of the stream closes an open case as truncated;
//! - a `$$CASE_END` fault outside any case fails the case that just completed
//!   (its process died after writing `$$CASE_END|OK`);
//! - a fault that interrupts an open assertion appends a failed record for
//!   that assertion's location.

use std::io::{BufRead, Write};

use tracing::{debug, error, info, trace, warn};

use crate::error::HarnessError;
use crate::model::{AssertionRecord, CaseOutcome, FaultKind, Outcome, RunReport, Termination};
use crate::protocol::{classify, Line, Marker, WireFormat};

const UNNAMED_CASE: &str = "<unnamed>";

#[derive(Debug)]
struct OpenCase {
    name: String,
    records: Vec<AssertionRecord>,
    pending: Option<(String, u32)>,
    announced: bool,
}

impl OpenCase {
    fn new(name: &str, announced: bool) -> Self {
        Self {
            name: name.to_string(),
            records: Vec::new(),
            pending: None,
            announced,
        }
    }

    fn is_untouched(&self) -> bool {
        !self.announced && self.records.is_empty() && self.pending.is_none()
    }
}

/// Incremental marker-stream consumer.
#[derive(Debug, Default)]
pub struct Collector {
    outcomes: Vec<CaseOutcome>,
    current: Option<OpenCase>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a case the supervisor is about to run. A following `$$CASE`
    /// marker confirms it (and may rename it) instead of opening another one.
    pub fn open_case(&mut self, name: &str) {
        self.close_implicitly();
        self.current = Some(OpenCase::new(name, false));
    }

    pub fn is_case_open(&self) -> bool {
        self.current.is_some()
    }

    /// Whether the open case was announced by a `$$CASE` marker in the stream.
    pub fn current_announced(&self) -> bool {
        self.current.as_ref().is_some_and(|case| case.announced)
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_ref().map(|case| case.name.as_str())
    }

    pub fn outcomes(&self) -> &[CaseOutcome] {
        &self.outcomes
    }

    pub fn feed_line(&mut self, line: &str) {
        match classify(line) {
            Line::Marker(marker) => self.feed_marker(marker),
            Line::Console(text) => {
                if !text.trim().is_empty() {
                    warn!(case = self.current_name().unwrap_or(UNNAMED_CASE), "console output: {}", text);
                }
            }
            Line::Malformed(text) => {
                error!("unexpected marker sequence: {}", text);
            }
        }
    }

    pub fn feed_marker(&mut self, marker: Marker) {
        match marker {
            Marker::Case { name } => {
                let confirms = self.current.as_ref().is_some_and(OpenCase::is_untouched);
                debug!(case = %name, "case started");
                match self.current.as_mut() {
                    Some(case) if confirms => {
                        case.name = name;
                        case.announced = true;
                    }
                    _ => {
                        self.close_implicitly();
                        self.current = Some(OpenCase::new(&name, true));
                    }
                }
            }
            Marker::AssertBegin { file, line } => {
                let case = self
                    .current
                    .get_or_insert_with(|| OpenCase::new(UNNAMED_CASE, true));
                if let Some((file, line)) = case.pending.take() {
                    warn!(file = %file, line, "assertion began without an end marker");
                    case.records.push(AssertionRecord {
                        file,
                        line,
                        outcome: Outcome::Fail("assertion did not report an outcome".to_string()),
                    });
                }
                case.pending = Some((file, line));
            }
            Marker::AssertEnd(outcome) => {
                let Some(case) = self.current.as_mut() else {
                    warn!("assertion end marker outside of a case");
                    return;
                };
                let Some((file, line)) = case.pending.take() else {
                    warn!(case = %case.name, "assertion end marker without a begin marker");
                    return;
                };
                match &outcome {
                    Outcome::Pass => trace!(file = %file, line, "assertion at {}:{} success", file, line),
                    Outcome::Fail(message) => {
                        warn!(case = %case.name, "assertion at {}:{} failed: {}", file, line, message)
                    }
                }
                case.records.push(AssertionRecord {
                    file,
                    line,
                    outcome,
                });
            }
            Marker::CaseEnd(Termination::Faulted(kind)) if self.current.is_none() => {
                if !self.fault_closed_case(kind) {
                    warn!("case end marker outside of a case");
                }
            }
            Marker::CaseEnd(termination) => {
                if !self.close_case(termination) {
                    warn!("case end marker outside of a case");
                }
            }
        }
    }

    /// Closes the open case. Returns `false` when no case was open.
    pub fn close_case(&mut self, termination: Termination) -> bool {
        let Some(mut case) = self.current.take() else {
            return false;
        };
        if let Some((file, line)) = case.pending.take() {
            let message = match &termination {
                Termination::Faulted(kind) => {
                    error!(
                        case = %case.name,
                        "assertion at {}:{} terminated by fault: {}", file, line, kind
                    );
                    format!("terminated by fault: {}", kind)
                }
                Termination::Completed => "assertion did not report an outcome".to_string(),
            };
            case.records.push(AssertionRecord {
                file,
                line,
                outcome: Outcome::Fail(message),
            });
        } else if let Termination::Faulted(kind) = &termination {
            error!(case = %case.name, "test case {} terminated by fault: {}", case.name, kind);
        }

        let outcome = CaseOutcome {
            name: case.name,
            records: case.records,
            terminated_by: termination,
        };
        debug!(
            case = %outcome.name,
            assertions = outcome.records.len(),
            failed = outcome.failed_assertions(),
            "case completed"
        );
        self.outcomes.push(outcome);
        true
    }

    /// Marks the last case failed when its process died after the case had
    /// already closed as completed. Returns `false` when there is no such case.
    pub fn fault_closed_case(&mut self, kind: FaultKind) -> bool {
        if self.current.is_some() {
            return false;
        }
        match self.outcomes.last_mut() {
            Some(outcome) if outcome.terminated_by == Termination::Completed => {
                error!(case = %outcome.name, "test case {} faulted after it completed: {}", outcome.name, kind);
                outcome.terminated_by = Termination::Faulted(kind);
                true
            }
            _ => false,
        }
    }

    fn close_implicitly(&mut self) {
        let termination = match &self.current {
            None => return,
            Some(case) if case.pending.is_some() => Termination::Faulted(FaultKind::Truncated),
            Some(_) => Termination::Completed,
        };
        self.close_case(termination);
    }

    /// Closes whatever is still open as truncated and builds the report.
    pub fn finish(mut self, suite: &str, skipped: Vec<String>) -> RunReport {
        if self.current.is_some() {
            self.close_case(Termination::Faulted(FaultKind::Truncated));
        }
        let report = RunReport::new(suite, self.outcomes, skipped);
        info!(
            suite,
            cases = report.totals.run,
            faulted = report.totals.faulted,
            assertions = report.totals.assertions,
            failed_assertions = report.totals.failed_assertions,
            "Test {} completed, cases={} (fatal={}), assertions total={}, of which {} failed",
            suite,
            report.totals.run,
            report.totals.faulted,
            report.totals.assertions,
            report.totals.failed_assertions
        );
        report
    }
}

/// Builds a report from a complete marker stream.
pub fn summarize(suite: &str, reader: impl BufRead) -> Result<RunReport, HarnessError> {
    let mut collector = Collector::new();
    for line in reader.lines() {
        collector.feed_line(&line?);
    }
    Ok(collector.finish(suite, Vec::new()))
}

// ============================================================================
// TRANSCRIPT
// ============================================================================

/// A collector that optionally echoes the stream it consumes.
///
/// Lines from the isolation context are echoed verbatim; markers the runner
/// synthesizes (for a case that never announced itself or never closed) are
/// echoed too, so the echoed stream summarizes to the same report.
pub struct Transcript<'w> {
    collector: Collector,
    echo: Option<&'w mut dyn Write>,
    wire: WireFormat,
}

impl<'w> Transcript<'w> {
    pub fn new(echo: Option<&'w mut dyn Write>, wire: WireFormat) -> Self {
        Self {
            collector: Collector::new(),
            echo,
            wire,
        }
    }

    pub fn open(&mut self, name: &str) {
        self.collector.open_case(name);
    }

    pub fn is_open(&self) -> bool {
        self.collector.is_case_open()
    }

    pub fn line(&mut self, line: &str) -> Result<(), HarnessError> {
        self.write(line)?;
        self.collector.feed_line(line);
        Ok(())
    }

    /// Closes the open case, if any, echoing the markers it was missing.
    pub fn close(&mut self, termination: Termination) -> Result<(), HarnessError> {
        if !self.collector.is_case_open() {
            return Ok(());
        }
        if !self.collector.current_announced() {
            let name = self.collector.current_name().unwrap_or(UNNAMED_CASE).to_string();
            self.write(&Marker::Case { name }.encode(self.wire))?;
        }
        self.write(&Marker::CaseEnd(termination.clone()).encode(self.wire))?;
        self.collector.close_case(termination);
        Ok(())
    }

    /// Fails the case that just closed as completed, echoing a second
    /// `$$CASE_END` that carries the fault.
    pub fn fault_closed(&mut self, kind: FaultKind) -> Result<(), HarnessError> {
        if self.collector.is_case_open() {
            return Ok(());
        }
        let marker = Marker::CaseEnd(Termination::Faulted(kind.clone()));
        if self.collector.fault_closed_case(kind) {
            self.write(&marker.encode(self.wire))?;
        }
        Ok(())
    }

    pub fn finish(self, suite: &str, skipped: Vec<String>) -> RunReport {
        self.collector.finish(suite, skipped)
    }

    fn write(&mut self, line: &str) -> Result<(), HarnessError> {
        if let Some(echo) = self.echo.as_mut() {
            writeln!(echo, "{}", line)?;
            echo.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stream: &str) -> RunReport {
        summarize("helloworld", stream.as_bytes()).unwrap()
    }

    #[test]
    fn passing_case() {
        let report = run("$$CASE|helloWorld\n\
                          $$ASSERT_BEGIN|test_helloworld.c|27\n\
                          $$ASSERT_END|OK\n\
                          $$CASE_END|OK\n");
        assert_eq!(report.outcomes.len(), 1);
        let case = &report.outcomes[0];
        assert_eq!(case.name, "helloWorld");
        assert_eq!(case.records.len(), 1);
        assert_eq!(case.records[0].line, 27);
        assert!(case.passed());
        assert_eq!(report.totals.passed, 1);
    }

    #[test]
    fn fault_between_two_passing_cases() {
        let report = run("$$CASE|helloWorld\n\
                          $$ASSERT_BEGIN|t.c|27\n\
                          $$ASSERT_END|OK\n\
                          $$CASE_END|OK\n\
                          $$CASE|fault\n\
                          $$CASE_END|FAULT|signal:11:SIGSEGV\n\
                          $$CASE|helloWorldAgain\n\
                          $$ASSERT_BEGIN|t.c|44\n\
                          $$ASSERT_END|OK\n\
                          $$CASE_END|OK\n");
        assert_eq!(report.totals.run, 3);
        assert_eq!(report.totals.passed, 2);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.faulted, 1);
        let names: Vec<_> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["helloWorld", "fault", "helloWorldAgain"]);
        assert!(matches!(
            report.outcomes[1].fault(),
            Some(FaultKind::Signal { signo: 11, .. })
        ));
    }

    #[test]
    fn late_fault_fails_the_case_it_follows() {
        let report = run("$$CASE|exits\n\
                          $$ASSERT_BEGIN|t.c|5\n\
                          $$ASSERT_END|OK\n\
                          $$CASE_END|OK\n\
                          $$CASE_END|FAULT|signal:11:SIGSEGV\n\
                          $$CASE|panics\n\
                          $$CASE_END|FAULT|panic:boom\n\
                          $$CASE_END|FAULT|exit:3\n");
        assert_eq!(report.totals.run, 2);
        assert!(matches!(report.outcomes[0].fault(), Some(FaultKind::Signal { signo: 11, .. })));
        assert_eq!(report.outcomes[0].records.len(), 1);
        // the first fault of a case is the one that counts
        assert!(matches!(report.outcomes[1].fault(), Some(FaultKind::Panic { .. })));
    }

    #[test]
    fn case_without_assertions_passes() {
        let report = run("$$CASE|empty\n$$CASE_END|OK\n");
        assert!(report.outcomes[0].passed());
        assert!(report.success());
    }

    #[test]
    fn failure_does_not_hide_later_records() {
        let report = run("$$CASE|mixed\n\
                          $$ASSERT_BEGIN|t.c|1\n\
                          $$ASSERT_END|Expected x to return 5 but was 4\n\
                          $$ASSERT_BEGIN|t.c|2\n\
                          $$ASSERT_END|OK\n\
                          $$CASE_END|OK\n");
        let case = &report.outcomes[0];
        assert_eq!(case.records.len(), 2);
        assert_eq!(
            case.records[0].outcome,
            Outcome::Fail("Expected x to return 5 but was 4".to_string())
        );
        assert_eq!(case.records[1].outcome, Outcome::Pass);
        assert!(!case.passed());
        assert_eq!(report.totals.failed, 1);
    }

    #[test]
    fn abrupt_end_inside_an_assertion_fails_that_assertion() {
        let report = run("$$CASE|fault\n$$ASSERT_BEGIN|t.c|33\n");
        let case = &report.outcomes[0];
        assert_eq!(case.terminated_by, Termination::Faulted(FaultKind::Truncated));
        assert_eq!(case.records.len(), 1);
        assert_eq!(case.records[0].line, 33);
        assert!(matches!(
            &case.records[0].outcome,
            Outcome::Fail(message) if message.starts_with("terminated by fault")
        ));
    }

    #[test]
    fn abrupt_end_between_assertions_still_closes_the_case() {
        let report = run("$$CASE|fault\n$$ASSERT_BEGIN|t.c|1\n$$ASSERT_END|OK\n");
        assert_eq!(report.totals.run, 1);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.outcomes[0].records.len(), 1);
    }

    #[test]
    fn legacy_stream_without_case_end() {
        let report = run("$$CASE:helloWorld\n\
                          $$ASSERT_BEGIN:t.c:27\n\
                          $$ASSERT_END:OK\n\
                          $$CASE:fault\n\
                          $$ASSERT_BEGIN:t.c:30\n\
                          $$CASE:helloWorldAgain\n\
                          $$ASSERT_BEGIN:t.c:44\n\
                          $$ASSERT_END:FAILED\n");
        assert_eq!(report.totals.run, 3);
        assert_eq!(report.outcomes[0].terminated_by, Termination::Completed);
        assert_eq!(
            report.outcomes[1].terminated_by,
            Termination::Faulted(FaultKind::Truncated)
        );
        // The stream ends after the last case: it was never closed.
        assert_eq!(
            report.outcomes[2].terminated_by,
            Termination::Faulted(FaultKind::Truncated)
        );
        assert_eq!(
            report.outcomes[2].records[0].outcome,
            Outcome::Fail("assertion failed".to_string())
        );
    }

    #[test]
    fn console_and_malformed_lines_are_not_counted() {
        let report = run("$$CASE|noisy\n\
                          hello from the module\n\
                          $$BOGUS|1\n\
                          $$ASSERT_END|OK\n\
                          $$CASE_END|OK\n");
        assert_eq!(report.outcomes[0].records.len(), 0);
        assert!(report.success());
    }

    #[test]
    fn supervisor_placeholder_is_renamed_by_the_stream() {
        let mut collector = Collector::new();
        collector.open_case("#0");
        assert!(!collector.current_announced());
        collector.feed_line("$$CASE|helloWorld");
        assert!(collector.current_announced());
        collector.feed_line("$$ASSERT_BEGIN|t.c|1");
        assert!(collector.close_case(Termination::Faulted(FaultKind::Signal {
            signo: 11,
            name: "SIGSEGV".to_string()
        })));
        assert!(!collector.close_case(Termination::Completed));
        let report = collector.finish("legacy", vec![]);
        assert_eq!(report.outcomes[0].name, "helloWorld");
        assert_eq!(report.outcomes[0].records.len(), 1);
        assert!(!report.outcomes[0].records[0].outcome.is_pass());
    }

    #[test]
    fn transcript_echo_summarizes_to_the_same_report() {
        let mut echoed = Vec::new();
        let report = {
            let mut transcript = Transcript::new(Some(&mut echoed), WireFormat::Pipe);
            transcript.open("first");
            transcript.line("$$CASE|first").unwrap();
            transcript.line("$$ASSERT_BEGIN|t.c|1").unwrap();
            transcript.line("$$ASSERT_END|OK").unwrap();
            transcript.close(Termination::Completed).unwrap();
            transcript.open("second");
            transcript
                .close(Termination::Faulted(FaultKind::Launch {
                    message: "not found".to_string(),
                }))
                .unwrap();
            transcript.finish("echo", vec![])
        };
        let text = String::from_utf8(echoed).unwrap();
        assert!(text.contains("$$CASE|second\n$$CASE_END|FAULT|launch:not found\n"));
        let replayed = summarize("echo", text.as_bytes()).unwrap();
        assert_eq!(replayed.outcomes, report.outcomes);
    }
}
