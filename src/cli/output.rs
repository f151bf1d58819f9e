//! User-facing output: the colored text report, JSON and the raw stream.
//!
//! Everything here writes to a caller-supplied sink so the same code serves
//! stdout and tests.

use std::io::{self, Write};

use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::config::{OutputFormat, RunConfig};
use crate::error::HarnessError;
use crate::model::{CaseOutcome, Outcome, RunReport, Termination, Totals};
use crate::protocol::{Marker, WireFormat};

// ============================================================================
// DISPATCH
// ============================================================================

/// Prints finished reports on stdout in the configured format. Raw output
/// was already streamed while the run was going on, so it prints nothing.
pub fn render(reports: &[RunReport], config: &RunConfig) -> Result<(), HarnessError> {
    let choice = if config.use_colors {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    match config.format {
        OutputFormat::Text => render_text(reports, &mut stdout)?,
        OutputFormat::Json => render_json(reports, &mut stdout)?,
        OutputFormat::Raw => {}
    }
    stdout.flush()?;
    Ok(())
}

// ============================================================================
// TEXT
// ============================================================================

fn colored(out: &mut dyn WriteColor, text: &str, color: Color) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "{}", text)?;
    out.reset()
}

fn render_case(out: &mut dyn WriteColor, suite: &str, case: &CaseOutcome) -> io::Result<()> {
    if case.passed() {
        colored(out, "PASS", Color::Green)?;
        writeln!(out, ": {} [{}]", case.name, suite)?;
        return Ok(());
    }
    colored(out, "FAIL", Color::Red)?;
    writeln!(out, ": {} [{}]", case.name, suite)?;
    for record in &case.records {
        if let Outcome::Fail(message) = &record.outcome {
            writeln!(out, "  {}:{}: {}", record.file, record.line, message)?;
        }
    }
    if let Termination::Faulted(kind) = &case.terminated_by {
        writeln!(out, "  Fault: {}", kind)?;
    }
    Ok(())
}

/// Writes PASS/FAIL/SKIP lines, failure details and the summary line.
pub fn render_text(reports: &[RunReport], out: &mut dyn WriteColor) -> io::Result<()> {
    for report in reports {
        for case in &report.outcomes {
            render_case(out, &report.suite, case)?;
        }
        for name in &report.skipped {
            colored(out, "SKIP", Color::Yellow)?;
            writeln!(out, ": {} [{}] (filtered out)", name, report.suite)?;
        }
    }

    let totals = RunReport::grand_totals(reports);
    write!(out, "\nTest summary: total {}, ", totals.run)?;
    colored(out, "passed", Color::Green)?;
    write!(out, " {}, ", totals.passed)?;
    colored(out, "failed", Color::Red)?;
    write!(out, " {}, ", totals.failed)?;
    colored(out, "skipped", Color::Yellow)?;
    writeln!(out, " {}", totals.skipped)?;
    writeln!(
        out,
        "Assertions: total {}, failed {}",
        totals.assertions, totals.failed_assertions
    )?;

    if totals.has_failures() {
        writeln!(out, "\nFailed tests:")?;
        for report in reports {
            for case in report.outcomes.iter().filter(|c| !c.passed()) {
                writeln!(out, "  - {} [{}]", case.name, report.suite)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// JSON
// ============================================================================

#[derive(Serialize)]
struct JsonRun<'a> {
    success: bool,
    totals: Totals,
    reports: &'a [RunReport],
}

pub fn render_json(reports: &[RunReport], out: &mut dyn Write) -> Result<(), HarnessError> {
    let run = JsonRun {
        success: reports.iter().all(RunReport::success),
        totals: RunReport::grand_totals(reports),
        reports,
    };
    serde_json::to_writer_pretty(&mut *out, &run)?;
    writeln!(out)?;
    Ok(())
}

// ============================================================================
// RAW
// ============================================================================

/// Re-encodes a report as a marker stream. Summarizing the result gives the
/// same outcomes back, modulo messages the colon dialect cannot carry.
pub fn render_raw(report: &RunReport, wire: WireFormat, out: &mut dyn Write) -> io::Result<()> {
    for case in &report.outcomes {
        let name = case.name.clone();
        writeln!(out, "{}", Marker::Case { name }.encode(wire))?;
        let fault = case.fault().is_some();
        for (i, record) in case.records.iter().enumerate() {
            writeln!(
                out,
                "{}",
                Marker::AssertBegin {
                    file: record.file.clone(),
                    line: record.line,
                }
                .encode(wire)
            )?;
            // The record a fault interrupted stays open.
            let interrupted = fault && i + 1 == case.records.len() && is_fault_record(&record.outcome);
            if !interrupted {
                writeln!(out, "{}", Marker::AssertEnd(record.outcome.clone()).encode(wire))?;
            }
        }
        writeln!(out, "{}", Marker::CaseEnd(case.terminated_by.clone()).encode(wire))?;
    }
    Ok(())
}

fn is_fault_record(outcome: &Outcome) -> bool {
    matches!(outcome, Outcome::Fail(message) if message.starts_with("terminated by fault"))
}
