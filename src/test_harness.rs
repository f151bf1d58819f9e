//! Entry point for test binaries.
//!
//! A test binary declares its suite and hands it to [`main`]:
//!
//! ```rust,no_run
//! use thingspector::prelude::*;
//!
//! fn case_hello(_: &mut ()) {
//!     expect_str!("Hello world", "Hello world");
//! }
//!
//! fn main() -> miette::Result<()> {
//!     let suite = thingspector::suite!("hello", (), [case_hello])?;
//!     thingspector::main(suite)
//! }
//! ```
//!
//! The same binary is then both supervisor and child: invoked plainly it runs
//! every case in a re-executed copy of itself; invoked with `--case <i>` it is
//! that copy.

use std::io::{self, Write};
use std::process;

use clap::Parser;

use crate::cli::args::HarnessArgs;
use crate::cli::output;
use crate::config::OutputFormat;
use crate::error::HarnessError;
use crate::logging;
use crate::model::RunReport;
use crate::registry::Suite;
use crate::reporter;
use crate::runner::{execute, Runner};

/// Parses the command line, runs the suite and exits with its status.
pub fn main<F: Default>(suite: Suite<F>) -> ! {
    let args = HarnessArgs::parse();
    let code = match run(&suite, &args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            2
        }
    };
    process::exit(code)
}

/// Everything [`main`] does except parsing arguments and exiting.
pub fn run<F: Default>(suite: &Suite<F>, args: &HarnessArgs) -> Result<i32, HarnessError> {
    if let Some(index) = args.child_index() {
        // Child mode: stdout carries markers, stderr belongs to the case.
        reporter::set_wire_format(args.options.wire.unwrap_or_default());
        return Ok(execute(suite, index)?.code());
    }

    logging::init(args.verbose);
    let stdout = io::stdout();
    if args.count {
        writeln!(stdout.lock(), "{}", suite.len())?;
        return Ok(0);
    }
    if args.list {
        let mut lock = stdout.lock();
        for (index, name) in suite.names() {
            writeln!(lock, "{} {}", index, name)?;
        }
        return Ok(0);
    }

    let config = args.run_config()?;
    let runner = Runner::new(suite, &config);
    let report = if config.format == OutputFormat::Raw {
        let mut lock = stdout.lock();
        runner.run(Some(&mut lock))?
    } else {
        runner.run(None)?
    };
    let reports = [report];
    output::render(&reports, &config)?;
    Ok(RunReport::exit_code(&reports))
}
