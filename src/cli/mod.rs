//! The `thingspector` command-line interface.
//!
//! Dispatches subcommands to the runner and the run summary, and maps the
//! outcome to a process exit code: 0 when nothing failed, 1 when a case
//! failed or faulted. Harness errors are returned to the binary, which exits
//! with 2.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use tracing::{error, info, warn};

use crate::config::{Manifest, ManifestEntry, OutputFormat, RunConfig, MANIFEST_FILE};
use crate::error::HarnessError;
use crate::logging;
use crate::model::{CaseOutcome, FaultKind, RunReport, Termination};
use crate::runner::{ExternalBinary, LaunchProtocol, Supervisor};
use crate::summary::summarize;

pub mod args;
pub mod output;

use args::{Command, RunArgs, ThingspectorArgs};

/// Runs one CLI invocation and returns its exit code.
pub fn run(args: ThingspectorArgs) -> Result<i32, HarnessError> {
    logging::init(args.verbose);
    match args.command {
        Command::Run(run) => handle_run(run),
        Command::Summarize {
            input,
            suite,
            format,
        } => handle_summarize(&input, suite, format),
        Command::List { legacy, binary } => handle_list(&binary, legacy),
    }
}

// ============================================================================
// RUN
// ============================================================================

fn handle_run(args: RunArgs) -> Result<i32, HarnessError> {
    let config = args.options.run_config()?;
    let entries = match &args.manifest {
        Some(path) => Manifest::load(path)?.entries,
        None if args.binaries.is_empty() => Manifest::load(Path::new(MANIFEST_FILE))?.entries,
        None => args
            .binaries
            .iter()
            .map(|binary| ManifestEntry {
                name: ExternalBinary::new(binary, LaunchProtocol::Native).suite_name(),
                binary: binary.clone(),
                protocol: if args.legacy {
                    LaunchProtocol::Legacy
                } else {
                    LaunchProtocol::Native
                },
                timeout_ms: None,
                filter: None,
            })
            .collect(),
    };

    let mut reports = Vec::with_capacity(entries.len());
    for entry in &entries {
        let entry_config = entry_config(&config, entry);
        let report = if entry_config.format == OutputFormat::Raw {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            supervise(entry, &entry_config, Some(&mut lock))?
        } else {
            supervise(entry, &entry_config, None)?
        };
        reports.push(report);
    }

    output::render(&reports, &config)?;
    Ok(RunReport::exit_code(&reports))
}

/// Per-test manifest settings win over the command line.
fn entry_config(config: &RunConfig, entry: &ManifestEntry) -> RunConfig {
    let mut config = config.clone().with_timeout_ms(entry.timeout_ms);
    if entry.filter.is_some() {
        config.filter = entry.filter.clone();
    }
    config
}

/// Runs every case of one executable. An executable that cannot even list
/// its cases is reported as a single faulted case, and the run goes on.
pub fn supervise(
    entry: &ManifestEntry,
    config: &RunConfig,
    echo: Option<&mut dyn Write>,
) -> Result<RunReport, HarnessError> {
    let mut binary = ExternalBinary::new(&entry.binary, entry.protocol);
    if entry.protocol == LaunchProtocol::Native {
        binary = binary.with_wire(config.wire);
    }

    let cases = match binary.cases() {
        Ok(cases) => cases,
        Err(err) => {
            error!(test = %entry.name, "{}", err);
            let outcome = CaseOutcome {
                name: entry.name.clone(),
                records: Vec::new(),
                terminated_by: Termination::Faulted(FaultKind::Launch {
                    message: err.to_string(),
                }),
            };
            return Ok(RunReport::new(entry.name.clone(), vec![outcome], Vec::new()));
        }
    };

    let (selected, skipped) = match entry.protocol {
        LaunchProtocol::Legacy => {
            if config.filter.is_some() {
                warn!(
                    test = %entry.name,
                    "filter ignored: legacy executables only name their cases while running"
                );
            }
            (cases, Vec::new())
        }
        LaunchProtocol::Native => config.select(cases),
    };
    info!(test = %entry.name, cases = selected.len(), "running {}", binary.path().display());
    Supervisor::new(config.timeout, config.wire).run(&entry.name, &binary, &selected, skipped, echo)
}

// ============================================================================
// SUMMARIZE / LIST
// ============================================================================

fn handle_summarize(
    input: &Path,
    suite: Option<String>,
    format: Option<OutputFormat>,
) -> Result<i32, HarnessError> {
    let mut config = RunConfig::from_env()?;
    if let Some(format) = format {
        config.format = format;
    }
    let report = if input == Path::new("-") {
        let suite = suite.unwrap_or_else(|| "stdin".to_string());
        summarize(&suite, io::stdin().lock())?
    } else {
        let suite = suite.unwrap_or_else(|| {
            input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "stream".to_string())
        });
        summarize(&suite, BufReader::new(File::open(input)?))?
    };

    if config.format == OutputFormat::Raw {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        output::render_raw(&report, config.wire, &mut lock)?;
        lock.flush()?;
    } else {
        output::render(std::slice::from_ref(&report), &config)?;
    }
    Ok(RunReport::exit_code(std::slice::from_ref(&report)))
}

fn handle_list(binary: &Path, legacy: bool) -> Result<i32, HarnessError> {
    let protocol = if legacy {
        LaunchProtocol::Legacy
    } else {
        LaunchProtocol::Native
    };
    let cases = ExternalBinary::new(binary, protocol).cases()?;
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    for (index, name) in cases {
        writeln!(lock, "{} {}", index, name)?;
    }
    Ok(0)
}
