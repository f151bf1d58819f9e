//! Command-line arguments.
//!
//! Two entry points share these definitions: the `thingspector` CLI
//! ([`ThingspectorArgs`]) and every test binary built on
//! [`thingspector::main`](crate::main) ([`HarnessArgs`]).

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{OutputFormat, RunConfig};
use crate::error::HarnessError;
use crate::protocol::WireFormat;
use crate::runner::Isolation;

/// The `thingspector` CLI.
#[derive(Debug, Parser)]
#[command(
    name = "thingspector",
    version,
    about = "Runs native test executables with per-case fault isolation."
)]
pub struct ThingspectorArgs {
    /// More log output on stderr (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Supervise test executables, one process per case.
    Run(RunArgs),
    /// Summarize a captured marker stream.
    Summarize {
        /// File holding the stream, or `-` for stdin.
        #[arg(default_value = "-")]
        input: PathBuf,
        /// Suite name used in the report.
        #[arg(long)]
        suite: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// List the cases a test executable declares.
    List {
        /// The executable speaks the legacy count/index protocol.
        #[arg(long)]
        legacy: bool,
        #[arg(required = true)]
        binary: PathBuf,
    },
}

/// Options shared by every supervised run.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOptions {
    /// Only run cases whose name contains this (case-insensitive).
    #[arg(long)]
    pub filter: Option<String>,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    /// Kill a case after this many milliseconds (0 disables).
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
    /// Marker dialect children are asked to write.
    #[arg(long, value_enum)]
    pub wire: Option<WireFormat>,
}

impl RunOptions {
    /// Environment-derived configuration with these flags on top.
    pub fn run_config(&self) -> Result<RunConfig, HarnessError> {
        let mut config = RunConfig::from_env()?.with_timeout_ms(self.timeout_ms);
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(wire) = self.wire {
            config.wire = wire;
        }
        if self.filter.is_some() {
            config.filter = self.filter.clone();
        }
        Ok(config)
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// The executables speak the legacy count/index protocol.
    #[arg(long)]
    pub legacy: bool,

    /// Run every test listed in a manifest instead.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["binaries", "legacy"])]
    pub manifest: Option<PathBuf>,

    #[command(flatten)]
    pub options: RunOptions,

    /// Test executables; without any, `thingspector.yaml` is read.
    pub binaries: Vec<PathBuf>,
}

/// Arguments understood by a test binary built on [`crate::main`].
#[derive(Debug, Default, Parser)]
#[command(about = "Runs the cases of this suite, each in its own process.")]
pub struct HarnessArgs {
    /// Run one case in this process and exit (child mode).
    #[arg(long, value_name = "INDEX", conflicts_with_all = ["index", "count", "list"])]
    pub case: Option<usize>,

    /// Legacy spelling of `--case`.
    #[arg(value_name = "INDEX", hide = true, conflicts_with_all = ["count", "list"])]
    pub index: Option<usize>,

    /// Print the number of cases.
    #[arg(long, conflicts_with = "list")]
    pub count: bool,

    /// Print `<index> <name>` for every case.
    #[arg(long)]
    pub list: bool,

    /// Run cases on this thread; only panics are contained.
    #[arg(long)]
    pub in_process: bool,

    #[command(flatten)]
    pub options: RunOptions,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl HarnessArgs {
    /// Index of the case to run in child mode, if any.
    pub fn child_index(&self) -> Option<usize> {
        self.case.or(self.index)
    }

    pub fn run_config(&self) -> Result<RunConfig, HarnessError> {
        let mut config = self.options.run_config()?;
        if self.in_process {
            config.isolation = Isolation::InProcess;
        }
        Ok(config)
    }
}
