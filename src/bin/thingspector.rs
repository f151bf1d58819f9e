//! `thingspector` command-line entry point.
//!
//! ```bash
//! thingspector run inspect.work/test_helloworld
//! thingspector run --legacy --format json inspect.work/test_*
//! thingspector run --manifest thingspector.yaml
//! thingspector summarize captured.log
//! ```

use std::process;

use clap::Parser;
use thingspector::cli::{self, args::ThingspectorArgs};

fn main() {
    let args = ThingspectorArgs::parse();
    match cli::run(args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            process::exit(2);
        }
    }
}
