//! # Thingspector
//!
//! A unit-testing harness for native code. Test cases write their assertion
//! results as a line-oriented marker stream; each case runs in its own
//! isolation context, so a segfault, abort or panic in one case fails that
//! case and nothing else.
//!
//! ## Module map
//!
//! - [`protocol`]: marker lines and their two delimiter dialects
//! - [`reporter`]: writes one begin/end record pair per assertion
//! - [`assertions`]: `expect!`, `expect_str!`, `expect_int!` and friends
//! - [`registry`]: ordered, named cases with shared setup/teardown
//! - [`runner`]: process-per-case supervision and in-process execution
//! - [`summary`]: turns a marker stream into a [`RunReport`]
//! - [`config`], [`cli`], [`logging`], [`error`]: the harness around them

pub mod assertions;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod reporter;
pub mod runner;
pub mod summary;
pub mod test_harness;

pub use error::HarnessError;
pub use model::{AssertionRecord, CaseOutcome, FaultKind, Outcome, RunReport, Termination, Totals};
pub use registry::{Suite, TestCase};
pub use test_harness::main;

/// Everything a test file needs.
pub mod prelude {
    pub use crate::assertions::Check;
    pub use crate::registry::Suite;
    pub use crate::{expect, expect_eq, expect_int, expect_long, expect_str, expect_uint, expect_ulong};
}
