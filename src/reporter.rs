//! Assertion reporter.
//!
//! Writes each assertion as a `$$ASSERT_BEGIN` / `$$ASSERT_END` pair and
//! flushes after every line, so whatever was reported before a fatal fault is
//! already on the pipe when the process dies.
//!
//! The begin marker is written by [`begin`] *before* the checked expression is
//! evaluated. If evaluating it faults, the stream is left with an open begin
//! marker and the fault is attributed to that source line.
//!
//! Output goes to stdout unless the current thread is inside [`capture`].

use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tracing::{trace, warn};

use crate::model::Outcome;
use crate::protocol::{Marker, WireFormat};

static FAILED: AtomicUsize = AtomicUsize::new(0);
static WIRE: AtomicU8 = AtomicU8::new(0);

thread_local! {
    static CAPTURE: RefCell<Option<String>> = const { RefCell::new(None) };
    static FAILED_HERE: Cell<usize> = const { Cell::new(0) };
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Sets the dialect used for every marker this process writes.
pub fn set_wire_format(wire: WireFormat) {
    let raw = match wire {
        WireFormat::Pipe => 0,
        WireFormat::Colon => 1,
    };
    WIRE.store(raw, Ordering::Relaxed);
}

pub fn wire_format() -> WireFormat {
    match WIRE.load(Ordering::Relaxed) {
        1 => WireFormat::Colon,
        _ => WireFormat::Pipe,
    }
}

/// Number of failed assertions reported by this process so far.
pub fn failed_count() -> usize {
    FAILED.load(Ordering::SeqCst)
}

/// Number of failed assertions reported by the current thread so far.
pub fn thread_failed_count() -> usize {
    FAILED_HERE.with(Cell::get)
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Writes one marker line and flushes it.
pub fn emit(marker: &Marker) {
    let line = marker.encode(wire_format());
    let captured = CAPTURE.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(buffer) => {
                buffer.push_str(&line);
                buffer.push('\n');
                true
            }
            None => false,
        }
    });
    if captured {
        return;
    }

    let stdout = io::stdout();
    let mut lock = stdout.lock();
    // A closed stdout means nobody is listening; the test itself goes on.
    let _ = writeln!(lock, "{}", line);
    let _ = lock.flush();
}

/// Runs `f` with this thread's markers redirected into a buffer and returns
/// the buffer alongside `f`'s result. Captures nest.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
    struct Restore(Option<Option<String>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                CAPTURE.with(|slot| *slot.borrow_mut() = previous);
            }
        }
    }

    let previous = CAPTURE.with(|slot| slot.borrow_mut().replace(String::new()));
    let mut restore = Restore(Some(previous));
    let result = f();
    let captured = CAPTURE.with(|slot| slot.borrow_mut().take()).unwrap_or_default();
    if let Some(previous) = restore.0.take() {
        CAPTURE.with(|slot| *slot.borrow_mut() = previous);
    }
    (result, captured)
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// An assertion whose begin marker is already written.
///
/// Dropping it without calling [`PendingAssertion::finish`] leaves the begin
/// marker open, which is exactly what a fault mid-evaluation looks like.
#[must_use = "an assertion must be finished to write its end marker"]
#[derive(Debug)]
pub struct PendingAssertion {
    file: String,
    line: u32,
}

impl PendingAssertion {
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Writes the end marker. `message` is only built when the check failed.
    /// Returns `passed` so callers can branch on it if they want to.
    pub fn finish(self, passed: bool, message: impl FnOnce() -> String) -> bool {
        let outcome = if passed {
            trace!(file = %self.file, line = self.line, "assertion passed");
            Outcome::Pass
        } else {
            FAILED.fetch_add(1, Ordering::SeqCst);
            FAILED_HERE.with(|count| count.set(count.get() + 1));
            let message = message();
            warn!(file = %self.file, line = self.line, "assertion failed: {}", message);
            Outcome::Fail(message)
        };
        emit(&Marker::AssertEnd(outcome));
        passed
    }
}

/// Writes the begin marker for an assertion at `file:line`.
pub fn begin(file: &str, line: u32) -> PendingAssertion {
    emit(&Marker::AssertBegin {
        file: file.to_string(),
        line,
    });
    PendingAssertion {
        file: file.to_string(),
        line,
    }
}

/// Reports an already evaluated check as one begin/end pair.
pub fn report(file: &str, line: u32, passed: bool, message: impl FnOnce() -> String) -> bool {
    begin(file, line).finish(passed, message)
}
