//! Assertion library.
//!
//! Every check writes exactly one begin/end record pair through the
//! [`reporter`](crate::reporter) and then lets the case carry on: a failed
//! assertion is a report, never control flow.
//!
//! The macros write the begin marker, evaluate the actual expression exactly
//! once, compare, and only then format a failure message from the captured
//! value. The label in the message is the stringified actual expression.
//!
//! ```rust,no_run
//! use thingspector::prelude::*;
//!
//! fn greeting() -> &'static str { "Hello world" }
//!
//! expect_str!(greeting(), "Hello world");
//! expect_int!(2 + 2, 4);
//! expect!(greeting().len() == 11, "greeting has {} bytes", greeting().len());
//! ```
//!
//! When there is no expression to stringify, [`Check`] takes the label
//! explicitly.

use std::borrow::Cow;
use std::fmt::{Debug, Display};

use crate::reporter::{self, PendingAssertion};

// ============================================================================
// MESSAGE TEMPLATES
// ============================================================================

/// Finishes a string comparison.
pub fn finish_str(pending: PendingAssertion, label: &str, actual: &str, expected: &str) -> bool {
    pending.finish(actual == expected, || {
        format!(
            "Expected {} to return \"{}\" but was \"{}\"",
            label, expected, actual
        )
    })
}

/// Finishes a numeric comparison; the integer family differs only in type.
pub fn finish_numeric<T>(pending: PendingAssertion, label: &str, actual: T, expected: T) -> bool
where
    T: PartialEq + Display,
{
    pending.finish(actual == expected, || {
        format!("Expected {} to return {} but was {}", label, expected, actual)
    })
}

/// Finishes a comparison of arbitrary values using their `Debug` form.
pub fn finish_debug<T>(pending: PendingAssertion, label: &str, actual: &T, expected: &T) -> bool
where
    T: PartialEq + Debug + ?Sized,
{
    pending.finish(actual == expected, || {
        format!(
            "Expected {} to return {:?} but was {:?}",
            label, expected, actual
        )
    })
}

// ============================================================================
// EXPLICIT-LABEL BUILDER
// ============================================================================

/// Builder for checks whose location and label are supplied by the caller.
///
/// The actual value is passed as a closure so it is evaluated after the begin
/// marker is written, same as the macros.
#[derive(Debug, Clone)]
pub struct Check<'a> {
    file: Cow<'a, str>,
    line: u32,
    label: Cow<'a, str>,
}

impl<'a> Check<'a> {
    pub fn at(file: impl Into<Cow<'a, str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            label: Cow::Borrowed("value"),
        }
    }

    pub fn labelled(mut self, label: impl Into<Cow<'a, str>>) -> Self {
        self.label = label.into();
        self
    }

    fn begin(&self) -> PendingAssertion {
        reporter::begin(&self.file, self.line)
    }

    /// Generic boolean check with a caller-built failure message.
    pub fn that(self, condition: impl FnOnce() -> bool, message: impl FnOnce() -> String) -> bool {
        let pending = self.begin();
        let passed = condition();
        pending.finish(passed, message)
    }

    pub fn str_eq<A: AsRef<str>>(self, actual: impl FnOnce() -> A, expected: &str) -> bool {
        let pending = self.begin();
        let actual = actual();
        finish_str(pending, &self.label, actual.as_ref(), expected)
    }

    pub fn int_eq(self, actual: impl FnOnce() -> i32, expected: i32) -> bool {
        self.numeric_eq(actual, expected)
    }

    pub fn uint_eq(self, actual: impl FnOnce() -> u32, expected: u32) -> bool {
        self.numeric_eq(actual, expected)
    }

    pub fn long_eq(self, actual: impl FnOnce() -> i64, expected: i64) -> bool {
        self.numeric_eq(actual, expected)
    }

    pub fn ulong_eq(self, actual: impl FnOnce() -> u64, expected: u64) -> bool {
        self.numeric_eq(actual, expected)
    }

    pub fn eq<T: PartialEq + Debug>(self, actual: impl FnOnce() -> T, expected: T) -> bool {
        let pending = self.begin();
        let actual = actual();
        finish_debug(pending, &self.label, &actual, &expected)
    }

    fn numeric_eq<T: PartialEq + Display>(self, actual: impl FnOnce() -> T, expected: T) -> bool {
        let pending = self.begin();
        let actual = actual();
        finish_numeric(pending, &self.label, actual, expected)
    }
}

// ============================================================================
// MACROS
// ============================================================================

/// Generic check: `expect!(condition, "failure {}", args...)`.
#[macro_export]
macro_rules! expect {
    ($cond:expr $(,)?) => {
        $crate::expect!($cond, "Expected {} to hold", stringify!($cond))
    };
    ($cond:expr, $($fmt:tt)+) => {{
        let __pending = $crate::reporter::begin(file!(), line!());
        let __passed: bool = $cond;
        __pending.finish(__passed, || format!($($fmt)+))
    }};
}

/// String equality; accepts anything that is `AsRef<str>`.
#[macro_export]
macro_rules! expect_str {
    ($actual:expr, $expected:expr $(,)?) => {{
        let __pending = $crate::reporter::begin(file!(), line!());
        let __actual = $actual;
        let __expected = $expected;
        $crate::assertions::finish_str(
            __pending,
            stringify!($actual),
            ::core::convert::AsRef::<str>::as_ref(&__actual),
            ::core::convert::AsRef::<str>::as_ref(&__expected),
        )
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __expect_numeric {
    ($ty:ty, $actual:expr, $expected:expr) => {{
        let __pending = $crate::reporter::begin(file!(), line!());
        let __actual: $ty = $actual;
        let __expected: $ty = $expected;
        $crate::assertions::finish_numeric(__pending, stringify!($actual), __actual, __expected)
    }};
}

/// `i32` equality.
#[macro_export]
macro_rules! expect_int {
    ($actual:expr, $expected:expr $(,)?) => {
        $crate::__expect_numeric!(i32, $actual, $expected)
    };
}

/// `u32` equality.
#[macro_export]
macro_rules! expect_uint {
    ($actual:expr, $expected:expr $(,)?) => {
        $crate::__expect_numeric!(u32, $actual, $expected)
    };
}

/// `i64` equality.
#[macro_export]
macro_rules! expect_long {
    ($actual:expr, $expected:expr $(,)?) => {
        $crate::__expect_numeric!(i64, $actual, $expected)
    };
}

/// `u64` equality.
#[macro_export]
macro_rules! expect_ulong {
    ($actual:expr, $expected:expr $(,)?) => {
        $crate::__expect_numeric!(u64, $actual, $expected)
    };
}

/// Equality of any `PartialEq + Debug` values.
#[macro_export]
macro_rules! expect_eq {
    ($actual:expr, $expected:expr $(,)?) => {{
        let __pending = $crate::reporter::begin(file!(), line!());
        let __actual = $actual;
        let __expected = $expected;
        $crate::assertions::finish_debug(__pending, stringify!($actual), &__actual, &__expected)
    }};
}

#[cfg(test)]
mod tests {
    use crate::reporter::capture;
    use std::cell::Cell;

    fn hello_world() -> &'static str {
        "Hello world"
    }

    fn lines(out: &str) -> Vec<&str> {
        out.lines().collect()
    }

    #[test]
    fn matching_strings_report_ok() {
        let (passed, out) = capture(|| crate::expect_str!(hello_world(), "Hello world"));
        assert!(passed);
        let lines = lines(&out);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("$$ASSERT_BEGIN|"));
        assert!(lines[0].ends_with(&format!("|{}", line!() - 5)));
        assert_eq!(lines[1], "$$ASSERT_END|OK");
    }

    #[test]
    fn string_mismatch_uses_the_expression_as_label() {
        let (passed, out) = capture(|| crate::expect_str!(String::from("Hi"), "Hello world"));
        assert!(!passed);
        assert_eq!(
            lines(&out)[1],
            "$$ASSERT_END|Expected String::from(\"Hi\") to return \"Hello world\" but was \"Hi\""
        );
    }

    #[test]
    fn integer_mismatch_mentions_both_values() {
        let (passed, out) = capture(|| crate::expect_int!(4, 5));
        assert!(!passed);
        let end = lines(&out)[1];
        assert_eq!(end, "$$ASSERT_END|Expected 4 to return 5 but was 4");
        assert!(end.contains('4') && end.contains('5'));
    }

    #[test]
    fn integer_family() {
        let (results, out) = capture(|| {
            [
                crate::expect_uint!(7u32, 7),
                crate::expect_long!(-9_000_000_000i64, -9_000_000_000),
                crate::expect_ulong!(u64::MAX, u64::MAX),
                crate::expect_ulong!(1u64 << 40, 0),
            ]
        });
        assert_eq!(results, [true, true, true, false]);
        assert_eq!(lines(&out).len(), 8);
        assert_eq!(
            lines(&out)[7],
            "$$ASSERT_END|Expected 1u64 << 40 to return 0 but was 1099511627776"
        );
    }

    #[test]
    fn actual_is_evaluated_once() {
        let calls = Cell::new(0);
        let next = || {
            calls.set(calls.get() + 1);
            calls.get()
        };
        let (_, out) = capture(|| crate::expect_int!(next(), 2));
        assert_eq!(calls.get(), 1);
        assert!(out.contains("but was 1"));
    }

    #[test]
    fn failure_does_not_short_circuit() {
        let (_, out) = capture(|| {
            crate::expect_int!(1, 2);
            crate::expect_int!(3, 3);
        });
        let lines = lines(&out);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("$$ASSERT_END|Expected"));
        assert_eq!(lines[3], "$$ASSERT_END|OK");
    }

    #[test]
    fn generic_expect_formats_lazily() {
        let (passed, out) = capture(|| crate::expect!(1 + 1 == 3, "math is {}", "broken"));
        assert!(!passed);
        assert_eq!(lines(&out)[1], "$$ASSERT_END|math is broken");

        let (passed, out) = capture(|| crate::expect!(false));
        assert!(!passed);
        assert_eq!(lines(&out)[1], "$$ASSERT_END|Expected false to hold");
    }

    #[test]
    fn debug_equality() {
        let (passed, out) = capture(|| crate::expect_eq!(vec![1, 2], vec![1, 3]));
        assert!(!passed);
        assert_eq!(
            lines(&out)[1],
            "$$ASSERT_END|Expected vec![1, 2] to return [1, 3] but was [1, 2]"
        );
    }

    #[test]
    fn check_builder_takes_an_explicit_label() {
        let (passed, out) = capture(|| {
            super::Check::at("module.c", 12)
                .labelled("helloWorld()")
                .str_eq(|| "Hello", "Hello world")
        });
        assert!(!passed);
        assert_eq!(
            out,
            "$$ASSERT_BEGIN|module.c|12\n$$ASSERT_END|Expected helloWorld() to return \"Hello world\" but was \"Hello\"\n"
        );

        let (passed, _) = capture(|| super::Check::at("module.c", 13).long_eq(|| 1 << 33, 1 << 33));
        assert!(passed);
    }

    #[test]
    #[allow(unreachable_code)]
    fn begin_is_written_before_the_expression_runs() {
        let ((), out) = capture(|| {
            let outcome = std::panic::catch_unwind(|| {
                crate::expect_int!(panic!("evaluation fault"), 1);
            });
            assert!(outcome.is_err());
        });
        assert_eq!(lines(&out).len(), 1);
        assert!(lines(&out)[0].starts_with("$$ASSERT_BEGIN|"));
    }
}
