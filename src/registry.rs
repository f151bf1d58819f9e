//! # Case Registry
//!
//! A [`Suite`] is the Rust form of one test file: an ordered list of named
//! cases plus one setup and one teardown hook shared by all of them.
//!
//! Registry invariants:
//! - enumeration order is registration order, never sorted;
//! - names are unique, non-empty and safe to put on a marker line;
//! - every hook and body receives the same explicit fixture `F`, built fresh
//!   (`F::default()`) for each case, so no case depends on ambient globals.
//!
//! ```rust
//! use thingspector::prelude::*;
//!
//! #[derive(Default)]
//! struct Fixture { greeting: String }
//!
//! fn setup(fx: &mut Fixture) { fx.greeting = "Hello world".to_string(); }
//! fn teardown(_: &mut Fixture) {}
//! fn case_greeting(fx: &mut Fixture) { expect_str!(fx.greeting.as_str(), "Hello world"); }
//!
//! let suite = thingspector::suite!("greeter", Fixture, setup, teardown, [case_greeting]).unwrap();
//! assert_eq!(suite.cases()[0].name(), "greeting");
//! ```

use std::collections::HashSet;
use std::fmt;

use crate::error::HarnessError;

/// Setup, teardown and case bodies all share this shape.
pub type CaseFn<F> = fn(&mut F);

/// Prefix stripped from function names by [`suite!`](crate::suite).
pub const CASE_PREFIX: &str = "case_";

fn noop<F>(_: &mut F) {}

/// One named unit of test logic.
pub struct TestCase<F> {
    name: String,
    body: CaseFn<F>,
}

impl<F> TestCase<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> CaseFn<F> {
        self.body
    }
}

impl<F> fmt::Debug for TestCase<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

/// An ordered collection of cases sharing one setup and one teardown.
pub struct Suite<F = ()> {
    name: String,
    setup: CaseFn<F>,
    teardown: CaseFn<F>,
    cases: Vec<TestCase<F>>,
    names: HashSet<String>,
}

impl<F> Suite<F> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            setup: noop::<F>,
            teardown: noop::<F>,
            cases: Vec::new(),
            names: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a case at the end of the suite.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        body: CaseFn<F>,
    ) -> Result<&mut Self, HarnessError> {
        let name = name.into();
        validate_name(&name)?;
        if !self.names.insert(name.clone()) {
            return Err(HarnessError::DuplicateCase { name });
        }
        self.cases.push(TestCase { name, body });
        Ok(self)
    }

    /// Installs the setup and teardown hooks for every case of the suite.
    pub fn set_hooks(&mut self, setup: CaseFn<F>, teardown: CaseFn<F>) -> &mut Self {
        self.setup = setup;
        self.teardown = teardown;
        self
    }

    pub fn setup(&self) -> CaseFn<F> {
        self.setup
    }

    pub fn teardown(&self) -> CaseFn<F> {
        self.teardown
    }

    /// Cases in registration order.
    pub fn cases(&self) -> &[TestCase<F>] {
        &self.cases
    }

    pub fn case(&self, index: usize) -> Result<&TestCase<F>, HarnessError> {
        self.cases
            .get(index)
            .ok_or(HarnessError::CaseIndexOutOfRange {
                index,
                count: self.cases.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// `(index, name)` of every case, in order.
    pub fn names(&self) -> Vec<(usize, String)> {
        self.cases
            .iter()
            .enumerate()
            .map(|(index, case)| (index, case.name.clone()))
            .collect()
    }
}

impl<F> fmt::Debug for Suite<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("cases", &self.cases)
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), HarnessError> {
    if name.trim().is_empty() {
        return Err(HarnessError::EmptyCaseName);
    }
    if name.contains(['|', ':', '\n', '\r']) {
        return Err(HarnessError::InvalidCaseName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Case name for a function identifier: `case_helloWorld` becomes `helloWorld`.
pub fn case_name(ident: &str) -> &str {
    let ident = ident.rsplit("::").next().unwrap_or(ident).trim();
    match ident.strip_prefix(CASE_PREFIX) {
        Some(rest) if !rest.is_empty() => rest,
        _ => ident,
    }
}

/// Declares a suite from function names, in declaration order.
///
/// `suite!(name, Fixture, setup, teardown, [case_a, case_b])` or, without
/// hooks, `suite!(name, Fixture, [case_a, case_b])`. Evaluates to
/// `Result<Suite<Fixture>, HarnessError>`.
#[macro_export]
macro_rules! suite {
    (@register $suite:ident, $fixture:ty, [$($case:ident),*]) => {{
        let mut __suite = $suite;
        (|| -> ::core::result::Result<$crate::registry::Suite<$fixture>, $crate::HarnessError> {
            $(
                __suite.register(
                    $crate::registry::case_name(stringify!($case)),
                    $case as $crate::registry::CaseFn<$fixture>,
                )?;
            )*
            Ok(__suite)
        })()
    }};
    ($name:expr, $fixture:ty, [$($case:ident),* $(,)?] $(,)?) => {{
        let __suite = $crate::registry::Suite::<$fixture>::new($name);
        $crate::suite!(@register __suite, $fixture, [$($case),*])
    }};
    ($name:expr, $fixture:ty, $setup:expr, $teardown:expr, [$($case:ident),* $(,)?] $(,)?) => {{
        let mut __suite = $crate::registry::Suite::<$fixture>::new($name);
        __suite.set_hooks($setup, $teardown);
        $crate::suite!(@register __suite, $fixture, [$($case),*])
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        hits: u32,
    }

    fn bump(fx: &mut Counter) {
        fx.hits += 1;
    }

    fn case_hello_world(_: &mut Counter) {}
    fn case_fault(_: &mut Counter) {}
    fn case_hello_world_again(_: &mut Counter) {}

    #[test]
    fn enumeration_follows_registration_order() {
        let mut suite = Suite::<Counter>::new("order");
        suite
            .register("zeta", bump)
            .unwrap()
            .register("alpha", bump)
            .unwrap()
            .register("mid", bump)
            .unwrap();
        let names: Vec<_> = suite.cases().iter().map(TestCase::name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(
            suite.names(),
            vec![
                (0, "zeta".to_string()),
                (1, "alpha".to_string()),
                (2, "mid".to_string())
            ]
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut suite = Suite::<Counter>::new("dupes");
        suite.register("twice", bump).unwrap();
        let err = suite.register("twice", bump).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateCase { ref name } if name == "twice"));
        assert_eq!(suite.len(), 1);
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let mut suite = Suite::<Counter>::new("names");
        assert!(matches!(
            suite.register("  ", bump),
            Err(HarnessError::EmptyCaseName)
        ));
        assert!(matches!(
            suite.register("a|b", bump),
            Err(HarnessError::InvalidCaseName { .. })
        ));
        assert!(matches!(
            suite.register("line\nbreak", bump),
            Err(HarnessError::InvalidCaseName { .. })
        ));
        assert!(suite.is_empty());
    }

    #[test]
    fn hooks_default_to_noops_and_are_shared() {
        let mut suite = Suite::<Counter>::new("hooks");
        suite.register("one", bump).unwrap();
        let mut fx = Counter::default();
        (suite.setup())(&mut fx);
        (suite.teardown())(&mut fx);
        assert_eq!(fx.hits, 0);

        suite.set_hooks(bump, bump);
        (suite.setup())(&mut fx);
        (suite.case(0).unwrap().body())(&mut fx);
        (suite.teardown())(&mut fx);
        assert_eq!(fx.hits, 3);
    }

    #[test]
    fn out_of_range_index() {
        let suite = Suite::<Counter>::new("empty");
        assert!(matches!(
            suite.case(0),
            Err(HarnessError::CaseIndexOutOfRange { index: 0, count: 0 })
        ));
    }

    #[test]
    fn case_names_from_identifiers() {
        assert_eq!(case_name("case_helloWorld"), "helloWorld");
        assert_eq!(case_name("tests :: case_fault"), "fault");
        assert_eq!(case_name("plain"), "plain");
        assert_eq!(case_name("case_"), "case_");
    }

    #[test]
    fn suite_macro_keeps_declaration_order() {
        let suite = crate::suite!(
            "helloworld",
            Counter,
            bump,
            bump,
            [case_hello_world, case_fault, case_hello_world_again]
        )
        .unwrap();
        let names: Vec<_> = suite.cases().iter().map(TestCase::name).collect();
        assert_eq!(names, ["hello_world", "fault", "hello_world_again"]);
        assert_eq!(suite.name(), "helloworld");

        let bare = crate::suite!("bare", Counter, [case_fault]).unwrap();
        assert_eq!(bare.len(), 1);
    }

    #[test]
    fn suite_macro_reports_duplicates() {
        let err = crate::suite!("dupes", Counter, [case_fault, case_fault]).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateCase { .. }));
    }
}
