//! Harness error type.
//!
//! Assertion failures and case faults are *not* errors: they are outcomes and
//! flow through the report. `HarnessError` covers everything that stops the
//! harness itself from doing its job: a badly built registry, a test binary
//! that cannot be launched, a manifest that does not parse.

use std::fmt::Display;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for registry, launch, configuration and I/O failures.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("case name must not be empty")]
    EmptyCaseName,

    #[error("case '{name}' is registered more than once")]
    DuplicateCase { name: String },

    #[error("case name {name:?} contains a reserved character")]
    InvalidCaseName { name: String },

    #[error("case index {index} is out of range (suite has {count} cases)")]
    CaseIndexOutOfRange { index: usize, count: usize },

    #[error("failed to launch '{}'", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' did not report a case count (got {output:?})", path.display())]
    MalformedCount { path: PathBuf, output: String },

    #[error("invalid manifest '{}': {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("invalid value {value:?} for {key}")]
    InvalidSetting { key: String, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    fn code_str(&self) -> &'static str {
        match self {
            HarnessError::EmptyCaseName => "thingspector::registry::empty_name",
            HarnessError::DuplicateCase { .. } => "thingspector::registry::duplicate",
            HarnessError::InvalidCaseName { .. } => "thingspector::registry::invalid_name",
            HarnessError::CaseIndexOutOfRange { .. } => "thingspector::runner::index",
            HarnessError::Launch { .. } => "thingspector::runner::launch",
            HarnessError::MalformedCount { .. } => "thingspector::runner::count",
            HarnessError::Manifest { .. } => "thingspector::config::manifest",
            HarnessError::InvalidSetting { .. } => "thingspector::config::setting",
            HarnessError::Io(_) => "thingspector::io",
            HarnessError::Json(_) => "thingspector::json",
            HarnessError::Yaml(_) => "thingspector::yaml",
        }
    }

    fn help_text(&self) -> Option<String> {
        match self {
            HarnessError::DuplicateCase { .. } => {
                Some("case names identify cases in the report; rename one of them".to_string())
            }
            HarnessError::InvalidCaseName { .. } => Some(
                "names may not contain '|', ':' or line breaks, they would corrupt the marker stream"
                    .to_string(),
            ),
            HarnessError::CaseIndexOutOfRange { count, .. } => {
                Some(format!("valid indices are 0..{}", count))
            }
            HarnessError::Launch { .. } => {
                Some("check that the test executable was built and is executable".to_string())
            }
            HarnessError::MalformedCount { .. } => Some(
                "legacy runners print only the number of cases when invoked without arguments"
                    .to_string(),
            ),
            _ => None,
        }
    }
}

impl Diagnostic for HarnessError {
    fn code<'a>(&'a self) -> Option<Box<dyn Display + 'a>> {
        Some(Box::new(self.code_str()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn Display + 'a>> {
        self.help_text()
            .map(|h| Box::new(h) as Box<dyn Display + 'a>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_case_carries_code_and_help() {
        let err = HarnessError::DuplicateCase {
            name: "helloWorld".to_string(),
        };
        assert_eq!(err.to_string(), "case 'helloWorld' is registered more than once");
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("thingspector::registry::duplicate")
        );
        assert!(err.help().is_some());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::Io(_)));
        assert!(err.help().is_none());
    }
}
