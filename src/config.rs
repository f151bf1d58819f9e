//! Run configuration and the suite manifest.
//!
//! Precedence, lowest first: [`RunConfig::default`], environment variables
//! ([`RunConfig::from_env`]), then command-line flags applied by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::HarnessError;
use crate::protocol::WireFormat;
use crate::runner::exec::LaunchProtocol;
use crate::runner::Isolation;

pub const ENV_TIMEOUT_MS: &str = "THINGSPECTOR_TIMEOUT_MS";
pub const ENV_WIRE: &str = "THINGSPECTOR_WIRE";
pub const ENV_FORMAT: &str = "THINGSPECTOR_FORMAT";
pub const ENV_NO_COLOR: &str = "NO_COLOR";

/// How a finished run is printed on stdout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Colored PASS/FAIL/SKIP lines and a summary.
    #[default]
    Text,
    /// The report as JSON.
    Json,
    /// The marker stream itself, as it was received.
    Raw,
}

impl OutputFormat {
    pub fn parse_setting(text: &str) -> Option<OutputFormat> {
        match text.trim().to_ascii_lowercase().as_str() {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            "raw" => Some(OutputFormat::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Configuration for one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub isolation: Isolation,
    pub wire: WireFormat,
    pub format: OutputFormat,
    /// Per-case deadline. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Case-insensitive substring a case name must contain to run.
    pub filter: Option<String>,
    pub use_colors: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::Process,
            wire: WireFormat::Pipe,
            format: OutputFormat::Text,
            timeout: None,
            filter: None,
            use_colors: atty::is(atty::Stream::Stdout),
        }
    }
}

impl RunConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, HarnessError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from any key/value source.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), HarnessError> {
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            self.timeout = Some(parse_timeout(ENV_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_WIRE) {
            self.wire = WireFormat::parse_setting(&value).ok_or_else(|| invalid(ENV_WIRE, &value))?;
        }
        if let Some(value) = lookup(ENV_FORMAT) {
            self.format =
                OutputFormat::parse_setting(&value).ok_or_else(|| invalid(ENV_FORMAT, &value))?;
        }
        // Any value, even empty, disables colors (https://no-color.org).
        if lookup(ENV_NO_COLOR).is_some() {
            self.use_colors = false;
        }
        Ok(())
    }

    pub fn with_timeout_ms(mut self, ms: Option<u64>) -> Self {
        if let Some(ms) = ms {
            self.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        self
    }

    /// Reason a case is not run, or `None` if it is selected.
    pub fn skip_reason(&self, name: &str) -> Option<String> {
        let filter = self.filter.as_deref()?;
        if name.to_lowercase().contains(&filter.to_lowercase()) {
            None
        } else {
            Some(format!("Filtered out by substring: {}", filter))
        }
    }

    /// Splits `cases` into those to run and the names of those skipped.
    pub fn select(&self, cases: Vec<(usize, String)>) -> (Vec<(usize, String)>, Vec<String>) {
        let mut selected = Vec::with_capacity(cases.len());
        let mut skipped = Vec::new();
        for (index, name) in cases {
            match self.skip_reason(&name) {
                Some(reason) => {
                    tracing::debug!(case = %name, "{}", reason);
                    skipped.push(name);
                }
                None => selected.push((index, name)),
            }
        }
        (selected, skipped)
    }
}

fn parse_timeout(key: &str, value: &str) -> Result<Duration, HarnessError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> HarnessError {
    HarnessError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    }
}

// ============================================================================
// MANIFEST
// ============================================================================

pub const MANIFEST_FILE: &str = "thingspector.yaml";
pub const DEFAULT_WORKDIR: &str = "inspect.work";
const TEST_SECTION_PREFIX: &str = "test ";

/// One `test <name>:` section of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestSection {
    pub binary: Option<PathBuf>,
    pub legacy: bool,
    pub timeout_ms: Option<u64>,
    pub filter: Option<String>,
}

/// A test binary to supervise, with its per-test settings resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub binary: PathBuf,
    pub protocol: LaunchProtocol,
    pub timeout_ms: Option<u64>,
    pub filter: Option<String>,
}

/// The list of tests a project declares, in file order.
///
/// ```yaml
/// workdir: inspect.work
/// test helloworld:
///   legacy: true
/// test parser:
///   binary: target/debug/parser-tests
///   timeout_ms: 2000
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub workdir: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = fs::read_to_string(path)?;
        Self::parse(path, &text)
    }

    /// Parses manifest text. Relative paths are resolved against the
    /// manifest's directory.
    pub fn parse(path: &Path, text: &str) -> Result<Self, HarnessError> {
        let manifest_error = |message: String| HarnessError::Manifest {
            path: path.to_path_buf(),
            message,
        };
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let root: Mapping = match serde_yaml::from_str::<Option<Mapping>>(text)? {
            Some(root) => root,
            None => Mapping::new(),
        };

        let mut workdir = PathBuf::from(DEFAULT_WORKDIR);
        let mut entries = Vec::new();
        for (key, value) in root {
            let key = match key {
                Value::String(key) => key,
                other => return Err(manifest_error(format!("non-string key {:?}", other))),
            };
            if key == "workdir" {
                let Value::String(dir) = value else {
                    return Err(manifest_error("workdir must be a string".to_string()));
                };
                workdir = PathBuf::from(dir);
                continue;
            }
            let Some(name) = key.strip_prefix(TEST_SECTION_PREFIX) else {
                return Err(manifest_error(format!(
                    "unknown section '{}', expected 'test <name>'",
                    key
                )));
            };
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(manifest_error("test section without a name".to_string()));
            }
            if entries.iter().any(|e: &ManifestEntry| e.name == name) {
                return Err(manifest_error(format!("test '{}' is listed twice", name)));
            }
            let section: ManifestSection = match value {
                Value::Null => ManifestSection::default(),
                other => serde_yaml::from_value(other)?,
            };
            entries.push(ManifestEntry {
                binary: section
                    .binary
                    .unwrap_or_else(|| default_binary(&workdir, &name)),
                protocol: if section.legacy {
                    LaunchProtocol::Legacy
                } else {
                    LaunchProtocol::Native
                },
                timeout_ms: section.timeout_ms,
                filter: section.filter,
                name,
            });
        }

        for entry in &mut entries {
            if entry.binary.is_relative() {
                entry.binary = base.join(&entry.binary);
            }
        }
        Ok(Self {
            workdir: base.join(workdir),
            entries,
        })
    }
}

/// Where a test's executable lands when the manifest does not say.
pub fn default_binary(workdir: &Path, name: &str) -> PathBuf {
    workdir.join(format!("test_{}{}", name, env::consts::EXE_SUFFIX))
}
