//! Runtime configuration.
//!
//! Settings are named the way the operator types them (`set glibc 2.32`,
//! `set resolve-heap-via-heuristic force`). A config file is plain JSON with
//! the same field names in snake case.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// How the heap selector is allowed to pick a resolution strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Prefer debug symbols, fall back to heuristics.
    #[default]
    Auto,
    /// Heuristics only.
    Force,
}

impl FromStr for ResolutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ResolutionMode::Auto),
            "force" => Ok(ResolutionMode::Force),
            other => Err(format!("expected `auto` or `force`, got `{other}`")),
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionMode::Auto => f.write_str("auto"),
            ResolutionMode::Force => f.write_str("force"),
        }
    }
}

/// `<major>.<minor>` C library version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlibcVersion {
    pub major: u32,
    pub minor: u32,
}

impl GlibcVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for GlibcVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("expected <major>.<minor> (e.g. 2.32), got `{s}`"))?;
        let major = major
            .parse::<u32>()
            .map_err(|_| format!("invalid major version `{major}`"))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|_| format!("invalid minor version `{minor}`"))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for GlibcVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GlibcVersion> for String {
    fn from(v: GlibcVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for GlibcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Setting name → allocator symbol it overrides.
pub const HEAP_SYMBOL_SETTINGS: &[(&str, &str)] = &[
    ("main-arena", "main_arena"),
    ("mp", "mp_"),
    ("global-max-fast", "global_max_fast"),
    ("tcache", "tcache"),
    ("thread-arena", "thread_arena"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolve_heap_via_heuristic: ResolutionMode,
    /// Explicit C library version, used when detection fails.
    pub glibc: Option<GlibcVersion>,
    pub exception_verbose: bool,
    pub exception_debugger: bool,
    /// Operator-supplied allocator symbol addresses, keyed by symbol name.
    pub heap_addresses: BTreeMap<String, u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Whether failures should propagate to the host's own error reporting.
    pub fn wants_raw_errors(&self) -> bool {
        self.exception_verbose || self.exception_debugger
    }

    /// Apply `set <name> <value>`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason,
        };

        match name {
            "resolve-heap-via-heuristic" => {
                self.resolve_heap_via_heuristic = value.parse().map_err(invalid)?;
            }
            "glibc" => {
                self.glibc = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(invalid)?)
                };
            }
            "exception-verbose" => self.exception_verbose = parse_bool(value).map_err(invalid)?,
            "exception-debugger" => self.exception_debugger = parse_bool(value).map_err(invalid)?,
            other => {
                let Some((_, symbol)) = HEAP_SYMBOL_SETTINGS.iter().find(|(s, _)| *s == other)
                else {
                    return Err(ConfigError::UnknownSetting(other.to_string()));
                };
                let addr = parse_address(value).map_err(invalid)?;
                if addr == 0 {
                    self.heap_addresses.remove(*symbol);
                } else {
                    self.heap_addresses.insert(symbol.to_string(), addr);
                }
            }
        }
        Ok(())
    }

    /// `(name, value)` pairs for `show`, in a stable order.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (
                "resolve-heap-via-heuristic".to_string(),
                self.resolve_heap_via_heuristic.to_string(),
            ),
            (
                "glibc".to_string(),
                self.glibc
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("exception-verbose".to_string(), on_off(self.exception_verbose)),
            ("exception-debugger".to_string(), on_off(self.exception_debugger)),
        ];
        for (setting, symbol) in HEAP_SYMBOL_SETTINGS {
            let value = self
                .heap_addresses
                .get(*symbol)
                .map(|a| format!("{a:#x}"))
                .unwrap_or_else(|| "0".to_string());
            out.push((setting.to_string(), value));
        }
        out
    }
}

fn on_off(v: bool) -> String {
    let s = if v { "on" } else { "off" };
    s.to_string()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "1" | "yes" | "true" | "enable" => Ok(true),
        "off" | "0" | "no" | "false" | "disable" => Ok(false),
        other => Err(format!("expected on/off, got `{other}`")),
    }
}

fn parse_address(value: &str) -> Result<u64, String> {
    let v = value.trim();
    let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => v.parse::<u64>(),
    };
    parsed.map_err(|_| format!("expected an address, got `{v}`"))
}
