//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Messaging**: `Priority`, `EventSource`, `Payload`, `Timestamp`
//! - **Bootstrap**: `ModuleDescriptor`

use crate::errors::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Arbitrary structured data carried by messages, events and API calls.
pub type Payload = serde_json::Value;

/// Wall-clock timestamp used for every recorded entity.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current wall-clock time.
#[must_use]
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

// =============================================================================
// MESSAGING
// =============================================================================

/// Message priority.
///
/// Recorded on every message. The bus queue is FIFO; `High` only wakes the
/// processor eagerly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Normal => write!(f, "Normal"),
            Priority::High => write!(f, "High"),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(ParseError::UnknownPriority(s.to_string())),
        }
    }
}

/// Who raised an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Module that raised the event.
    pub module: String,
    /// Command or operation being executed, if known.
    pub command: Option<String>,
    /// OS user running the process.
    pub user: String,
    /// Host name of the machine.
    pub machine: String,
}

impl EventSource {
    /// Source attributed to `module`, with user and machine taken from the
    /// process environment.
    pub fn module(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            command: None,
            user: env_or_unknown(&["USER", "USERNAME"]),
            machine: env_or_unknown(&["HOSTNAME", "COMPUTERNAME"]),
        }
    }

    /// Attach the command that raised the event.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

impl Default for EventSource {
    fn default() -> Self {
        Self::module("Unknown")
    }
}

fn env_or_unknown(keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

// =============================================================================
// BOOTSTRAP
// =============================================================================

/// A module the bootstrap knows how to load.
///
/// Declared statically by the runtime; `path` is relative to the modules root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    /// A required module failing to load is reported as a hard failure in
    /// the import summary.
    pub required: bool,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: String::new(),
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reject descriptors that cannot be loaded at all.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.name.trim().is_empty() {
            return Err(ParseError::InvalidDescriptor("empty module name".into()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ParseError::InvalidDescriptor(format!(
                "module {} has no path",
                self.name
            )));
        }
        Ok(())
    }
}
