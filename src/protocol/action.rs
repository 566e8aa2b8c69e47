//! Filesystem operations a worker can be asked to perform

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A filesystem operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Mkdir,
    Touch,
    Stat,
    List,
    Read,
    Write,
    Delete,
    Rename,
    RenameExist,
    Truncate,
}

impl Action {
    pub const COUNT: usize = 10;

    /// Every action, in weight-table order
    pub const ALL: [Action; Action::COUNT] = [
        Action::Mkdir,
        Action::Touch,
        Action::Stat,
        Action::List,
        Action::Read,
        Action::Write,
        Action::Delete,
        Action::Rename,
        Action::RenameExist,
        Action::Truncate,
    ];

    /// Position in [`Action::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Mkdir => "mkdir",
            Action::Touch => "touch",
            Action::Stat => "stat",
            Action::List => "list",
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Rename => "rename",
            Action::RenameExist => "rename_exist",
            Action::Truncate => "truncate",
        }
    }

    /// Whether the target is a file (as opposed to a directory)
    pub fn targets_file(&self) -> bool {
        !matches!(self, Action::Mkdir | Action::List)
    }

    /// Whether the action changes file content or size
    pub fn mutates_content(&self) -> bool {
        matches!(self, Action::Write | Action::Truncate)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownAction { name: s.to_string() })
    }
}
