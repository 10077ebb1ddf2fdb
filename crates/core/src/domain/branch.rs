use serde::{Deserialize, Serialize};

pub const DEFAULT_UNKNOWN_BRANCH_LABEL: &str = "Unknown Branch";

/// Grouping key for per-branch reporting.
///
/// Named branches keep the raw upstream string (no case folding), so two
/// spellings of the same branch stay in separate buckets exactly as the
/// upstream system reports them. `Unknown` sorts after every named branch.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKey {
    Named(String),
    Unknown,
}

impl BranchKey {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(name) if !name.trim().is_empty() => Self::Named(name.to_string()),
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Unknown => None,
        }
    }

    pub fn label<'a>(&'a self, unknown_label: &'a str) -> &'a str {
        self.name().unwrap_or(unknown_label)
    }
}
