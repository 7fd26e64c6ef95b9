use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a component may, must, or must not run as a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPolicy {
    /// Never runs as a background task; a task directive is rejected.
    #[default]
    Forbidden,
    /// The caller decides per invocation.
    Optional,
    /// Always runs as a background task; a plain call is rejected.
    Required,
}

impl TaskPolicy {
    /// True unless the policy is `Forbidden`.
    pub fn supports_tasks(&self) -> bool {
        !matches!(self, TaskPolicy::Forbidden)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPolicy::Forbidden => "forbidden",
            TaskPolicy::Optional => "optional",
            TaskPolicy::Required => "required",
        }
    }
}

/// `true` maps to `Optional`, `false` to `Forbidden`.
impl From<bool> for TaskPolicy {
    fn from(task: bool) -> Self {
        if task {
            TaskPolicy::Optional
        } else {
            TaskPolicy::Forbidden
        }
    }
}

impl fmt::Display for TaskPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task policy '{0}' (expected forbidden, optional or required)")]
pub struct ParsePolicyError(pub String);

impl FromStr for TaskPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forbidden" | "false" => Ok(TaskPolicy::Forbidden),
            "optional" | "true" => Ok(TaskPolicy::Optional),
            "required" => Ok(TaskPolicy::Required),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}
