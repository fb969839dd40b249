//! Dispatch strategy within a phase.

use serde::{Deserialize, Serialize};

/// How plugins of one phase are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One plugin at a time, in registration order
    Sequential,
    /// All plugins at once, bounded by the governor
    Parallel,
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self::Parallel
    }
}

impl ExecutionStrategy {
    /// Whether plugins of a phase may overlap in time.
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel)
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_parallel() {
        assert!(ExecutionStrategy::default().is_parallel());
    }

    #[test]
    fn test_config_names() {
        let parsed: ExecutionStrategy = serde_yaml::from_str("sequential").unwrap();
        assert_eq!(parsed, ExecutionStrategy::Sequential);
        assert!(serde_yaml::from_str::<ExecutionStrategy>("eager").is_err());
    }
}
