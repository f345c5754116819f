//! Plan options and desired instance states.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Per-request planning options.
///
/// Every key is optional on the wire; missing keys take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanOptions {
    /// Recreate every VM, even ones that could be kept.
    #[serde(default)]
    pub recreate: bool,
    /// Job name → requested state (`started`, `stopped`, ...).
    #[serde(default)]
    pub job_states: BTreeMap<String, String>,
    /// Old job name → new job name.
    #[serde(default)]
    pub job_rename: BTreeMap<String, String>,
}

/// Desired state of a job's instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    #[default]
    Started,
    Stopped,
    Detached,
    Restart,
    Recreate,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Started => "started",
            InstanceState::Stopped => "stopped",
            InstanceState::Detached => "detached",
            InstanceState::Restart => "restart",
            InstanceState::Recreate => "recreate",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(InstanceState::Started),
            "stopped" => Ok(InstanceState::Stopped),
            "detached" => Ok(InstanceState::Detached),
            "restart" => Ok(InstanceState::Restart),
            "recreate" => Ok(InstanceState::Recreate),
            other => Err(format!("unknown instance state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_when_keys_missing() {
        let options: PlanOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.recreate);
        assert!(options.job_states.is_empty());
        assert!(options.job_rename.is_empty());
    }

    #[test]
    fn instance_state_round_trips_through_str() {
        for state in [
            InstanceState::Started,
            InstanceState::Stopped,
            InstanceState::Detached,
            InstanceState::Restart,
            InstanceState::Recreate,
        ] {
            assert_eq!(state.as_str().parse::<InstanceState>(), Ok(state));
        }
        assert!("paused".parse::<InstanceState>().is_err());
    }
}
