//! Capabilities: the permission axis for sandbox policy evaluation.

use serde::{Deserialize, Serialize};

/// What kind of operation a piece of code performs.
///
/// The sandbox works from an allow-list of these; anything a scan detects
/// that is not on the list is a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Reading files inside the scoped working directory.
    FileRead,
    /// Writing files inside the scoped working directory.
    FileWrite,
    /// Touching paths outside the working directory.
    HostFilesystem,
    Network,
    Subprocess,
    /// eval/exec, dynamic imports, unsafe deserialization.
    DynamicCode,
    NativeCode,
    EnvironmentAccess,
    ProcessExit,
    InteractiveInput,
}

impl Capability {
    /// The default allow-list: scoped file access, env reads, and exiting.
    pub fn default_allowed() -> Vec<Capability> {
        vec![
            Capability::FileRead,
            Capability::FileWrite,
            Capability::EnvironmentAccess,
            Capability::ProcessExit,
        ]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::FileRead => write!(f, "file_read"),
            Capability::FileWrite => write!(f, "file_write"),
            Capability::HostFilesystem => write!(f, "host_filesystem"),
            Capability::Network => write!(f, "network"),
            Capability::Subprocess => write!(f, "subprocess"),
            Capability::DynamicCode => write!(f, "dynamic_code"),
            Capability::NativeCode => write!(f, "native_code"),
            Capability::EnvironmentAccess => write!(f, "environment_access"),
            Capability::ProcessExit => write!(f, "process_exit"),
            Capability::InteractiveInput => write!(f, "interactive_input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde_names() {
        for cap in [
            Capability::FileRead,
            Capability::HostFilesystem,
            Capability::Network,
            Capability::InteractiveInput,
        ] {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json.trim_matches('"'), cap.to_string());
        }
    }

    #[test]
    fn test_default_allowed_denies_network_and_subprocess() {
        let allowed = Capability::default_allowed();
        assert!(allowed.contains(&Capability::FileWrite));
        assert!(!allowed.contains(&Capability::Network));
        assert!(!allowed.contains(&Capability::Subprocess));
    }
}
