//! Orchestrator-facing machine states.

use std::fmt;

use serde::Serialize;

use crate::hcloud::ServerStatus;

/// Machine state as reported to the orchestrator.
///
/// The mapping from [`ServerStatus`] is lossy and one-directional. `None`
/// means the provider reports a status the orchestrator does not model
/// (deleting, migrating, and so on); it is not an error and the readiness
/// poll waits through it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum MachineState {
    /// No modelled state applies.
    None,
    /// The server is being created or booted.
    Starting,
    /// The server is up.
    Running,
    /// The server is powered off.
    Stopped,
    /// The server could not be resolved.
    Error,
}

impl MachineState {
    /// Name used on the orchestrator wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

impl From<ServerStatus> for MachineState {
    fn from(status: ServerStatus) -> Self {
        match status {
            ServerStatus::Initializing => Self::Starting,
            ServerStatus::Running => Self::Running,
            ServerStatus::Off => Self::Stopped,
            ServerStatus::Starting
            | ServerStatus::Stopping
            | ServerStatus::Deleting
            | ServerStatus::Migrating
            | ServerStatus::Rebuilding
            | ServerStatus::Unknown => Self::None,
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ServerStatus::Initializing, MachineState::Starting)]
    #[case(ServerStatus::Running, MachineState::Running)]
    #[case(ServerStatus::Off, MachineState::Stopped)]
    #[case(ServerStatus::Starting, MachineState::None)]
    #[case(ServerStatus::Stopping, MachineState::None)]
    #[case(ServerStatus::Deleting, MachineState::None)]
    #[case(ServerStatus::Migrating, MachineState::None)]
    #[case(ServerStatus::Rebuilding, MachineState::None)]
    #[case(ServerStatus::Unknown, MachineState::None)]
    fn provider_status_maps_onto_machine_state(
        #[case] status: ServerStatus,
        #[case] expected: MachineState,
    ) {
        assert_eq!(MachineState::from(status), expected);
    }

    #[test]
    fn display_uses_orchestrator_names() {
        assert_eq!(MachineState::Stopped.to_string(), "Stopped");
        assert_eq!(MachineState::None.to_string(), "None");
    }
}
