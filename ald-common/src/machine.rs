//! Machine state (spec.md §3): the (status, current_process_id) pair that
//! must always be read and written atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Machine status. `Completed` is a transient status a recipe passes
/// through on its way back to `Idle` (see the transition table in
/// spec.md §4.2; `offline` is the pre-first-run default, documented in
/// §3's overview alongside `idle`/`processing`/`error`). DESIGN.md records
/// this as resolving the §4.2/§3 enum mismatch in favor of the explicit
/// transition table, since that table is the binding operation spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Idle,
    Processing,
    Error,
    Offline,
    Completed,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Error => "error",
            Self::Offline => "offline",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for MachineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "processing" => Ok(Self::Processing),
            "error" => Ok(Self::Error),
            "offline" => Ok(Self::Offline),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown machine status: {other}")),
        }
    }
}

/// The (status, current_process_id) pair. Invariant (spec.md §3):
/// `status = processing <=> current_process_id != null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub status: MachineStatus,
    pub current_process_id: Option<Uuid>,
    pub last_heartbeat: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl MachineState {
    pub fn is_processing(&self) -> bool {
        self.status == MachineStatus::Processing && self.current_process_id.is_some()
    }

    /// Validate the pair invariant holds; used before persisting a state row.
    pub fn is_consistent(&self) -> bool {
        (self.status == MachineStatus::Processing) == self.current_process_id.is_some()
    }
}

/// The valid transition table from spec.md §4.2. Any pair not listed here
/// fails with `StateConflict::InvalidTransition`.
pub fn is_valid_transition(from: MachineStatus, to: MachineStatus) -> bool {
    use MachineStatus::*;
    matches!(
        (from, to),
        (Idle, Processing)
            | (Processing, Idle)
            | (Processing, Error)
            | (Processing, Completed)
            | (Error, Idle)
            | (Completed, Idle)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions_match_spec_table() {
        use MachineStatus::*;
        assert!(is_valid_transition(Idle, Processing));
        assert!(is_valid_transition(Processing, Idle));
        assert!(is_valid_transition(Processing, Error));
        assert!(is_valid_transition(Processing, Completed));
        assert!(is_valid_transition(Error, Idle));
        assert!(is_valid_transition(Completed, Idle));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        use MachineStatus::*;
        assert!(!is_valid_transition(Idle, Error));
        assert!(!is_valid_transition(Error, Processing));
        assert!(!is_valid_transition(Offline, Processing));
        assert!(!is_valid_transition(Processing, Processing));
    }

    #[test]
    fn consistency_invariant() {
        let consistent = MachineState {
            status: MachineStatus::Processing,
            current_process_id: Some(Uuid::new_v4()),
            last_heartbeat: Utc::now(),
            error_message: None,
        };
        assert!(consistent.is_consistent());
        assert!(consistent.is_processing());

        let inconsistent = MachineState {
            status: MachineStatus::Processing,
            current_process_id: None,
            last_heartbeat: Utc::now(),
            error_message: None,
        };
        assert!(!inconsistent.is_consistent());
    }
}
