//! Process execution records (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recipe::Recipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Preparing,
    Running,
    Paused,
    Completed,
    Failed,
    /// Operator-requested stop (spec.md §9 open question 2: this
    /// implementation uses `Aborted` exclusively; `"stopped"` never
    /// appears).
    Aborted,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// One run of one recipe on the machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExecution {
    pub id: Uuid,
    pub machine_id: String,
    pub recipe_id: Uuid,
    /// Frozen recipe snapshot, copied in full at start time.
    pub recipe_version: Recipe,
    pub operator_id: String,
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ProcessStatus,
    pub error_message: Option<String>,
    pub parameters: ProcessParameters,
    pub total_steps: u64,
}

/// The top-level parameter settings snapshot from the recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessParameters {
    pub chamber_temperature_set_point: Option<f64>,
    pub pressure_set_point: Option<f64>,
}

impl From<&Recipe> for ProcessParameters {
    fn from(recipe: &Recipe) -> Self {
        Self {
            chamber_temperature_set_point: recipe.chamber_temperature_set_point,
            pressure_set_point: recipe.pressure_set_point,
        }
    }
}

/// Progress counters reported alongside `ProcessExecutionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed_steps: u64,
    pub total_steps: u64,
}

/// Running progress row for a process execution, updated between every
/// leaf step by the recipe executor (spec.md §4.7). This is the operator's
/// only visibility into an in-flight recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExecutionState {
    pub execution_id: Uuid,
    pub current_step_index: u64,
    pub current_overall_step: u64,
    pub total_overall_steps: u64,
    pub current_step_type: String,
    pub current_step_name: String,
    pub progress: Progress,
}

impl ProcessExecutionState {
    pub fn initial(execution_id: Uuid, total_overall_steps: u64) -> Self {
        Self {
            execution_id,
            current_step_index: 0,
            current_overall_step: 0,
            total_overall_steps,
            current_step_type: String::new(),
            current_step_name: String::new(),
            progress: Progress {
                completed_steps: 0,
                total_steps: total_overall_steps,
            },
        }
    }
}
