//! Shared domain types, error kinds, and configuration for the ALD runtime.

pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod machine;
pub mod parameter;
pub mod process;
pub mod recipe;

pub use command::{Command, CommandPayload, CommandStatus, SetParameterPayload, StartRecipePayload, StopRecipePayload};
pub use config::{PlcMode, RuntimeConfig};
pub use error::AldError;
pub use health::{HealthState, Status as HealthStatus};
pub use machine::{is_valid_transition, MachineState, MachineStatus};
pub use parameter::{DataType, Parameter, ParameterId, ParameterValue, Quality, FLOAT_SCALE};
pub use process::{ProcessExecution, ProcessExecutionState, ProcessParameters, ProcessStatus, Progress};
pub use recipe::{total_leaf_steps, validate_loop_depth, Recipe, Step, MAX_LOOP_DEPTH};
