//! Recipe execution (spec.md §4.7): walks the step tree, actuates
//! hardware through `PlcGateway` directly for valves and purges, delegates
//! to C8 (`ald-paramwrite`) for parameter steps, and publishes progress
//! between every leaf step so an operator watching `process_execution_state`
//! sees live movement.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use ald_common::{AldError, ProcessExecution, ProcessExecutionState, ProcessStatus, Progress, Step};
use ald_paramwrite::ParameterWriter;
use ald_plc::PlcGateway;

use crate::walker::StepWalker;

pub struct RecipeExecutor {
    gateway: Arc<dyn PlcGateway>,
    param_writer: Arc<ParameterWriter>,
}

impl RecipeExecutor {
    pub fn new(gateway: Arc<dyn PlcGateway>, param_writer: Arc<ParameterWriter>) -> Self {
        Self {
            gateway,
            param_writer,
        }
    }

    /// Run `execution`'s recipe to completion, calling `on_progress` after
    /// every leaf step. Returns the terminal status: `Completed` if the
    /// tree runs out, `Aborted` if `cancellation` fires between steps, or
    /// `Err` (caller maps to `Failed`) on a hardware or validation fault.
    pub async fn run(
        &self,
        execution: &ProcessExecution,
        cancellation: CancellationToken,
        mut on_progress: impl FnMut(ProcessExecutionState),
    ) -> Result<ProcessStatus, AldError> {
        let mut walker = StepWalker::new(&execution.recipe_version.steps);
        let total = execution.total_steps;
        let mut state = ProcessExecutionState::initial(execution.id, total);
        let mut completed = 0u64;

        while let Some(step) = walker.next() {
            if cancellation.is_cancelled() {
                info!(execution_id = %execution.id, "recipe execution aborted between steps");
                return Ok(ProcessStatus::Aborted);
            }

            state.current_step_type = step.type_name().to_string();
            state.current_step_name = step.display_name();
            state.current_overall_step += 1;
            state.current_step_index += 1;

            self.execute_leaf(&step).await?;

            completed += 1;
            state.progress = Progress {
                completed_steps: completed,
                total_steps: total,
            };
            on_progress(state.clone());
        }

        info!(execution_id = %execution.id, completed, "recipe execution completed");
        Ok(ProcessStatus::Completed)
    }

    async fn execute_leaf(&self, step: &Step) -> Result<(), AldError> {
        match step {
            Step::Valve {
                valve_number,
                duration_ms,
            } => self.gateway.actuate_valve(*valve_number, *duration_ms).await,
            Step::Purge { duration_ms, .. } => self.gateway.execute_purge(*duration_ms).await,
            Step::Parameter {
                parameter_id,
                target_value,
            } => self.param_writer.set_parameter(parameter_id, *target_value).await,
            Step::Loop { iterations, .. } if *iterations == 0 => Ok(()),
            Step::Loop { .. } => unreachable!("StepWalker never yields a non-empty Loop directly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ald_common::{
        total_leaf_steps, DataType, Parameter, ProcessExecution, ProcessParameters, ProcessStatus,
        Recipe,
    };
    use ald_db::DualModeWriter;
    use ald_plc::{ParameterMetadataCache, SimulationGateway};
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    fn param(id: &str) -> Parameter {
        Parameter {
            id: id.into(),
            name: id.into(),
            modbus_address: 0,
            data_type: DataType::Float,
            min_value: Some(0.0),
            max_value: Some(400.0),
            read_cadence_ms: None,
            active: true,
        }
    }

    fn lazy_pool() -> sqlx::PgPool {
        // Never actually connected: the scenarios under test either never
        // reach the database (cancellation, bounds rejection) or would
        // only be exercised by a live-database integration test.
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/does_not_matter")
            .expect("lazy pool construction never touches the network")
    }

    fn executor() -> RecipeExecutor {
        let gateway: Arc<dyn PlcGateway> = Arc::new(SimulationGateway::new());
        let metadata = Arc::new(ParameterMetadataCache::new(|| async {
            Ok(vec![param("chamber_temperature")])
        }));
        let writer = Arc::new(DualModeWriter::new(lazy_pool()));
        let param_writer = Arc::new(ParameterWriter::new(gateway.clone(), writer, metadata));
        RecipeExecutor::new(gateway, param_writer)
    }

    fn execution_with_steps(steps: Vec<Step>) -> ProcessExecution {
        let total_steps = total_leaf_steps(&steps);
        let recipe = Recipe {
            id: Uuid::new_v4(),
            version: 1,
            name: "test recipe".into(),
            steps,
            chamber_temperature_set_point: None,
            pressure_set_point: None,
        };
        ProcessExecution {
            id: Uuid::new_v4(),
            machine_id: "m1".into(),
            recipe_id: recipe.id,
            recipe_version: recipe.clone(),
            operator_id: "op1".into(),
            session_id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            status: ProcessStatus::Running,
            error_message: None,
            parameters: ProcessParameters::from(&recipe),
            total_steps,
        }
    }

    #[tokio::test]
    async fn runs_valve_and_purge_leaves_to_completion() {
        let exec = executor();
        let execution = execution_with_steps(vec![
            Step::Valve {
                valve_number: 3,
                duration_ms: 1,
            },
            Step::Purge {
                duration_ms: 1,
                gas_type: None,
                flow_rate: None,
            },
        ]);

        let mut progress_calls = 0u64;
        let status = exec
            .run(&execution, CancellationToken::new(), |_state| progress_calls += 1)
            .await
            .unwrap();

        assert_eq!(status, ProcessStatus::Completed);
        assert_eq!(progress_calls, 2);
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_steps() {
        let exec = executor();
        let execution = execution_with_steps(vec![
            Step::Valve {
                valve_number: 1,
                duration_ms: 1,
            },
            Step::Valve {
                valve_number: 2,
                duration_ms: 1,
            },
        ]);

        let token = CancellationToken::new();
        token.cancel();

        let status = exec.run(&execution, token, |_| {}).await.unwrap();
        assert_eq!(status, ProcessStatus::Aborted);
    }

    #[tokio::test]
    async fn out_of_bounds_parameter_step_fails_the_recipe() {
        let exec = executor();
        let execution = execution_with_steps(vec![Step::Parameter {
            parameter_id: "chamber_temperature".into(),
            target_value: 9000.0,
        }]);

        let result = exec.run(&execution, CancellationToken::new(), |_| {}).await;
        assert!(result.is_err());
    }
}
