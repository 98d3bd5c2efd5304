//! Command dispatch: one handler per `CommandType`, typed payloads
//! decoded at entry (spec.md §9's re-architecture note).
//!
//! Operator-session reuse is grounded on
//! `original_source/recipe_flow/starter.py::get_or_create_operator_session`:
//! look up an active session for the operator on this machine, reuse it,
//! otherwise create one.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use ald_common::{
    AldError, Command, CommandPayload, MachineStatus, ProcessExecution, ProcessParameters,
    ProcessStatus, Recipe,
};
use ald_db::StateRepository;
use ald_paramwrite::ParameterWriter;
use ald_recipe::RecipeExecutor;

/// A recipe run spawned by `start_recipe`: the cooperative-cancellation
/// flag and the join handle `stop_recipe` awaits before returning
/// (spec.md §5: "spawned on start_recipe, joined on stop_recipe or
/// natural completion").
struct RunningRecipe {
    cancellation: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

pub struct Dispatcher {
    machine_id: String,
    pool: PgPool,
    state_repo: Arc<StateRepository>,
    executor: Arc<RecipeExecutor>,
    param_writer: Arc<ParameterWriter>,
    /// The currently running recipe, if any. Only one recipe may run at a
    /// time (spec.md §4.6 single-flight rule).
    active_run: tokio::sync::Mutex<Option<RunningRecipe>>,
}

impl Dispatcher {
    pub fn new(
        machine_id: String,
        pool: PgPool,
        state_repo: Arc<StateRepository>,
        executor: Arc<RecipeExecutor>,
        param_writer: Arc<ParameterWriter>,
    ) -> Self {
        Self {
            machine_id,
            pool,
            state_repo,
            executor,
            param_writer,
            active_run: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn dispatch(self: &Arc<Self>, command: &Command) -> Result<(), AldError> {
        let payload = CommandPayload::decode(&command.command_type, &command.parameters)?;
        match payload {
            CommandPayload::StartRecipe(p) => self.start_recipe(p.recipe_id, p.operator_id).await,
            CommandPayload::StopRecipe(_) => self.stop_recipe().await,
            CommandPayload::SetParameter(p) => {
                self.param_writer.set_parameter(&p.parameter_id, p.value).await
            }
        }
    }

    async fn start_recipe(
        self: &Arc<Self>,
        recipe_id: Uuid,
        operator_id: Option<String>,
    ) -> Result<(), AldError> {
        let mut guard = self.active_run.lock().await;
        if guard.is_some() {
            return Err(AldError::StateConflict(
                "a recipe is already running on this machine".into(),
            ));
        }

        let machine_state = self.state_repo.get_machine_state(&self.machine_id).await?;
        if machine_state.status != MachineStatus::Idle {
            return Err(AldError::StateConflict(format!(
                "machine must be idle to start a recipe, currently {}",
                machine_state.status.as_str()
            )));
        }

        let recipe = self.load_recipe(recipe_id).await?;
        let operator_id = match operator_id {
            Some(id) => id,
            None => self.current_operator_id().await?,
        };
        let session_id = self.get_or_create_operator_session(&operator_id).await?;

        let total_steps = recipe.total_steps();
        let execution = ProcessExecution {
            id: Uuid::new_v4(),
            machine_id: self.machine_id.clone(),
            recipe_id,
            parameters: ProcessParameters::from(&recipe),
            recipe_version: recipe,
            operator_id,
            session_id,
            start_time: Utc::now(),
            end_time: None,
            status: ProcessStatus::Preparing,
            error_message: None,
            total_steps,
        };

        self.insert_process_execution(&execution).await?;
        self.state_repo
            .transition_state(
                &self.machine_id,
                MachineStatus::Idle,
                MachineStatus::Processing,
                Some(execution.id),
            )
            .await?;

        let cancellation = CancellationToken::new();
        let task_cancellation = cancellation.clone();
        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            dispatcher.run_recipe(execution, task_cancellation).await;
        });

        *guard = Some(RunningRecipe { cancellation, handle });
        Ok(())
    }

    /// Drive one recipe to a terminal state. Runs as a detached task
    /// (spec.md §5): `start_recipe` returns as soon as this is spawned,
    /// and `stop_recipe` is the only caller that waits for it to finish.
    async fn run_recipe(self: Arc<Self>, execution: ProcessExecution, cancellation: CancellationToken) {
        let execution_id = execution.id;

        let result = self
            .executor
            .run(&execution, cancellation, |state| {
                info!(
                    execution_id = %execution_id,
                    step = state.current_overall_step,
                    total = state.total_overall_steps,
                    "recipe progress"
                );
            })
            .await;

        let final_status = match result {
            Ok(status) => status,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "recipe execution failed");
                ProcessStatus::Failed
            }
        };

        if let Err(e) = finalize_process_execution(&self.pool, execution_id, final_status).await {
            warn!(execution_id = %execution_id, error = %e, "failed to record process execution result");
        }

        let target_status = match final_status {
            ProcessStatus::Completed => MachineStatus::Completed,
            _ => MachineStatus::Error,
        };
        if let Err(e) = self
            .state_repo
            .transition_state(&self.machine_id, MachineStatus::Processing, target_status, None)
            .await
        {
            warn!(error = %e, "failed to transition machine out of processing");
        }

        *self.active_run.lock().await = None;
    }

    /// Cancel the active recipe and wait for its task to finish before
    /// returning, so the command is only marked completed once the
    /// executor has actually acknowledged (spec.md §4.6).
    async fn stop_recipe(&self) -> Result<(), AldError> {
        let running = self.active_run.lock().await.take();
        match running {
            Some(RunningRecipe { cancellation, handle }) => {
                cancellation.cancel();
                let _ = handle.await;
                Ok(())
            }
            None => Err(AldError::StateConflict("no recipe is currently running".into())),
        }
    }

    async fn load_recipe(&self, recipe_id: Uuid) -> Result<Recipe, AldError> {
        let row: (Uuid, i32, String, serde_json::Value, Option<f64>, Option<f64>) = sqlx::query_as(
            r#"
            SELECT id, version, name, steps, chamber_temperature_set_point, pressure_set_point
            FROM recipes
            WHERE id = $1
            "#,
        )
        .bind(recipe_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?
        .ok_or_else(|| AldError::Validation(format!("recipe {recipe_id} not found")))?;

        let steps = serde_json::from_value(row.3)
            .map_err(|e| AldError::DataIntegrityFault(format!("malformed recipe steps: {e}")))?;

        Ok(Recipe {
            id: row.0,
            version: row.1,
            name: row.2,
            steps,
            chamber_temperature_set_point: row.4,
            pressure_set_point: row.5,
        })
    }

    async fn current_operator_id(&self) -> Result<String, AldError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT current_operator_id FROM machines WHERE id = $1")
                .bind(&self.machine_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AldError::DbTransport(e.to_string()))?;

        row.and_then(|(id,)| id)
            .ok_or_else(|| AldError::Validation("no operator specified and machine has no current operator".into()))
    }

    async fn get_or_create_operator_session(&self, operator_id: &str) -> Result<Uuid, AldError> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM operator_sessions
            WHERE operator_id = $1 AND machine_id = $2 AND status = 'active'
            LIMIT 1
            "#,
        )
        .bind(operator_id)
        .bind(&self.machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;

        if let Some((id,)) = existing {
            info!(session_id = %id, operator_id, "reusing active operator session");
            return Ok(id);
        }

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO operator_sessions (operator_id, machine_id, status, started_at)
            VALUES ($1, $2, 'active', $3)
            RETURNING id
            "#,
        )
        .bind(operator_id)
        .bind(&self.machine_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;

        info!(session_id = %id, operator_id, "created new operator session");
        Ok(id)
    }

    async fn insert_process_execution(&self, execution: &ProcessExecution) -> Result<(), AldError> {
        let recipe_version_json = serde_json::to_value(&execution.recipe_version)
            .map_err(|e| AldError::DataIntegrityFault(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO process_executions (
                id, machine_id, recipe_id, recipe_version, operator_id, session_id,
                start_time, status, total_steps
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.machine_id)
        .bind(execution.recipe_id)
        .bind(recipe_version_json)
        .bind(&execution.operator_id)
        .bind(execution.session_id)
        .bind(execution.start_time)
        .bind(execution.status.as_str())
        .bind(execution.total_steps as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;
        Ok(())
    }
}

async fn finalize_process_execution(
    pool: &PgPool,
    execution_id: Uuid,
    status: ProcessStatus,
) -> Result<(), AldError> {
    sqlx::query(
        r#"
        UPDATE process_executions
        SET status = $2, end_time = $3
        WHERE id = $1
        "#,
    )
    .bind(execution_id)
    .bind(status.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| AldError::DbTransport(e.to_string()))?;
    Ok(())
}
