//! Atomic machine-state queries and transitions (spec.md §4.2), grounded
//! on `sem_os_postgres::store`'s `pool.begin()` / row-lock / `tx.commit()`
//! shape.

use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ald_common::{is_valid_transition, AldError, MachineState, MachineStatus};

pub struct StateRepository {
    pool: PgPool,
}

impl StateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read `status` and `current_process_id` in one query so the pair is
    /// never observed torn.
    pub async fn get_machine_state(&self, machine_id: &str) -> Result<MachineState, AldError> {
        let row = sqlx::query(
            r#"
            SELECT status, current_process_id, last_heartbeat, error_message
            FROM machines
            WHERE id = $1
            "#,
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;

        let Some(row) = row else {
            return Err(AldError::DataIntegrityFault(format!(
                "machine {machine_id} not found"
            )));
        };

        parse_machine_row(&row)
    }

    /// Overwrite `status`/`current_process_id` unconditionally. Callers
    /// that need the valid-transition check should use `transition_state`
    /// instead; this is for the initial seed and for error-recovery paths
    /// that must force a known-good state.
    pub async fn update_machine_state(
        &self,
        machine_id: &str,
        status: MachineStatus,
        process_id: Option<Uuid>,
    ) -> Result<MachineState, AldError> {
        if status == MachineStatus::Processing && process_id.is_none() {
            return Err(AldError::Validation(
                "process_id is required when status is processing".into(),
            ));
        }
        let process_id = if status == MachineStatus::Idle {
            None
        } else {
            process_id
        };

        let row = sqlx::query(
            r#"
            UPDATE machines
            SET status = $2, current_process_id = $3, last_heartbeat = $4
            WHERE id = $1
            RETURNING status, current_process_id, last_heartbeat, error_message
            "#,
        )
        .bind(machine_id)
        .bind(status.as_str())
        .bind(process_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;

        let Some(row) = row else {
            return Err(AldError::DataIntegrityFault(format!(
                "machine {machine_id} not found"
            )));
        };

        parse_machine_row(&row)
    }

    /// Validate a process row exists before any write references it
    /// (spec.md §4.2/§4.3 referential-integrity requirement).
    pub async fn validate_process_exists(&self, process_id: Uuid) -> Result<bool, AldError> {
        let row = sqlx::query("SELECT 1 FROM process_executions WHERE id = $1")
            .bind(process_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AldError::DbTransport(e.to_string()))?;
        Ok(row.is_some())
    }

    /// Read machine state, but fall back to an idle view if it claims to
    /// be processing a process that no longer exists — preventing writes
    /// from being attributed to an orphaned process (spec.md §4.2).
    pub async fn get_machine_state_with_validation(
        &self,
        machine_id: &str,
    ) -> Result<MachineState, AldError> {
        let state = self.get_machine_state(machine_id).await?;

        if state.is_processing() {
            let process_id = state.current_process_id.unwrap();
            if !self.validate_process_exists(process_id).await? {
                return Ok(MachineState {
                    status: MachineStatus::Idle,
                    current_process_id: None,
                    last_heartbeat: state.last_heartbeat,
                    error_message: Some(format!(
                        "process {process_id} referenced by machine state does not exist"
                    )),
                });
            }
        }

        Ok(state)
    }

    /// Transition `machine_id` from `from` to `to` under a row lock,
    /// rejecting the change if the current status doesn't match `from` or
    /// the transition isn't in spec.md §4.2's table.
    pub async fn transition_state(
        &self,
        machine_id: &str,
        from: MachineStatus,
        to: MachineStatus,
        process_id: Option<Uuid>,
    ) -> Result<MachineState, AldError> {
        if !is_valid_transition(from, to) {
            return Err(AldError::StateConflict(format!(
                "{} -> {} is not a valid transition",
                from.as_str(),
                to.as_str()
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AldError::DbTransport(e.to_string()))?;

        let row = sqlx::query("SELECT status FROM machines WHERE id = $1 FOR UPDATE")
            .bind(machine_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AldError::DbTransport(e.to_string()))?;

        let Some(row) = row else {
            return Err(AldError::DataIntegrityFault(format!(
                "machine {machine_id} not found"
            )));
        };

        let current: String = row.get("status");
        let current: MachineStatus = current
            .parse()
            .map_err(AldError::DataIntegrityFault)?;

        if current != from {
            return Err(AldError::StateConflict(format!(
                "expected current status {}, found {}",
                from.as_str(),
                current.as_str()
            )));
        }

        let process_id = if to == MachineStatus::Idle { None } else { process_id };
        if to == MachineStatus::Processing && process_id.is_none() {
            return Err(AldError::Validation(
                "process_id is required when transitioning to processing".into(),
            ));
        }

        let row = sqlx::query(
            r#"
            UPDATE machines
            SET status = $2, current_process_id = $3, last_heartbeat = $4
            WHERE id = $1
            RETURNING status, current_process_id, last_heartbeat, error_message
            "#,
        )
        .bind(machine_id)
        .bind(to.as_str())
        .bind(process_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;

        tx.commit().await.map_err(|e| AldError::DbTransport(e.to_string()))?;

        parse_machine_row(&row)
    }
}

fn parse_machine_row(row: &sqlx::postgres::PgRow) -> Result<MachineState, AldError> {
    let status_str: String = row.get("status");
    let status: MachineStatus = status_str.parse().map_err(AldError::DataIntegrityFault)?;
    Ok(MachineState {
        status,
        current_process_id: row.get("current_process_id"),
        last_heartbeat: row.get("last_heartbeat"),
        error_message: row.get("error_message"),
    })
}
