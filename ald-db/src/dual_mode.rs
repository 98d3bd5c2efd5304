//! Atomic dual-table parameter writes (spec.md §4.3).
//!
//! Grounded on
//! `original_source/src/data_collection/transactional/dual_mode_repository.py`'s
//! `AtomicDualModeRepository`: a transaction id stamps every row written
//! during one call, and a stack of compensating actions is unwound in
//! reverse order if any step fails. The Python original issues independent
//! REST calls per table (no cross-table transaction is available), so the
//! compensation stack — rather than a single `BEGIN`/`COMMIT` — is kept
//! here rather than collapsed into one `sqlx` transaction, preserving the
//! same failure-recovery shape the original relies on.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use ald_common::{AldError, MachineState, ParameterValue};

use crate::state_repository::StateRepository;

/// Parameters per `insert_dual_mode_atomic` call are chunked into
/// sub-batches of this size by default (spec.md §4.3).
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// A single compensating action, applied in reverse order if a later step
/// in the same call fails.
enum CompensationAction {
    DeleteHistoryByTransaction(Uuid),
    DeleteProcessByTransaction(Uuid),
}

#[derive(Debug, Clone)]
pub struct DualModeResult {
    pub transaction_id: Uuid,
    pub history_count: u64,
    pub process_count: u64,
    pub component_updates_count: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

pub struct DualModeWriter {
    pool: PgPool,
    batch_size: usize,
}

impl DualModeWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(pool: PgPool, batch_size: usize) -> Self {
        Self { pool, batch_size }
    }

    /// Validate a batch before any write is attempted: no duplicate
    /// parameter ids, and the batch isn't absurdly oversized.
    pub fn validate_batch_constraints(&self, parameters: &[ParameterValue]) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen = std::collections::HashSet::new();
        let mut duplicates = std::collections::HashSet::new();
        for p in parameters {
            if !seen.insert(p.parameter_id.clone()) {
                duplicates.insert(p.parameter_id.clone());
            }
        }
        if !duplicates.is_empty() {
            errors.push(format!(
                "duplicate parameter ids in batch: {:?}",
                duplicates
            ));
        }

        let max_batch = self.batch_size * 10;
        if parameters.len() > max_batch {
            errors.push(format!(
                "batch too large: {} > {max_batch}",
                parameters.len()
            ));
        }

        errors
    }

    /// Write `parameters` to `parameter_value_history` always, to
    /// `process_data_points` when `machine_state.is_processing()`, and
    /// refresh `component_parameters.current_value` for every parameter —
    /// all stamped with one transaction id, chunked into sub-batches, with
    /// compensating deletes unwound on failure.
    pub async fn insert_dual_mode_atomic(
        &self,
        parameters: &[ParameterValue],
        machine_state: &MachineState,
        state_repo: &StateRepository,
    ) -> DualModeResult {
        let transaction_id = Uuid::new_v4();

        if parameters.is_empty() {
            return DualModeResult {
                transaction_id,
                history_count: 0,
                process_count: 0,
                component_updates_count: 0,
                success: true,
                error_message: None,
            };
        }

        let validation_errors = self.validate_batch_constraints(parameters);
        if !validation_errors.is_empty() {
            let msg = format!("validation failed: {}", validation_errors.join(", "));
            tracing::error!(%transaction_id, %msg, "dual-mode write rejected");
            return DualModeResult {
                transaction_id,
                history_count: 0,
                process_count: 0,
                component_updates_count: 0,
                success: false,
                error_message: Some(msg),
            };
        }

        if machine_state.is_processing() {
            let process_id = machine_state.current_process_id.unwrap();
            match state_repo.validate_process_exists(process_id).await {
                Ok(true) => {}
                Ok(false) => {
                    let msg = format!("process {process_id} does not exist");
                    tracing::error!(%transaction_id, %msg, "dual-mode write rejected");
                    return DualModeResult {
                        transaction_id,
                        history_count: 0,
                        process_count: 0,
                        component_updates_count: 0,
                        success: false,
                        error_message: Some(msg),
                    };
                }
                Err(e) => {
                    return DualModeResult {
                        transaction_id,
                        history_count: 0,
                        process_count: 0,
                        component_updates_count: 0,
                        success: false,
                        error_message: Some(e.to_string()),
                    };
                }
            }
        }

        let mut compensations: Vec<CompensationAction> = Vec::new();
        let mut history_count = 0u64;
        let mut process_count = 0u64;
        let mut component_updates_count = 0u64;

        for chunk in parameters.chunks(self.batch_size) {
            match self
                .insert_batch_atomic(chunk, machine_state, transaction_id, &mut compensations)
                .await
            {
                Ok(batch) => {
                    history_count += batch.0;
                    process_count += batch.1;
                    component_updates_count += batch.2;
                }
                Err(e) => {
                    tracing::error!(%transaction_id, error = %e, "dual-mode batch insert failed, compensating");
                    self.execute_compensations(&compensations).await;
                    return DualModeResult {
                        transaction_id,
                        history_count: 0,
                        process_count: 0,
                        component_updates_count: 0,
                        success: false,
                        error_message: Some(e.to_string()),
                    };
                }
            }
        }

        tracing::info!(
            %transaction_id,
            history_count,
            process_count,
            component_updates_count,
            "dual-mode write completed"
        );

        DualModeResult {
            transaction_id,
            history_count,
            process_count,
            component_updates_count,
            success: true,
            error_message: None,
        }
    }

    async fn insert_batch_atomic(
        &self,
        batch: &[ParameterValue],
        machine_state: &MachineState,
        transaction_id: Uuid,
        compensations: &mut Vec<CompensationAction>,
    ) -> Result<(u64, u64, u64), AldError> {
        let mut history_count = 0u64;
        for p in batch {
            sqlx::query(
                r#"
                INSERT INTO parameter_value_history (parameter_id, value, set_point, timestamp, transaction_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&p.parameter_id)
            .bind(p.value)
            .bind(p.set_point)
            .bind(p.timestamp)
            .bind(transaction_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AldError::DbTransport(format!("history insert failed: {e}")))?;
            history_count += 1;
        }
        compensations.push(CompensationAction::DeleteHistoryByTransaction(transaction_id));

        let mut process_count = 0u64;
        if machine_state.is_processing() {
            let process_id = machine_state.current_process_id.unwrap();
            for p in batch {
                sqlx::query(
                    r#"
                    INSERT INTO process_data_points (process_id, parameter_id, value, set_point, timestamp, transaction_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(process_id)
                .bind(&p.parameter_id)
                .bind(p.value)
                .bind(p.set_point)
                .bind(p.timestamp)
                .bind(transaction_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AldError::DbTransport(format!("process data point insert failed: {e}")))?;
                process_count += 1;
            }
            compensations.push(CompensationAction::DeleteProcessByTransaction(transaction_id));
        }

        let mut component_updates_count = 0u64;
        for p in batch {
            let result = sqlx::query(
                r#"
                UPDATE component_parameters
                SET current_value = $2, updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(&p.parameter_id)
            .bind(p.value)
            .bind(p.timestamp)
            .execute(&self.pool)
            .await;

            match result {
                Ok(r) => component_updates_count += r.rows_affected(),
                Err(e) => {
                    tracing::warn!(parameter_id = %p.parameter_id, error = %e, "component parameter update failed, continuing");
                }
            }
        }
        // Unlike history/process inserts, component_parameters.current_value has
        // no prior-value snapshot to restore to, so there is no compensation to
        // register here — matching the original's documented limitation.

        Ok((history_count, process_count, component_updates_count))
    }

    async fn execute_compensations(&self, compensations: &[CompensationAction]) {
        for action in compensations.iter().rev() {
            let result = match action {
                CompensationAction::DeleteHistoryByTransaction(tx_id) => {
                    sqlx::query("DELETE FROM parameter_value_history WHERE transaction_id = $1")
                        .bind(tx_id)
                        .execute(&self.pool)
                        .await
                }
                CompensationAction::DeleteProcessByTransaction(tx_id) => {
                    sqlx::query("DELETE FROM process_data_points WHERE transaction_id = $1")
                        .bind(tx_id)
                        .execute(&self.pool)
                        .await
                }
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "compensation action failed");
            }
        }
    }

    /// Idle-mode write path: history only, no process attribution, no
    /// compensation bookkeeping needed since it's a single write kind.
    pub async fn insert_history_only(&self, parameters: &[ParameterValue]) -> Result<u64, AldError> {
        if parameters.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        for chunk in parameters.chunks(self.batch_size) {
            for p in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO parameter_value_history (parameter_id, value, set_point, timestamp)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(&p.parameter_id)
                .bind(p.value)
                .bind(p.set_point)
                .bind(p.timestamp)
                .execute(&self.pool)
                .await
                .map_err(|e| AldError::DbTransport(format!("history-only insert failed: {e}")))?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// C8's final step: update a single component's set value under a
    /// fresh transaction id, after the PLC write has already succeeded.
    /// Touches only `component_parameters.set_value` (spec.md §4.3's
    /// set-point path), stamped with `transaction_id` so the log line
    /// correlates with the history/process rows the call accompanies even
    /// though this table carries no `transaction_id` column of its own.
    pub async fn update_component_set_value(
        &self,
        parameter_id: &str,
        value: f64,
        transaction_id: Uuid,
    ) -> Result<(), AldError> {
        let result = sqlx::query(
            r#"
            UPDATE component_parameters
            SET set_value = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(parameter_id)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AldError::DbTransport(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AldError::DataIntegrityFault(format!(
                "no component_parameters row for {parameter_id}"
            )));
        }

        tracing::info!(parameter_id, value, %transaction_id, "component_parameters.set_value updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ald_common::Quality;
    use chrono::Utc;

    fn value(id: &str) -> ParameterValue {
        ParameterValue {
            parameter_id: id.into(),
            value: 1.0,
            set_point: None,
            timestamp: Utc::now(),
            quality: Quality::Good,
            source: "test".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_parameter_ids_are_rejected() {
        let writer = DualModeWriter::with_batch_size(dummy_pool(), 50);
        let errors = writer.validate_batch_constraints(&[value("p1"), value("p1")]);
        assert!(!errors.is_empty());
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let writer = DualModeWriter::with_batch_size(dummy_pool(), 2);
        let params: Vec<_> = (0..25).map(|i| value(&format!("p{i}"))).collect();
        let errors = writer.validate_batch_constraints(&params);
        assert!(!errors.is_empty());
    }

    #[tokio::test]
    async fn well_formed_batch_passes() {
        let writer = DualModeWriter::with_batch_size(dummy_pool(), 50);
        let errors = writer.validate_batch_constraints(&[value("p1"), value("p2")]);
        assert!(errors.is_empty());
    }

    // `PgPool` has no zero-cost constructor; these unit tests only exercise
    // pure validation logic, so an unconnected pool is sufficient and is
    // never driven to `.execute()`.
    fn dummy_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/ald_test_unused").unwrap()
    }
}
