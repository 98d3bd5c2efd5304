//! Command listener (spec.md §4.5): `PgListener` on `recipe_commands`'
//! insert channel as the primary transport, falling back to a fixed-
//! interval poll when the listener connection is unavailable.
//!
//! Loop shape and claim-CAS idiom grounded on
//! `ob-workflow::listener::TaskQueueListener::run`/`process_one`: an
//! atomic `UPDATE ... RETURNING` claims one row, `rows_affected() == 0`
//! means someone else (or nothing) got there first.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool, Row};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ald_common::{Command, CommandStatus, HealthState};

use crate::dispatcher::Dispatcher;

const NOTIFY_CHANNEL: &str = "recipe_commands_inserted";

#[derive(Debug, Clone, FromRow)]
struct CommandRow {
    id: Uuid,
    command_type: String,
    parameters: serde_json::Value,
    machine_id: Option<String>,
    status: String,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<CommandRow> for Command {
    fn from(row: CommandRow) -> Self {
        Command {
            id: row.id,
            command_type: row.command_type,
            parameters: row.parameters,
            machine_id: row.machine_id,
            status: match row.status.as_str() {
                "pending" => CommandStatus::Pending,
                "processing" => CommandStatus::Processing,
                "completed" => CommandStatus::Completed,
                _ => CommandStatus::Error,
            },
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct CommandListener {
    pool: PgPool,
    database_url: String,
    poll_interval: Duration,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthState>,
}

impl CommandListener {
    pub fn new(
        pool: PgPool,
        database_url: String,
        poll_interval: Duration,
        dispatcher: Arc<Dispatcher>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            pool,
            database_url,
            poll_interval,
            dispatcher,
            health,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("command listener started");

        let mut pg_listener = match PgListener::connect(&self.database_url).await {
            Ok(mut listener) => match listener.listen(NOTIFY_CHANNEL).await {
                Ok(()) => {
                    self.health.set_db_listen_degraded(false);
                    Some(listener)
                }
                Err(e) => {
                    warn!(error = %e, "failed to LISTEN on notify channel, falling back to polling");
                    self.health.set_db_listen_degraded(true);
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to open LISTEN connection, falling back to polling");
                self.health.set_db_listen_degraded(true);
                None
            }
        };

        loop {
            if *shutdown.borrow() {
                info!("command listener shutting down");
                break;
            }

            let drained = self.drain_pending(&mut shutdown).await;
            if !drained {
                return;
            }

            match pg_listener.as_mut() {
                Some(listener) => {
                    tokio::select! {
                        notification = listener.recv() => {
                            match notification {
                                Ok(_) => continue,
                                Err(e) => {
                                    warn!(error = %e, "LISTEN connection dropped, falling back to polling");
                                    self.health.set_db_listen_degraded(true);
                                    pg_listener = None;
                                }
                            }
                        }
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("command listener shutting down");
                                return;
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("command listener shutting down");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim and dispatch every pending command currently queued. Returns
    /// `false` if the loop should exit (shutdown requested mid-drain).
    async fn drain_pending(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            match self.process_one().await {
                Ok(true) => continue,
                Ok(false) => return true,
                Err(e) => {
                    error!(error = %e, "error claiming command");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Claim-CAS one pending command and hand it to the dispatcher.
    /// Returns `Ok(true)` if a command was processed, `Ok(false)` if the
    /// queue is empty.
    async fn process_one(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT id FROM recipe_commands
                WHERE status = 'pending'
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE recipe_commands c
            SET status = 'processing', updated_at = now()
            FROM next
            WHERE c.id = next.id
            RETURNING c.id, c.command_type, c.parameters, c.machine_id, c.status, c.error_message, c.created_at, c.updated_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        let command_row = CommandRow {
            id: row.get("id"),
            command_type: row.get("command_type"),
            parameters: row.get("parameters"),
            machine_id: row.get("machine_id"),
            status: row.get("status"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        };
        let command: Command = command_row.into();

        debug!(command_id = %command.id, command_type = %command.command_type, "dispatching command");

        match self.dispatcher.dispatch(&command).await {
            Ok(()) => {
                self.mark_completed(command.id).await;
            }
            Err(e) => {
                warn!(command_id = %command.id, error = %e, "command failed");
                self.mark_error(command.id, &e.to_string()).await;
            }
        }

        Ok(true)
    }

    async fn mark_completed(&self, command_id: Uuid) {
        if let Err(e) = sqlx::query(
            "UPDATE recipe_commands SET status = 'completed', updated_at = now() WHERE id = $1",
        )
        .bind(command_id)
        .execute(&self.pool)
        .await
        {
            error!(command_id = %command_id, error = %e, "failed to mark command completed");
        }
    }

    async fn mark_error(&self, command_id: Uuid, message: &str) {
        if let Err(e) = sqlx::query(
            "UPDATE recipe_commands SET status = 'error', error_message = $2, updated_at = now() WHERE id = $1",
        )
        .bind(command_id)
        .bind(message)
        .execute(&self.pool)
        .await
        {
            error!(command_id = %command_id, error = %e, "failed to mark command errored");
        }
    }
}
