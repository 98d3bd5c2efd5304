//! Runtime entrypoint: wires the PLC gateway, database writers, sampler,
//! recipe executor, and command dispatcher together and runs them as
//! cooperating tokio tasks until shutdown.
//!
//! Task layout and graceful-shutdown-via-`watch` shape grounded on
//! `ob-poc-web`'s `main.rs` (config load -> pool -> spawn -> signal wait).
//! Exit-code discipline follows spec.md §6: non-zero only for startup
//! configuration errors, never for runtime failures.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ald_common::{AldError, DataType, HealthState, Parameter, PlcMode, RuntimeConfig};
use ald_commands::{CommandListener, Dispatcher};
use ald_db::{DualModeWriter, StateRepository};
use ald_paramwrite::ParameterWriter;
use ald_plc::{ModbusGateway, ParameterMetadataCache, PlcGateway, SimulationGateway};
use ald_recipe::RecipeExecutor;
use ald_runtime::health;
use ald_sampler::Sampler;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "startup configuration error");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RuntimeConfig) -> Result<(), AldError> {
    info!(machine_id = %config.machine_id, plc_mode = ?config.plc_mode, "starting ald-runtime");

    let pool = connect_database(&config.database_url)
        .await
        .map_err(|e| AldError::Config(e.to_string()))?;

    let health = HealthState::new();

    let gateway: Arc<dyn PlcGateway> = match config.plc_mode {
        PlcMode::Simulation => Arc::new(SimulationGateway::new()),
        PlcMode::Real => Arc::new(ModbusGateway::new(&config.plc_host, config.plc_port)?),
    };

    let state_repo = Arc::new(StateRepository::new(pool.clone()));
    let writer = Arc::new(DualModeWriter::with_batch_size(
        pool.clone(),
        config.write_batch_size,
    ));

    let metadata_pool = pool.clone();
    let metadata = Arc::new(ParameterMetadataCache::new(move || {
        let pool = metadata_pool.clone();
        async move { load_parameter_metadata(&pool).await }
    }));

    let param_writer = Arc::new(ParameterWriter::new(
        gateway.clone(),
        writer.clone(),
        metadata.clone(),
    ));
    let executor = Arc::new(RecipeExecutor::new(gateway.clone(), param_writer.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        config.machine_id.clone(),
        pool.clone(),
        state_repo.clone(),
        executor,
        param_writer,
    ));

    let listener = CommandListener::new(
        pool.clone(),
        config.database_url.clone(),
        config.command_poll_interval,
        dispatcher,
        health.clone(),
    );

    let sampler = Sampler::new(
        config.machine_id.clone(),
        gateway.clone(),
        state_repo.clone(),
        writer,
        metadata.clone(),
        health.clone(),
        config.sample_interval,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sampler_shutdown = shutdown_rx.clone();
    let sampler_task = tokio::spawn(async move {
        sampler.run(sampler_shutdown).await;
    });

    let listener_shutdown = shutdown_rx.clone();
    let listener_task = tokio::spawn(async move {
        listener.run(listener_shutdown).await;
    });

    let app = health::router(health.clone());
    let addr = format!("0.0.0.0:{}", config.http_port);
    let health_listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AldError::Config(format!("failed to bind health endpoint on {addr}: {e}")))?;
    let health_shutdown = shutdown_rx.clone();
    let health_task = tokio::spawn(async move {
        let mut shutdown = health_shutdown;
        axum::serve(health_listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .ok();
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping components");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(sampler_task, listener_task, health_task);
    info!("ald-runtime stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn load_parameter_metadata(pool: &PgPool) -> Result<Vec<Parameter>, AldError> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, modbus_address, data_type, min_value, max_value, read_cadence_ms, active
        FROM component_parameters
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| AldError::DbTransport(e.to_string()))?;

    rows.into_iter()
        .map(|row| {
            let data_type: String = row.try_get("data_type").map_err(db_err)?;
            let data_type = match data_type.as_str() {
                "float" => DataType::Float,
                "integer" => DataType::Integer,
                "boolean" => DataType::Boolean,
                other => {
                    return Err(AldError::DataIntegrityFault(format!(
                        "unknown parameter data_type: {other}"
                    )))
                }
            };
            Ok(Parameter {
                id: row.try_get("id").map_err(db_err)?,
                name: row.try_get("name").map_err(db_err)?,
                modbus_address: row.try_get::<i32, _>("modbus_address").map_err(db_err)? as u16,
                data_type,
                min_value: row.try_get("min_value").map_err(db_err)?,
                max_value: row.try_get("max_value").map_err(db_err)?,
                read_cadence_ms: row
                    .try_get::<Option<i64>, _>("read_cadence_ms")
                    .map_err(db_err)?
                    .map(|v| v as u64),
                active: row.try_get("active").map_err(db_err)?,
            })
        })
        .collect()
}

fn db_err(e: sqlx::Error) -> AldError {
    AldError::DbTransport(e.to_string())
}

/// Startup-only database connect, wrapped with `anyhow::Context` for an
/// operator-facing message. Never logs the connection string itself —
/// it carries the database password.
async fn connect_database(database_url: &str) -> anyhow::Result<PgPool> {
    PgPool::connect(database_url)
        .await
        .context("failed to connect to database at startup")
}
