//! Continuous parameter sampling (spec.md §4.4).
//!
//! Loop shape grounded on `ob-workflow::listener::TaskQueueListener::run`:
//! a `tokio::select!` between the fixed-interval sleep and a shutdown
//! signal, with a local error counter driving a slow-poison backoff
//! instead of the listener's fixed error sleep, per spec.md §4.4.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use ald_common::HealthState;
use ald_db::{DualModeWriter, StateRepository};
use ald_plc::{ParameterMetadataCache, PlcGateway};

/// Consecutive read-sweep failures before the loop enters the slow-poison
/// backoff (spec.md §4.4).
const SLOW_POISON_THRESHOLD: u32 = 5;
const SLOW_POISON_SLEEP: Duration = Duration::from_secs(30);

pub struct Sampler {
    machine_id: String,
    gateway: Arc<dyn PlcGateway>,
    state_repo: Arc<StateRepository>,
    writer: Arc<DualModeWriter>,
    metadata: Arc<ParameterMetadataCache>,
    health: Arc<HealthState>,
    sample_interval: Duration,
}

impl Sampler {
    pub fn new(
        machine_id: String,
        gateway: Arc<dyn PlcGateway>,
        state_repo: Arc<StateRepository>,
        writer: Arc<DualModeWriter>,
        metadata: Arc<ParameterMetadataCache>,
        health: Arc<HealthState>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            machine_id,
            gateway,
            state_repo,
            writer,
            metadata,
            health,
            sample_interval,
        }
    }

    /// Drive the sampling loop until `shutdown` is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(machine_id = %self.machine_id, "sampler started");
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("sampler shutting down");
                break;
            }

            match self.sample_once().await {
                Ok(()) => {
                    consecutive_errors = 0;
                    self.health.record_sampler_success();
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.health.record_sampler_error();
                    error!(error = %e, consecutive_errors, "sample sweep failed");
                }
            }

            self.health
                .set_plc_connected(self.gateway.is_connected().await);

            let sleep_for = if consecutive_errors >= SLOW_POISON_THRESHOLD {
                warn!(consecutive_errors, "sampler entering slow-poison backoff");
                SLOW_POISON_SLEEP
            } else {
                self.sample_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("sampler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn sample_once(&self) -> Result<(), ald_common::AldError> {
        let parameters = self.metadata.get().await?;
        let values = self.gateway.read_all(&parameters).await?;
        let state = self
            .state_repo
            .get_machine_state_with_validation(&self.machine_id)
            .await?;

        if state.is_processing() {
            let result = self
                .writer
                .insert_dual_mode_atomic(&values, &state, &self.state_repo)
                .await;
            if !result.success {
                return Err(ald_common::AldError::DbTransport(
                    result.error_message.unwrap_or_else(|| "dual-mode write failed".into()),
                ));
            }
        } else {
            self.writer.insert_history_only(&values).await?;
        }

        Ok(())
    }
}
