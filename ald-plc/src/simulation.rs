//! In-memory PLC backend used when `PLC_MODE=simulation` (spec.md §6).
//! Lets the rest of the runtime — sampler, recipe executor, parameter
//! writer — run end to end without physical hardware.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Duration;

use ald_common::{AldError, Parameter, ParameterValue};

use crate::gateway::PlcGateway;

pub struct SimulationGateway {
    values: RwLock<HashMap<String, f64>>,
}

impl SimulationGateway {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for SimulationGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlcGateway for SimulationGateway {
    async fn read_all(&self, parameters: &[Parameter]) -> Result<Vec<ParameterValue>, AldError> {
        let values = self.values.read().await;
        Ok(parameters
            .iter()
            .filter(|p| p.active)
            .map(|p| {
                let value = values.get(&p.id).copied().unwrap_or(0.0);
                ParameterValue::good(p.id.clone(), value, "simulation")
            })
            .collect())
    }

    async fn write_parameter(&self, parameter: &Parameter, value: f64) -> Result<(), AldError> {
        self.values
            .write()
            .await
            .insert(parameter.id.clone(), value);
        Ok(())
    }

    async fn actuate_valve(&self, _valve_number: u16, duration_ms: u64) -> Result<(), AldError> {
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(())
    }

    async fn execute_purge(&self, duration_ms: u64) -> Result<(), AldError> {
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ald_common::DataType;

    fn param(id: &str) -> Parameter {
        Parameter {
            id: id.into(),
            name: id.into(),
            modbus_address: 0,
            data_type: DataType::Float,
            min_value: None,
            max_value: None,
            read_cadence_ms: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let gw = SimulationGateway::new();
        let p = param("chamber_temperature");
        gw.write_parameter(&p, 275.5).await.unwrap();
        let values = gw.read_all(&[p]).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 275.5);
    }

    #[tokio::test]
    async fn unwritten_parameter_reads_as_zero() {
        let gw = SimulationGateway::new();
        let values = gw.read_all(&[param("never_written")]).await.unwrap();
        assert_eq!(values[0].value, 0.0);
    }
}
