//! The `PlcGateway` trait: the one seam every recipe/parameter-write/sampler
//! component goes through to reach physical or simulated I/O (spec.md §4.1).

use async_trait::async_trait;

use ald_common::{AldError, Parameter, ParameterValue};

/// A batch read request: one contiguous run of Modbus holding registers
/// mapped back to the parameters that live in it.
#[derive(Debug, Clone)]
pub struct ReadBatch {
    pub start_address: u16,
    pub register_count: u16,
    pub parameters: Vec<Parameter>,
}

#[async_trait]
pub trait PlcGateway: Send + Sync {
    /// Read every active parameter, grouped into contiguous batches
    /// internally. Never partially fails: per-parameter read failure is
    /// reported as `Quality::Bad`, not a hard error, so one dead register
    /// doesn't blind the rest of the sweep.
    async fn read_all(&self, parameters: &[Parameter]) -> Result<Vec<ParameterValue>, AldError>;

    /// Write a single parameter's set point. Hard failure here must
    /// prevent any corresponding database write (spec.md §4.8).
    async fn write_parameter(&self, parameter: &Parameter, value: f64) -> Result<(), AldError>;

    /// Open valve `valve_number` for `duration_ms`, then close it. Blocks
    /// for the duration (spec.md §4.7 treats this as the unit of recipe
    /// step execution).
    async fn actuate_valve(&self, valve_number: u16, duration_ms: u64) -> Result<(), AldError>;

    /// Run a purge for `duration_ms`: write the duration to the purge
    /// register, strobe the purge-start coil, then wait out the dwell
    /// (the PLC runs the purge autonomously once strobed; spec.md §4.1/§4.7).
    async fn execute_purge(&self, duration_ms: u64) -> Result<(), AldError>;

    /// Whether the underlying transport is currently connected.
    async fn is_connected(&self) -> bool;
}
