//! PLC transport gateway: the sole seam between the runtime and physical
//! (Modbus/TCP) or simulated process I/O.

pub mod batching;
pub mod gateway;
pub mod metadata_cache;
pub mod modbus;
pub mod simulation;

pub use batching::{group_into_batches, MAX_BATCH_GAP, MAX_BATCH_REGISTERS};
pub use gateway::{PlcGateway, ReadBatch};
pub use metadata_cache::ParameterMetadataCache;
pub use modbus::{ModbusGateway, SharedGateway};
pub use simulation::SimulationGateway;
