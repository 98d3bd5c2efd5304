//! Contiguous-address batch grouping for bulk Modbus reads.
//!
//! Grounded on the register-batching pass in `optimize_batch_reading`
//! (VoltageEMS comsrv Modbus polling engine): sort by address, then merge
//! strictly adjacent parameters into one read as long as the resulting
//! span stays within transport limits. A gap of one or more addresses
//! starts a new batch (spec.md §4.1) — unlike the teacher's polling
//! engine, this backend never reads through unmapped registers.

use ald_common::Parameter;

use crate::gateway::ReadBatch;

/// Standard Modbus PDU register-count ceiling for a single read request.
pub const MAX_BATCH_REGISTERS: u16 = 125;

/// Maximum gap, in unused registers, allowed between two parameters for
/// them to still land in the same batch. Zero means only directly
/// adjacent addresses merge.
pub const MAX_BATCH_GAP: u16 = 0;

/// Registers consumed by one parameter's value (floats and integers are
/// stored in a single holding register per spec.md §3; booleans read from
/// the same register space as a 0/1 value).
fn register_width(_parameter: &Parameter) -> u16 {
    1
}

/// Group active parameters into contiguous read batches, sorted by
/// address. Inactive parameters are dropped before batching.
pub fn group_into_batches(parameters: &[Parameter]) -> Vec<ReadBatch> {
    let mut sorted: Vec<&Parameter> = parameters.iter().filter(|p| p.active).collect();
    sorted.sort_by_key(|p| p.modbus_address);

    let mut batches: Vec<ReadBatch> = Vec::new();

    for parameter in sorted {
        let width = register_width(parameter);
        let end_address = parameter.modbus_address + width;

        let extend_last = match batches.last() {
            Some(batch) => {
                let gap = parameter
                    .modbus_address
                    .saturating_sub(batch.start_address + batch.register_count);
                let new_span = end_address - batch.start_address;
                gap <= MAX_BATCH_GAP && new_span <= MAX_BATCH_REGISTERS
            }
            None => false,
        };

        if extend_last {
            let batch = batches.last_mut().unwrap();
            batch.register_count = end_address - batch.start_address;
            batch.parameters.push(parameter.clone());
        } else {
            batches.push(ReadBatch {
                start_address: parameter.modbus_address,
                register_count: width,
                parameters: vec![parameter.clone()],
            });
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use ald_common::DataType;

    fn param(id: &str, addr: u16, active: bool) -> Parameter {
        Parameter {
            id: id.into(),
            name: id.into(),
            modbus_address: addr,
            data_type: DataType::Float,
            min_value: None,
            max_value: None,
            read_cadence_ms: None,
            active,
        }
    }

    #[test]
    fn adjacent_parameters_merge_into_one_batch() {
        let params = vec![param("a", 0, true), param("b", 1, true), param("c", 2, true)];
        let batches = group_into_batches(&params);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].start_address, 0);
        assert_eq!(batches[0].register_count, 3);
    }

    #[test]
    fn large_gap_starts_a_new_batch() {
        let params = vec![param("a", 0, true), param("b", 500, true)];
        let batches = group_into_batches(&params);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn inactive_parameters_are_excluded() {
        let params = vec![param("a", 0, true), param("b", 1, false)];
        let batches = group_into_batches(&params);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].parameters.len(), 1);
    }

    #[test]
    fn any_gap_starts_a_new_batch() {
        let params = vec![param("a", 0, true), param("b", 5, true)];
        let batches = group_into_batches(&params);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn mixed_adjacent_and_gapped_addresses_yield_expected_batches() {
        let params = vec![
            param("a", 10, true),
            param("b", 11, true),
            param("c", 12, true),
            param("d", 20, true),
            param("e", 21, true),
        ];
        let batches = group_into_batches(&params);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start_address, 10);
        assert_eq!(batches[0].register_count, 3);
        assert_eq!(batches[1].start_address, 20);
        assert_eq!(batches[1].register_count, 2);
    }
}
