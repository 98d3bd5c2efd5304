//! Recipe tree: an immutable snapshot walked by the recipe executor
//! (spec.md §3, §4.7).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Spec.md §3 recommends bounding loop nesting depth to 8 for safety.
pub const MAX_LOOP_DEPTH: u32 = 8;

/// A tagged union over step types. `Loop` nests arbitrarily (up to
/// `MAX_LOOP_DEPTH`), including further `Loop` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Valve {
        valve_number: u16,
        duration_ms: u64,
    },
    Purge {
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gas_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flow_rate: Option<f64>,
    },
    Parameter {
        parameter_id: String,
        target_value: f64,
    },
    Loop {
        iterations: u32,
        steps: Vec<Step>,
    },
}

impl Step {
    /// Human-readable step-type tag, used for `process_execution_state`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Step::Valve { .. } => "valve",
            Step::Purge { .. } => "purge",
            Step::Parameter { .. } => "parameter",
            Step::Loop { .. } => "loop",
        }
    }

    /// A short human label, e.g. `"valve 2 (500ms)"`, for progress rows.
    pub fn display_name(&self) -> String {
        match self {
            Step::Valve {
                valve_number,
                duration_ms,
            } => format!("valve {valve_number} ({duration_ms}ms)"),
            Step::Purge { duration_ms, .. } => format!("purge ({duration_ms}ms)"),
            Step::Parameter {
                parameter_id,
                target_value,
            } => format!("set {parameter_id} = {target_value}"),
            Step::Loop { iterations, .. } => format!("loop x{iterations}"),
        }
    }

    /// Maximum nesting depth of `Loop` steps within this step (0 for leaves).
    pub fn loop_depth(&self) -> u32 {
        match self {
            Step::Loop { steps, .. } => {
                1 + steps.iter().map(Step::loop_depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Count of leaf-step *executions* this step contributes, expanding
    /// loops recursively (spec.md §4.7; a loop of N over M leaves
    /// contributes N*M). A loop with `iterations == 0` runs no children but
    /// still counts as one completed step at the parent level (§8 boundary
    /// behavior 9), so it contributes 1 rather than 0.
    pub fn leaf_count(&self) -> u64 {
        match self {
            Step::Loop { iterations, steps } => {
                if *iterations == 0 {
                    return 1;
                }
                let per_iteration: u64 = steps.iter().map(Step::leaf_count).sum();
                (*iterations as u64) * per_iteration
            }
            _ => 1,
        }
    }
}

/// Count total leaf-step executions for a whole step sequence.
pub fn total_leaf_steps(steps: &[Step]) -> u64 {
    steps.iter().map(Step::leaf_count).sum()
}

/// Validate that no `Loop` nests deeper than `MAX_LOOP_DEPTH`.
pub fn validate_loop_depth(steps: &[Step]) -> Result<(), String> {
    let depth = steps.iter().map(Step::loop_depth).max().unwrap_or(0);
    if depth > MAX_LOOP_DEPTH {
        Err(format!(
            "loop nesting depth {depth} exceeds maximum of {MAX_LOOP_DEPTH}"
        ))
    } else {
        Ok(())
    }
}

/// An immutable recipe snapshot (spec.md §3). `id`/`version` identify the
/// source recipe row; the steps and set-points are frozen into
/// `ProcessExecution.recipe_version` at start time so later edits to the
/// source recipe never affect an in-flight run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub version: i32,
    pub name: String,
    pub steps: Vec<Step>,
    pub chamber_temperature_set_point: Option<f64>,
    pub pressure_set_point: Option<f64>,
}

impl Recipe {
    pub fn total_steps(&self) -> u64 {
        total_leaf_steps(&self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_count_flat_sequence() {
        let steps = vec![
            Step::Valve {
                valve_number: 1,
                duration_ms: 50,
            },
            Step::Parameter {
                parameter_id: "p".into(),
                target_value: 1.0,
            },
        ];
        assert_eq!(total_leaf_steps(&steps), 2);
    }

    #[test]
    fn leaf_count_expands_loop() {
        let steps = vec![Step::Loop {
            iterations: 3,
            steps: vec![
                Step::Valve {
                    valve_number: 1,
                    duration_ms: 50,
                },
                Step::Valve {
                    valve_number: 2,
                    duration_ms: 50,
                },
            ],
        }];
        // 3 iterations * 2 leaves = 6
        assert_eq!(total_leaf_steps(&steps), 6);
    }

    #[test]
    fn zero_iteration_loop_counts_as_one_completed_step() {
        let steps = vec![Step::Loop {
            iterations: 0,
            steps: vec![Step::Valve {
                valve_number: 1,
                duration_ms: 50,
            }],
        }];
        assert_eq!(total_leaf_steps(&steps), 1);
    }

    #[test]
    fn nested_loop_depth_is_measured() {
        let inner = Step::Loop {
            iterations: 2,
            steps: vec![Step::Valve {
                valve_number: 1,
                duration_ms: 10,
            }],
        };
        let outer = Step::Loop {
            iterations: 2,
            steps: vec![inner],
        };
        assert_eq!(outer.loop_depth(), 2);
    }

    #[test]
    fn excessive_loop_nesting_is_rejected() {
        let mut step = Step::Valve {
            valve_number: 1,
            duration_ms: 10,
        };
        for _ in 0..(MAX_LOOP_DEPTH + 1) {
            step = Step::Loop {
                iterations: 1,
                steps: vec![step],
            };
        }
        assert!(validate_loop_depth(std::slice::from_ref(&step)).is_err());
    }

    #[test]
    fn step_tagged_union_round_trips_json() {
        let step = Step::Loop {
            iterations: 2,
            steps: vec![Step::Purge {
                duration_ms: 1000,
                gas_type: Some("N2".into()),
                flow_rate: Some(12.5),
            }],
        };
        let json = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(step, back);
    }
}
