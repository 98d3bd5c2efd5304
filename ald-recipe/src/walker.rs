//! Iterative step-tree walker (spec.md §4.7).
//!
//! Recipe step trees nest `Loop` steps up to `MAX_LOOP_DEPTH`; rather than
//! recurse natively (which would make cooperative cancellation between
//! steps awkward to thread through), the walk keeps an explicit frame
//! stack, one frame per active `Loop` nesting level — the same "explicit
//! stack instead of recursion" shape the teacher's engine favors for its
//! own bounded-depth guard evaluation in `engine.rs`.

use std::sync::Arc;

use ald_common::Step;

struct Frame {
    steps: Arc<[Step]>,
    index: usize,
    iterations_left: u32,
}

/// Walks a step tree depth-first, expanding `Loop` steps in place and
/// yielding one leaf `Step` at a time (a zero-iteration `Loop` yields
/// itself once, per spec.md §8 boundary behavior 9, rather than being
/// silently skipped).
pub struct StepWalker {
    stack: Vec<Frame>,
}

impl StepWalker {
    pub fn new(steps: &[Step]) -> Self {
        Self {
            stack: vec![Frame {
                steps: Arc::from(steps.to_vec().into_boxed_slice()),
                index: 0,
                iterations_left: 1,
            }],
        }
    }

    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Current nesting depth of the walk (1 at the top level).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Advance to and return the next leaf step, or `None` once the whole
    /// tree has been walked.
    pub fn next(&mut self) -> Option<Step> {
        loop {
            let frame = self.stack.last_mut()?;

            if frame.index >= frame.steps.len() {
                if frame.iterations_left > 1 {
                    frame.iterations_left -= 1;
                    frame.index = 0;
                    continue;
                }
                self.stack.pop();
                if let Some(parent) = self.stack.last_mut() {
                    parent.index += 1;
                }
                continue;
            }

            let step = frame.steps[frame.index].clone();
            match &step {
                Step::Loop { iterations, steps } if *iterations > 0 => {
                    let inner: Arc<[Step]> = Arc::from(steps.clone().into_boxed_slice());
                    self.stack.push(Frame {
                        steps: inner,
                        index: 0,
                        iterations_left: *iterations,
                    });
                    continue;
                }
                _ => {
                    frame.index += 1;
                    return Some(step);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valve(n: u16) -> Step {
        Step::Valve {
            valve_number: n,
            duration_ms: 10,
        }
    }

    #[test]
    fn walks_flat_sequence_in_order() {
        let mut walker = StepWalker::new(&[valve(1), valve(2), valve(3)]);
        assert_eq!(walker.next(), Some(valve(1)));
        assert_eq!(walker.next(), Some(valve(2)));
        assert_eq!(walker.next(), Some(valve(3)));
        assert_eq!(walker.next(), None);
        assert!(walker.is_done());
    }

    #[test]
    fn expands_loop_body_each_iteration() {
        let steps = vec![Step::Loop {
            iterations: 2,
            steps: vec![valve(1), valve(2)],
        }];
        let mut walker = StepWalker::new(&steps);
        assert_eq!(walker.next(), Some(valve(1)));
        assert_eq!(walker.next(), Some(valve(2)));
        assert_eq!(walker.next(), Some(valve(1)));
        assert_eq!(walker.next(), Some(valve(2)));
        assert_eq!(walker.next(), None);
    }

    #[test]
    fn zero_iteration_loop_yields_itself_once() {
        let loop_step = Step::Loop {
            iterations: 0,
            steps: vec![valve(1)],
        };
        let mut walker = StepWalker::new(std::slice::from_ref(&loop_step));
        assert_eq!(walker.next(), Some(loop_step));
        assert_eq!(walker.next(), None);
    }

    #[test]
    fn resumes_parent_sequence_after_loop_completes() {
        let steps = vec![
            valve(1),
            Step::Loop {
                iterations: 1,
                steps: vec![valve(2)],
            },
            valve(3),
        ];
        let mut walker = StepWalker::new(&steps);
        assert_eq!(walker.next(), Some(valve(1)));
        assert_eq!(walker.next(), Some(valve(2)));
        assert_eq!(walker.next(), Some(valve(3)));
        assert_eq!(walker.next(), None);
    }

    #[test]
    fn nested_loops_walk_in_correct_order() {
        let steps = vec![Step::Loop {
            iterations: 2,
            steps: vec![Step::Loop {
                iterations: 2,
                steps: vec![valve(1)],
            }],
        }];
        let mut walker = StepWalker::new(&steps);
        for _ in 0..4 {
            assert_eq!(walker.next(), Some(valve(1)));
        }
        assert_eq!(walker.next(), None);
    }
}
