// validate.rs — Consistency validator for pipeline annotations
//
// Checks that a loop's stage/order arrays describe exactly its current list
// of direct child blocks before anything else looks at them. A decomposed
// reduction contributes two children (init, update).
//
// Preconditions: `lp` is a loop of `program`.
// Postconditions: on success, `stages`, `orders` and `blocks` have the same
//                 length and `orders` is a permutation of `0..len`.
// Failure modes: AnnotationMismatch (lengths), InvalidAnnotation (malformed
//                values or version tag), UnsupportedStructure (nested loops).
// Side effects: logs reconciliation at warn level. The loop's annotations
//               are never modified here.

use serde::{Deserialize, Serialize};

use crate::annotation::{snapshot, PipelineAnnotation};
use crate::error::{LoopRef, PipelineError};
use crate::id::BlockId;
use crate::ir::{BlockOrigin, BlockRef, Loop, Program, Stmt};

/// What to do when the annotation is shorter than the block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// Any length mismatch is an error.
    #[default]
    Strict,
    /// Init blocks of decomposed reductions inherit their update sibling's
    /// stage and order when they are exactly the surplus.
    ReconcileByOrigin,
}

/// Annotation entries aligned one-to-one with the loop's child blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAnnotation {
    pub blocks: Vec<BlockId>,
    pub stages: Vec<u32>,
    pub orders: Vec<u32>,
    /// True if entries were synthesized for decomposed-reduction init blocks.
    pub reconciled: bool,
}

/// A direct child, with the reduction pair it belongs to (if any).
struct Child<'a> {
    block: &'a BlockRef,
    init_of: Option<&'a BlockRef>,
}

/// Validate the pipeline annotation of `lp`. `Ok(None)` if it has none.
pub fn validate(
    program: &Program,
    lp: &Loop,
    loop_ref: &LoopRef,
    policy: ReconcilePolicy,
) -> Result<Option<ValidatedAnnotation>, PipelineError> {
    let Some(ann) = PipelineAnnotation::from_annotations(&lp.annotations, loop_ref)? else {
        return Ok(None);
    };

    let children = direct_children(lp, loop_ref)?;
    let actual = children.len();
    let mismatch = |detail: String| PipelineError::AnnotationMismatch {
        loop_ref: loop_ref.clone(),
        expected: ann.stages.len(),
        actual,
        detail,
        snapshot: snapshot(&lp.annotations),
    };
    let invalid = |reason: String| PipelineError::InvalidAnnotation {
        loop_ref: loop_ref.clone(),
        reason,
        snapshot: snapshot(&lp.annotations),
    };

    if ann.stages.len() != ann.orders.len() {
        return Err(mismatch(format!(
            "stage has {} entries, order has {}",
            ann.stages.len(),
            ann.orders.len()
        )));
    }
    if ann.computed_for != ann.stages.len() {
        return Err(invalid(format!(
            "annotation was computed for {} blocks but carries {} entries",
            ann.computed_for,
            ann.stages.len()
        )));
    }
    if !is_permutation(&ann.orders) {
        return Err(invalid(format!(
            "order {:?} is not a permutation of 0..{}",
            ann.orders,
            ann.orders.len()
        )));
    }
    if actual == 0 {
        return Err(PipelineError::UnsupportedStructure {
            loop_ref: loop_ref.clone(),
            reason: "annotated loop has no blocks".to_string(),
            block: None,
            buffer: None,
        });
    }

    let blocks: Vec<BlockId> = children.iter().map(|c| c.block.block).collect();
    if ann.stages.len() == actual {
        return Ok(Some(ValidatedAnnotation {
            blocks,
            stages: ann.stages.clone(),
            orders: ann.orders.clone(),
            reconciled: false,
        }));
    }

    let reductions = children.iter().filter(|c| c.init_of.is_some()).count();
    match policy {
        ReconcilePolicy::Strict => Err(mismatch(
            "strict policy does not reconcile annotations".to_string(),
        )),
        ReconcilePolicy::ReconcileByOrigin => {
            if ann.stages.len() > actual || actual - ann.stages.len() != reductions {
                return Err(mismatch(format!(
                    "surplus is not explained by {reductions} decomposed reduction(s)"
                )));
            }
            let mut reconciled = ann.clone();
            for (pos, child) in children.iter().enumerate() {
                let Some(update) = child.init_of else {
                    continue;
                };
                let sibling = BlockOrigin::ReductionInit {
                    update: update.block,
                };
                if program.block(child.block.block).origin != sibling {
                    return Err(mismatch(format!(
                        "block '{}' is not the init sibling of '{}'",
                        program.block(child.block.block).name,
                        program.block(update.block).name
                    )));
                }
                // Children before `pos` are already aligned.
                reconciled = reconciled.split_entry(pos);
            }
            tracing::warn!(
                "{loop_ref}: reconciled stale annotation ({} entries for {actual} blocks) by inheriting from {reductions} reduction update sibling(s)",
                ann.stages.len()
            );
            Ok(Some(ValidatedAnnotation {
                blocks,
                stages: reconciled.stages,
                orders: reconciled.orders,
                reconciled: true,
            }))
        }
    }
}

fn direct_children<'a>(lp: &'a Loop, loop_ref: &LoopRef) -> Result<Vec<Child<'a>>, PipelineError> {
    let mut children = Vec::new();
    for stmt in &lp.body {
        match stmt {
            Stmt::Block(block) => children.push(Child {
                block,
                init_of: None,
            }),
            Stmt::Reduction { init, update } => {
                children.push(Child {
                    block: init,
                    init_of: Some(update),
                });
                children.push(Child {
                    block: update,
                    init_of: None,
                });
            }
            Stmt::For(_) | Stmt::Pipeline(_) | Stmt::Allocate { .. } => {
                return Err(PipelineError::UnsupportedStructure {
                    loop_ref: loop_ref.clone(),
                    reason: "annotated loop contains a nested loop".to_string(),
                    block: None,
                    buffer: None,
                })
            }
        }
    }
    Ok(children)
}

fn is_permutation(orders: &[u32]) -> bool {
    let mut seen = vec![false; orders.len()];
    for &o in orders {
        match seen.get_mut(o as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

// ── Tests ───────────────────────────────────────────────────────────────────
