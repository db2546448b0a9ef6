// decompose.rs — Reduction decomposition
//
// Splits every block carrying an `init` section into two sibling blocks,
// `<name>_init` and `<name>_update`, wrapped in `Stmt::Reduction` so the
// pair stays discoverable. The split adds one direct child to the enclosing
// loop.
//
// With `AnnotationUpkeep::Stale` the enclosing loop's pipeline annotation is
// left as it was, one entry short. With `AnnotationUpkeep::Update` the entry
// of the split block is duplicated for the new init block.
//
// Preconditions: `program` came out of resolve.
// Postconditions: no Stmt::Block reaches a block with `init`; the split
//                 blocks stay in the arena but are no longer referenced.
// Failure modes: none. Annotations that do not parse or do not line up with
//                the child list are left for the validator to report.
// Side effects: appends two blocks per split to `program.blocks`.

use std::mem;

use serde::{Deserialize, Serialize};

use crate::annotation::PipelineAnnotation;
use crate::error::LoopRef;
use crate::id::BlockId;
use crate::ir::{Block, BlockOrigin, BlockRef, Loop, Program, Stmt};

/// How the pass treats pipeline annotations of loops it restructures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationUpkeep {
    /// Leave annotations untouched.
    Stale,
    /// Extend annotations to the new child list.
    Update,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecomposeResult {
    /// (original, init, update) per split block.
    pub split: Vec<(BlockId, BlockId, BlockId)>,
    /// Loops whose annotation was extended.
    pub updated_loops: usize,
}

pub fn decompose_reductions(program: &mut Program, upkeep: AnnotationUpkeep) -> DecomposeResult {
    let mut result = DecomposeResult::default();
    let mut body = mem::take(&mut program.body);
    split_list(program, &mut body, &mut result);
    for stmt in body.iter_mut() {
        walk_loops(program, stmt, upkeep, &mut result);
    }
    program.body = body;
    result
}

fn walk_loops(
    program: &mut Program,
    stmt: &mut Stmt,
    upkeep: AnnotationUpkeep,
    result: &mut DecomposeResult,
) {
    match stmt {
        Stmt::For(lp) => {
            split_loop(program, lp, upkeep, result);
            for inner in lp.body.iter_mut() {
                walk_loops(program, inner, upkeep, result);
            }
        }
        Stmt::Allocate { body, .. } => {
            split_list(program, body, result);
            for inner in body.iter_mut() {
                walk_loops(program, inner, upkeep, result);
            }
        }
        Stmt::Block(_) | Stmt::Reduction { .. } | Stmt::Pipeline(_) => {}
    }
}

fn split_loop(
    program: &mut Program,
    lp: &mut Loop,
    upkeep: AnnotationUpkeep,
    result: &mut DecomposeResult,
) {
    let positions = split_list(program, &mut lp.body, result);
    if positions.is_empty() || upkeep == AnnotationUpkeep::Stale {
        return;
    }
    let loop_ref = LoopRef {
        id: lp.id,
        var: program.var(lp.var).name.clone(),
        span: lp.span,
    };
    let Ok(Some(mut ann)) = PipelineAnnotation::from_annotations(&lp.annotations, &loop_ref)
    else {
        return;
    };
    let before = positions.len();
    for &pos in &positions {
        if pos >= ann.stages.len() || ann.stages.len() != ann.orders.len() {
            tracing::debug!("{loop_ref}: annotation does not line up, left as is");
            return;
        }
        ann = ann.split_entry(pos);
    }
    ann.attach(&mut lp.annotations);
    result.updated_loops += 1;
    tracing::debug!("{loop_ref}: extended annotation for {before} decomposed reduction(s)");
}

/// Split the reduction blocks of one statement list. Returns the child
/// position of each new init block, in list order.
fn split_list(program: &mut Program, body: &mut [Stmt], result: &mut DecomposeResult) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut child = 0;
    for stmt in body.iter_mut() {
        match stmt {
            Stmt::Block(r) if program.block(r.block).init.is_some() => {
                let (init, update) = split_block(program, r.block);
                result.split.push((r.block, init, update));
                positions.push(child);
                *stmt = Stmt::Reduction {
                    init: BlockRef::plain(init),
                    update: BlockRef::plain(update),
                };
                child += 2;
            }
            Stmt::Block(_) => child += 1,
            Stmt::Reduction { .. } => child += 2,
            Stmt::For(_) | Stmt::Pipeline(_) | Stmt::Allocate { .. } => {}
        }
    }
    positions
}

fn split_block(program: &mut Program, id: BlockId) -> (BlockId, BlockId) {
    let source = program.block(id);
    let name = source.name.clone();
    let init_ops = source.init.clone().unwrap_or_default();
    let body = source.body.clone();

    let init_id = BlockId(program.blocks.len() as u32);
    let update_id = BlockId(init_id.0 + 1);
    program.add_block(Block {
        name: format!("{name}_init"),
        origin: BlockOrigin::ReductionInit { update: update_id },
        init: None,
        body: init_ops,
    });
    program.add_block(Block {
        name: format!("{name}_update"),
        origin: BlockOrigin::ReductionUpdate { init: init_id },
        init: None,
        body,
    });
    (init_id, update_id)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{BLOCK_COUNT_KEY, STAGE_KEY};
    use crate::ir::AnnotationValue;
    use crate::resolve::program_from_source;

    const SRC: &str = "
buffer A: i32[8, 4]; buffer B: i32[8]; buffer C: i32[8];
for i in 0..8 @software_pipeline_stage = [0, 1, 1] @software_pipeline_order = [0, 1, 2] {
  alloc S: i32[4];
  block load { for k in 0..4 { S[k] = A[i, k]; } }
  block sum { init { B[i] = 0; } for k in 0..4 { B[i] = B[i] + S[k]; } }
  block store { C[i] = B[i]; }
}";

    fn first_loop(program: &Program) -> &Loop {
        let Some(Stmt::For(lp)) = program.body.last() else {
            panic!("expected loop")
        };
        lp
    }

    #[test]
    fn splits_block_with_init() {
        let mut program = program_from_source(SRC).unwrap();
        let result = decompose_reductions(&mut program, AnnotationUpkeep::Stale);
        assert_eq!(result.split.len(), 1);

        let lp = first_loop(&program);
        let Stmt::Reduction { init, update } = &lp.body[1] else {
            panic!("expected reduction")
        };
        assert_eq!(program.block(init.block).name, "sum_init");
        assert_eq!(program.block(update.block).name, "sum_update");
        assert_eq!(
            program.block(init.block).origin,
            BlockOrigin::ReductionInit {
                update: update.block
            }
        );
        assert!(program.block(update.block).init.is_none());
    }

    #[test]
    fn stale_upkeep_leaves_annotation_short() {
        let mut program = program_from_source(SRC).unwrap();
        let before = first_loop(&program).annotations.clone();
        decompose_reductions(&mut program, AnnotationUpkeep::Stale);
        assert_eq!(first_loop(&program).annotations, before);
    }

    #[test]
    fn update_upkeep_extends_annotation() {
        let mut program = program_from_source(SRC).unwrap();
        let result = decompose_reductions(&mut program, AnnotationUpkeep::Update);
        assert_eq!(result.updated_loops, 1);
        let ann = &first_loop(&program).annotations;
        assert_eq!(
            ann.get(STAGE_KEY),
            Some(&AnnotationValue::Ints(vec![0, 1, 1, 1]))
        );
        assert_eq!(ann.get(BLOCK_COUNT_KEY), Some(&AnnotationValue::Int(4)));
    }

    #[test]
    fn blocks_without_init_are_kept() {
        let mut program =
            program_from_source("buffer A: i32[4]; for i in 0..4 { block a { A[i] = i; } }").unwrap();
        let result = decompose_reductions(&mut program, AnnotationUpkeep::Update);
        assert!(result.split.is_empty());
        assert!(matches!(first_loop(&program).body[0], Stmt::Block(_)));
    }
}
