// rotation.rs — Buffer rotation planner
//
// For every buffer touched by blocks of more than one stage, decides how
// many physical copies the pipelined loop needs. A buffer allocated by the
// loop gets
//
//   depth = max over dependence edges on it of (dst stage − src stage) + 1
//
// copies, selected by the copy index (iv − min) mod depth. Buffers owned
// outside the loop are never rotated: the dependence analyzer has already
// proven their cross-stage accesses race-free, so they stay in place.
//
// Preconditions: `graph` passed `check_schedule`.
// Postconditions: every rotated buffer is written before it is read within
//                 each iteration (each copy carries no value across
//                 iterations).
// Failure modes: UnsupportedStructure when a rotated buffer is read before an
//                earlier block of the same iteration wrote it.
// Side effects: none.

use serde::Serialize;

use crate::depend::DependenceGraph;
use crate::error::{LoopRef, PipelineError};
use crate::footprint::covers;
use crate::id::{BufferId, VarId};
use crate::ir::{Affine, Index, Loop, Program};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    /// One copy, accessed as in the original loop.
    InPlace,
    /// `depth` copies behind a new leading dimension.
    Rotate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPlan {
    pub buffer: BufferId,
    pub depth: u64,
    pub strategy: RotationStrategy,
    /// Stages of the blocks touching the buffer, ascending.
    pub stages: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationPlan {
    /// Multi-stage buffers, in buffer id order.
    pub buffers: Vec<BufferPlan>,
}

impl RotationPlan {
    pub fn get(&self, buffer: BufferId) -> Option<&BufferPlan> {
        self.buffers.iter().find(|p| p.buffer == buffer)
    }

    pub fn rotated(&self) -> impl Iterator<Item = &BufferPlan> {
        self.buffers
            .iter()
            .filter(|p| p.strategy == RotationStrategy::Rotate)
    }
}

/// The copy-selection function of a rotated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyIndex {
    pub iv: VarId,
    pub iter_min: i64,
    pub depth: u64,
}

impl CopyIndex {
    pub fn to_index(self) -> Index {
        Index::Rotate {
            iter: Affine::var(self.iv).offset(-self.iter_min),
            depth: self.depth,
        }
    }

    /// Copy selected when the induction variable equals `iv_value`.
    pub fn select(self, iv_value: i64) -> u64 {
        (iv_value - self.iter_min).rem_euclid(self.depth as i64) as u64
    }
}

pub fn plan_rotation(
    program: &Program,
    lp: &Loop,
    graph: &DependenceGraph,
    loop_ref: &LoopRef,
) -> Result<RotationPlan, PipelineError> {
    let mut touched: Vec<BufferId> = graph
        .nodes
        .iter()
        .flat_map(|n| n.footprint.reads.iter().chain(&n.footprint.writes))
        .map(|r| r.buffer)
        .collect();
    touched.sort_unstable();
    touched.dedup();

    let mut plan = RotationPlan::default();
    for buffer in touched {
        let stages = graph.stages_touching(buffer);
        if stages.len() < 2 {
            continue;
        }
        if !lp.allocs.contains(&buffer) {
            plan.buffers.push(BufferPlan {
                buffer,
                depth: 1,
                strategy: RotationStrategy::InPlace,
                stages,
            });
            continue;
        }

        let spread = graph
            .edges_on(buffer)
            .map(|e| graph.nodes[e.dst].stage as i64 - graph.nodes[e.src].stage as i64)
            .filter(|&d| d > 0)
            .max();
        // With no cross-stage edge the blocks touch disjoint parts in one
        // iteration; keep one copy per live iteration.
        let depth = match spread {
            Some(d) => d as u64 + 1,
            None => (stages[stages.len() - 1] - stages[0]) as u64 + 1,
        };

        check_written_before_read(program, graph, buffer, loop_ref)?;
        tracing::debug!(
            "{loop_ref}: rotate '{}' with depth {depth}",
            program.buffer(buffer).name
        );
        plan.buffers.push(BufferPlan {
            buffer,
            depth,
            strategy: RotationStrategy::Rotate,
            stages,
        });
    }
    Ok(plan)
}

/// Every read of `buffer` must be covered by an exact write of a strictly
/// earlier block of the same iteration.
fn check_written_before_read(
    program: &Program,
    graph: &DependenceGraph,
    buffer: BufferId,
    loop_ref: &LoopRef,
) -> Result<(), PipelineError> {
    for (y, node) in graph.nodes.iter().enumerate() {
        for read in node.footprint.reads.iter().filter(|r| r.buffer == buffer) {
            let covered = graph.nodes[..y]
                .iter()
                .flat_map(|x| x.footprint.writes.iter())
                .any(|w| covers(w, read));
            if !covered {
                return Err(PipelineError::UnsupportedStructure {
                    loop_ref: loop_ref.clone(),
                    reason: format!(
                        "multi-stage buffer '{}' may carry values across iterations",
                        program.buffer(buffer).name
                    ),
                    block: Some(program.block(node.block).name.clone()),
                    buffer: Some(program.buffer(buffer).name.clone()),
                });
            }
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
