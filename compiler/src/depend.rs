// depend.rs — Dependence graph between staged blocks of one loop
//
// Nodes are the loop's direct child blocks (body positions) with their
// normalized stage and order. Edges are flow (RAW), anti (WAR) and output
// (WAW) dependences between block instances, tagged with the iteration
// distance at which they first occur.
//
// In the emitted schedule, instance (b, j) of a stage-s block runs at time
// step j + s, and blocks of one time step run by ascending order. An edge
// from x to y at distance δ is therefore respected iff its lag
// stage(y) − stage(x) + δ is positive, or zero with order(x) < order(y).
//
// Preconditions: `validated` was produced for `lp` by `validate::validate`.
// Postconditions: intra-iteration edges cover every buffer; loop-carried
//                 edges (1 ≤ δ ≤ max_stage, minimal δ) cover every buffer
//                 not allocated by the loop itself.
// Failure modes: UnsupportedStructure for data-dependent control;
//                DependencyCycle from `check_schedule`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::error::{LoopRef, PipelineError};
use crate::footprint::{block_footprint, may_conflict, AccessRegion, BlockFootprint};
use crate::id::{BlockId, BufferId};
use crate::ir::{Loop, Program};
use crate::validate::ValidatedAnnotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    /// Read after write.
    Flow,
    /// Write after read.
    Anti,
    /// Write after write.
    Output,
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKind::Flow => write!(f, "flow"),
            DepKind::Anti => write!(f, "anti"),
            DepKind::Output => write!(f, "output"),
        }
    }
}

/// `src` and `dst` are body positions (indices into `DependenceGraph::nodes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEdge {
    pub src: usize,
    pub dst: usize,
    pub buffer: BufferId,
    pub kind: DepKind,
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBlock {
    pub block: BlockId,
    /// Normalized: the smallest stage in the loop is 0.
    pub stage: u32,
    pub order: u32,
    pub footprint: BlockFootprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependenceGraph {
    pub nodes: Vec<StagedBlock>,
    pub edges: Vec<DepEdge>,
    pub max_stage: u32,
    pub min: i64,
    pub trip_count: u64,
}

impl DependenceGraph {
    pub fn lag(&self, edge: &DepEdge) -> i64 {
        self.nodes[edge.dst].stage as i64 - self.nodes[edge.src].stage as i64
            + edge.distance as i64
    }

    pub fn is_legal(&self, edge: &DepEdge) -> bool {
        let lag = self.lag(edge);
        lag > 0 || (lag == 0 && self.nodes[edge.src].order < self.nodes[edge.dst].order)
    }

    /// Distinct stages of the blocks touching `buffer`, ascending.
    pub fn stages_touching(&self, buffer: BufferId) -> Vec<u32> {
        let mut stages: Vec<u32> = self
            .nodes
            .iter()
            .filter(|n| n.footprint.touches(buffer))
            .map(|n| n.stage)
            .collect();
        stages.sort_unstable();
        stages.dedup();
        stages
    }

    pub fn edges_on(&self, buffer: BufferId) -> impl Iterator<Item = &DepEdge> {
        self.edges.iter().filter(move |e| e.buffer == buffer)
    }

    /// Reject the annotation if any dependence runs backwards in the
    /// emitted schedule.
    pub fn check_schedule(
        &self,
        program: &Program,
        loop_ref: &LoopRef,
        snapshot: &str,
    ) -> Result<(), PipelineError> {
        let Some(edge) = self.edges.iter().find(|e| !self.is_legal(e)) else {
            return Ok(());
        };
        let src = &self.nodes[edge.src];
        let dst = &self.nodes[edge.dst];
        Err(PipelineError::DependencyCycle {
            loop_ref: loop_ref.clone(),
            buffer: program.buffer(edge.buffer).name.clone(),
            kind: edge.kind,
            src_block: program.block(src.block).name.clone(),
            src_stage: src.stage,
            dst_block: program.block(dst.block).name.clone(),
            dst_stage: dst.stage,
            distance: edge.distance,
            snapshot: snapshot.to_string(),
        })
    }
}

/// Build the dependence graph of an annotated loop.
pub fn build_graph(
    program: &Program,
    lp: &Loop,
    validated: &ValidatedAnnotation,
    loop_ref: &LoopRef,
) -> Result<DependenceGraph, PipelineError> {
    let base = validated.stages.iter().copied().min().unwrap_or(0);
    let mut nodes = Vec::with_capacity(validated.blocks.len());
    for (pos, &block) in validated.blocks.iter().enumerate() {
        let footprint = block_footprint(program.block(block), lp.var);
        if footprint.data_dependent_control {
            return Err(PipelineError::UnsupportedStructure {
                loop_ref: loop_ref.clone(),
                reason: "data-dependent control flow inside a staged block".to_string(),
                block: Some(program.block(block).name.clone()),
                buffer: None,
            });
        }
        nodes.push(StagedBlock {
            block,
            stage: validated.stages[pos] - base,
            order: validated.orders[pos],
            footprint,
        });
    }
    let max_stage = nodes.iter().map(|n| n.stage).max().unwrap_or(0);

    let mut graph = DependenceGraph {
        nodes,
        edges: Vec::new(),
        max_stage,
        min: lp.min,
        trip_count: lp.extent,
    };

    let n = graph.nodes.len();
    let mut edges = Vec::new();

    // Same iteration, body order.
    for x in 0..n {
        for y in x + 1..n {
            for (buffer, kind) in conflicts(&graph, x, y, 0, |_| true) {
                edges.push(DepEdge {
                    src: x,
                    dst: y,
                    buffer,
                    kind,
                    distance: 0,
                });
            }
        }
    }

    // Across iterations. Buffers allocated by this loop are private per
    // iteration once rotated, so only the others carry dependences here.
    let shared = |b: BufferId| !lp.allocs.contains(&b);
    for x in 0..n {
        for y in 0..n {
            let mut seen: Vec<(BufferId, DepKind)> = Vec::new();
            for delta in 1..=max_stage {
                for (buffer, kind) in conflicts(&graph, x, y, delta as u64, shared) {
                    if seen.contains(&(buffer, kind)) {
                        continue;
                    }
                    seen.push((buffer, kind));
                    edges.push(DepEdge {
                        src: x,
                        dst: y,
                        buffer,
                        kind,
                        distance: delta,
                    });
                }
            }
        }
    }

    tracing::debug!(
        "{loop_ref}: {} staged blocks, {} dependence edges, max stage {max_stage}",
        n,
        edges.len()
    );
    graph.edges = edges;
    Ok(graph)
}

/// Dependences from instance (x, j) to (y, j + delta), one per buffer and kind.
fn conflicts(
    graph: &DependenceGraph,
    x: usize,
    y: usize,
    delta: u64,
    keep: impl Fn(BufferId) -> bool,
) -> Vec<(BufferId, DepKind)> {
    let fx = &graph.nodes[x].footprint;
    let fy = &graph.nodes[y].footprint;
    let hit = |a: &[AccessRegion], b: &[AccessRegion]| -> Vec<BufferId> {
        let mut out = Vec::new();
        for ra in a {
            if !keep(ra.buffer) || out.contains(&ra.buffer) {
                continue;
            }
            if b
                .iter()
                .any(|rb| may_conflict(ra, rb, delta, graph.min, graph.trip_count))
            {
                out.push(ra.buffer);
            }
        }
        out
    };

    let mut found = Vec::new();
    for buffer in hit(&fx.writes, &fy.reads) {
        found.push((buffer, DepKind::Flow));
    }
    for buffer in hit(&fx.reads, &fy.writes) {
        found.push((buffer, DepKind::Anti));
    }
    for buffer in hit(&fx.writes, &fy.writes) {
        found.push((buffer, DepKind::Output));
    }
    found.sort();
    found
}

// ── Tests ───────────────────────────────────────────────────────────────────
