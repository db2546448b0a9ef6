// build.rs — Pipeline structure builder and structural verification
//
// Rewrites one validated loop into prologue / steady-state / epilogue
// regions driven by a fresh time variable t. A block of normalized stage s
// processes iteration j = t − s and runs when s ≤ t < T + s:
//
//   prologue  t ∈ [0, S)             guarded
//   steady    t ∈ [S, T)             every block, unguarded (empty if T ≤ S)
//   epilogue  t ∈ [max(S, T), T + S) guarded
//
// Guards that always hold in a region are elided and blocks that never run
// in a region are omitted. Blocks of one time step run by ascending order.
// Rotated buffers are re-allocated with a leading copy dimension and the
// blocks touching them are copied with rewritten accesses.
//
// Preconditions: `graph` passed `check_schedule`; `plan` came from
//                `rotation::plan_rotation` on the same graph.
// Postconditions: on success the program arenas gain the time variable,
//                 rotated buffers and rewritten blocks; nothing is added on
//                 failure.
// Failure modes: UnsupportedStructure if the time range does not fit in i64;
//                VerificationFailed if the emitted structure does not pass
//                its own certificate (checked only when `verify` is set).
// Side effects: appends to `program`'s arenas on success.

use std::collections::HashMap;

use crate::annotation::PipelineAnnotation;
use crate::depend::DependenceGraph;
use crate::error::{LoopRef, PipelineError};
use crate::id::{BlockId, BufferId, VarId};
use crate::ir::{
    Affine, Binding, Block, BlockOrigin, BlockRef, Buffer, Expr, Guard, Index, Loop, Op,
    PipelinedLoop, Program, Region, RegionKind, Scope,
};
use crate::pass::StageCert;
use crate::rotation::{CopyIndex, RotationPlan};
use crate::schedule::{BufferSchedule, PipelineSchedule, RegionSummary, ScheduledBlock};

// ── Certificate ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence that the emitted regions implement the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCert {
    /// Every block instance (b, j), j ∈ [0, T), runs exactly once.
    pub instances_exactly_once: bool,
    /// Region iteration attribution sums to the trip count.
    pub trip_count_preserved: bool,
    /// Every dependence source instance runs before its destination.
    pub dependences_respected: bool,
    /// No two live iterations of a rotated buffer share a copy.
    pub rotation_disjoint: bool,
}

impl StageCert for PipelineCert {
    fn all_pass(&self) -> bool {
        self.instances_exactly_once
            && self.trip_count_preserved
            && self.dependences_respected
            && self.rotation_disjoint
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("instances_exactly_once", self.instances_exactly_once),
            ("trip_count_preserved", self.trip_count_preserved),
            ("dependences_respected", self.dependences_respected),
            ("rotation_disjoint", self.rotation_disjoint),
        ]
    }
}

/// Iterations attributed to (prologue, steady, epilogue).
///
/// Iteration j belongs to the prologue if its first instance runs there,
/// otherwise to the epilogue if its last instance runs there, otherwise to
/// the steady state.
pub fn region_iterations(trip: u64, max_stage: u32) -> (u64, u64, u64) {
    let s = max_stage as u64;
    let prologue = trip.min(s);
    let epilogue = trip - prologue.max(s.max(trip) - s);
    let steady = trip - prologue - epilogue;
    (prologue, steady, epilogue)
}

/// Time-step ranges `[lo, hi)` of the three regions.
fn region_ranges(trip: u64, max_stage: u32) -> [(RegionKind, i64, i64); 3] {
    let t = trip as i64;
    let s = max_stage as i64;
    [
        (RegionKind::Prologue, 0, s),
        (RegionKind::Steady, s, t.max(s)),
        (RegionKind::Epilogue, s.max(t), t + s),
    ]
}

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct BuildOutput {
    pub pipelined: PipelinedLoop,
    pub schedule: PipelineSchedule,
    /// `None` when verification was not requested.
    pub cert: Option<PipelineCert>,
}

/// Arena entries created by the builder, committed only after verification.
struct Pending {
    time_var: (VarId, String),
    buffers: Vec<(BufferId, Buffer)>,
    blocks: Vec<(BlockId, Block)>,
}

pub fn build_pipeline(
    program: &mut Program,
    lp: &Loop,
    graph: &DependenceGraph,
    plan: &RotationPlan,
    reconciled: bool,
    verify: bool,
    loop_ref: &LoopRef,
) -> Result<BuildOutput, PipelineError> {
    let trip = lp.extent;
    let max_stage = graph.max_stage;

    // Time steps reach T + S and bindings reach min - S.
    let in_range = i64::try_from(trip)
        .ok()
        .and_then(|t| t.checked_add(max_stage as i64))
        .zip(lp.min.checked_sub(max_stage as i64))
        .is_some();
    if !in_range {
        return Err(PipelineError::UnsupportedStructure {
            loop_ref: loop_ref.clone(),
            reason: format!(
                "time range of {trip} iterations over {} stage(s) does not fit in i64",
                max_stage + 1
            ),
            block: None,
            buffer: None,
        });
    }

    // ── Pending arena entries ──

    let time_var = VarId(program.vars.len() as u32);
    let mut pending = Pending {
        time_var: (time_var, format!("{}_t", program.var(lp.var).name)),
        buffers: Vec::new(),
        blocks: Vec::new(),
    };

    let mut rotated: HashMap<BufferId, (BufferId, CopyIndex)> = HashMap::new();
    for bp in plan.rotated() {
        let id = BufferId((program.buffers.len() + pending.buffers.len()) as u32);
        let original = program.buffer(bp.buffer);
        let mut shape = vec![bp.depth];
        shape.extend(&original.shape);
        pending.buffers.push((
            id,
            Buffer {
                name: format!("{}_rot", original.name),
                dtype: original.dtype,
                shape,
                scope: Scope::Local,
            },
        ));
        let copy = CopyIndex {
            iv: lp.var,
            iter_min: lp.min,
            depth: bp.depth,
        };
        rotated.insert(bp.buffer, (id, copy));
    }

    // Block actually scheduled for each node.
    let mut node_blocks: Vec<BlockId> = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let touches_rotated = rotated.keys().any(|b| node.footprint.touches(*b));
        if !touches_rotated {
            node_blocks.push(node.block);
            continue;
        }
        let id = BlockId((program.blocks.len() + pending.blocks.len()) as u32);
        let source = program.block(node.block);
        pending.blocks.push((
            id,
            Block {
                name: source.name.clone(),
                origin: BlockOrigin::Rotated { from: node.block },
                init: source.init.as_ref().map(|ops| rotate_ops(ops, &rotated)),
                body: rotate_ops(&source.body, &rotated),
            },
        ));
        node_blocks.push(id);
    }

    // ── Regions ──

    let mut by_order: Vec<usize> = (0..graph.nodes.len()).collect();
    by_order.sort_by_key(|&pos| graph.nodes[pos].order);

    let t_end = trip as i64;
    let make_region = |kind: RegionKind, lo: i64, hi: i64| -> Region {
        let mut body = Vec::new();
        for &pos in &by_order {
            let s = graph.nodes[pos].stage as i64;
            let (run_lo, run_hi) = (s, t_end + s);
            if run_hi.min(hi) <= run_lo.max(lo) {
                continue;
            }
            let guard = (run_lo > lo || run_hi < hi).then_some(Guard {
                var: time_var,
                lo: run_lo,
                hi: run_hi,
            });
            body.push(BlockRef {
                block: node_blocks[pos],
                bind: Some(Binding {
                    var: lp.var,
                    value: Affine::var(time_var).offset(lp.min - s),
                }),
                guard,
            });
        }
        Region {
            kind,
            min: lo,
            extent: (hi - lo).max(0) as u64,
            body,
        }
    };
    let [p, s, e] = region_ranges(trip, max_stage);
    let prologue = make_region(p.0, p.1, p.2);
    let steady = make_region(s.0, s.1, s.2);
    let epilogue = make_region(e.0, e.1, e.2);

    let mut allocs: Vec<BufferId> = lp
        .allocs
        .iter()
        .copied()
        .filter(|b| !rotated.contains_key(b))
        .collect();
    allocs.extend(pending.buffers.iter().map(|(id, _)| *id));

    let mut annotations = lp.annotations.clone();
    PipelineAnnotation::strip(&mut annotations);

    let pipelined = PipelinedLoop {
        origin: lp.id,
        var: lp.var,
        time_var,
        allocs,
        annotations,
        prologue,
        steady,
        epilogue,
        span: lp.span,
    };

    // ── Verification ──

    let cert = verify.then(|| verify_pipeline(&pipelined, graph, plan, &node_blocks, trip));
    if let Some(cert) = cert.filter(|c| !c.all_pass()) {
        return Err(PipelineError::VerificationFailed {
            loop_ref: loop_ref.clone(),
            failed: cert.failed(),
        });
    }

    // ── Commit ──

    let schedule = make_schedule(program, lp, graph, plan, reconciled);

    let (var_id, var_name) = pending.time_var;
    let committed = program.add_var(var_name);
    debug_assert_eq!(committed, var_id);
    for (id, buffer) in pending.buffers {
        let committed = program.add_buffer(buffer);
        debug_assert_eq!(committed, id);
    }
    for (id, block) in pending.blocks {
        let committed = program.add_block(block);
        debug_assert_eq!(committed, id);
    }

    Ok(BuildOutput {
        pipelined,
        schedule,
        cert,
    })
}

fn make_schedule(
    program: &Program,
    lp: &Loop,
    graph: &DependenceGraph,
    plan: &RotationPlan,
    reconciled: bool,
) -> PipelineSchedule {
    let (pro, steady, epi) = region_iterations(lp.extent, graph.max_stage);
    let ranges = region_ranges(lp.extent, graph.max_stage);
    let regions = ranges
        .iter()
        .zip([pro, steady, epi])
        .map(|(&(kind, lo, hi), iterations)| RegionSummary {
            kind,
            min: lo,
            extent: (hi - lo).max(0) as u64,
            iterations,
        })
        .collect();

    PipelineSchedule {
        loop_id: lp.id.0,
        var: program.var(lp.var).name.clone(),
        trip_count: lp.extent,
        max_stage: graph.max_stage,
        reconciled,
        blocks: graph
            .nodes
            .iter()
            .map(|n| ScheduledBlock {
                name: program.block(n.block).name.clone(),
                stage: n.stage,
                order: n.order,
            })
            .collect(),
        buffers: plan
            .buffers
            .iter()
            .map(|bp| BufferSchedule {
                name: program.buffer(bp.buffer).name.clone(),
                depth: bp.depth,
                strategy: bp.strategy,
                stages: bp.stages.clone(),
            })
            .collect(),
        regions,
    }
}

// ── Access rewriting ────────────────────────────────────────────────────────

fn rotate_ops(ops: &[Op], rotated: &HashMap<BufferId, (BufferId, CopyIndex)>) -> Vec<Op> {
    ops.iter().map(|op| rotate_op(op, rotated)).collect()
}

fn rotate_op(op: &Op, rotated: &HashMap<BufferId, (BufferId, CopyIndex)>) -> Op {
    match op {
        Op::Store {
            buffer,
            indices,
            value,
        } => {
            let (buffer, indices) = rotate_access(*buffer, indices, rotated);
            Op::Store {
                buffer,
                indices,
                value: rotate_expr(value, rotated),
            }
        }
        Op::Grid {
            var,
            min,
            extent,
            body,
        } => Op::Grid {
            var: *var,
            min: *min,
            extent: *extent,
            body: rotate_ops(body, rotated),
        },
        Op::If { cond, then } => Op::If {
            cond: rotate_expr(cond, rotated),
            then: rotate_ops(then, rotated),
        },
    }
}

fn rotate_expr(expr: &Expr, rotated: &HashMap<BufferId, (BufferId, CopyIndex)>) -> Expr {
    match expr {
        Expr::Int(_) | Expr::Var(_) => expr.clone(),
        Expr::Load { buffer, indices } => {
            let (buffer, indices) = rotate_access(*buffer, indices, rotated);
            Expr::Load { buffer, indices }
        }
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op: *op,
            lhs: Box::new(rotate_expr(lhs, rotated)),
            rhs: Box::new(rotate_expr(rhs, rotated)),
        },
        Expr::Neg(inner) => Expr::Neg(Box::new(rotate_expr(inner, rotated))),
    }
}

fn rotate_access(
    buffer: BufferId,
    indices: &[Index],
    rotated: &HashMap<BufferId, (BufferId, CopyIndex)>,
) -> (BufferId, Vec<Index>) {
    match rotated.get(&buffer) {
        Some(&(new_buffer, copy)) => {
            let mut out = Vec::with_capacity(indices.len() + 1);
            out.push(copy.to_index());
            out.extend(indices.iter().cloned());
            (new_buffer, out)
        }
        None => (buffer, indices.to_vec()),
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Offset `c` of a binding `var = time_var + c`, the only form the builder
/// emits.
fn time_offset(bind: &Binding, var: VarId, time_var: VarId) -> Option<i64> {
    (bind.var == var && bind.value.terms == [(time_var, 1)]).then_some(bind.value.constant)
}

/// Check the emitted regions without replaying them.
///
/// Every region entry runs one block over an interval of time steps, so it
/// covers an interval of iterations. When each block instance (b, j) runs at
/// time j + stage(b), and time steps run by ascending order, the position of
/// an instance in the emitted sequence is the pair (j + stage, order). All
/// obligations then reduce to interval and pair comparisons.
fn verify_pipeline(
    pipelined: &PipelinedLoop,
    graph: &DependenceGraph,
    plan: &RotationPlan,
    node_blocks: &[BlockId],
    trip: u64,
) -> PipelineCert {
    let n = graph.nodes.len();
    let trip = trip as i128;
    let node_of: HashMap<BlockId, usize> = node_blocks
        .iter()
        .enumerate()
        .map(|(pos, &b)| (b, pos))
        .collect();
    let time_var = pipelined.time_var;

    // Iteration windows [lo, hi) each node runs in, over all regions.
    let mut windows: Vec<Vec<(i128, i128)>> = vec![Vec::new(); n];
    let mut exactly_once = true;
    // Every instance (b, j) runs at time j + stage(b).
    let mut stage_timed = true;
    // Regions ascend in time; entries of a region ascend by order.
    let mut ordered = true;
    let mut prev_end = i128::MIN;
    for region in pipelined.regions() {
        let r_lo = region.min as i128;
        let r_hi = r_lo + region.extent as i128;
        if region.extent > 0 {
            if r_lo < prev_end {
                ordered = false;
            }
            prev_end = r_hi;
        }
        let mut last_order = None;
        for r in &region.body {
            let Some(&pos) = node_of.get(&r.block) else {
                exactly_once = false;
                continue;
            };
            let order = graph.nodes[pos].order;
            if last_order.is_some_and(|o| o >= order) {
                ordered = false;
            }
            last_order = Some(order);

            let (mut lo, mut hi) = (r_lo, r_hi);
            if let Some(g) = r.guard {
                if g.var != time_var {
                    exactly_once = false;
                    continue;
                }
                lo = lo.max(g.lo as i128);
                hi = hi.min(g.hi as i128);
            }
            let offset = r
                .bind
                .as_ref()
                .and_then(|b| time_offset(b, pipelined.var, time_var));
            let Some(offset) = offset else {
                exactly_once = false;
                continue;
            };
            // j = t + offset - min
            let shift = offset as i128 - graph.min as i128;
            if shift != -(graph.nodes[pos].stage as i128) {
                stage_timed = false;
            }
            if lo < hi {
                windows[pos].push((lo + shift, hi + shift));
            }
        }
    }
    for w in &mut windows {
        w.sort_unstable();
        let mut next = 0;
        for &(lo, hi) in w.iter() {
            if lo != next {
                exactly_once = false;
            }
            next = hi;
        }
        if next != trip {
            exactly_once = false;
        }
    }
    let timed = exactly_once && stage_timed;

    // Attribution from the emitted region ranges.
    let first = graph.nodes.iter().map(|n| n.stage).min().unwrap_or(0) as i128;
    let last = graph.nodes.iter().map(|n| n.stage).max().unwrap_or(0) as i128;
    let range_of = |kind: RegionKind| {
        pipelined
            .regions()
            .into_iter()
            .find(|r| r.kind == kind)
            .map_or((0, 0), |r| (r.min as i128, r.min as i128 + r.extent as i128))
    };
    let clip = |(lo, hi): (i128, i128)| (lo.max(0), hi.min(trip));
    let len = |(lo, hi): (i128, i128)| (hi - lo).max(0);
    let (pro_lo, pro_hi) = range_of(RegionKind::Prologue);
    let (epi_lo, epi_hi) = range_of(RegionKind::Epilogue);
    // Iterations whose first instance runs in the prologue.
    let pro = clip((pro_lo - first, pro_hi - first));
    // Iterations whose last instance runs in the epilogue.
    let epi = clip((epi_lo - last, epi_hi - last));
    let both = (pro.0.max(epi.0), pro.1.min(epi.1));
    let pro_count = len(pro);
    let epi_count = len(epi) - len(both);
    let counts = (
        pro_count as u64,
        (trip - pro_count - epi_count) as u64,
        epi_count as u64,
    );
    let trip_count_preserved =
        timed && counts == region_iterations(trip as u64, graph.max_stage);

    // (time, order) of a node's instance relative to its iteration.
    let key = |pos: usize, delta: i128| {
        let node = &graph.nodes[pos];
        (node.stage as i128 + delta, node.order)
    };

    let dependences_respected = timed
        && ordered
        && graph.edges.iter().all(|e| {
            let delta = e.distance as i128;
            delta >= trip || key(e.src, 0) < key(e.dst, delta)
        });

    // Iterations j and j + depth share a copy: j must be done first.
    let rotation_disjoint = timed
        && ordered
        && plan.rotated().all(|bp| {
            let depth = bp.depth as i128;
            if depth >= trip {
                return true;
            }
            let users: Vec<usize> = (0..n)
                .filter(|&pos| graph.nodes[pos].footprint.touches(bp.buffer))
                .collect();
            let done = users.iter().map(|&pos| key(pos, 0)).max();
            let next = users.iter().map(|&pos| key(pos, depth)).min();
            matches!((done, next), (Some(done), Some(next)) if done < next)
        });

    PipelineCert {
        instances_exactly_once: exactly_once,
        trip_count_preserved,
        dependences_respected,
        rotation_disjoint,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
