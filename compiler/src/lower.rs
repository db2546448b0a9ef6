// lower.rs — Pipeline lowering & verification
//
// Flattens every `Stmt::Pipeline` into ordinary IR: an `Allocate` scope for
// the pipeline's buffers around one `For` loop of the time variable per
// non-empty region. Block references keep their binding and guard, so the
// result runs on the interpreter like any other program.
//
// Preconditions: `program` went through injection.
// Postconditions: no `Stmt::Pipeline` remains; fresh loop ids follow the
//   largest id already present; region loops keep the original loop's
//   non-pipeline annotations; `LowerCert` records the L1-L4 obligations.
// Failure modes: none; a failing cert is turned into a diagnostic by the
//   pipeline runner.
// Side effects: none.

use crate::footprint::block_footprint;
use crate::id::{BufferId, IdAllocator};
use crate::ir::{BlockRef, Loop, PipelinedLoop, Program, Scope, Stmt};

// ── Output types ────────────────────────────────────────────────────────────

pub struct LowerResult {
    pub lowered: Program,
    pub cert: LowerCert,
}

/// Machine-checkable evidence for the lowering obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerCert {
    /// L1: no pipelined statement survives lowering.
    pub l1_no_pipelines_remain: bool,
    /// L2: each pipeline became exactly one loop per non-empty region.
    pub l2_region_loops_emitted: bool,
    /// L3: every local buffer a region block touches is allocated by an
    /// enclosing scope.
    pub l3_local_buffers_allocated: bool,
    /// L4: every region block rebinds the induction variable from the region
    /// loop variable, and guards test that variable.
    pub l4_bindings_from_time_var: bool,
}

impl crate::pass::StageCert for LowerCert {
    fn all_pass(&self) -> bool {
        self.l1_no_pipelines_remain
            && self.l2_region_loops_emitted
            && self.l3_local_buffers_allocated
            && self.l4_bindings_from_time_var
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("L1_no_pipelines_remain", self.l1_no_pipelines_remain),
            ("L2_region_loops_emitted", self.l2_region_loops_emitted),
            ("L3_local_buffers_allocated", self.l3_local_buffers_allocated),
            ("L4_bindings_from_time_var", self.l4_bindings_from_time_var),
        ]
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn lower_and_verify(program: &Program) -> LowerResult {
    let mut lowering = Lowering {
        program,
        ids: IdAllocator::starting_after(program.max_loop_id()),
        scope: Vec::new(),
        expected: 0,
        emitted: 0,
        unallocated: 0,
        unbound: 0,
    };
    let body = lowering.list(&program.body);

    let cert = LowerCert {
        l1_no_pipelines_remain: count_pipelines(&body) == 0,
        l2_region_loops_emitted: lowering.expected == lowering.emitted,
        l3_local_buffers_allocated: lowering.unallocated == 0,
        l4_bindings_from_time_var: lowering.unbound == 0,
    };
    let mut lowered = program.clone();
    lowered.body = body;
    LowerResult { lowered, cert }
}

struct Lowering<'a> {
    program: &'a Program,
    ids: IdAllocator,
    /// Buffers allocated by the enclosing scopes.
    scope: Vec<BufferId>,
    expected: usize,
    emitted: usize,
    unallocated: usize,
    unbound: usize,
}

impl Lowering<'_> {
    fn list(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        stmts.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Pipeline(p) => {
                self.check_pipeline(p);
                self.expected += p.regions().iter().filter(|r| r.extent > 0).count();
                let body = self.pipeline(p);
                self.emitted += body.len();
                Stmt::Allocate {
                    buffers: p.allocs.clone(),
                    body,
                }
            }
            Stmt::For(lp) => Stmt::For(Loop {
                body: self.scoped(&lp.allocs, &lp.body),
                ..lp.clone()
            }),
            Stmt::Allocate { buffers, body } => Stmt::Allocate {
                buffers: buffers.clone(),
                body: self.scoped(buffers, body),
            },
            Stmt::Block(_) | Stmt::Reduction { .. } => stmt.clone(),
        }
    }

    fn scoped(&mut self, buffers: &[BufferId], body: &[Stmt]) -> Vec<Stmt> {
        let mark = self.scope.len();
        self.scope.extend_from_slice(buffers);
        let lowered = self.list(body);
        self.scope.truncate(mark);
        lowered
    }

    fn pipeline(&mut self, p: &PipelinedLoop) -> Vec<Stmt> {
        p.regions()
            .into_iter()
            .filter(|r| r.extent > 0)
            .map(|r| {
                Stmt::For(Loop {
                    id: self.ids.alloc_loop(),
                    var: p.time_var,
                    min: r.min,
                    extent: r.extent,
                    allocs: Vec::new(),
                    annotations: p.annotations.clone(),
                    body: r.body.iter().cloned().map(Stmt::Block).collect(),
                    span: p.span,
                })
            })
            .collect()
    }

    fn check_pipeline(&mut self, p: &PipelinedLoop) {
        for r in p.regions().into_iter().flat_map(|region| &region.body) {
            if !rebinds_from_time_var(r, p) {
                self.unbound += 1;
            }
            let footprint = block_footprint(self.program.block(r.block), p.var);
            for access in footprint.reads.iter().chain(&footprint.writes) {
                let b = access.buffer;
                let local = self.program.buffer(b).scope == Scope::Local;
                if local && !self.scope.contains(&b) && !p.allocs.contains(&b) {
                    self.unallocated += 1;
                }
            }
        }
    }
}

fn rebinds_from_time_var(r: &BlockRef, p: &PipelinedLoop) -> bool {
    let bound = r.bind.as_ref().is_some_and(|b| {
        b.var == p.var && b.value.terms.iter().all(|&(v, _)| v == p.time_var)
    });
    bound && r.guard.map_or(true, |g| g.var == p.time_var)
}

fn count_pipelines(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|stmt| match stmt {
            Stmt::Pipeline(_) => 1,
            Stmt::For(lp) => count_pipelines(&lp.body),
            Stmt::Allocate { body, .. } => count_pipelines(body),
            Stmt::Block(_) | Stmt::Reduction { .. } => 0,
        })
        .sum()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::LoopId;
    use crate::ir::AnnotationValue;
    use crate::inject::{inject_software_pipeline, InjectOptions};
    use crate::pass::StageCert;
    use crate::resolve::program_from_source;

    fn pipelined(src: &str) -> Program {
        let mut program = program_from_source(src).expect("source resolves");
        let result = inject_software_pipeline(&mut program, InjectOptions::default());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        program
    }

    #[test]
    fn two_stage_pipeline_lowers_to_three_loops() {
        let program = pipelined(
            "buffer A: i32[16]; buffer B: i32[16];
             for i in 0..16 @software_pipeline_stage = [0, 1] @software_pipeline_order = [0, 1] {
               alloc S: i32[1];
               block load { S[0] = A[i]; }
               block store { B[i] = S[0]; }
             }",
        );
        let result = lower_and_verify(&program);
        assert!(result.cert.all_pass());
        let Stmt::Allocate { buffers, body } = &result.lowered.body[0] else {
            panic!("expected allocate")
        };
        assert_eq!(buffers.len(), 1);
        assert_eq!(body.len(), 3);
        let extents: Vec<u64> = body
            .iter()
            .map(|s| match s {
                Stmt::For(lp) => lp.extent,
                _ => 0,
            })
            .collect();
        assert_eq!(extents, vec![1, 15, 1]);
    }

    #[test]
    fn single_stage_pipeline_lowers_to_one_loop() {
        let program = pipelined(
            "buffer A: i32[4];
             for i in 0..4 @software_pipeline_stage = [0] @software_pipeline_order = [0] {
               block a { A[i] = i; }
             }",
        );
        let result = lower_and_verify(&program);
        let Stmt::Allocate { body, .. } = &result.lowered.body[0] else {
            panic!("expected allocate")
        };
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn fresh_loop_ids_follow_existing_ones() {
        let program = pipelined(
            "buffer A: i32[4]; buffer B: i32[4];
             for i in 0..4 @software_pipeline_stage = [0] @software_pipeline_order = [0] {
               block a { A[i] = i; }
             }
             for j in 0..4 { block b { B[j] = j; } }",
        );
        let result = lower_and_verify(&program);
        let Stmt::Allocate { body, .. } = &result.lowered.body[0] else {
            panic!("expected allocate")
        };
        let Stmt::For(lp) = &body[0] else {
            panic!("expected loop")
        };
        assert_eq!(lp.id, LoopId(2));
    }

    #[test]
    fn program_without_pipelines_is_unchanged() {
        let program = program_from_source("buffer A: i32[4]; for i in 0..4 { block a { A[i] = i; } }")
            .unwrap();
        let result = lower_and_verify(&program);
        assert_eq!(result.lowered, program);
        assert!(result.cert.all_pass());
    }

    const TWO_STAGE: &str = "
buffer A: i32[16]; buffer B: i32[16];
for i in 0..16 @software_pipeline_stage = [0, 1] @software_pipeline_order = [0, 1] @note = \"hot\" {
  alloc S: i32[1];
  block load { S[0] = A[i]; }
  block store { B[i] = S[0]; }
}";

    fn pipeline_mut(program: &mut Program) -> &mut PipelinedLoop {
        match &mut program.body[0] {
            Stmt::Pipeline(p) => p,
            other => panic!("expected pipeline, got {other:?}"),
        }
    }

    #[test]
    fn region_loops_keep_other_annotations() {
        let program = pipelined(TWO_STAGE);
        let result = lower_and_verify(&program);
        let Stmt::Allocate { body, .. } = &result.lowered.body[0] else {
            panic!("expected allocate")
        };
        for stmt in body {
            let Stmt::For(lp) = stmt else {
                panic!("expected loop")
            };
            assert_eq!(
                lp.annotations.get("note"),
                Some(&AnnotationValue::Str("hot".to_string()))
            );
            assert_eq!(lp.annotations.len(), 1);
        }
    }

    #[test]
    fn locals_of_enclosing_loops_count_as_allocated() {
        let program = pipelined(
            "buffer A: i32[4, 8]; buffer B: i32[4, 8];
             for o in 0..4 {
               alloc T: i32[8];
               for i in 0..8 @software_pipeline_stage = [0, 1] @software_pipeline_order = [0, 1] {
                 block a { T[i] = A[o, i]; }
                 block b { B[o, i] = T[i] + 1; }
               }
             }",
        );
        let result = lower_and_verify(&program);
        assert!(result.cert.all_pass(), "{:?}", result.cert.obligations());
    }

    #[test]
    fn dropped_rotation_allocation_fails_l3() {
        let mut program = pipelined(TWO_STAGE);
        pipeline_mut(&mut program).allocs.clear();
        let cert = lower_and_verify(&program).cert;
        assert!(!cert.l3_local_buffers_allocated);
        assert_eq!(cert.failed(), vec!["L3_local_buffers_allocated"]);
    }

    #[test]
    fn missing_binding_fails_l4() {
        let mut program = pipelined(TWO_STAGE);
        pipeline_mut(&mut program).steady.body[0].bind = None;
        let cert = lower_and_verify(&program).cert;
        assert!(!cert.l4_bindings_from_time_var);
        assert!(cert.l3_local_buffers_allocated);
    }
}
