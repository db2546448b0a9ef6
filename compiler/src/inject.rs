// inject.rs — Software-pipeline injection driver
//
// Single top-down traversal of the program. Each annotated loop runs
//
//   validate → build_graph → check_schedule → plan_rotation → build_pipeline
//
// and, on success, is replaced by a `Stmt::Pipeline`. Errors are scoped to
// the loop that produced them: a rejected loop is left exactly as it was
// (annotations included) and traversal continues with its siblings.
// Loops without a pipeline annotation are descended into.
//
// Preconditions: `program` came out of resolve (and optionally decompose).
// Postconditions: every `Stmt::Pipeline` passed its structural certificate
//                 (when `verify` is set); no pipelined loop carries
//                 pipeline annotations.
// Failure modes: none at the pass level; per-loop errors are collected.
// Side effects: appends to `program`'s arenas for pipelined loops; logs one
//               line per annotated loop.

use std::mem;

use crate::annotation::{snapshot, PipelineAnnotation};
use crate::build::build_pipeline;
use crate::depend::{build_graph, DependenceGraph};
use crate::diag::{DiagLevel, Diagnostic};
use crate::error::{LoopRef, PipelineError};
use crate::ir::{Loop, Program, Stmt};
use crate::rotation::plan_rotation;
use crate::schedule::PipelineSchedule;
use crate::validate::{validate, ReconcilePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectOptions {
    pub policy: ReconcilePolicy,
    /// Run the structural certificate on every emitted pipeline.
    pub verify: bool,
    /// Report rejected loops as errors instead of warnings.
    pub deny_unpipelined: bool,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            policy: ReconcilePolicy::Strict,
            verify: true,
            deny_unpipelined: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InjectResult {
    /// One per pipelined loop, in traversal order.
    pub schedules: Vec<PipelineSchedule>,
    /// Dependence graphs of every loop that got far enough to build one,
    /// including loops later rejected.
    pub graphs: Vec<(LoopRef, DependenceGraph)>,
    pub errors: Vec<PipelineError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl InjectResult {
    pub fn pipelined_count(&self) -> usize {
        self.schedules.len()
    }

    pub fn has_error(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == DiagLevel::Error)
    }
}

/// Pipeline every annotated loop of `program` in place.
pub fn inject_software_pipeline(program: &mut Program, options: InjectOptions) -> InjectResult {
    let mut result = InjectResult::default();
    let mut body = mem::take(&mut program.body);
    walk(program, &mut body, options, &mut result);
    program.body = body;

    let level = if options.deny_unpipelined {
        DiagLevel::Error
    } else {
        DiagLevel::Warning
    };
    result.diagnostics = result.errors.iter().map(|e| e.to_diagnostic(level)).collect();
    result
}

fn walk(program: &mut Program, body: &mut [Stmt], options: InjectOptions, out: &mut InjectResult) {
    for stmt in body.iter_mut() {
        match stmt {
            Stmt::For(lp) if PipelineAnnotation::is_annotated(&lp.annotations) => {
                let loop_ref = LoopRef {
                    id: lp.id,
                    var: program.var(lp.var).name.clone(),
                    span: lp.span,
                };
                match pipeline_loop(program, lp, &loop_ref, options, out) {
                    Ok(pipelined) => *stmt = pipelined,
                    Err(err) => {
                        tracing::warn!("{loop_ref}: left serial: {err}");
                        out.errors.push(err);
                    }
                }
            }
            Stmt::For(lp) => walk(program, &mut lp.body, options, out),
            Stmt::Allocate { body, .. } => walk(program, body, options, out),
            Stmt::Block(_) | Stmt::Reduction { .. } | Stmt::Pipeline(_) => {}
        }
    }
}

fn pipeline_loop(
    program: &mut Program,
    lp: &Loop,
    loop_ref: &LoopRef,
    options: InjectOptions,
    out: &mut InjectResult,
) -> Result<Stmt, PipelineError> {
    // Annotation parse errors take precedence over structural rejection.
    let Some(validated) = validate(program, lp, loop_ref, options.policy)? else {
        return Ok(Stmt::For(lp.clone()));
    };
    if lp.extent == 0 {
        return Err(PipelineError::UnsupportedStructure {
            loop_ref: loop_ref.clone(),
            reason: "zero trip count".to_string(),
            block: None,
            buffer: None,
        });
    }

    let graph = build_graph(program, lp, &validated, loop_ref)?;
    out.graphs.push((loop_ref.clone(), graph.clone()));
    graph.check_schedule(program, loop_ref, &snapshot(&lp.annotations))?;
    let plan = plan_rotation(program, lp, &graph, loop_ref)?;
    let built = build_pipeline(
        program,
        lp,
        &graph,
        &plan,
        validated.reconciled,
        options.verify,
        loop_ref,
    )?;

    tracing::info!(
        "{loop_ref}: pipelined over {} stage(s), {} rotated buffer(s)",
        graph.max_stage + 1,
        plan.rotated().count()
    );
    out.schedules.push(built.schedule);
    Ok(Stmt::Pipeline(built.pipelined))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::program_from_source;

    fn inject(src: &str, options: InjectOptions) -> (Program, InjectResult) {
        let mut program = program_from_source(src).expect("source resolves");
        let result = inject_software_pipeline(&mut program, options);
        (program, result)
    }

    #[test]
    fn pipelines_annotated_loop() {
        let (program, result) = inject(
            "buffer A: i32[16]; buffer B: i32[16];
             for i in 0..16 @software_pipeline_stage = [0, 1] @software_pipeline_order = [0, 1] {
               alloc S: i32[1];
               block load { S[0] = A[i]; }
               block store { B[i] = S[0] * 2; }
             }",
            InjectOptions::default(),
        );
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.pipelined_count(), 1);
        assert!(matches!(program.body[0], Stmt::Pipeline(_)));
        assert_eq!(result.graphs.len(), 1);
    }

    #[test]
    fn unannotated_loops_are_untouched() {
        let src = "buffer A: i32[4];
                   for i in 0..4 { block a { A[i] = i; } }";
        let before = program_from_source(src).unwrap();
        let (program, result) = inject(src, InjectOptions::default());
        assert_eq!(result.pipelined_count(), 0);
        assert!(result.diagnostics.is_empty());
        assert_eq!(program.body, before.body);
    }

    #[test]
    fn nested_annotated_loop_is_found() {
        let (program, result) = inject(
            "buffer A: i32[4, 8];
             for o in 0..4 {
               for i in 0..8 @software_pipeline_stage = [0, 0] @software_pipeline_order = [0, 1] {
                 block a { A[o, i] = i; }
                 block b { A[o, i] = A[o, i] + 1; }
               }
             }",
            InjectOptions::default(),
        );
        assert_eq!(result.pipelined_count(), 1);
        let Stmt::For(outer) = &program.body[0] else {
            panic!("outer loop stays a loop")
        };
        assert!(matches!(outer.body[0], Stmt::Pipeline(_)));
    }

    #[test]
    fn rejected_loop_is_left_unchanged() {
        let src = "buffer A: i32[4];
                   for i in 0..4 @software_pipeline_stage = [1, 0] @software_pipeline_order = [0, 1] {
                     block a { A[i] = i; }
                     block b { A[i] = A[i] + 1; }
                   }";
        let before = program_from_source(src).unwrap();
        let (program, result) = inject(src, InjectOptions::default());
        assert_eq!(program.body, before.body);
        assert_eq!(program.vars.len(), before.vars.len());
        assert!(matches!(result.errors[0], PipelineError::DependencyCycle { .. }));
        assert_eq!(result.diagnostics[0].level, DiagLevel::Warning);
        assert!(!result.has_error());
    }

    #[test]
    fn deny_unpipelined_promotes_to_error() {
        let (_, result) = inject(
            "buffer A: i32[4];
             for i in 0..4 @software_pipeline_stage = [0] @software_pipeline_order = [0, 1] {
               block a { A[i] = i; }
             }",
            InjectOptions {
                deny_unpipelined: true,
                ..InjectOptions::default()
            },
        );
        assert!(matches!(result.errors[0], PipelineError::AnnotationMismatch { .. }));
        assert!(result.has_error());
    }

    #[test]
    fn zero_trip_count_is_unsupported() {
        let (_, result) = inject(
            "buffer A: i32[4];
             for i in 0..0 @software_pipeline_stage = [0] @software_pipeline_order = [0] {
               block a { A[i] = i; }
             }",
            InjectOptions::default(),
        );
        assert!(matches!(
            result.errors[0],
            PipelineError::UnsupportedStructure { .. }
        ));
    }
}
