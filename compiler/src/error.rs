// error.rs — Per-loop pipeline injection errors
//
// Every component of the pass fails closed with one of these. Each carries
// the loop it concerns plus the context (annotation snapshot, buffer, blocks,
// stages) a caller needs to act on it. Errors are scoped to one loop and are
// turned into `Diagnostic`s by the driver.

use std::fmt;

use crate::ast::Span;
use crate::depend::DepKind;
use crate::diag::codes;
use crate::diag::{DiagCode, DiagLevel, Diagnostic};
use crate::id::LoopId;

/// Identity of the loop an error concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRef {
    pub id: LoopId,
    /// Induction variable name.
    pub var: String,
    pub span: Span,
}

impl fmt::Display for LoopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop '{}' (#{})", self.var, self.id.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "annotation mismatch on {loop_ref}: annotation describes {expected} blocks but {actual} are present ({detail})"
    )]
    AnnotationMismatch {
        loop_ref: LoopRef,
        expected: usize,
        actual: usize,
        detail: String,
        snapshot: String,
    },

    #[error("invalid pipeline annotation on {loop_ref}: {reason}")]
    InvalidAnnotation {
        loop_ref: LoopRef,
        reason: String,
        snapshot: String,
    },

    #[error(
        "dependency cycle on {loop_ref}: {kind} dependence on '{buffer}' from '{src_block}' (stage {src_stage}) to '{dst_block}' (stage {dst_stage}) at distance {distance} runs backwards in the schedule"
    )]
    DependencyCycle {
        loop_ref: LoopRef,
        buffer: String,
        kind: DepKind,
        src_block: String,
        src_stage: u32,
        dst_block: String,
        dst_stage: u32,
        distance: u32,
        snapshot: String,
    },

    #[error("unsupported structure in {loop_ref}: {reason}")]
    UnsupportedStructure {
        loop_ref: LoopRef,
        reason: String,
        block: Option<String>,
        buffer: Option<String>,
    },

    #[error("pipeline verification failed for {loop_ref}: {}", failed.join(", "))]
    VerificationFailed {
        loop_ref: LoopRef,
        failed: Vec<&'static str>,
    },
}

impl PipelineError {
    pub fn loop_ref(&self) -> &LoopRef {
        match self {
            PipelineError::AnnotationMismatch { loop_ref, .. }
            | PipelineError::InvalidAnnotation { loop_ref, .. }
            | PipelineError::DependencyCycle { loop_ref, .. }
            | PipelineError::UnsupportedStructure { loop_ref, .. }
            | PipelineError::VerificationFailed { loop_ref, .. } => loop_ref,
        }
    }

    pub fn code(&self) -> DiagCode {
        match self {
            PipelineError::AnnotationMismatch { .. } => codes::E0500,
            PipelineError::InvalidAnnotation { .. } => codes::E0501,
            PipelineError::DependencyCycle { .. } => codes::E0502,
            PipelineError::UnsupportedStructure { .. } => codes::E0503,
            PipelineError::VerificationFailed { .. } => codes::E0504,
        }
    }

    /// Render as a diagnostic. The loop is left serial, so callers normally
    /// pass `DiagLevel::Warning`.
    pub fn to_diagnostic(&self, level: DiagLevel) -> Diagnostic {
        let loop_ref = self.loop_ref();
        let diag = Diagnostic::new(level, loop_ref.span, self.to_string())
            .with_code(self.code());
        match self {
            PipelineError::AnnotationMismatch { snapshot, .. } => diag
                .with_cause(format!("annotation: {snapshot}"), None)
                .with_hint(
                    "an earlier pass changed the block list; update the annotation or use --policy reconcile-by-origin",
                ),
            PipelineError::InvalidAnnotation { snapshot, .. } => {
                diag.with_cause(format!("annotation: {snapshot}"), None)
            }
            PipelineError::DependencyCycle { snapshot, .. } => diag
                .with_cause(format!("annotation: {snapshot}"), None)
                .with_hint("give the consumer a later stage than its producer"),
            PipelineError::UnsupportedStructure { block, buffer, .. } => {
                let diag = match block {
                    Some(b) => diag.with_cause(format!("in block '{b}'"), None),
                    None => diag,
                };
                match buffer {
                    Some(b) => diag.with_cause(format!("buffer '{b}'"), None),
                    None => diag,
                }
            }
            PipelineError::VerificationFailed { .. } => {
                diag.with_hint("this is a compiler bug; the loop was left unpipelined")
            }
        }
    }
}
