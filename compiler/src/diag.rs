// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases:
// resolve (E01xx), pipeline injection (E05xx) and the reference
// interpreter (E06xx).
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable code table.
pub mod codes {
    use super::DiagCode;

    // ── Resolve ──
    pub const E0100: DiagCode = DiagCode("E0100"); // undefined buffer
    pub const E0101: DiagCode = DiagCode("E0101"); // duplicate buffer
    pub const E0102: DiagCode = DiagCode("E0102"); // undefined variable
    pub const E0103: DiagCode = DiagCode("E0103"); // index arity mismatch
    pub const E0104: DiagCode = DiagCode("E0104"); // non-affine index
    pub const E0105: DiagCode = DiagCode("E0105"); // invalid buffer shape
    pub const E0106: DiagCode = DiagCode("E0106"); // invalid loop range
    pub const E0107: DiagCode = DiagCode("E0107"); // duplicate block name
    pub const E0108: DiagCode = DiagCode("E0108"); // shadowed loop variable
    pub const W0100: DiagCode = DiagCode("W0100"); // unknown annotation key

    // ── Pipeline injection ──
    pub const E0500: DiagCode = DiagCode("E0500"); // annotation mismatch
    pub const E0501: DiagCode = DiagCode("E0501"); // invalid annotation
    pub const E0502: DiagCode = DiagCode("E0502"); // dependency cycle
    pub const E0503: DiagCode = DiagCode("E0503"); // unsupported structure
    pub const E0504: DiagCode = DiagCode("E0504"); // verification failed

    // ── Interpreter ──
    pub const E0600: DiagCode = DiagCode("E0600"); // evaluation failed
    pub const E0601: DiagCode = DiagCode("E0601"); // equivalence check failed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated constraint failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related spans, or causes.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  cause: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "loop left serial")
            .with_code(codes::E0502);
        assert_eq!(format!("{d}"), "warning[E0502]: loop left serial");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "annotation mismatch")
            .with_code(codes::E0500)
            .with_hint("use --policy reconcile-by-origin")
            .with_related(dummy_span(), "block inserted here")
            .with_cause("reduction decomposed without annotation update", Some(dummy_span()));

        assert_eq!(d.code, Some(DiagCode("E0500")));
        assert_eq!(d.hint.as_deref(), Some("use --policy reconcile-by-origin"));
        assert_eq!(d.related_spans.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
    }

    #[test]
    fn display_lists_causes_before_hint() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "rejected")
            .with_cause("stage 0 reads X", None)
            .with_hint("swap the stages");
        assert_eq!(
            format!("{d}"),
            "error: rejected\n  cause: stage 0 reads X\n  hint: swap the stages"
        );
    }
}
