// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the parsed AST is set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ast;
use crate::decompose::{AnnotationUpkeep, DecomposeResult};
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::inject::{InjectOptions, InjectResult};
use crate::ir::Program;
use crate::lower::LowerCert;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::validate::ReconcilePolicy;

// ── Options ────────────────────────────────────────────────────────────────

/// Knobs of a compilation. The canonical JSON form feeds the provenance
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassOptions {
    pub policy: ReconcilePolicy,
    /// Run reduction decomposition before injection, and how it treats
    /// annotations. `None` skips the pass.
    pub decompose_reductions: Option<AnnotationUpkeep>,
    /// Run the structural certificate on every emitted pipeline.
    pub verify: bool,
    /// Rejected annotated loops are errors instead of warnings.
    pub deny_unpipelined: bool,
    /// Seed for the input buffers of the equivalence check.
    pub seed: u64,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            policy: ReconcilePolicy::Strict,
            decompose_reductions: None,
            verify: true,
            deny_unpipelined: false,
            seed: 0x5eed,
        }
    }
}

impl PassOptions {
    pub fn inject_options(&self) -> InjectOptions {
        InjectOptions {
            policy: self.policy,
            verify: self.verify,
            deny_unpipelined: self.deny_unpipelined,
        }
    }

    /// Compact JSON with fields in declaration order.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.swp` source text.
/// `options_fingerprint`: SHA-256 of `PassOptions::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the options fingerprint (64 characters).
    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"options_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.options_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and options.
///
/// Fails only if the options cannot be serialized; the fingerprint is never
/// taken over an empty string.
pub fn compute_provenance(
    source: &str,
    options: &PassOptions,
) -> Result<Provenance, serde_json::Error> {
    Ok(Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(options.canonical_json()?.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub ast: ast::Program,
    /// Resolved (and possibly decomposed) IR, before injection.
    pub ir: Option<Program>,
    pub decomposed: Option<DecomposeResult>,
    /// `ir` as injection saw it.
    pub original: Option<Program>,
    pub pipelined: Option<Program>,
    pub inject: Option<InjectResult>,
    pub lowered: Option<Program>,
    pub lower_cert: Option<LowerCert>,
    /// Global buffers whose contents differ between original and lowered.
    pub differing: Option<Vec<String>>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(ast: ast::Program) -> Self {
        Self {
            ast,
            ir: None,
            decomposed: None,
            original: None,
            pipelined: None,
            inject: None,
            lowered: None,
            lower_cert: None,
            differing: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PassFailure {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helper: check diagnostics for errors ───────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PassFailure> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "swpc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PassFailure {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// A required upstream artifact is missing: the pass ordering was violated.
fn missing(state: &mut CompilationState, pass_id: PassId, what: &str) -> PassFailure {
    state.has_error = true;
    state.diagnostics.push(Diagnostic::new(
        DiagLevel::Error,
        state.ast.span,
        format!("{}: missing input artifact '{what}'", descriptor(pass_id).name),
    ));
    PassFailure {
        failing_pass: pass_id,
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Preconditions: `state.ast` is set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; certificate failures.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PassOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PassFailure> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Resolve => {
                let result = crate::resolve::resolve(&state.ast);
                let elapsed = t.elapsed();
                state.ir = Some(result.program);
                finish_pass(
                    state,
                    pass_id,
                    result.diagnostics,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::DecomposeReductions => {
                let Some(upkeep) = options.decompose_reductions else {
                    continue;
                };
                let Some(ir) = state.ir.as_mut() else {
                    return Err(missing(state, pass_id, "ir"));
                };
                let result = crate::decompose::decompose_reductions(ir, upkeep);
                let elapsed = t.elapsed();
                if verbose {
                    eprintln!(
                        "swpc: decomposed {} reduction(s), {} annotation(s) updated",
                        result.split.len(),
                        result.updated_loops
                    );
                }
                state.decomposed = Some(result);
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::InjectPipeline => {
                let Some(ir) = state.ir.as_ref() else {
                    return Err(missing(state, pass_id, "ir"));
                };
                let mut pipelined = ir.clone();
                let result =
                    crate::inject::inject_software_pipeline(&mut pipelined, options.inject_options());
                let elapsed = t.elapsed();
                if verbose {
                    eprintln!(
                        "swpc: pipelined {} loop(s), {} left serial",
                        result.pipelined_count(),
                        result.errors.len()
                    );
                }
                let diags = result.diagnostics.clone();
                state.original = Some(ir.clone());
                state.pipelined = Some(pipelined);
                state.inject = Some(result);
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
            PassId::Lower => {
                let Some(pipelined) = state.pipelined.as_ref() else {
                    return Err(missing(state, pass_id, "pipelined"));
                };
                let result = crate::lower::lower_and_verify(pipelined);
                let elapsed = t.elapsed();
                let mut diags = Vec::new();
                if !result.cert.all_pass() {
                    diags.push(
                        Diagnostic::new(
                            DiagLevel::Error,
                            state.ast.span,
                            format!(
                                "lowering verification failed: {}",
                                result.cert.failed().join(", ")
                            ),
                        )
                        .with_code(codes::E0504),
                    );
                }
                state.lower_cert = Some(result.cert);
                state.lowered = Some(result.lowered);
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
            PassId::CheckEquivalence => {
                let (Some(original), Some(lowered)) =
                    (state.original.as_ref(), state.lowered.as_ref())
                else {
                    return Err(missing(state, pass_id, "original/lowered"));
                };
                let outcome = crate::interp::compare_globals(original, lowered, options.seed);
                let elapsed = t.elapsed();
                let mut diags = Vec::new();
                match outcome {
                    Ok(differing) => {
                        if !differing.is_empty() {
                            diags.push(
                                Diagnostic::new(
                                    DiagLevel::Error,
                                    state.ast.span,
                                    format!(
                                        "pipelined program disagrees with the original on: {}",
                                        differing.join(", ")
                                    ),
                                )
                                .with_code(codes::E0601)
                                .with_hint(format!("inputs seeded with {:#x}", options.seed)),
                            );
                        }
                        state.differing = Some(differing);
                    }
                    Err(e) => diags.push(
                        Diagnostic::new(DiagLevel::Error, state.ast.span, e.to_string())
                            .with_code(codes::E0600),
                    ),
                }
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
