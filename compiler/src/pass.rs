// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded, it runs before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    DecomposeReductions,
    InjectPipeline,
    Lower,
    CheckEquivalence,
}

/// Machine-readable artifact identifiers. Each maps to a concrete field
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Ir,          // ir::Program
    Original,    // ir::Program snapshot before injection
    Decomposed,  // DecomposeResult
    Pipelined,   // ir::Program after injection
    Schedules,   // InjectResult
    Lowered,     // ir::Program without pipelines
    LowerCert,   // LowerCert
    Equivalence, // differing global buffers
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable postconditions of a pass.
pub trait StageCert {
    /// Every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that do not hold.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Describes what invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Ir],
            invalidation_key: "source",
            invariants: "all names resolved, indices affine, loop ids assigned",
        },
        PassId::DecomposeReductions => PassDescriptor {
            name: "decompose_reductions",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Decomposed],
            invalidation_key: "ir + decompose_reductions option",
            invariants: "no block with an init section is referenced directly",
        },
        PassId::InjectPipeline => PassDescriptor {
            name: "inject_software_pipeline",
            inputs: &[PassId::DecomposeReductions],
            outputs: &[
                ArtifactId::Original,
                ArtifactId::Pipelined,
                ArtifactId::Schedules,
            ],
            invalidation_key: "ir + policy + verify",
            invariants: "accepted loops replaced by certified pipelines, rejected loops untouched",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::InjectPipeline],
            outputs: &[ArtifactId::Lowered, ArtifactId::LowerCert],
            invalidation_key: "pipelined ir",
            invariants: "L1-L2 obligations verified",
        },
        PassId::CheckEquivalence => PassDescriptor {
            name: "check_equivalence",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Equivalence],
            invalidation_key: "original ir + lowered ir",
            invariants: "global buffers agree after running both programs",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Resolve,
    PassId::DecomposeReductions,
    PassId::InjectPipeline,
    PassId::Lower,
    PassId::CheckEquivalence,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_inject_skips_lower() {
        let passes = required_passes(PassId::InjectPipeline);
        assert_eq!(
            passes,
            vec![
                PassId::Resolve,
                PassId::DecomposeReductions,
                PassId::InjectPipeline
            ]
        );
        assert!(!passes.contains(&PassId::Lower));
    }

    #[test]
    fn required_passes_check_includes_all() {
        let passes = required_passes(PassId::CheckEquivalence);
        assert_eq!(passes.len(), ALL_PASSES.len());
        assert_eq!(passes, ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_resolve_is_minimal() {
        let passes = required_passes(PassId::Resolve);
        assert_eq!(passes, vec![PassId::Resolve]);
    }

    #[test]
    fn no_parse_in_pass_id() {
        for pass in &ALL_PASSES {
            assert_ne!(descriptor(*pass).name, "parse");
        }
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            for dep in desc.inputs {
                let dep_passes = required_passes(*pass);
                let dep_pos = dep_passes.iter().position(|p| p == dep);
                let self_pos = dep_passes.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    struct Pair(bool, bool);

    impl StageCert for Pair {
        fn all_pass(&self) -> bool {
            self.0 && self.1
        }

        fn obligations(&self) -> Vec<(&'static str, bool)> {
            vec![("first", self.0), ("second", self.1)]
        }
    }

    #[test]
    fn failed_lists_unmet_obligations() {
        assert_eq!(Pair(true, false).failed(), vec!["second"]);
        assert!(Pair(true, true).failed().is_empty());
    }
}
