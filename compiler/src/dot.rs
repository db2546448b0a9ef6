// dot.rs — Graphviz DOT output for loop dependence graphs
//
// Renders the dependence graph of every annotated loop injection looked at,
// one cluster per loop. Nodes are blocks labeled with their stage and order;
// edges carry the buffer, kind and iteration distance of the dependence.
//
// Preconditions: `graphs` were built over `program`.
// Postconditions: returns a valid DOT string; edges the annotation violates
//                 are drawn red.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::depend::{DepKind, DependenceGraph};
use crate::error::LoopRef;
use crate::ir::Program;

/// Emit the dependence graphs as a Graphviz DOT string.
pub fn emit_dot(program: &Program, graphs: &[(LoopRef, DependenceGraph)]) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph swpc {{").unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    for (loop_ref, graph) in graphs {
        let prefix = format!("l{}", loop_ref.id.0);
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_{prefix} {{").unwrap();
        writeln!(
            buf,
            "        label=\"loop #{} ({}, trip {})\";",
            loop_ref.id.0,
            escape(&loop_ref.var),
            graph.trip_count
        )
        .unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();

        for (pos, node) in graph.nodes.iter().enumerate() {
            let name = &program.block(node.block).name;
            writeln!(
                buf,
                "        {prefix}_n{pos} [shape=box, style=filled, fillcolor={}, label=\"{}\\nstage {} order {}\"];",
                stage_color(node.stage),
                escape(name),
                node.stage,
                node.order
            )
            .unwrap();
        }

        for edge in &graph.edges {
            let buffer = &program.buffer(edge.buffer).name;
            let mut attrs = format!(
                "label=\"{} {}{}\"",
                escape(buffer),
                edge.kind,
                if edge.distance > 0 {
                    format!(" d={}", edge.distance)
                } else {
                    String::new()
                }
            );
            if edge.kind != DepKind::Flow {
                attrs.push_str(", style=dashed");
            }
            if !graph.is_legal(edge) {
                attrs.push_str(", color=red, penwidth=2");
            }
            writeln!(
                buf,
                "        {prefix}_n{} -> {prefix}_n{} [{attrs}];",
                edge.src, edge.dst
            )
            .unwrap();
        }
        writeln!(buf, "    }}").unwrap();
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn stage_color(stage: u32) -> &'static str {
    const COLORS: [&str; 4] = ["lightblue", "lightyellow", "lightgreen", "lightsalmon"];
    COLORS[stage as usize % COLORS.len()]
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{inject_software_pipeline, InjectOptions};
    use crate::resolve::program_from_source;

    fn dot_for(src: &str) -> String {
        let mut program = program_from_source(src).unwrap();
        let result = inject_software_pipeline(&mut program, InjectOptions::default());
        emit_dot(&program, &result.graphs)
    }

    #[test]
    fn one_cluster_per_annotated_loop() {
        let dot = dot_for(
            "buffer A: i32[4]; buffer B: i32[4];
             for i in 0..4 @software_pipeline_stage = [0, 1] @software_pipeline_order = [0, 1] {
               block a { A[i] = i; }
               block b { B[i] = A[i]; }
             }
             for j in 0..4 { block c { B[j] = 0; } }",
        );
        assert!(dot.starts_with("digraph swpc {"));
        assert_eq!(dot.matches("subgraph cluster_").count(), 1);
        assert!(dot.contains("l0_n0 [shape=box"), "{dot}");
        assert!(dot.contains("label=\"b\\nstage 1 order 1\""), "{dot}");
        assert!(dot.contains("l0_n0 -> l0_n1 [label=\"A flow\"];"), "{dot}");
    }

    #[test]
    fn violated_edges_are_red() {
        let dot = dot_for(
            "buffer A: i32[4]; buffer B: i32[4];
             for i in 0..4 @software_pipeline_stage = [1, 0] @software_pipeline_order = [0, 1] {
               block a { A[i] = i; }
               block b { B[i] = A[i]; }
             }",
        );
        assert!(dot.contains("color=red"), "{dot}");
    }

    #[test]
    fn empty_graph_list_is_still_a_graph() {
        let program = Program::default();
        let dot = emit_dot(&program, &[]);
        assert!(dot.starts_with("digraph swpc {"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
