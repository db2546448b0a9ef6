// Snapshot tests: lock the printed pipelined IR and the schedule report.
//
// Uses the library API (parse → resolve → inject) on the programs under
// `demos/`. Snapshots are managed by `insta` and stored under
// `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use std::path::{Path, PathBuf};

use swpc::inject::{inject_software_pipeline, InjectOptions, InjectResult};
use swpc::ir::Program;

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load_demo(name: &str) -> String {
    let path = project_root().join("demos").join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}

/// Run parse → resolve → inject and return the rewritten program.
fn inject_demo(name: &str) -> (Program, InjectResult) {
    let source = load_demo(name);
    let parse_result = swpc::parser::parse(&source);
    assert!(
        parse_result.errors.is_empty(),
        "parse errors: {:?}",
        parse_result.errors
    );
    let ast = parse_result.program.unwrap();
    let resolve_result = swpc::resolve::resolve(&ast);
    assert!(
        !resolve_result.has_errors(),
        "resolve errors: {:?}",
        resolve_result.diagnostics
    );
    let mut program = resolve_result.program;
    let result = inject_software_pipeline(&mut program, InjectOptions::default());
    (program, result)
}

#[test]
fn snapshot_pipelined_load_store() {
    let (program, result) = inject_demo("load_store.swp");
    assert_eq!(result.pipelined_count(), 1);
    assert_eq!(result.errors.len(), 1, "the k loop is rejected");
    let output = swpc::print::print_program(&program);
    insta::assert_snapshot!("pipelined_load_store", output);
}

#[test]
fn snapshot_schedule_load_store() {
    let (_, result) = inject_demo("load_store.swp");
    let output = result.schedules[0].to_string();
    insta::assert_snapshot!("schedule_load_store", output);
}

#[test]
fn snapshot_schedule_three_stage() {
    let (_, result) = inject_demo("three_stage.swp");
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let output = result.schedules[0].to_string();
    insta::assert_snapshot!("schedule_three_stage", output);
}
