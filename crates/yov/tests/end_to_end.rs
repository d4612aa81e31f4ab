//! Drives the six end-to-end scenarios through the public `Program` facade,
//! with a real temp-file script (scripts are always loaded off disk) and an
//! `InMemoryHost` standing in for every other OS interaction.

use std::sync::atomic::{AtomicU32, Ordering};

use pretty_assertions::assert_eq;
use yov::{CliOptions, InMemoryHost, Program};

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn run(source: &str, script_args: &[(&str, &str)]) -> (InMemoryHost, i32) {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("yov-e2e-{}-{id}.yov", std::process::id()));
    std::fs::write(&path, source).expect("write temp script");

    let options = CliOptions {
        script_path: path.clone(),
        analyze_only: false,
        trace: false,
        user_assert: false,
        no_user: true,
        wait_end: false,
        script_args: script_args.iter().map(|(n, v)| ((*n).to_string(), (*v).to_string())).collect(),
    };
    let mut host = InMemoryHost::new();
    let code = Program::run(&options, &mut host);
    let _ = std::fs::remove_file(&path);
    (host, code)
}

#[test]
fn arithmetic_and_int_printing() {
    let (host, code) = run("main :: func() { println(2 + 3 * 4); }", &[]);
    assert_eq!(host.stdout, "14\n");
    assert_eq!(code, 0);
}

#[test]
fn struct_assignment_and_member_access() {
    let source = "P :: struct { x: Int; y: Int; } main :: func() { p: P; p.x = 3; p.y = 4; println(p.x + p.y); }";
    let (host, code) = run(source, &[]);
    assert_eq!(host.stdout, "7\n");
    assert_eq!(code, 0);
}

#[test]
fn auto_result_eval_aborts_on_failed_result() {
    let source = r#"main :: func() { delete_file("path/that/does/not/exist"); println("unreachable"); }"#;
    let (host, code) = run(source, &[]);
    assert!(!host.stdout.contains("unreachable"));
    assert!(!host.stderr.is_empty());
    assert_ne!(code, 0);
}

#[test]
fn explicit_result_handling_avoids_abort() {
    let source = r#"main :: func() { r := delete_file("missing"); if (r.failed) println("ok"); }"#;
    let (host, code) = run(source, &[]);
    assert_eq!(host.stdout, "ok\n");
    assert_eq!(code, 0);
}

#[test]
fn string_interpolation_and_compile_time_folding() {
    let source = r#"main :: func() { n :: 21; println("n*2 = {n * 2}"); }"#;
    let (host, code) = run(source, &[]);
    assert_eq!(host.stdout, "n*2 = 42\n");
    assert_eq!(code, 0);
}

#[test]
fn for_each_with_index_and_array_concatenation() {
    let source = r#"main :: func() { a := {1,2,3} + 4; for (v, i : a) println("{i}:{v}"); }"#;
    let (host, code) = run(source, &[]);
    assert_eq!(host.stdout, "0:1\n1:2\n2:3\n3:4\n");
    assert_eq!(code, 0);
}

#[test]
fn analyze_only_skips_execution() {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("yov-e2e-{}-{id}.yov", std::process::id()));
    std::fs::write(&path, "main :: func() { println(\"hi\"); }").expect("write temp script");
    let options = CliOptions {
        script_path: path.clone(),
        analyze_only: true,
        trace: false,
        user_assert: false,
        no_user: true,
        wait_end: false,
        script_args: Vec::new(),
    };
    let mut host = InMemoryHost::new();
    let code = Program::run(&options, &mut host);
    let _ = std::fs::remove_file(&path);
    assert_eq!(host.stdout, "ok\n", "analyze should report success without running the script");
    assert_eq!(code, 0);
}

#[test]
fn script_argument_is_visible_as_an_arg_global() {
    let source = r#"
name :: arg -> String {}
main :: func() { println("hello {name}"); }
"#;
    let (host, code) = run(source, &[("name", "world")]);
    assert_eq!(host.stdout, "hello world\n");
    assert_eq!(code, 0);
}

#[test]
fn ambient_yov_and_os_globals_are_populated() {
    let source = r#"main :: func() { println(yov.major); println(yov.minor); }"#;
    let (host, code) = run(source, &[]);
    assert_eq!(host.stdout, "0\n0\n");
    assert_eq!(code, 0);
}
