//! End-to-end tests that spawn the actual `wisp` binary, the only place in
//! this workspace where a program's printed output is worth asserting on
//! (the VM itself writes straight to process stdout; Cargo's
//! `CARGO_BIN_EXE_wisp` is the cleanest way to observe that from a test).

use std::io::Write;
use std::process::Command;

fn run_source(source: &str) -> std::process::Output {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.wisp");
    std::fs::File::create(&path).unwrap().write_all(source.as_bytes()).unwrap();
    Command::new(env!("CARGO_BIN_EXE_wisp"))
        .arg(&path)
        .output()
        .expect("failed to run wisp binary")
}

fn stdout(out: &std::process::Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn prints_sum_of_two_variables() {
    let out = run_source("var a=3; var b=4; echo a+b;");
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end(), "7");
}

#[test]
fn closure_counter_increments_across_calls() {
    let out = run_source(
        "fun make(){ var x=0; fun inc(){ x=x+1; return x; } return inc; }
         var f=make();
         echo f(); echo f(); echo f();",
    );
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end(), "1\n2\n3");
}

#[test]
fn subclass_method_calls_super() {
    let out = run_source(
        "class A{ init(x){ this.x=x; } get(){ return this.x; } }
         class B extends A { get(){ return super.get()*2; } }
         echo B(5).get();",
    );
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end(), "10");
}

#[test]
fn list_subscript_assignment_is_visible_in_print() {
    let out = run_source("var xs=[1,2,3]; xs[0]=xs[0]+10; echo xs;");
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end(), "[11, 2, 3]");
}

#[test]
fn recursive_factorial() {
    let out = run_source("fun fact(n){ if(n<=1) return 1; return n*fact(n-1); } echo fact(6);");
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end(), "720");
}

#[test]
fn instance_echo_prints_bracketed_class_name() {
    let out = run_source("class Foo { init(){} } echo Foo();");
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end(), "<Foo> instance");
}

#[test]
fn stdlib_io_println() {
    let out = run_source("using IO; IO.println(\"hi\");");
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim_end_matches('\n'), "hi ");
}

#[test]
fn compile_error_exits_65_and_prints_to_stderr() {
    let out = run_source("var a = ;");
    assert_eq!(out.status.code(), Some(65));
    assert!(!out.stderr.is_empty());
    assert!(out.stdout.is_empty());
}

#[test]
fn runtime_error_exits_70() {
    let out = run_source("var x=1; x();");
    assert_eq!(out.status.code(), Some(70));
}

#[test]
fn missing_file_exits_74() {
    let output = Command::new(env!("CARGO_BIN_EXE_wisp"))
        .arg("/nonexistent/path/to/a/file.wisp")
        .output()
        .expect("failed to run wisp binary");
    assert_eq!(output.status.code(), Some(74));
}

#[test]
fn version_flag_prints_version_and_exits_0() {
    let output = Command::new(env!("CARGO_BIN_EXE_wisp"))
        .arg("--version")
        .output()
        .expect("failed to run wisp binary");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}
