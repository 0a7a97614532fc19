//! Black-box tests against the crate's public surface
//! (`wisp_runtime::interpret`/`RunnerConfig`/`WispError`), exercised the way
//! an embedder (rather than `wisp-cli`) would use this crate.

use wisp_runtime::RunnerConfig;

fn write_source(dir: &tempfile::TempDir, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, source).unwrap();
    path
}

#[test]
fn interpret_a_well_formed_file_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "ok.wisp", "var a=1; var b=2; var c=a+b;");
    let result = wisp_runtime::interpret(&path, RunnerConfig::default());
    assert!(result.is_ok());
}

#[test]
fn compile_error_exits_65() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "bad.wisp", "var a = ;");
    let err = wisp_runtime::interpret(&path, RunnerConfig::default()).unwrap_err();
    assert_eq!(err.exit_code(), 65);
}

#[test]
fn runtime_error_exits_70() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "bad.wisp", "var x = 1; x();");
    let err = wisp_runtime::interpret(&path, RunnerConfig::default()).unwrap_err();
    assert_eq!(err.exit_code(), 70);
}

#[test]
fn missing_file_exits_74() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.wisp");
    let err = wisp_runtime::interpret(&missing, RunnerConfig::default()).unwrap_err();
    assert_eq!(err.exit_code(), 74);
}

#[test]
fn runner_config_reads_env_overrides() {
    std::env::set_var("WISP_STRESS_GC", "true");
    std::env::set_var("WISP_GC_INITIAL_BYTES", "4096");
    let config = RunnerConfig::from_env();
    assert!(config.stress_gc);
    assert_eq!(config.initial_gc_threshold, 4096);
    std::env::remove_var("WISP_STRESS_GC");
    std::env::remove_var("WISP_GC_INITIAL_BYTES");
}
