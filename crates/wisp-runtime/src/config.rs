//! Runner configuration, pulled from the environment the same way the
//! teacher's CLI layers read `RUST_LOG` through `tracing-subscriber`'s
//! `EnvFilter`: a handful of `WISP_*` variables tweak the VM without
//! needing a config file or extra CLI flags for things only ever used
//! while debugging the GC itself.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Heap byte threshold (as tallied by `wisp_core::heap::AllocStats`)
    /// at which the VM requests a collection after allocating. Doubles
    /// after each collection the way a generational-threshold GC would,
    /// unless `stress_gc` is set.
    pub initial_gc_threshold: usize,
    /// Collect before (almost) every allocation. Slow; exists purely so
    /// GC-correctness tests can force collections deterministically.
    pub stress_gc: bool,
    /// Directory `module "..."` paths are resolved relative to when the
    /// importing script has no directory of its own (the REPL, or a
    /// program piped on stdin).
    pub module_root: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            initial_gc_threshold: 1 << 20,
            stress_gc: false,
            module_root: PathBuf::from("."),
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let mut cfg = RunnerConfig::default();
        if let Ok(v) = env::var("WISP_GC_INITIAL_BYTES") {
            if let Ok(n) = v.parse() {
                cfg.initial_gc_threshold = n;
            }
        }
        if let Ok(v) = env::var("WISP_STRESS_GC") {
            cfg.stress_gc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(cwd) = env::current_dir() {
            cfg.module_root = cwd;
        }
        cfg
    }
}
