//! Wisp Runtime: the stack-based VM, its mark-sweep garbage collector's
//! root set, and the standard library (`IO`, `Math`, `Time`, and the
//! built-in list/string methods) that a compiled Wisp program runs
//! against.
//!
//! `wisp-core` owns representation (`Value`, `Obj`, `Chunk`); `wisp-compiler`
//! turns source into a `Chunk`; this crate is the one piece that actually
//! executes it, and the only `GcHost` implementor in the workspace outside
//! of `wisp-compiler`'s own in-progress-function pinning.

pub mod config;
pub mod error;
mod native;
pub mod repl;
pub mod stdlib;
pub mod vm;

pub use config::RunnerConfig;
pub use error::{NativeError, RuntimeError, StackFrameInfo, WispError};
pub use repl::run_repl;
pub use vm::{interpret, Vm};
