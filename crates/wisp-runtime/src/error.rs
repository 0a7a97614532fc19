//! Error types for the VM. Follows the same hand-rolled `Display`/`Error`
//! pattern `wisp-compiler::CompileError` uses rather than pulling in
//! `thiserror`/`anyhow` for what is, at this layer, a handful of variants.

use std::fmt;
use std::path::PathBuf;

/// One entry of a captured call stack, newest frame first.
#[derive(Debug, Clone)]
pub struct StackFrameInfo {
    pub module: String,
    pub function: String,
    pub line: u32,
}

/// A runtime fault: an in-language error (`"x" + 1`, calling a non-callable,
/// undefined property, ...) together with the call stack at the point it was
/// raised. The VM captures this by walking `frames` top-down before
/// unwinding them.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<StackFrameInfo>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            trace: Vec::new(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in &self.trace {
            writeln!(
                f,
                "    at {} ({}:{})",
                frame.function, frame.module, frame.line
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Error surfaced by a native (stdlib) function. Kept distinct from
/// `RuntimeError` because natives don't have access to the call stack;
/// the VM wraps one into a `RuntimeError` (attaching the trace) the moment
/// a native call returns `Err`.
#[derive(Debug, Clone)]
pub struct NativeError(pub String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        NativeError(message.into())
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NativeError {}

impl From<NativeError> for String {
    fn from(e: NativeError) -> String {
        e.0
    }
}

/// Top-level error a CLI driver maps to an exit code.
#[derive(Debug)]
pub enum WispError {
    Usage(String),
    Compile(Vec<wisp_compiler::CompileError>),
    Runtime(RuntimeError),
    Io { path: Option<PathBuf>, source: std::io::Error },
}

impl WispError {
    pub fn exit_code(&self) -> i32 {
        match self {
            WispError::Usage(_) => 64,
            WispError::Compile(_) => 65,
            WispError::Runtime(_) => 70,
            WispError::Io { .. } => 74,
        }
    }
}

impl fmt::Display for WispError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WispError::Usage(msg) => write!(f, "{msg}"),
            WispError::Compile(errs) => {
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
            WispError::Runtime(e) => write!(f, "{e}"),
            WispError::Io { path, source } => match path {
                Some(p) => write!(f, "couldn't read '{}': {source}", p.display()),
                None => write!(f, "I/O error: {source}"),
            },
        }
    }
}

impl std::error::Error for WispError {}

impl From<RuntimeError> for WispError {
    fn from(e: RuntimeError) -> Self {
        WispError::Runtime(e)
    }
}

impl From<Vec<wisp_compiler::CompileError>> for WispError {
    fn from(e: Vec<wisp_compiler::CompileError>) -> Self {
        WispError::Compile(e)
    }
}
