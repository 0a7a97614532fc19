//! Interactive prompt. A thin loop around `rustyline` and
//! `Vm::interpret_repl_line`: the VM itself keeps one shared module alive
//! across lines so a variable or function defined on one line is still
//! visible on the next.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::config::RunnerConfig;
use crate::vm::Vm;
use crate::error::WispError;

const PROMPT: &str = ">>> ";

pub fn run_repl(config: RunnerConfig) -> Result<(), WispError> {
    let mut vm = Vm::new(config);
    let mut editor = DefaultEditor::new().map_err(|e| {
        WispError::Io {
            path: None,
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        }
    })?;

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" {
                    break;
                }
                let _ = editor.add_history_entry(line.as_str());
                if let Err(e) = vm.interpret_repl_line(&line) {
                    eprintln!("{e}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    Ok(())
}
