//! `IO` module: `print`, `println`, `input` (src/libs/io.c `initLib_IO`).

use std::io::Write as _;

use wisp_core::heap::{GcHost, Heap};
use wisp_core::Table;
use wisp_core::Value;

use crate::native::stringify_all;
use crate::vm::Vm;

pub(crate) fn build(vm: &mut Vm) -> Table {
    let entries = vm.alloc_native_pairs(&[
        ("print", print_native),
        ("println", println_native),
        ("input", input_native),
    ]);
    let mut table = Table::new();
    for (k, h, v) in entries {
        table.set(k, h, v);
    }
    table
}

/// `println!`'s own newline handling makes this the natural place for
/// `OP_PRINT`/`puts()` to route their output through, so every line the
/// interpreter writes takes the same path.
pub(crate) fn write_line(text: &str) {
    println!("{text}");
}

fn print_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if args.is_empty() {
        return Err("'IO.print(value, ...)' takes at least one argument (0 provided).".to_string());
    }
    print!("{} ", stringify_all(heap, args));
    std::io::stdout().flush().ok();
    Ok(Value::Null)
}

fn println_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if args.is_empty() {
        return Err("'IO.println(value, ...)' takes at least one argument (0 provided).".to_string());
    }
    write_line(&format!("{} ", stringify_all(heap, args)));
    Ok(Value::Null)
}

fn input_native(heap: &mut Heap, host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if args.len() > 1 {
        return Err(format!(
            "'IO.input(prompt)' expects at most 1 argument ({} provided).",
            args.len()
        ));
    }
    if let Some(prompt) = args.first() {
        let r = prompt.as_obj().filter(|r| heap.obj_type(*r) == wisp_core::ObjType::String);
        match r {
            Some(r) => {
                print!("{}", heap.get(r).as_string().unwrap().as_str());
                std::io::stdout().flush().ok();
            }
            None => return Err("'IO.input(prompt)' takes a string-type argument.".to_string()),
        }
    }
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| format!("'IO.input(prompt)' failed to read stdin: {e}"))?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    let r = heap.intern_string(&line, host);
    Ok(Value::Obj(r))
}
