//! The two natives available without `using`: `clock()` and `puts(value)`
//! (src/natives.c `defineNatives`). Everything else lives behind a stdlib
//! module (`crate::stdlib`) or a receiver's method table (`list_methods`/
//! `string_methods`, populated here too since they're defined the same way
//! — a batch of name/function pairs handed to `Vm::alloc_native_pairs`).

use std::time::Instant;

use wisp_core::heap::{GcHost, Heap};
use wisp_core::object::ObjType;
use wisp_core::Value;

use crate::stdlib::{list_methods, string_methods};
use crate::vm::Vm;

/// Which of the VM's three native-backed tables a batch of
/// `alloc_native_pairs` results should land in.
pub(crate) enum NativeTable {
    Globals,
    ListMethods,
    StringMethods,
}

pub(crate) fn register_globals(vm: &mut Vm) {
    let entries = vm.alloc_native_pairs(&[("clock", clock_native), ("puts", puts_native)]);
    vm.insert_into(NativeTable::Globals, entries);
}

pub(crate) fn register_list_methods(vm: &mut Vm) {
    let entries = vm.alloc_native_pairs(list_methods::ENTRIES);
    vm.insert_into(NativeTable::ListMethods, entries);
}

pub(crate) fn register_string_methods(vm: &mut Vm) {
    let entries = vm.alloc_native_pairs(string_methods::ENTRIES);
    vm.insert_into(NativeTable::StringMethods, entries);
}

/// clock() since process start, in fractional seconds — `natives.c`'s
/// `clockNative` measured CPU time via `clock()`; wall-clock is the nearest
/// faithful equivalent without pulling in a CPU-time crate.
pub(crate) fn clock_native(_heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if !args.is_empty() {
        return Err(format!("'clock()' takes no arguments ({} provided).", args.len()));
    }
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}

pub(crate) fn puts_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if args.len() != 1 {
        return Err(format!("'puts(value)' expects exactly one argument ({} provided).", args.len()));
    }
    let r = match args[0] {
        Value::Obj(r) if heap.obj_type(r) == ObjType::String => r,
        _ => return Err("Incorrect argument type.".to_string()),
    };
    crate::stdlib::io::write_line(heap.get(r).as_string().unwrap().as_str());
    Ok(Value::Null)
}

/// Shared by the stdlib modules for print-style natives: every argument
/// stringified via `Heap::print_value` and space-joined, matching
/// `IO.print`/`IO.println`'s C loop over `argCount`.
pub(crate) fn stringify_all(heap: &Heap, args: &[Value]) -> String {
    args.iter()
        .map(|v| heap.print_value(*v))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn expect_number(v: Value, context: &str) -> Result<f64, String> {
    v.as_number().ok_or_else(|| format!("Wrong argument type for '{context}': expected a number."))
}
