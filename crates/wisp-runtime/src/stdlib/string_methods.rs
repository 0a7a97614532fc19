//! Built-in methods dispatched against a `String` receiver
//! (`objs/string.c`'s `defineStringMethods`, which only defined `length`).

use wisp_core::heap::{GcHost, Heap};
use wisp_core::object::{NativeFn, ObjType};
use wisp_core::Value;

pub(crate) const ENTRIES: &[(&str, NativeFn)] = &[("length", length_native)];

fn length_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if args.len() != 1 {
        return Err(format!("'length()' takes no arguments ({} provided).", args.len() - 1));
    }
    let r = match args[0] {
        Value::Obj(r) if heap.obj_type(r) == ObjType::String => r,
        _ => return Err("expected a string receiver".to_string()),
    };
    let len = heap.get(r).as_string().unwrap().as_str().chars().count();
    Ok(Value::Number(len as f64))
}
