//! Built-in methods dispatched against a `List` receiver (`objs/list.c`'s
//! `defineListMethods`). Every native here is called through
//! `Vm::call_native_method`, so `args[0]` is always the receiver list and
//! `args[1..]` are the caller's actual arguments.
//!
//! `push`/`pop` operate on the END of the list and `enqueue`/`dequeue` give
//! proper FIFO order (enqueue at the back, dequeue from the front) — the
//! original aliased `push` to `prepend` and read `pop`/`dequeue` from the
//! front/back in a way that doesn't match what either name means in
//! English. Fixed here; `append`/`prepend`/`insert`/`delete` are otherwise
//! unchanged.

use wisp_core::heap::{GcHost, Heap};
use wisp_core::object::{NativeFn, ObjRef};
use wisp_core::Value;

pub(crate) const ENTRIES: &[(&str, NativeFn)] = &[
    ("append", append_native),
    ("prepend", prepend_native),
    ("push", push_native),
    ("pop", pop_native),
    ("enqueue", enqueue_native),
    ("dequeue", dequeue_native),
    ("insert", insert_native),
    ("delete", delete_native),
    ("find", find_native),
    ("contains", contains_native),
    ("extend", extend_native),
    ("length", length_native),
    ("reverse", reverse_native),
];

fn receiver(heap: &Heap, args: &[Value]) -> Result<ObjRef, String> {
    match args.first() {
        Some(Value::Obj(r)) if heap.get(*r).as_list().is_some() => Ok(*r),
        _ => Err("expected a list receiver".to_string()),
    }
}

fn check_argc(given: usize, expected: usize, signature: &str) -> Result<(), String> {
    if given != expected {
        Err(format!("'{signature}' expects exactly {expected} argument(s) ({given} provided)."))
    } else {
        Ok(())
    }
}

fn append_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "append(value)")?;
    let r = receiver(heap, args)?;
    heap.get_mut(r).as_list_mut().unwrap().items.push(args[1]);
    Ok(Value::Null)
}

fn prepend_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "prepend(value)")?;
    let r = receiver(heap, args)?;
    heap.get_mut(r).as_list_mut().unwrap().items.insert(0, args[1]);
    Ok(Value::Null)
}

fn push_native(heap: &mut Heap, host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "push(value)")?;
    append_native(heap, host, args)
}

fn pop_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 0, "pop()")?;
    let r = receiver(heap, args)?;
    let list = heap.get_mut(r).as_list_mut().unwrap();
    list.items
        .pop()
        .ok_or_else(|| "Cannot pop from an empty list.".to_string())
}

fn enqueue_native(heap: &mut Heap, host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "enqueue(value)")?;
    append_native(heap, host, args)
}

fn dequeue_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 0, "dequeue()")?;
    let r = receiver(heap, args)?;
    let list = heap.get_mut(r).as_list_mut().unwrap();
    if list.items.is_empty() {
        return Err("Cannot dequeue from an empty list.".to_string());
    }
    Ok(list.items.remove(0))
}

/// `insert(index, value)` — inserts before `index`, growing the list by
/// one; `index == length` appends.
fn insert_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 2, "insert(index, value)")?;
    let r = receiver(heap, args)?;
    let index = args[1]
        .as_number()
        .ok_or_else(|| "Wrong argument type for 'index' in method 'insert()'.".to_string())?;
    let list = heap.get_mut(r).as_list_mut().unwrap();
    if index < 0.0 || index != index.trunc() || index as usize > list.items.len() {
        return Err(format!(
            "List index out of bounds (given {}, length {}).",
            index as i64,
            list.items.len()
        ));
    }
    list.items.insert(index as usize, args[2]);
    Ok(Value::Null)
}

fn delete_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "delete(index)")?;
    let r = receiver(heap, args)?;
    let index = args[1]
        .as_number()
        .ok_or_else(|| "Wrong argument type for 'index' in method 'delete()'.".to_string())?;
    let list = heap.get_mut(r).as_list_mut().unwrap();
    if index < 0.0 || index != index.trunc() || index as usize >= list.items.len() {
        return Err(format!(
            "List index out of bounds (given {}, length {}).",
            index as i64,
            list.items.len()
        ));
    }
    Ok(list.items.remove(index as usize))
}

fn find_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "find(value)")?;
    let r = receiver(heap, args)?;
    let target = args[1];
    let list = heap.get(r).as_list().unwrap();
    let found = list.items.iter().position(|v| heap.values_equal(*v, target));
    Ok(found.map(|i| Value::Number(i as f64)).unwrap_or(Value::Null))
}

fn contains_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "contains(value)")?;
    let r = receiver(heap, args)?;
    let target = args[1];
    let list = heap.get(r).as_list().unwrap();
    let found = list.items.iter().any(|v| heap.values_equal(*v, target));
    Ok(Value::Bool(found))
}

fn extend_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 1, "extend(list)")?;
    let r = receiver(heap, args)?;
    let other = match args[1] {
        Value::Obj(other_ref) if heap.get(other_ref).as_list().is_some() => other_ref,
        _ => return Err("'extend(list)' expects a list argument.".to_string()),
    };
    let extra = heap.get(other).as_list().unwrap().items.clone();
    heap.get_mut(r).as_list_mut().unwrap().items.extend(extra);
    Ok(Value::Null)
}

fn length_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 0, "length()")?;
    let r = receiver(heap, args)?;
    Ok(Value::Number(heap.get(r).as_list().unwrap().items.len() as f64))
}

fn reverse_native(heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    check_argc(args.len() - 1, 0, "reverse()")?;
    let r = receiver(heap, args)?;
    heap.get_mut(r).as_list_mut().unwrap().items.reverse();
    Ok(Value::Null)
}
