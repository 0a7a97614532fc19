//! The object arena and the mechanical half of the garbage collector.
//!
//! `Heap` owns every `Obj` ever allocated, the string interner, and the
//! byte-accounting that decides when a collection is due. It does *not* know
//! what counts as a root — that is inherently VM/compiler state — so
//! `collect_garbage` takes a `&dyn GcHost` that enumerates roots into this
//! heap. `wisp-runtime`'s `Vm` is the only implementor in this workspace; the
//! compiler reaches the same root set by pushing in-progress `Function`s
//! onto the VM's `pinned_roots` list rather than needing its own `GcHost`.

use crate::fnv1a_hash;
use crate::object::{
    Obj, ObjFunction, ObjRef, ObjString, ObjType, UpvalueState,
};
use crate::value::{format_number, Value};
use crate::intern::Interner;

pub trait GcHost {
    fn mark_roots(&self, heap: &mut Heap);
}

struct Slot {
    marked: bool,
    obj: Option<Obj>,
}

#[derive(Debug, Clone, Copy)]
pub struct AllocStats {
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub live_objects: usize,
}

pub struct Heap {
    objects: Vec<Slot>,
    free: Vec<u32>,
    gray_stack: Vec<ObjRef>,
    pub strings: Interner,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub stress_gc: bool,
    /// Bumped every time `collect_garbage` runs; surfaced for diagnostics
    /// and for the GC test suite.
    pub collections_run: u64,
}

const DEFAULT_NEXT_GC: usize = 1024 * 1024;

impl Default for Heap {
    fn default() -> Self {
        Heap::new(DEFAULT_NEXT_GC)
    }
}

impl Heap {
    pub fn new(initial_next_gc: usize) -> Self {
        Heap {
            objects: Vec::new(),
            free: Vec::new(),
            gray_stack: Vec::new(),
            strings: Interner::new(),
            bytes_allocated: 0,
            next_gc: initial_next_gc,
            stress_gc: false,
            collections_run: 0,
        }
    }

    fn estimate_size(obj: &Obj) -> usize {
        match obj {
            Obj::String(s) => std::mem::size_of::<ObjString>() + s.bytes.len(),
            Obj::List(l) => std::mem::size_of::<Value>() * l.items.capacity() + 32,
            Obj::Function(f) => {
                f.chunk.code.len() + f.chunk.lines.len() * 4 + f.chunk.constants.len() * 16 + 64
            }
            Obj::Closure(c) => c.upvalues.len() * 4 + 32,
            Obj::Upvalue(_) => 24,
            Obj::Class(_) => 64,
            Obj::Instance(_) => 64,
            Obj::BoundMethod(_) => 24,
            Obj::Native(_) => 16,
            Obj::Module(_) => 96,
        }
    }

    pub fn alloc(&mut self, obj: Obj, host: &dyn GcHost) -> ObjRef {
        if self.stress_gc || self.bytes_allocated > self.next_gc {
            self.collect_garbage(host);
        }
        self.bytes_allocated += Self::estimate_size(&obj);
        let slot = Slot {
            marked: false,
            obj: Some(obj),
        };
        if let Some(idx) = self.free.pop() {
            self.objects[idx as usize] = slot;
            ObjRef(idx)
        } else {
            self.objects.push(slot);
            ObjRef((self.objects.len() - 1) as u32)
        }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.objects[r.0 as usize]
            .obj
            .as_ref()
            .expect("dangling ObjRef: object was swept while still referenced")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.objects[r.0 as usize]
            .obj
            .as_mut()
            .expect("dangling ObjRef: object was swept while still referenced")
    }

    pub fn obj_type(&self, r: ObjRef) -> ObjType {
        self.get(r).obj_type()
    }

    /// Intern `s`, returning the existing `ObjRef` if an equal string is
    /// already interned (§3 invariant: "any lookup for an equal byte
    /// sequence returns the same pointer").
    pub fn intern_string(&mut self, s: &str, host: &dyn GcHost) -> ObjRef {
        let hash = fnv1a_hash(s.as_bytes());
        if let Some(r) = self.strings.find(s, hash) {
            return r;
        }
        let r = self.alloc(
            Obj::String(ObjString {
                bytes: s.into(),
                hash,
            }),
            host,
        );
        self.strings.insert(s, hash, r);
        r
    }

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        self.get(r).as_string().map(|s| s.hash).unwrap_or(0)
    }

    // -- GC --------------------------------------------------------------

    pub fn mark_value(&mut self, v: Value) {
        if let Value::Obj(r) = v {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let slot = &mut self.objects[r.0 as usize];
        if slot.obj.is_none() || slot.marked {
            return;
        }
        slot.marked = true;
        self.gray_stack.push(r);
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray_stack.pop() {
            self.blacken(r);
        }
    }

    fn blacken(&mut self, r: ObjRef) {
        let children: Vec<Value> = {
            let slot = &self.objects[r.0 as usize];
            match slot.obj.as_ref() {
                None => return,
                Some(Obj::String(_)) | Some(Obj::Native(_)) => Vec::new(),
                Some(Obj::List(l)) => l.items.clone(),
                Some(Obj::Upvalue(u)) => match &u.state {
                    UpvalueState::Closed(v) => vec![*v],
                    UpvalueState::Open(_) => Vec::new(),
                },
                Some(Obj::Closure(c)) => {
                    let mut v = vec![Value::Obj(c.function)];
                    v.extend(c.upvalues.iter().map(|u| Value::Obj(*u)));
                    v
                }
                Some(Obj::Function(f)) => function_children(f),
                Some(Obj::Class(c)) => {
                    let mut v = vec![Value::Obj(c.name)];
                    for (k, val) in c.methods.iter() {
                        v.push(Value::Obj(k));
                        v.push(val);
                    }
                    v
                }
                Some(Obj::Instance(i)) => {
                    let mut v = vec![Value::Obj(i.class)];
                    for (k, val) in i.fields.iter() {
                        v.push(Value::Obj(k));
                        v.push(val);
                    }
                    v
                }
                Some(Obj::BoundMethod(b)) => vec![b.receiver, Value::Obj(b.method)],
                Some(Obj::Module(m)) => {
                    let mut v = vec![Value::Obj(m.name)];
                    for (k, val) in m.values.iter() {
                        v.push(Value::Obj(k));
                        v.push(val);
                    }
                    v
                }
            }
        };
        for v in children {
            self.mark_value(v);
        }
    }

    fn sweep(&mut self) {
        for (i, slot) in self.objects.iter_mut().enumerate() {
            if slot.obj.is_some() {
                if slot.marked {
                    slot.marked = false;
                } else if let Some(obj) = slot.obj.take() {
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(Self::estimate_size(&obj));
                    self.free.push(i as u32);
                }
            }
        }
    }

    /// Run one full mark-sweep cycle. `host` enumerates every root (§4.4).
    pub fn collect_garbage(&mut self, host: &dyn GcHost) {
        host.mark_roots(self);
        self.trace_references();
        let objects = &self.objects;
        self.strings
            .retain(|r| objects[r.0 as usize].marked && objects[r.0 as usize].obj.is_some());
        self.sweep();
        self.next_gc = (self.bytes_allocated * 2).max(DEFAULT_NEXT_GC);
        self.collections_run += 1;
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            bytes_allocated: self.bytes_allocated,
            next_gc: self.next_gc,
            live_objects: self.objects.iter().filter(|s| s.obj.is_some()).count(),
        }
    }

    // -- value semantics that need heap access ---------------------------

    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Null, Value::Null) => true,
            (Value::Bad, Value::Bad) => true,
            (Value::Obj(x), Value::Obj(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(x), self.get(y)) {
                    (Obj::List(l1), Obj::List(l2)) => {
                        l1.items.len() == l2.items.len()
                            && l1
                                .items
                                .iter()
                                .zip(l2.items.iter())
                                .all(|(a, b)| self.values_equal(*a, *b))
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Render a value the way `echo` and list printing do (§6 "Printing").
    pub fn print_value(&self, v: Value) -> String {
        match v {
            Value::Number(n) => format_number(n),
            Value::Bool(b) => if b { "true" } else { "false" }.to_string(),
            Value::Null => "null".to_string(),
            Value::Bad => "<bad>".to_string(),
            Value::Obj(r) => match self.get(r) {
                Obj::String(s) => s.as_str().to_string(),
                Obj::List(l) => {
                    let parts: Vec<String> = l.items.iter().map(|v| self.print_value(*v)).collect();
                    format!("[{}]", parts.join(", "))
                }
                Obj::Function(f) => match f.name {
                    Some(n) => format!("<fn {}>", self.print_value(Value::Obj(n))),
                    None => "<script>".to_string(),
                },
                Obj::Closure(c) => self.print_value(Value::Obj(c.function)),
                Obj::Class(c) => self.print_value(Value::Obj(c.name)),
                Obj::Instance(i) => {
                    let class_name = self.get(i.class).as_class().map(|c| c.name);
                    match class_name {
                        Some(n) => format!("<{}> instance", self.print_value(Value::Obj(n))),
                        None => "<instance>".to_string(),
                    }
                }
                Obj::BoundMethod(b) => self.print_value(Value::Obj(b.method)),
                Obj::Native(n) => format!("<native fn {}>", n.name),
                Obj::Module(m) => self.print_value(Value::Obj(m.name)),
                Obj::Upvalue(_) => "<upvalue>".to_string(),
            },
        }
    }
}

fn function_children(f: &ObjFunction) -> Vec<Value> {
    let mut v = vec![Value::Obj(f.module)];
    if let Some(n) = f.name {
        v.push(Value::Obj(n));
    }
    v.extend(f.chunk.constants.iter().copied());
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRoots;
    impl GcHost for NoRoots {
        fn mark_roots(&self, _heap: &mut Heap) {}
    }

    #[test]
    fn interning_returns_same_ref_for_equal_bytes() {
        let mut heap = Heap::new(1 << 20);
        let host = NoRoots;
        let a = heap.intern_string("hello", &host);
        let b = heap.intern_string("hello", &host);
        assert_eq!(a, b);
    }

    #[test]
    fn unreferenced_object_is_freed_on_collect() {
        let mut heap = Heap::new(1 << 20);
        let host = NoRoots;
        let r = heap.intern_string("transient", &host);
        let before = heap.stats().live_objects;
        assert!(before >= 1);
        heap.collect_garbage(&host);
        // the string table itself held the only reference, and NoRoots marks
        // nothing, so after collection it must be gone.
        assert!(heap.strings.find("transient", fnv1a_hash(b"transient")).is_none());
        let _ = r;
    }

    #[test]
    fn list_equality_is_elementwise() {
        let mut heap = Heap::new(1 << 20);
        let host = NoRoots;
        let a = heap.alloc(
            Obj::List(crate::object::ObjList {
                items: vec![Value::Number(1.0), Value::Number(2.0)],
            }),
            &host,
        );
        let b = heap.alloc(
            Obj::List(crate::object::ObjList {
                items: vec![Value::Number(1.0), Value::Number(2.0)],
            }),
            &host,
        );
        assert!(heap.values_equal(Value::Obj(a), Value::Obj(b)));
        assert_ne!(a, b);
    }
}
