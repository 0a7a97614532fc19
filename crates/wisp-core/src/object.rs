//! Heap object variants.
//!
//! Objects live in the `Heap`'s arena (see `heap.rs`) and are referenced from
//! `Value` and from each other by `ObjRef`, an index into that arena. This
//! plays the role a raw heap pointer and an intrusive linked list of objects
//! play in a pointer-based implementation: arena-index equality is pointer
//! identity, and sweeping the arena in index order is walking that list.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use std::path::PathBuf;

/// An index into `Heap::objects`. Two `ObjRef`s are equal iff they name the
/// same heap slot, which is exactly the identity comparison §3 requires for
/// heap pointers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjType {
    String,
    List,
    Function,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
    Native,
    Module,
}

pub struct ObjString {
    pub bytes: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn as_str(&self) -> &str {
        &self.bytes
    }
}

pub struct ObjList {
    pub items: Vec<Value>,
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    /// The module this function was compiled in; used for error reporting
    /// and for resolving `GET_MODULE`/`SET_MODULE` at runtime.
    pub module: ObjRef,
    pub name: Option<ObjRef>,
    pub chunk: Chunk,
}

pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// Either "open" (the captured slot is still live on the VM's value stack,
/// addressed by index rather than raw pointer) or "closed" (promoted to an
/// owned `Value` once its stack frame returned).
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: UpvalueState,
}

pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

pub type NativeFn =
    fn(&mut crate::heap::Heap, &dyn crate::heap::GcHost, &[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: &'static str,
    pub function: NativeFn,
}

pub struct ObjModule {
    pub name: ObjRef,
    pub dir: PathBuf,
    pub values: Table,
}

pub enum Obj {
    String(ObjString),
    List(ObjList),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Native(ObjNative),
    Module(ObjModule),
}

impl Obj {
    pub fn obj_type(&self) -> ObjType {
        match self {
            Obj::String(_) => ObjType::String,
            Obj::List(_) => ObjType::List,
            Obj::Function(_) => ObjType::Function,
            Obj::Closure(_) => ObjType::Closure,
            Obj::Upvalue(_) => ObjType::Upvalue,
            Obj::Class(_) => ObjType::Class,
            Obj::Instance(_) => ObjType::Instance,
            Obj::BoundMethod(_) => ObjType::BoundMethod,
            Obj::Native(_) => ObjType::Native,
            Obj::Module(_) => ObjType::Module,
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObjList> {
        match self {
            Obj::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ObjList> {
        match self {
            Obj::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut ObjFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            Obj::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut ObjUpvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match self {
            Obj::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut ObjClass> {
        match self {
            Obj::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match self {
            Obj::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut ObjInstance> {
        match self {
            Obj::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match self {
            Obj::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match self {
            Obj::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&ObjModule> {
        match self {
            Obj::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_module_mut(&mut self) -> Option<&mut ObjModule> {
        match self {
            Obj::Module(m) => Some(m),
            _ => None,
        }
    }
}
