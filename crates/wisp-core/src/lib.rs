//! Wisp Core: the value representation, heap object arena, bytecode chunk,
//! and hash table shared by the compiler and the runtime.
//!
//! Everything here is representation, not behavior: this crate knows how a
//! `Value` is tagged, how an `Obj` is laid out, and how bytecode is packed
//! into a `Chunk`. It does not know how to scan source, parse it, or execute
//! it — those live in `wisp-compiler` and `wisp-runtime` respectively.

pub mod chunk;
pub mod heap;
pub mod intern;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;

pub use chunk::Chunk;
pub use heap::{AllocStats, Heap};
pub use object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjList, ObjModule,
    ObjNative, ObjRef, ObjString, ObjType, ObjUpvalue, UpvalueState,
};
pub use opcode::Op;
pub use table::Table;
pub use value::Value;

/// FNV-1a hash over a byte sequence, used to key the string intern table and
/// the general-purpose hash table.
///
/// This is the 32-bit variant: `offset_basis = 2166136261`, `prime =
/// 16777619`, matching the constants used throughout the reference family of
/// clox-derived interpreters.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
