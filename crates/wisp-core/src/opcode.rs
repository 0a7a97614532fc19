//! The opcode set (§4.3 "Dispatch") and the per-instruction operand-length
//! table the compiler's `endLoop` break-patching pass scans with.

use crate::chunk::Chunk;
use crate::heap::Heap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Constant = 0,
    Null,
    True,
    False,
    Pop,

    GetLocal,
    SetLocal,
    GetModule,
    DefineModule,
    SetModule,
    GetGlobal,
    GetUpvalue,
    SetUpvalue,
    GetProperty,
    SetProperty,
    GetPropertyNoPop,
    GetSuper,

    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Negate,
    Increment,
    Decrement,

    Equal,
    Greater,
    Less,
    Not,

    Jump,
    JumpIfFalse,
    Loop,
    Break,

    Call,
    Invoke,
    SuperInvoke,
    Return,

    Closure,
    CloseUpvalue,

    Class,
    Inherit,
    Method,
    EndClass,

    MakeList,
    SubscriptIdx,
    SubscriptIdxNoPop,
    SubscriptAssign,

    Module,
    ModuleBuiltin,
    ModuleVar,
    ModuleEnd,

    Print,
}

impl Op {
    pub fn from_byte(b: u8) -> Op {
        // Safety-free decode: Op is repr(u8) and every byte value the
        // compiler emits was produced from one of these variants, so a
        // direct match keeps decoding exhaustive and panics loudly on a
        // corrupt chunk rather than transmuting into the unknown.
        match b {
            0 => Op::Constant,
            1 => Op::Null,
            2 => Op::True,
            3 => Op::False,
            4 => Op::Pop,
            5 => Op::GetLocal,
            6 => Op::SetLocal,
            7 => Op::GetModule,
            8 => Op::DefineModule,
            9 => Op::SetModule,
            10 => Op::GetGlobal,
            11 => Op::GetUpvalue,
            12 => Op::SetUpvalue,
            13 => Op::GetProperty,
            14 => Op::SetProperty,
            15 => Op::GetPropertyNoPop,
            16 => Op::GetSuper,
            17 => Op::Add,
            18 => Op::Subtract,
            19 => Op::Multiply,
            20 => Op::Divide,
            21 => Op::Mod,
            22 => Op::Negate,
            23 => Op::Increment,
            24 => Op::Decrement,
            25 => Op::Equal,
            26 => Op::Greater,
            27 => Op::Less,
            28 => Op::Not,
            29 => Op::Jump,
            30 => Op::JumpIfFalse,
            31 => Op::Loop,
            32 => Op::Break,
            33 => Op::Call,
            34 => Op::Invoke,
            35 => Op::SuperInvoke,
            36 => Op::Return,
            37 => Op::Closure,
            38 => Op::CloseUpvalue,
            39 => Op::Class,
            40 => Op::Inherit,
            41 => Op::Method,
            42 => Op::EndClass,
            43 => Op::MakeList,
            44 => Op::SubscriptIdx,
            45 => Op::SubscriptIdxNoPop,
            46 => Op::SubscriptAssign,
            47 => Op::Module,
            48 => Op::ModuleBuiltin,
            49 => Op::ModuleVar,
            50 => Op::ModuleEnd,
            51 => Op::Print,
            other => panic!("corrupt bytecode: unknown opcode byte {other}"),
        }
    }
}

/// Number of operand bytes following the opcode byte at `offset`, NOT
/// counting the opcode byte itself. For `OP_CLOSURE` this depends on the
/// referenced function's declared upvalue count, so it needs the constant
/// pool (and the heap, to dereference the constant's `ObjRef`) — the same
/// dependency the `endLoop` break-patching scan has on decoded instruction
/// widths.
pub fn operand_len(op: Op, chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    use Op::*;
    match op {
        Null | True | False | Pop | Add | Subtract | Multiply | Divide | Mod | Negate
        | Increment | Decrement | Equal | Greater | Less | Not | Return | CloseUpvalue
        | Inherit | EndClass | SubscriptIdx | SubscriptIdxNoPop | SubscriptAssign | ModuleVar
        | ModuleEnd | Print => 0,

        Constant | GetLocal | SetLocal | GetModule | DefineModule | SetModule | GetGlobal
        | GetUpvalue | SetUpvalue | GetProperty | SetProperty | GetPropertyNoPop | GetSuper
        | Call | Class | Method | MakeList | Module => 1,

        // 16-bit jump offsets; name-constant index + argc; stdlib index +
        // name-constant index — all two operand bytes.
        Jump | JumpIfFalse | Loop | Break | Invoke | SuperInvoke | ModuleBuiltin => 2,

        Closure => {
            let const_idx = chunk.code[offset + 1] as usize;
            let upvalue_count = match &chunk.constants[const_idx] {
                crate::value::Value::Obj(r) => heap
                    .get(*r)
                    .as_function()
                    .map(|f| f.upvalue_count as usize)
                    .unwrap_or(0),
                _ => 0,
            };
            1 + 2 * upvalue_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_opcodes() {
        for b in 0u8..=51 {
            let op = Op::from_byte(b);
            assert_eq!(op as u8, b);
        }
    }
}
