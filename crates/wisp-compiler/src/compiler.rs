//! Single-pass Pratt-parsing compiler.
//!
//! No AST: expression parsing and bytecode emission happen in the same
//! recursive descent over tokens. Scope resolution, upvalue capture, and
//! class/method wiring all happen inline as tokens are consumed.

use wisp_core::heap::{GcHost, Heap};
use wisp_core::{Chunk, Obj, ObjFunction, ObjRef, Op, Value};

use crate::scanner::{Scanner, Token, TokenKind};

/// Builtin standard-library modules reachable via `using NAME;`. The index
/// into this table is what `OP_MODULE_BUILTIN` carries as its first operand
/// byte; `wisp-runtime`'s stdlib registry is built in this same order so the
/// two crates agree on indices without either depending on the other's
/// internals.
pub const STDLIB_MODULES: &[&str] = &["IO", "Math", "Time"];

#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub message: String,
    pub near: String,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.near.is_empty() {
            write!(f, "[line {}] Error: {}", self.line, self.message)
        } else {
            write!(f, "[line {}] Error at '{}': {}", self.line, self.near, self.message)
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Subscript,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Subscript,
            Subscript => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct LocalVar<'s> {
    name: Token<'s>,
    depth: i32,
    is_const: bool,
    is_scoped: bool,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct LoopCtx {
    start: usize,
    body: usize,
    exit_jump: Option<usize>,
    scope_depth: i32,
}

struct ClassCtx {
    has_superclass: bool,
}

struct FnCompiler<'s> {
    function_obj: ObjFunction,
    ftype: FunctionType,
    locals: Vec<LocalVar<'s>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loops: Vec<LoopCtx>,
}

impl<'s> FnCompiler<'s> {
    fn new(ftype: FunctionType, module: ObjRef) -> Self {
        let slot0_name = if ftype != FunctionType::Function {
            Token {
                kind: TokenKind::This,
                lexeme: b"this",
                line: 0,
                error_message: "",
            }
        } else {
            Token {
                kind: TokenKind::Identifier,
                lexeme: b"",
                line: 0,
                error_message: "",
            }
        };
        FnCompiler {
            function_obj: ObjFunction {
                arity: 0,
                upvalue_count: 0,
                module,
                name: None,
                chunk: Chunk::new(),
            },
            ftype,
            locals: vec![LocalVar {
                name: slot0_name,
                depth: 0,
                is_const: false,
                is_scoped: false,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.function_obj.chunk
    }
}

/// Marks this compiler's in-progress `Function` (and those of every parent
/// compiler still on the stack) reachable, plus whatever the underlying VM
/// considers a root, so a GC triggered mid-compilation never collects an
/// object that's only reachable from compiler-local state rather than a
/// real heap root.
struct CompileHost<'a> {
    pinned: &'a [ObjRef],
    vm_host: &'a dyn GcHost,
}

impl<'a> GcHost for CompileHost<'a> {
    fn mark_roots(&self, heap: &mut Heap) {
        for r in self.pinned {
            heap.mark_object(*r);
        }
        self.vm_host.mark_roots(heap);
    }
}

pub struct Compiler<'s, 'h> {
    scanner: Scanner<'s>,
    current: Token<'s>,
    previous: Token<'s>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,

    heap: &'h mut Heap,
    vm_host: &'h dyn GcHost,
    module: ObjRef,

    compilers: Vec<FnCompiler<'s>>,
    pinned_roots: Vec<ObjRef>,
    current_class: Vec<ClassCtx>,
}

impl<'s, 'h> Compiler<'s, 'h> {
    fn cur(&mut self) -> &mut FnCompiler<'s> {
        self.compilers.last_mut().expect("at least one FnCompiler")
    }

    fn cur_idx(&self) -> usize {
        self.compilers.len() - 1
    }

    // -- token plumbing ----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let msg = self.current.error_message;
            self.error_at_current(msg);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_tok(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let tok = self.current;
        self.error_at(tok, message);
    }

    fn error(&mut self, message: &str) {
        let tok = self.previous;
        self.error_at(tok, message);
    }

    fn error_at(&mut self, token: Token<'s>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let near = match token.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Error => String::new(),
            _ => token.lexeme_str().to_string(),
        };
        self.errors.push(CompileError {
            line: token.line,
            message: message.to_string(),
            near,
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Class | Fun | Var | Const | For | If | While | Break | Echo | Return | Module => {
                    return
                }
                _ => {}
            }
            self.advance();
        }
    }

    // -- emission ------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.cur().chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: Op) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_op_byte(&mut self, op: Op, b: u8) {
        self.emit_byte(op as u8);
        self.emit_byte(b);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Op::Loop);
        let offset = self.cur().chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_bytes(((offset >> 8) & 0xff) as u8, (offset & 0xff) as u8);
    }

    fn emit_jump(&mut self, instruction: Op) -> usize {
        self.emit_op(instruction);
        self.emit_bytes(0xff, 0xff);
        self.cur().chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.cur().chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let chunk = self.cur().chunk();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_return(&mut self) {
        if self.cur().ftype == FunctionType::Script {
            self.emit_op(Op::ModuleEnd);
        }
        if self.cur().ftype == FunctionType::Initializer {
            self.emit_op_byte(Op::GetLocal, 0);
        } else {
            self.emit_op(Op::Null);
        }
        self.emit_op(Op::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        // Constants of an in-progress chunk aren't reachable from any VM
        // root yet (the chunk isn't wrapped in a Function object until
        // `end_compiler`), so any heap reference has to be pinned here or
        // a GC triggered by a later allocation could collect it out from
        // under us.
        if let Value::Obj(r) = value {
            self.pinned_roots.push(r);
        }
        let idx = self.cur().chunk().add_constant(value);
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op_byte(Op::Constant, idx);
    }

    fn intern(&mut self, s: &str) -> ObjRef {
        // Field-disjoint borrow: `host` only touches `pinned_roots`/`vm_host`,
        // leaving `self.heap` free to be borrowed mutably alongside it.
        let host = CompileHost {
            pinned: &self.pinned_roots,
            vm_host: self.vm_host,
        };
        self.heap.intern_string(s, &host)
    }

    fn identifier_constant(&mut self, name: &[u8]) -> u8 {
        let s = String::from_utf8_lossy(name).into_owned();
        let r = self.intern(&s);
        self.make_constant(Value::Obj(r))
    }

    // -- scopes ----------------------------------------------------------

    fn begin_scope(&mut self) {
        self.cur().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.cur().scope_depth -= 1;
        let depth = self.cur().scope_depth;
        while let Some(local) = self.cur().locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.is_captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
            self.cur().locals.pop();
        }
    }

    fn identifiers_equal(a: &[u8], b: &[u8]) -> bool {
        a == b
    }

    fn resolve_local(&mut self, compiler_idx: usize, name: &[u8]) -> Option<(usize, bool, bool)> {
        let fc = &self.compilers[compiler_idx];
        for (i, local) in fc.locals.iter().enumerate().rev() {
            if Self::identifiers_equal(local.name.lexeme, name) {
                if local.depth == -1 {
                    self.error("Cannot read local variable in its own initializer.");
                }
                return Some((i, local.is_const, local.is_scoped));
            }
        }
        None
    }

    fn add_upvalue(&mut self, compiler_idx: usize, index: u8, is_local: bool) -> u8 {
        let fc = &mut self.compilers[compiler_idx];
        for (i, up) in fc.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if fc.upvalues.len() >= 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        fc.upvalues.push(UpvalueDesc { index, is_local });
        fc.function_obj.upvalue_count = fc.upvalues.len() as u8;
        (fc.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, compiler_idx: usize, name: &[u8]) -> Option<u8> {
        if compiler_idx == 0 {
            return None;
        }
        let enclosing = compiler_idx - 1;
        if let Some((local_idx, _const, is_scoped)) = self.resolve_local(enclosing, name) {
            if is_scoped {
                return None;
            }
            self.compilers[enclosing].locals[local_idx].is_captured = true;
            return Some(self.add_upvalue(compiler_idx, local_idx as u8, true));
        }
        if let Some(up_idx) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(compiler_idx, up_idx, false));
        }
        None
    }

    fn add_local(&mut self, name: Token<'s>, is_const: bool, is_scoped: bool) {
        if self.cur().locals.len() >= 256 {
            self.error("Too many local variables in function.");
            return;
        }
        self.cur().locals.push(LocalVar {
            name,
            depth: -1,
            is_const,
            is_scoped,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self, is_const: bool, is_scoped: bool) {
        if self.cur().scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let depth = self.cur().scope_depth;
        for local in self.cur().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if Self::identifiers_equal(local.name.lexeme, name.lexeme) {
                self.error("Already a variable with this name in this scope.");
            }
        }
        self.add_local(name, is_const, is_scoped);
    }

    fn mark_initialized(&mut self) {
        if self.cur().scope_depth == 0 {
            return;
        }
        let depth = self.cur().scope_depth;
        if let Some(local) = self.cur().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, message: &str, is_const: bool, is_scoped: bool) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable(is_const, is_scoped);
        if self.cur().scope_depth > 0 {
            return 0;
        }
        let lexeme = self.previous.lexeme.to_vec();
        self.identifier_constant(&lexeme)
    }

    fn define_variable(&mut self, global: u8) {
        if self.cur().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(Op::DefineModule, global);
    }

    // -- expressions -------------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }
        while precedence <= Self::infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }
        if can_assign && (self.match_tok(TokenKind::Equal) || self.is_compound_assign(self.current.kind))
        {
            self.error("Invalid assignment target.");
        }
    }

    fn is_compound_assign(&self, kind: TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::PlusEqual | TokenKind::MinusEqual | TokenKind::StarEqual | TokenKind::SlashEqual
        )
    }

    fn infix_precedence(kind: TokenKind) -> Precedence {
        use TokenKind::*;
        match kind {
            Or => Precedence::Or,
            And => Precedence::And,
            BangEqual | EqualEqual => Precedence::Equality,
            Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
            Plus | Minus => Precedence::Term,
            Star | Slash | Mod => Precedence::Factor,
            LeftBracket => Precedence::Subscript,
            LeftParen | Dot => Precedence::Call,
            _ => Precedence::None,
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string(false),
            RawString => self.string(true),
            True | False | Null => self.literal(kind),
            Identifier => self.variable(can_assign),
            This => self.this_expr(),
            Super => self.super_expr(),
            LeftBracket => self.list_literal(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Plus | Minus | Star | Slash | Mod | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            And => self.and_expr(),
            Or => self.or_expr(),
            LeftParen => self.call_expr(),
            Dot => self.dot_expr(can_assign),
            LeftBracket => self.subscript_expr(can_assign),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(Op::Negate),
            TokenKind::Bang => self.emit_op(Op::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let op_kind = self.previous.kind;
        let prec = Self::infix_precedence(op_kind);
        self.parse_precedence(prec.next());
        match op_kind {
            TokenKind::Plus => self.emit_op(Op::Add),
            TokenKind::Minus => self.emit_op(Op::Subtract),
            TokenKind::Star => self.emit_op(Op::Multiply),
            TokenKind::Slash => self.emit_op(Op::Divide),
            TokenKind::Mod => self.emit_op(Op::Mod),
            TokenKind::BangEqual => {
                self.emit_op(Op::Equal);
                self.emit_op(Op::Not);
            }
            TokenKind::EqualEqual => self.emit_op(Op::Equal),
            TokenKind::Greater => self.emit_op(Op::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(Op::Less);
                self.emit_op(Op::Not);
            }
            TokenKind::Less => self.emit_op(Op::Less),
            TokenKind::LessEqual => {
                self.emit_op(Op::Greater);
                self.emit_op(Op::Not);
            }
            _ => unreachable!(),
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(Op::JumpIfFalse);
        let end_jump = self.emit_jump(Op::Jump);
        self.patch_jump(else_jump);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self) {
        let text = self.previous.lexeme_str();
        let value: f64 = text.parse().unwrap_or(f64::NAN);
        self.emit_constant(Value::Number(value));
    }

    fn unescape(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('v') => out.push('\u{000B}'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn string(&mut self, is_raw: bool) {
        let lexeme = self.previous.lexeme;
        // Raw strings carry a leading `r` before the opening quote.
        let start = if is_raw { 2 } else { 1 };
        let raw = lexeme[start..lexeme.len() - 1].to_vec();
        let text = String::from_utf8_lossy(&raw).into_owned();
        let value = if is_raw { text } else { Self::unescape(&text) };
        let r = self.intern(&value);
        self.emit_constant(Value::Obj(r));
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::True => self.emit_op(Op::True),
            TokenKind::False => self.emit_op(Op::False),
            TokenKind::Null => self.emit_op(Op::Null),
            _ => unreachable!(),
        }
    }

    fn list_literal(&mut self) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression();
                count += 1;
                if !self.match_tok(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RightBracket) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list elements.");
        if count > u8::MAX as usize {
            self.error("Too many elements in list literal.");
            count = 0;
        }
        self.emit_op_byte(Op::MakeList, count as u8);
    }

    fn named_variable(&mut self, name: &[u8], can_assign: bool) {
        let idx = self.cur_idx();
        let (get_op, set_op, arg): (Op, Op, u8) = if let Some((local_idx, is_const, _)) =
            self.resolve_local(idx, name)
        {
            if can_assign && is_const && self.is_assignment_next() {
                self.error("Cannot assign to a const variable.");
            }
            (Op::GetLocal, Op::SetLocal, local_idx as u8)
        } else if let Some(up_idx) = self.resolve_upvalue(idx, name) {
            (Op::GetUpvalue, Op::SetUpvalue, up_idx)
        } else {
            let const_idx = self.identifier_constant(name);
            (Op::GetModule, Op::SetModule, const_idx)
        };

        if can_assign && self.match_tok(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else if can_assign && self.match_compound_op() {
            let compound = self.previous.kind;
            self.emit_op_byte(get_op, arg);
            self.expression();
            match compound {
                TokenKind::PlusEqual => self.emit_op(Op::Add),
                TokenKind::MinusEqual => self.emit_op(Op::Subtract),
                TokenKind::StarEqual => self.emit_op(Op::Multiply),
                TokenKind::SlashEqual => self.emit_op(Op::Divide),
                _ => unreachable!(),
            }
            self.emit_op_byte(set_op, arg);
        } else if can_assign && self.match_tok(TokenKind::PlusPlus) {
            self.emit_op_byte(get_op, arg);
            self.emit_op(Op::Increment);
            self.emit_op_byte(set_op, arg);
        } else if can_assign && self.match_tok(TokenKind::MinusMinus) {
            self.emit_op_byte(get_op, arg);
            self.emit_op(Op::Decrement);
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    fn is_assignment_next(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus
        )
    }

    fn match_compound_op(&mut self) -> bool {
        use TokenKind::*;
        for k in [PlusEqual, MinusEqual, StarEqual, SlashEqual] {
            if self.match_tok(k) {
                return true;
            }
        }
        false
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.to_vec();
        self.named_variable(&name, can_assign);
    }

    fn this_expr(&mut self) {
        if self.current_class.is_empty() {
            self.error("Cannot use 'this' outside of a class.");
            return;
        }
        self.named_variable(b"this", false);
    }

    fn super_expr(&mut self) {
        if self.current_class.is_empty() {
            self.error("Cannot use 'super' outside of a class.");
        } else if !self.current_class.last().unwrap().has_superclass {
            self.error("Cannot use 'super' in a class with no superclass.");
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let lexeme = self.previous.lexeme.to_vec();
        let name_const = self.identifier_constant(&lexeme);
        self.named_variable(b"this", false);
        if self.match_tok(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(b"super", false);
            self.emit_op(Op::SuperInvoke);
            self.emit_bytes(name_const, argc);
        } else {
            self.named_variable(b"super", false);
            self.emit_op_byte(Op::GetSuper, name_const);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Cannot have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_tok(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn call_expr(&mut self) {
        let argc = self.argument_list();
        self.emit_op_byte(Op::Call, argc);
    }

    fn dot_expr(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let lexeme = self.previous.lexeme.to_vec();
        let name_const = self.identifier_constant(&lexeme);

        if can_assign && self.match_tok(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(Op::SetProperty, name_const);
        } else if self.match_tok(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op(Op::Invoke);
            self.emit_bytes(name_const, argc);
        } else {
            self.emit_op_byte(Op::GetProperty, name_const);
        }
    }

    fn subscript_expr(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.match_tok(TokenKind::Equal) {
            self.expression();
            self.emit_op(Op::SubscriptAssign);
        } else {
            self.emit_op(Op::SubscriptIdx);
        }
    }

    // -- statements --------------------------------------------------------

    pub fn declaration(&mut self) {
        if self.match_tok(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_tok(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_tok(TokenKind::Var) {
            self.var_declaration(false);
        } else if self.match_tok(TokenKind::Const) {
            self.var_declaration(true);
        } else if self.match_tok(TokenKind::Local) {
            self.local_declaration();
        } else if self.match_tok(TokenKind::Module) {
            self.module_declaration();
        } else if self.match_tok(TokenKind::Using) {
            self.using_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn local_declaration(&mut self) {
        if self.match_tok(TokenKind::Var) {
            self.var_declaration_scoped(false, true);
        } else if self.match_tok(TokenKind::Const) {
            self.var_declaration_scoped(true, true);
        } else {
            self.error_at_current("Expect 'var' or 'const' after 'local'.");
        }
    }

    fn var_declaration(&mut self, is_const: bool) {
        self.var_declaration_scoped(is_const, false);
    }

    fn var_declaration_scoped(&mut self, is_const: bool, is_scoped: bool) {
        let global = self.parse_variable("Expect variable name.", is_const, is_scoped);
        if self.match_tok(TokenKind::Equal) {
            self.expression();
        } else if is_const {
            self.error("Const declaration requires an initializer.");
        } else {
            self.emit_op(Op::Null);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.", false, false);
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, ftype: FunctionType) {
        let module = self.module;
        self.compilers.push(FnCompiler::new(ftype, module));
        if ftype != FunctionType::Script {
            let name = self.previous.lexeme.to_vec();
            let name_str = String::from_utf8_lossy(&name).into_owned();
            let r = self.intern(&name_str);
            self.pinned_roots.push(r);
            self.cur().function_obj.name = Some(r);
        }

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.cur().function_obj.arity += 1;
                if self.cur().function_obj.arity > 255 {
                    self.error_at_current("Cannot have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.", false, false);
                self.define_variable(constant);
                if !self.match_tok(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function_obj, upvalues) = self.end_compiler();
        let host = CompileHost {
            pinned: &self.pinned_roots,
            vm_host: self.vm_host,
        };
        let fn_ref = self.heap.alloc(Obj::Function(function_obj), &host);
        let const_idx = self.make_constant(Value::Obj(fn_ref));
        self.emit_op_byte(Op::Closure, const_idx);
        for up in &upvalues {
            self.emit_bytes(if up.is_local { 1 } else { 0 }, up.index);
        }
    }

    /// Pop the innermost compiler, finishing its function. Returns the
    /// built function plus its resolved upvalue descriptors.
    fn end_compiler(&mut self) -> (ObjFunction, Vec<UpvalueDesc>) {
        self.emit_return();
        let fc = self.compilers.pop().expect("matching push in `function`");
        (fc.function_obj, fc.upvalues)
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name_tok = self.previous;
        let name_bytes = name_tok.lexeme.to_vec();
        let name_const = self.identifier_constant(&name_bytes);
        self.declare_variable(false, false);

        self.emit_op_byte(Op::Class, name_const);
        self.define_variable(name_const);

        self.current_class.push(ClassCtx {
            has_superclass: false,
        });

        if self.match_tok(TokenKind::Extends) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous.lexeme.to_vec();
            self.variable(false);
            if super_name == name_bytes {
                self.error("A class cannot inherit from itself.");
            }

            self.begin_scope();
            let super_tok = Token {
                kind: TokenKind::Identifier,
                lexeme: b"super",
                line: name_tok.line,
                error_message: "",
            };
            self.add_local(super_tok, false, false);
            self.define_variable(0);

            self.named_variable(&name_bytes, false);
            self.emit_op(Op::Inherit);
            self.current_class.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(&name_bytes, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(Op::EndClass);

        if self.current_class.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.current_class.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_bytes = self.previous.lexeme.to_vec();
        let name_const = self.identifier_constant(&name_bytes);
        let ftype = if name_bytes == b"init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(ftype);
        self.emit_op_byte(Op::Method, name_const);
    }

    fn module_declaration(&mut self) {
        self.consume(TokenKind::String, "Expect module path string.");
        let lexeme = self.previous.lexeme;
        let raw = lexeme[1..lexeme.len() - 1].to_vec();
        let path = Self::unescape(&String::from_utf8_lossy(&raw));
        let r = self.intern(&path);
        let path_const = self.make_constant(Value::Obj(r));
        self.emit_op_byte(Op::Module, path_const);

        if self.match_tok(TokenKind::As) {
            self.consume(TokenKind::Identifier, "Expect binding name after 'as'.");
            self.emit_op(Op::ModuleVar);
            let global = self.declare_current_as_variable(false, false);
            self.define_variable(global);
        }
        // `OP_MODULE` runs the imported module purely for its side effects
        // (populating its own value table) and leaves nothing on the stack;
        // with no `as` binding there is nothing to pop.
        self.consume(TokenKind::Semicolon, "Expect ';' after module declaration.");
    }

    /// Like `parse_variable`, but the identifier token has already been
    /// consumed into `self.previous` (used for `as NAME` bindings where the
    /// surrounding statement needed to peek the token kind first).
    fn declare_current_as_variable(&mut self, is_const: bool, is_scoped: bool) -> u8 {
        self.declare_variable(is_const, is_scoped);
        if self.cur().scope_depth > 0 {
            return 0;
        }
        let lexeme = self.previous.lexeme.to_vec();
        self.identifier_constant(&lexeme)
    }

    fn using_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect standard library name.");
        let lib_name = self.previous.lexeme.to_vec();
        let lib_name_str = String::from_utf8_lossy(&lib_name).into_owned();
        let stdlib_idx = STDLIB_MODULES
            .iter()
            .position(|n| *n == lib_name_str)
            .map(|i| i as u8);
        let Some(stdlib_idx) = stdlib_idx else {
            self.error("Unknown standard library module.");
            self.consume(TokenKind::Semicolon, "Expect ';' after using declaration.");
            return;
        };

        let bind_name = if self.match_tok(TokenKind::As) {
            self.consume(TokenKind::Identifier, "Expect binding name after 'as'.");
            self.previous.lexeme.to_vec()
        } else {
            lib_name.clone()
        };
        let name_const = self.identifier_constant(&bind_name);
        self.declare_variable(false, false);

        self.emit_op(Op::ModuleBuiltin);
        self.emit_bytes(stdlib_idx, name_const);
        self.define_variable(name_const);
        self.consume(TokenKind::Semicolon, "Expect ';' after using declaration.");
    }

    fn statement(&mut self) {
        if self.match_tok(TokenKind::Echo) {
            self.echo_statement();
        } else if self.match_tok(TokenKind::If) {
            self.if_statement();
        } else if self.match_tok(TokenKind::While) {
            self.while_statement();
        } else if self.match_tok(TokenKind::For) {
            self.for_statement();
        } else if self.match_tok(TokenKind::Break) {
            self.break_statement();
        } else if self.match_tok(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_tok(TokenKind::Return) {
            self.return_statement();
        } else if self.match_tok(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn echo_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(Op::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(Op::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.statement();

        let else_jump = self.emit_jump(Op::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Op::Pop);

        if self.match_tok(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.cur().chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);

        let body_start = self.cur().chunk().len();
        let depth = self.cur().scope_depth;
        self.cur().loops.push(LoopCtx {
            start: loop_start,
            body: body_start,
            exit_jump: Some(exit_jump),
            scope_depth: depth,
        });

        self.statement();

        self.emit_loop(loop_start);
        let loop_ctx = self.cur().loops.pop().unwrap();
        self.patch_jump(loop_ctx.exit_jump.unwrap());
        self.emit_op(Op::Pop);
        self.patch_breaks(loop_ctx.body);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_tok(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_tok(TokenKind::Var) {
            self.var_declaration(false);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.cur().chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_tok(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse));
            self.emit_op(Op::Pop);
        }

        if !self.match_tok(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Op::Jump);
            let increment_start = self.cur().chunk().len();
            self.expression();
            self.emit_op(Op::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        let body_start = self.cur().chunk().len();
        let depth = self.cur().scope_depth;
        self.cur().loops.push(LoopCtx {
            start: loop_start,
            body: body_start,
            exit_jump,
            scope_depth: depth,
        });

        self.statement();

        self.emit_loop(loop_start);
        let loop_ctx = self.cur().loops.pop().unwrap();
        if let Some(ej) = loop_ctx.exit_jump {
            self.patch_jump(ej);
            self.emit_op(Op::Pop);
        }
        self.patch_breaks(loop_ctx.body);

        self.end_scope();
    }

    fn break_statement(&mut self) {
        if self.cur().loops.is_empty() {
            self.error("Cannot use 'break' outside of a loop.");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
            return;
        }
        let loop_depth = self.cur().loops.last().unwrap().scope_depth;
        self.close_locals_above(loop_depth);
        self.emit_jump(Op::Break);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
    }

    fn continue_statement(&mut self) {
        if self.cur().loops.is_empty() {
            self.error("Cannot use 'continue' outside of a loop.");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
            return;
        }
        let loop_ctx_depth = self.cur().loops.last().unwrap().scope_depth;
        let loop_start = self.cur().loops.last().unwrap().start;
        self.close_locals_above(loop_ctx_depth);
        self.emit_loop(loop_start);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
    }

    fn close_locals_above(&mut self, depth: i32) {
        let count = self
            .cur()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > depth)
            .count();
        for i in 0..count {
            let idx = self.cur().locals.len() - 1 - i;
            if self.cur().locals[idx].is_captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
        }
    }

    /// `endLoop`: scan the body for `OP_BREAK` placeholders and patch them
    /// to jump past the loop, rewriting the opcode byte to `OP_JUMP` in
    /// place. Scanning relies on the operand-length table because `CLOSURE`
    /// has a variable-length operand.
    fn patch_breaks(&mut self, body_start: usize) {
        // Direct field paths throughout (not `self.cur()`) so the borrow
        // checker can see `self.compilers` and `self.heap` as disjoint —
        // `operand_len` needs both at once for the variable-length
        // `CLOSURE` case.
        let last = self.compilers.len() - 1;
        let end = self.compilers[last].function_obj.chunk.len();
        let mut offset = body_start;
        while offset < end {
            let op = Op::from_byte(self.compilers[last].function_obj.chunk.code[offset]);
            if op == Op::Break {
                self.compilers[last].function_obj.chunk.code[offset] = Op::Jump as u8;
                self.patch_jump(offset + 1);
            }
            let len = wisp_core::opcode::operand_len(
                op,
                &self.compilers[last].function_obj.chunk,
                offset,
                self.heap,
            );
            offset += 1 + len;
        }
    }

    fn return_statement(&mut self) {
        if self.cur().ftype == FunctionType::Script {
            self.error("Cannot return from top-level code.");
        }
        if self.match_tok(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.cur().ftype == FunctionType::Initializer {
                self.error("Cannot return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(Op::Return);
        }
    }
}

/// Compile `source` as a single top-level script owned by `module`.
/// Returns the `ObjRef` of the resulting `Function` on success, or the
/// accumulated compile errors otherwise.
pub fn compile(
    source: &str,
    module: ObjRef,
    heap: &mut Heap,
    vm_host: &dyn GcHost,
) -> Result<ObjRef, Vec<CompileError>> {
    let scanner = Scanner::new(source);
    let dummy = Token {
        kind: TokenKind::Eof,
        lexeme: b"",
        line: 0,
        error_message: "",
    };
    let mut compiler = Compiler {
        scanner,
        current: dummy,
        previous: dummy,
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        heap,
        vm_host,
        module,
        compilers: vec![FnCompiler::new(FunctionType::Script, module)],
        pinned_roots: Vec::new(),
        current_class: Vec::new(),
    };

    tracing::debug!(bytes = source.len(), "compiling module");

    compiler.advance();
    while !compiler.match_tok(TokenKind::Eof) {
        compiler.declaration();
    }

    let (function_obj, _upvalues) = compiler.end_compiler();
    if compiler.had_error {
        tracing::warn!(errors = compiler.errors.len(), "compilation failed");
        return Err(compiler.errors);
    }
    let host = CompileHost {
        pinned: &compiler.pinned_roots,
        vm_host,
    };
    let fn_ref = compiler.heap.alloc(Obj::Function(function_obj), &host);
    tracing::debug!("compilation succeeded");
    Ok(fn_ref)
}
