//! The bytecode dispatch loop plus everything it leans
//! on: call/return, upvalue capture, class/instance/method dispatch, list
//! subscripting, and module loading. One `Vm` owns one `Heap` and is the
//! workspace's only `GcHost` implementor — `wisp-compiler` marks its
//! in-progress functions through `pinned_roots` rather than needing its own.

use std::path::{Path, PathBuf};

use wisp_core::heap::{GcHost, Heap};
use wisp_core::object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjList, ObjModule,
    ObjNative, ObjRef, ObjType, ObjUpvalue, UpvalueState,
};
use wisp_core::value::format_number;
use wisp_core::{Op, Table, Value};

use crate::config::RunnerConfig;
use crate::error::{RuntimeError, StackFrameInfo, WispError};
use crate::native::{self, NativeTable};
use crate::stdlib;

const FRAMES_MAX: usize = 256;

pub struct CallFrame {
    pub closure: ObjRef,
    pub ip: usize,
    pub slot_base: usize,
}

/// Everything a module string is resolved relative to, and the cache key
/// under which it is looked up: a module is imported at most once per VM,
/// including by itself (a cyclic import just observes whatever the cached
/// module has reached so far).
pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Natives available without `using`: `clock`, `puts`. Immutable from
    /// the language's point of view and never merged with a module's own
    /// value table — there is no separate "global scope" distinct from
    /// module scope, this table just backs the handful of always-present
    /// natives.
    globals: Table,
    /// Canonicalized import path (interned) -> the `Obj::Module` it
    /// resolved to. Doubles as the cycle breaker: a module is only ever
    /// compiled once per VM.
    modules: Table,
    /// Descending by stack slot index, so the first entry is always the one
    /// closest to the top of the stack.
    open_upvalues: Vec<ObjRef>,
    init_string: ObjRef,
    list_methods: Table,
    string_methods: Table,
    config: RunnerConfig,
    /// Set by `OP_MODULE`/`OP_MODULE_BUILTIN` on success and by
    /// `OP_MODULE_END` when a script finishes; read by `OP_MODULE_VAR`.
    last_module: Option<ObjRef>,
    stdlib_cache: Vec<Option<ObjRef>>,
    repl_module: Option<ObjRef>,
}

/// Enumerates the VM's roots for a `Heap::collect_garbage`/`Heap::alloc`
/// call. Built inline at each call site from individual field borrows
/// (never through a method taking `&self`) so it can coexist with a
/// simultaneous `&mut self.heap` — the same discipline
/// `wisp-compiler`'s `CompileHost` uses.
struct VmRoots<'a> {
    stack: &'a [Value],
    frames: &'a [CallFrame],
    globals: &'a Table,
    modules: &'a Table,
    list_methods: &'a Table,
    string_methods: &'a Table,
    init_string: ObjRef,
    open_upvalues: &'a [ObjRef],
}

impl<'a> GcHost for VmRoots<'a> {
    fn mark_roots(&self, heap: &mut Heap) {
        for v in self.stack {
            heap.mark_value(*v);
        }
        for frame in self.frames {
            heap.mark_object(frame.closure);
        }
        for r in self.open_upvalues {
            heap.mark_object(*r);
        }
        mark_table(heap, self.globals);
        mark_table(heap, self.modules);
        mark_table(heap, self.list_methods);
        mark_table(heap, self.string_methods);
        heap.mark_object(self.init_string);
    }
}

fn mark_table(heap: &mut Heap, table: &Table) {
    for (k, v) in table.iter() {
        heap.mark_object(k);
        heap.mark_value(v);
    }
}

/// Marks nothing — used only for the very first allocation in `Vm::new`,
/// before there is anything else to mark.
struct BootstrapHost;
impl GcHost for BootstrapHost {
    fn mark_roots(&self, _heap: &mut Heap) {}
}

macro_rules! vm_roots {
    ($self:expr) => {
        VmRoots {
            stack: &$self.stack,
            frames: &$self.frames,
            globals: &$self.globals,
            modules: &$self.modules,
            list_methods: &$self.list_methods,
            string_methods: &$self.string_methods,
            init_string: $self.init_string,
            open_upvalues: &$self.open_upvalues,
        }
    };
}

impl Vm {
    pub fn new(config: RunnerConfig) -> Self {
        let mut heap = Heap::new(config.initial_gc_threshold);
        heap.stress_gc = config.stress_gc;
        let init_string = heap.intern_string("init", &BootstrapHost);
        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            modules: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            list_methods: Table::new(),
            string_methods: Table::new(),
            config,
            last_module: None,
            stdlib_cache: vec![None; wisp_compiler::STDLIB_MODULES.len()],
            repl_module: None,
        };
        native::register_globals(&mut vm);
        native::register_list_methods(&mut vm);
        native::register_string_methods(&mut vm);
        vm
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    // -- allocation helpers shared with `native`/`stdlib` --------------------

    /// Intern `name`, allocate a native wrapping `function`, and return the
    /// pair as rooted `Value`s (both pushed onto the VM stack for the
    /// caller to batch-insert into a table once every pair in the batch is
    /// built). This is the same push-before-further-alloc discipline the
    /// reference `defineNative` uses around its own `tableSet` call.
    pub(crate) fn alloc_native_pairs(
        &mut self,
        entries: &[(&'static str, wisp_core::object::NativeFn)],
    ) -> Vec<(ObjRef, u32, Value)> {
        let mut pushed = 0usize;
        for &(name, function) in entries {
            let host = vm_roots!(self);
            let name_ref = self.heap.intern_string(name, &host);
            self.stack.push(Value::Obj(name_ref));
            pushed += 1;
            let host = vm_roots!(self);
            let native_ref = self.heap.alloc(Obj::Native(ObjNative { name, function }), &host);
            self.stack.push(Value::Obj(native_ref));
            pushed += 1;
        }
        let base = self.stack.len() - pushed;
        let raw: Vec<Value> = self.stack[base..].to_vec();
        self.stack.truncate(base);
        raw.chunks(2)
            .map(|pair| {
                let name_ref = pair[0].as_obj().expect("name half of a native pair");
                let hash = self.heap.string_hash(name_ref);
                (name_ref, hash, pair[1])
            })
            .collect()
    }

    pub(crate) fn define_const(&mut self, table: &mut Table, name: &str, value: f64) {
        let host = vm_roots!(self);
        let name_ref = self.heap.intern_string(name, &host);
        let hash = self.heap.string_hash(name_ref);
        table.set(name_ref, hash, Value::Number(value));
    }

    pub(crate) fn insert_into(&mut self, table: NativeTable, entries: Vec<(ObjRef, u32, Value)>) {
        for (k, h, v) in entries {
            match table {
                NativeTable::Globals => self.globals.set(k, h, v),
                NativeTable::ListMethods => self.list_methods.set(k, h, v),
                NativeTable::StringMethods => self.string_methods.set(k, h, v),
            };
        }
    }

    /// Wrap an already-populated stdlib module table into an `Obj::Module`.
    /// Everything in `table` is re-rooted on the VM stack for the duration
    /// of this allocation, since otherwise the natives it holds would be
    /// reachable only from a Rust-local `Table` the GC host doesn't know
    /// about.
    pub(crate) fn wrap_stdlib_module(&mut self, display_name: &str, table: Table) -> ObjRef {
        let rooted: Vec<Value> = table.iter().map(|(_, v)| v).collect();
        let mark = self.stack.len();
        self.stack.extend(rooted);
        let host = vm_roots!(self);
        let name_ref = self.heap.intern_string(display_name, &host);
        self.stack.push(Value::Obj(name_ref));
        let host = vm_roots!(self);
        let module_ref = self.heap.alloc(
            Obj::Module(ObjModule {
                name: name_ref,
                dir: self.config.module_root.clone(),
                values: table,
            }),
            &host,
        );
        self.stack.truncate(mark);
        module_ref
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    // -- top-level entry points ----------------------------------------------

    pub fn interpret_file(&mut self, path: &Path) -> Result<(), WispError> {
        let source = std::fs::read_to_string(path).map_err(|e| WispError::Io {
            path: Some(path.to_path_buf()),
            source: e,
        })?;
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.config.module_root.clone());
        let display_name = path.display().to_string();
        self.run_source_in_new_module(&source, &display_name, dir)
    }

    pub fn interpret_repl_line(&mut self, source: &str) -> Result<(), WispError> {
        if self.repl_module.is_none() {
            let dir = self.config.module_root.clone();
            let module_ref = self.new_module("<repl>", dir);
            self.repl_module = Some(module_ref);
        }
        let module_ref = self.repl_module.unwrap();
        self.run_source_in_module(source, module_ref)
    }

    fn run_source_in_new_module(
        &mut self,
        source: &str,
        display_name: &str,
        dir: PathBuf,
    ) -> Result<(), WispError> {
        let module_ref = self.new_module(display_name, dir);
        self.run_source_in_module(source, module_ref)
    }

    fn new_module(&mut self, display_name: &str, dir: PathBuf) -> ObjRef {
        let host = vm_roots!(self);
        let name_ref = self.heap.intern_string(display_name, &host);
        self.stack.push(Value::Obj(name_ref));
        let host = vm_roots!(self);
        let module_ref = self.heap.alloc(
            Obj::Module(ObjModule {
                name: name_ref,
                dir,
                values: Table::new(),
            }),
            &host,
        );
        self.stack.pop();
        module_ref
    }

    fn run_source_in_module(&mut self, source: &str, module_ref: ObjRef) -> Result<(), WispError> {
        self.last_module = Some(module_ref);
        let collections_before = self.heap.collections_run;
        let host = vm_roots!(self);
        let compiled = wisp_compiler::compile(source, module_ref, &mut self.heap, &host);
        let function_ref = match compiled {
            Ok(f) => f,
            Err(errs) => {
                self.reset();
                return Err(WispError::from(errs));
            }
        };
        let host = vm_roots!(self);
        let closure_ref = self.heap.alloc(
            Obj::Closure(ObjClosure {
                function: function_ref,
                upvalues: Vec::new(),
            }),
            &host,
        );
        self.stack.push(Value::Obj(closure_ref));
        let base = self.stack.len() - 1;
        let result = self
            .call_closure(closure_ref, 0, base)
            .and_then(|_| self.run());
        let collected = self.heap.collections_run - collections_before;
        if collected > 0 {
            tracing::trace!(collections = collected, "garbage collector ran during execution");
        }
        match result {
            Ok(()) => {
                debug_assert!(self.stack.is_empty());
                debug_assert!(self.open_upvalues.is_empty());
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(WispError::from(e))
            }
        }
    }

    /// Reset to a clean slate after an error: the stack and open-upvalue
    /// list must be empty before the next top-level `interpret` call, which
    /// matters most for the REPL's recovery loop.
    fn reset(&mut self) {
        self.stack.clear();
        self.open_upvalues.clear();
        self.frames.clear();
    }

    // -- bytecode access ------------------------------------------------------

    fn current_function<'h>(heap: &'h Heap, closure: ObjRef) -> &'h ObjFunction {
        let function_ref = heap.get(closure).as_closure().unwrap().function;
        heap.get(function_ref).as_function().unwrap()
    }

    fn read_byte(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let closure = self.frames[idx].closure;
        let ip = self.frames[idx].ip;
        self.frames[idx].ip += 1;
        Self::current_function(&self.heap, closure).chunk.code[ip]
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn constant_value(&self, idx: u8) -> Value {
        let frame = self.frames.last().unwrap();
        Self::current_function(&self.heap, frame.closure).chunk.constants[idx as usize]
    }

    fn constant_obj_ref(&self, idx: u8) -> ObjRef {
        match self.constant_value(idx) {
            Value::Obj(r) => r,
            _ => panic!("corrupt bytecode: expected an object constant"),
        }
    }

    fn obj_name_str(&self, r: ObjRef) -> String {
        self.heap
            .get(r)
            .as_string()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()
    }

    fn class_name_str(&self, class_ref: ObjRef) -> String {
        let name = self.heap.get(class_ref).as_class().unwrap().name;
        self.obj_name_str(name)
    }

    fn current_module(&self) -> ObjRef {
        let frame = self.frames.last().unwrap();
        Self::current_function(&self.heap, frame.closure).module
    }

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let mut err = RuntimeError::new(message);
        for frame in self.frames.iter().rev() {
            let function_ref = self.heap.get(frame.closure).as_closure().unwrap().function;
            let f = self.heap.get(function_ref).as_function().unwrap();
            let fn_name = match f.name {
                Some(n) => self.obj_name_str(n),
                None => "<script>".to_string(),
            };
            let module_name = self.heap.get(f.module).as_module().unwrap().name;
            let module_str = self.obj_name_str(module_name);
            let line = if frame.ip > 0 {
                f.chunk.line_at(frame.ip - 1)
            } else {
                0
            };
            err.trace.push(StackFrameInfo {
                module: module_str,
                function: fn_name,
                line,
            });
        }
        tracing::warn!(message = %err.message, depth = err.trace.len(), "runtime error raised");
        err
    }

    // -- the dispatch loop ----------------------------------------------------

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.run_until(0)
    }

    /// Dispatch instructions until the frame stack unwinds back to
    /// `target_depth`. `run()` is just `run_until(0)`; `load_module` calls
    /// this directly with the importer's own depth so a module's script can
    /// execute to completion (and its implicit `null` return get produced
    /// and discarded) before control resumes at `OP_MODULE`'s next byte —
    /// without that, a nested module run would just fall off the end of
    /// this call and silently resume inside the wrong frame.
    fn run_until(&mut self, target_depth: usize) -> Result<(), RuntimeError> {
        while self.frames.len() > target_depth {
            let byte = self.read_byte();
            let op = Op::from_byte(byte);
            match op {
                Op::Constant => {
                    let idx = self.read_byte();
                    let v = self.constant_value(idx);
                    self.stack.push(v);
                }
                Op::Null => self.stack.push(Value::Null),
                Op::True => self.stack.push(Value::Bool(true)),
                Op::False => self.stack.push(Value::Bool(false)),
                Op::Pop => {
                    self.stack.pop();
                }

                Op::GetLocal => {
                    let idx = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.stack.push(self.stack[base + idx]);
                }
                Op::SetLocal => {
                    let idx = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    let value = *self.stack.last().unwrap();
                    self.stack[base + idx] = value;
                }

                Op::GetModule | Op::GetGlobal => {
                    let idx = self.read_byte();
                    let name_ref = self.constant_obj_ref(idx);
                    let hash = self.heap.string_hash(name_ref);
                    let module_ref = self.current_module();
                    let found = self
                        .heap
                        .get(module_ref)
                        .as_module()
                        .unwrap()
                        .values
                        .get(name_ref, hash)
                        .or_else(|| self.globals.get(name_ref, hash));
                    match found {
                        Some(v) => self.stack.push(v),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                self.obj_name_str(name_ref)
                            )))
                        }
                    }
                }
                Op::DefineModule => {
                    let idx = self.read_byte();
                    let name_ref = self.constant_obj_ref(idx);
                    let hash = self.heap.string_hash(name_ref);
                    let value = self.stack.pop().unwrap();
                    let module_ref = self.current_module();
                    self.heap
                        .get_mut(module_ref)
                        .as_module_mut()
                        .unwrap()
                        .values
                        .set(name_ref, hash, value);
                }
                Op::SetModule => {
                    let idx = self.read_byte();
                    let name_ref = self.constant_obj_ref(idx);
                    let hash = self.heap.string_hash(name_ref);
                    let value = *self.stack.last().unwrap();
                    let module_ref = self.current_module();
                    if !self
                        .heap
                        .get(module_ref)
                        .as_module()
                        .unwrap()
                        .values
                        .contains(name_ref, hash)
                    {
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            self.obj_name_str(name_ref)
                        )));
                    }
                    self.heap
                        .get_mut(module_ref)
                        .as_module_mut()
                        .unwrap()
                        .values
                        .set(name_ref, hash, value);
                }

                Op::GetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let closure_ref = self.frames.last().unwrap().closure;
                    let upv_ref = self.heap.get(closure_ref).as_closure().unwrap().upvalues[idx];
                    let value = match &self.heap.get(upv_ref).as_upvalue().unwrap().state {
                        UpvalueState::Open(slot) => self.stack[*slot],
                        UpvalueState::Closed(v) => *v,
                    };
                    self.stack.push(value);
                }
                Op::SetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let value = *self.stack.last().unwrap();
                    let closure_ref = self.frames.last().unwrap().closure;
                    let upv_ref = self.heap.get(closure_ref).as_closure().unwrap().upvalues[idx];
                    let slot = match &self.heap.get(upv_ref).as_upvalue().unwrap().state {
                        UpvalueState::Open(slot) => Some(*slot),
                        UpvalueState::Closed(_) => None,
                    };
                    match slot {
                        Some(slot) => self.stack[slot] = value,
                        None => {
                            self.heap.get_mut(upv_ref).as_upvalue_mut().unwrap().state =
                                UpvalueState::Closed(value);
                        }
                    }
                }

                Op::GetProperty | Op::GetPropertyNoPop => {
                    let idx = self.read_byte();
                    let name_ref = self.constant_obj_ref(idx);
                    let keep = op == Op::GetPropertyNoPop;
                    let receiver = if keep {
                        *self.stack.last().unwrap()
                    } else {
                        self.stack.pop().unwrap()
                    };
                    match self.lookup_property(receiver, name_ref) {
                        Some(v) => self.stack.push(v),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined property '{}'.",
                                self.obj_name_str(name_ref)
                            )))
                        }
                    }
                }
                Op::SetProperty => {
                    let idx = self.read_byte();
                    let name_ref = self.constant_obj_ref(idx);
                    let value = self.stack.pop().unwrap();
                    let receiver = self.stack.pop().unwrap();
                    let r = match receiver {
                        Value::Obj(r) if self.heap.obj_type(r) == ObjType::Instance => r,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let hash = self.heap.string_hash(name_ref);
                    self.heap
                        .get_mut(r)
                        .as_instance_mut()
                        .unwrap()
                        .fields
                        .set(name_ref, hash, value);
                    self.stack.push(value);
                }
                Op::GetSuper => {
                    let idx = self.read_byte();
                    let name_ref = self.constant_obj_ref(idx);
                    let superclass = self.stack.pop().unwrap();
                    let this_val = self.stack.pop().unwrap();
                    let class_ref = superclass.as_obj().expect("super local is always a class");
                    match self.bind_method(class_ref, name_ref, this_val) {
                        Some(v) => self.stack.push(v),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined property '{}'.",
                                self.obj_name_str(name_ref)
                            )))
                        }
                    }
                }

                Op::Add => self.op_add()?,
                Op::Subtract => self.numeric_binop(|a, b| a - b)?,
                Op::Multiply => self.numeric_binop(|a, b| a * b)?,
                Op::Divide => self.numeric_binop(|a, b| a / b)?,
                Op::Mod => self.op_mod()?,
                Op::Negate => self.op_negate()?,
                Op::Increment => self.op_delta(1.0)?,
                Op::Decrement => self.op_delta(-1.0)?,

                Op::Equal => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(self.heap.values_equal(a, b)));
                }
                Op::Greater => self.compare(|a, b| a > b)?,
                Op::Less => self.compare(|a, b| a < b)?,
                Op::Not => {
                    let v = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(!v.is_truthy()));
                }

                Op::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().unwrap().ip += offset;
                }
                Op::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if !self.stack.last().unwrap().is_truthy() {
                        self.frames.last_mut().unwrap().ip += offset;
                    }
                }
                Op::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().unwrap().ip -= offset;
                }
                Op::Break => {
                    unreachable!(
                        "OP_BREAK is rewritten to OP_JUMP by the compiler's loop-patching pass"
                    )
                }

                Op::Call => {
                    let argc = self.read_byte();
                    self.call_value(argc)?;
                }
                Op::Invoke => {
                    let name_const = self.read_byte();
                    let argc = self.read_byte();
                    let name_ref = self.constant_obj_ref(name_const);
                    self.invoke(name_ref, argc)?;
                }
                Op::SuperInvoke => {
                    let name_const = self.read_byte();
                    let argc = self.read_byte();
                    let name_ref = self.constant_obj_ref(name_const);
                    let superclass = self.stack.pop().unwrap();
                    let class_ref = superclass.as_obj().expect("super local is always a class");
                    let base = self.stack.len() - argc as usize - 1;
                    let hash = self.heap.string_hash(name_ref);
                    let method_ref = self
                        .heap
                        .get(class_ref)
                        .as_class()
                        .unwrap()
                        .methods
                        .get(name_ref, hash)
                        .and_then(|v| v.as_obj());
                    match method_ref {
                        Some(closure_ref) => self.call_closure(closure_ref, argc, base)?,
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined property '{}'.",
                                self.obj_name_str(name_ref)
                            )))
                        }
                    }
                }
                Op::Return => {
                    let result = self.stack.pop().unwrap();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues_from(frame.slot_base);
                    self.stack.truncate(frame.slot_base);
                    if !self.frames.is_empty() {
                        self.stack.push(result);
                    }
                }

                Op::Closure => {
                    let const_idx = self.read_byte();
                    let function_ref = self.constant_obj_ref(const_idx);
                    let upvalue_count =
                        self.heap.get(function_ref).as_function().unwrap().upvalue_count;
                    let slot_base = self.frames.last().unwrap().slot_base;
                    let enclosing_closure = self.frames.last().unwrap().closure;
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte();
                        let index = self.read_byte() as usize;
                        if is_local == 1 {
                            upvalues.push(self.capture_upvalue(slot_base + index));
                        } else {
                            let up = self.heap.get(enclosing_closure).as_closure().unwrap().upvalues[index];
                            upvalues.push(up);
                        }
                    }
                    let host = vm_roots!(self);
                    let closure_ref = self.heap.alloc(
                        Obj::Closure(ObjClosure {
                            function: function_ref,
                            upvalues,
                        }),
                        &host,
                    );
                    self.stack.push(Value::Obj(closure_ref));
                }
                Op::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues_from(top);
                    self.stack.pop();
                }

                Op::Class => {
                    let name_const = self.read_byte();
                    let name_ref = self.constant_obj_ref(name_const);
                    let host = vm_roots!(self);
                    let class_ref = self.heap.alloc(
                        Obj::Class(ObjClass {
                            name: name_ref,
                            methods: Table::new(),
                        }),
                        &host,
                    );
                    self.stack.push(Value::Obj(class_ref));
                }
                Op::Inherit => {
                    let superclass_val = self.stack[self.stack.len() - 2];
                    let subclass_val = *self.stack.last().unwrap();
                    let super_ref = match superclass_val {
                        Value::Obj(r) if self.heap.obj_type(r) == ObjType::Class => r,
                        _ => return Err(self.runtime_error("Cannot inherit from non-class object.")),
                    };
                    let sub_ref = subclass_val.as_obj().expect("class value on the stack");
                    let mut entries: Vec<(ObjRef, u32, Value)> = {
                        let superclass = self.heap.get(super_ref).as_class().unwrap();
                        superclass.methods.iter().map(|(k, v)| (k, 0u32, v)).collect()
                    };
                    for entry in &mut entries {
                        entry.1 = self.heap.string_hash(entry.0);
                    }
                    let sub = self.heap.get_mut(sub_ref).as_class_mut().unwrap();
                    for (k, hash, v) in entries {
                        sub.methods.set(k, hash, v);
                    }
                    self.stack.pop();
                }
                Op::Method => {
                    let name_const = self.read_byte();
                    let name_ref = self.constant_obj_ref(name_const);
                    let closure_val = self.stack.pop().unwrap();
                    let class_ref = self
                        .stack
                        .last()
                        .unwrap()
                        .as_obj()
                        .expect("class value beneath a method closure");
                    let hash = self.heap.string_hash(name_ref);
                    self.heap
                        .get_mut(class_ref)
                        .as_class_mut()
                        .unwrap()
                        .methods
                        .set(name_ref, hash, closure_val);
                }
                Op::EndClass => {
                    self.stack.pop();
                }

                Op::MakeList => {
                    let n = self.read_byte() as usize;
                    let start = self.stack.len() - n;
                    let items: Vec<Value> = self.stack[start..].to_vec();
                    self.stack.truncate(start);
                    let host = vm_roots!(self);
                    let list_ref = self.heap.alloc(Obj::List(ObjList { items }), &host);
                    self.stack.push(Value::Obj(list_ref));
                }
                Op::SubscriptIdx | Op::SubscriptIdxNoPop => {
                    let keep = op == Op::SubscriptIdxNoPop;
                    let index_val = self.stack.pop().unwrap();
                    let list_val = if keep {
                        *self.stack.last().unwrap()
                    } else {
                        self.stack.pop().unwrap()
                    };
                    let v = self.subscript_get(list_val, index_val)?;
                    self.stack.push(v);
                }
                Op::SubscriptAssign => {
                    let value = self.stack.pop().unwrap();
                    let index_val = self.stack.pop().unwrap();
                    let list_val = self.stack.pop().unwrap();
                    self.subscript_set(list_val, index_val, value)?;
                    self.stack.push(value);
                }

                Op::Module => {
                    let idx = self.read_byte();
                    let path_ref = self.constant_obj_ref(idx);
                    let path_str = self.obj_name_str(path_ref);
                    self.load_module(&path_str)?;
                }
                Op::ModuleBuiltin => {
                    let stdlib_idx = self.read_byte();
                    let _name_const = self.read_byte();
                    let module_ref = self.stdlib_module(stdlib_idx)?;
                    self.last_module = Some(module_ref);
                    self.stack.push(Value::Obj(module_ref));
                }
                Op::ModuleVar => {
                    let m = self
                        .last_module
                        .expect("OP_MODULE_VAR always follows a successful OP_MODULE");
                    self.stack.push(Value::Obj(m));
                }
                Op::ModuleEnd => {
                    self.last_module = Some(self.current_module());
                }

                Op::Print => {
                    let v = self.stack.pop().unwrap();
                    let text = self.heap.print_value(v);
                    stdlib::io::write_line(&text);
                }
            }
        }
        Ok(())
    }

    // -- arithmetic -------------------------------------------------------

    fn numeric_binop(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Number(f(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn compare(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Bool(f(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn op_mod(&mut self) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) if x == x.trunc() && y == y.trunc() && y != 0.0 => {
                self.stack.push(Value::Number((x as i64 % y as i64) as f64));
                Ok(())
            }
            (Some(_), Some(_)) => Err(self.runtime_error("Modulo by zero.")),
            _ => Err(self.runtime_error("Operands to '%' must be integers.")),
        }
    }

    fn op_negate(&mut self) -> Result<(), RuntimeError> {
        let v = self.stack.pop().unwrap();
        match v.as_number() {
            Some(n) => {
                self.stack.push(Value::Number(-n));
                Ok(())
            }
            None => Err(self.runtime_error("Operand must be a number.")),
        }
    }

    fn op_delta(&mut self, delta: f64) -> Result<(), RuntimeError> {
        let v = self.stack.pop().unwrap();
        match v.as_number() {
            Some(n) => {
                self.stack.push(Value::Number(n + delta));
                Ok(())
            }
            None => Err(self.runtime_error("Operand must be a number.")),
        }
    }

    fn op_add(&mut self) -> Result<(), RuntimeError> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        let is_str = |v: &Value| matches!(v, Value::Obj(r) if self.heap.obj_type(*r) == ObjType::String);
        if is_str(&a) || is_str(&b) {
            let left = self.stringify(a)?;
            let right = self.stringify(b)?;
            let combined = format!("{left}{right}");
            let host = vm_roots!(self);
            let r = self.heap.intern_string(&combined, &host);
            self.stack.push(Value::Obj(r));
            return Ok(());
        }
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Number(x + y));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }

    fn stringify(&self, v: Value) -> Result<String, RuntimeError> {
        match v {
            Value::Number(n) => Ok(format_number(n)),
            Value::Obj(r) if self.heap.obj_type(r) == ObjType::String => {
                Ok(self.heap.get(r).as_string().unwrap().as_str().to_string())
            }
            _ => Err(self.runtime_error("Unsupported type in string concatenation.")),
        }
    }

    // -- property / method dispatch -----------------------------------------

    fn lookup_property(&mut self, receiver: Value, name_ref: ObjRef) -> Option<Value> {
        let r = receiver.as_obj()?;
        let hash = self.heap.string_hash(name_ref);
        match self.heap.obj_type(r) {
            ObjType::Instance => {
                let (field_val, class_ref) = {
                    let inst = self.heap.get(r).as_instance().unwrap();
                    (inst.fields.get(name_ref, hash), inst.class)
                };
                field_val.or_else(|| self.bind_method(class_ref, name_ref, receiver))
            }
            ObjType::Module => self.heap.get(r).as_module().unwrap().values.get(name_ref, hash),
            ObjType::List => {
                let native_val = self.list_methods.get(name_ref, hash)?;
                self.bind_native_method(native_val, receiver)
            }
            ObjType::String => {
                let native_val = self.string_methods.get(name_ref, hash)?;
                self.bind_native_method(native_val, receiver)
            }
            _ => None,
        }
    }

    fn bind_method(&mut self, class_ref: ObjRef, name_ref: ObjRef, receiver: Value) -> Option<Value> {
        let hash = self.heap.string_hash(name_ref);
        let method_ref = self
            .heap
            .get(class_ref)
            .as_class()
            .unwrap()
            .methods
            .get(name_ref, hash)?
            .as_obj()?;
        let host = vm_roots!(self);
        let bound = self.heap.alloc(
            Obj::BoundMethod(ObjBoundMethod {
                receiver,
                method: method_ref,
            }),
            &host,
        );
        Some(Value::Obj(bound))
    }

    fn bind_native_method(&mut self, native_val: Value, receiver: Value) -> Option<Value> {
        let native_ref = native_val.as_obj()?;
        let host = vm_roots!(self);
        let bound = self.heap.alloc(
            Obj::BoundMethod(ObjBoundMethod {
                receiver,
                method: native_ref,
            }),
            &host,
        );
        Some(Value::Obj(bound))
    }

    /// `receiver.name(args...)`. Faster than a plain `GetProperty` + `Call`
    /// for the common case (no `BoundMethod` allocation): instance methods
    /// and list/string built-ins are invoked directly against the receiver
    /// already sitting on the stack.
    fn invoke(&mut self, name_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let base = self.stack.len() - argc as usize - 1;
        let receiver = self.stack[base];
        let r = match receiver {
            Value::Obj(r) => r,
            _ => {
                return Err(self.runtime_error(format!(
                    "Only instances have methods. Method '{}' not found.",
                    self.obj_name_str(name_ref)
                )))
            }
        };
        let hash = self.heap.string_hash(name_ref);
        match self.heap.obj_type(r) {
            ObjType::Instance => {
                let (field_val, class_ref) = {
                    let inst = self.heap.get(r).as_instance().unwrap();
                    (inst.fields.get(name_ref, hash), inst.class)
                };
                if let Some(v) = field_val {
                    self.stack[base] = v;
                    return self.call_value(argc);
                }
                let method_ref = self
                    .heap
                    .get(class_ref)
                    .as_class()
                    .unwrap()
                    .methods
                    .get(name_ref, hash)
                    .and_then(|v| v.as_obj());
                match method_ref {
                    Some(closure_ref) => self.call_closure(closure_ref, argc, base),
                    None => Err(self.runtime_error(format!(
                        "Undefined method '{}' in class '{}'.",
                        self.obj_name_str(name_ref),
                        self.class_name_str(class_ref)
                    ))),
                }
            }
            ObjType::Module => {
                let val = self.heap.get(r).as_module().unwrap().values.get(name_ref, hash);
                match val {
                    Some(v) => {
                        self.stack[base] = v;
                        self.call_value(argc)
                    }
                    None => Err(self.runtime_error(format!(
                        "Undefined variable '{}'.",
                        self.obj_name_str(name_ref)
                    ))),
                }
            }
            ObjType::List => match self.list_methods.get(name_ref, hash) {
                Some(v) => self.call_native_method(v, argc, base),
                None => Err(self.runtime_error(format!(
                    "Only instances have methods. Method '{}' not found.",
                    self.obj_name_str(name_ref)
                ))),
            },
            ObjType::String => match self.string_methods.get(name_ref, hash) {
                Some(v) => self.call_native_method(v, argc, base),
                None => Err(self.runtime_error(format!(
                    "Only instances have methods. Method '{}' not found.",
                    self.obj_name_str(name_ref)
                ))),
            },
            _ => Err(self.runtime_error(format!(
                "Only instances have methods. Method '{}' not found.",
                self.obj_name_str(name_ref)
            ))),
        }
    }

    fn call_value(&mut self, argc: u8) -> Result<(), RuntimeError> {
        let base = self.stack.len() - argc as usize - 1;
        let callee = self.stack[base];
        let r = match callee {
            Value::Obj(r) => r,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        match self.heap.obj_type(r) {
            ObjType::Closure => self.call_closure(r, argc, base),
            ObjType::Native => self.call_native(r, argc, base),
            ObjType::Class => self.call_class(r, argc, base),
            ObjType::BoundMethod => {
                let (receiver, method_ref) = {
                    let bound = self.heap.get(r).as_bound_method().unwrap();
                    (bound.receiver, bound.method)
                };
                self.stack[base] = receiver;
                match self.heap.obj_type(method_ref) {
                    ObjType::Closure => self.call_closure(method_ref, argc, base),
                    ObjType::Native => self.call_native_method(Value::Obj(method_ref), argc, base),
                    _ => Err(self.runtime_error("Can only call functions and classes.")),
                }
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure_ref: ObjRef, argc: u8, base: usize) -> Result<(), RuntimeError> {
        let function_ref = self.heap.get(closure_ref).as_closure().unwrap().function;
        let arity = self.heap.get(function_ref).as_function().unwrap().arity;
        if argc != arity {
            return Err(self.runtime_error(format!("Expected {arity} arguments but got {argc}.")));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure: closure_ref,
            ip: 0,
            slot_base: base,
        });
        Ok(())
    }

    fn call_native(&mut self, native_ref: ObjRef, argc: u8, base: usize) -> Result<(), RuntimeError> {
        let function = match self.heap.get(native_ref) {
            Obj::Native(n) => n.function,
            _ => unreachable!(),
        };
        let args_start = base + 1;
        let host = vm_roots!(self);
        let result = function(&mut self.heap, &host, &self.stack[args_start..]);
        match result {
            Ok(v) => {
                self.stack.truncate(base);
                self.stack.push(v);
                Ok(())
            }
            Err(msg) => Err(self.runtime_error(msg)),
        }
    }

    /// Same as `call_native`, but the receiver at `base` is kept as the
    /// native's first argument — the convention list/string built-in
    /// methods use, since `NativeFn` has no separate receiver parameter.
    fn call_native_method(&mut self, native_val: Value, argc: u8, base: usize) -> Result<(), RuntimeError> {
        let native_ref = match native_val {
            Value::Obj(r) => r,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        let function = match self.heap.get(native_ref) {
            Obj::Native(n) => n.function,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        let end = base + argc as usize + 1;
        let host = vm_roots!(self);
        let result = function(&mut self.heap, &host, &self.stack[base..end]);
        match result {
            Ok(v) => {
                self.stack.truncate(base);
                self.stack.push(v);
                Ok(())
            }
            Err(msg) => Err(self.runtime_error(msg)),
        }
    }

    fn call_class(&mut self, class_ref: ObjRef, argc: u8, base: usize) -> Result<(), RuntimeError> {
        let host = vm_roots!(self);
        let instance = self.heap.alloc(
            Obj::Instance(ObjInstance {
                class: class_ref,
                fields: Table::new(),
            }),
            &host,
        );
        self.stack[base] = Value::Obj(instance);
        let hash = self.heap.string_hash(self.init_string);
        let init_ref = self
            .heap
            .get(class_ref)
            .as_class()
            .unwrap()
            .methods
            .get(self.init_string, hash)
            .and_then(|v| v.as_obj());
        match init_ref {
            Some(closure_ref) => self.call_closure(closure_ref, argc, base),
            None => {
                if argc != 0 {
                    return Err(self.runtime_error(format!("Expected 0 arguments but got {argc}.")));
                }
                self.stack.truncate(base + 1);
                Ok(())
            }
        }
    }

    // -- upvalues -----------------------------------------------------------

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &r) in self.open_upvalues.iter().enumerate() {
            let s = match &self.heap.get(r).as_upvalue().unwrap().state {
                UpvalueState::Open(s) => *s,
                UpvalueState::Closed(_) => continue,
            };
            if s == slot {
                return r;
            }
            if s < slot {
                insert_at = i;
                break;
            }
        }
        let host = vm_roots!(self);
        let new_ref = self.heap.alloc(
            Obj::Upvalue(ObjUpvalue {
                state: UpvalueState::Open(slot),
            }),
            &host,
        );
        self.open_upvalues.insert(insert_at, new_ref);
        new_ref
    }

    fn close_upvalues_from(&mut self, slot_min: usize) {
        while let Some(&r) = self.open_upvalues.first() {
            let slot = match &self.heap.get(r).as_upvalue().unwrap().state {
                UpvalueState::Open(s) => *s,
                UpvalueState::Closed(_) => break,
            };
            if slot < slot_min {
                break;
            }
            self.open_upvalues.remove(0);
            let value = self.stack[slot];
            self.heap.get_mut(r).as_upvalue_mut().unwrap().state = UpvalueState::Closed(value);
        }
    }

    // -- lists ----------------------------------------------------------------

    fn subscript_get(&self, list_val: Value, index_val: Value) -> Result<Value, RuntimeError> {
        let list_ref = match list_val {
            Value::Obj(r) if self.heap.obj_type(r) == ObjType::List => r,
            _ => return Err(self.runtime_error("Can only subscript lists.")),
        };
        let idx = match index_val.as_number() {
            Some(n) => n,
            None => return Err(self.runtime_error("List index must be a number.")),
        };
        if idx != idx.trunc() {
            let len = self.heap.get(list_ref).as_list().unwrap().items.len();
            return Err(self.runtime_error(format!(
                "List index out of bounds (given {}, length {}).",
                idx as i64, len
            )));
        }
        let list = self.heap.get(list_ref).as_list().unwrap();
        let len = list.items.len();
        let wrapped = if idx < 0.0 { idx + len as f64 } else { idx };
        if wrapped < 0.0 || wrapped as usize >= len {
            return Err(self.runtime_error(format!(
                "List index out of bounds (given {}, length {}).",
                idx as i64, len
            )));
        }
        Ok(list.items[wrapped as usize])
    }

    fn subscript_set(
        &mut self,
        list_val: Value,
        index_val: Value,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let list_ref = match list_val {
            Value::Obj(r) if self.heap.obj_type(r) == ObjType::List => r,
            _ => return Err(self.runtime_error("Can only subscript lists.")),
        };
        let idx = match index_val.as_number() {
            Some(n) => n,
            None => return Err(self.runtime_error("List index must be a number.")),
        };
        if idx != idx.trunc() {
            let len = self.heap.get(list_ref).as_list().unwrap().items.len();
            return Err(self.runtime_error(format!(
                "List index out of bounds (given {}, length {}).",
                idx as i64, len
            )));
        }
        let len = self.heap.get(list_ref).as_list().unwrap().items.len();
        let wrapped = if idx < 0.0 { idx + len as f64 } else { idx };
        if wrapped < 0.0 {
            return Err(self.runtime_error(format!(
                "List index out of bounds (given {}, length {}).",
                idx as i64, len
            )));
        }
        let wrapped = wrapped as usize;
        let list = self.heap.get_mut(list_ref).as_list_mut().unwrap();
        // Out-of-bounds writes autovivify: intermediate slots fill with
        // `null` rather than erroring, unlike a read of the same index.
        if wrapped >= list.items.len() {
            list.items.resize(wrapped + 1, Value::Null);
        }
        list.items[wrapped] = value;
        Ok(())
    }

    // -- module loading ---------------------------------------------------

    fn load_module(&mut self, raw_path: &str) -> Result<(), RuntimeError> {
        let base_dir = {
            let module_ref = self.current_module();
            self.heap.get(module_ref).as_module().unwrap().dir.clone()
        };
        let path = Path::new(raw_path);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
        let canonical_str = canonical.to_string_lossy().into_owned();
        let host = vm_roots!(self);
        let key_ref = self.heap.intern_string(&canonical_str, &host);
        let hash = self.heap.string_hash(key_ref);
        if let Some(Value::Obj(cached)) = self.modules.get(key_ref, hash) {
            tracing::trace!(path = %canonical_str, "module import cache hit");
            self.last_module = Some(cached);
            return Ok(());
        }
        tracing::debug!(path = %canonical_str, "loading module");

        let source = std::fs::read_to_string(&canonical)
            .map_err(|e| self.runtime_error(format!("could not read module '{}': {e}", canonical.display())))?;
        let dir = canonical
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base_dir.clone());

        let module_ref = self.new_module(raw_path, dir);
        self.modules.set(key_ref, hash, Value::Obj(module_ref));

        let host = vm_roots!(self);
        let compiled = wisp_compiler::compile(&source, module_ref, &mut self.heap, &host);
        let function_ref = compiled.map_err(|errs| {
            let msgs: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
            self.runtime_error(format!(
                "error compiling module '{}':\n{}",
                raw_path,
                msgs.join("\n")
            ))
        })?;
        let host = vm_roots!(self);
        let closure_ref = self.heap.alloc(
            Obj::Closure(ObjClosure {
                function: function_ref,
                upvalues: Vec::new(),
            }),
            &host,
        );
        self.stack.push(Value::Obj(closure_ref));
        let base = self.stack.len() - 1;
        let target_depth = self.frames.len();
        self.call_closure(closure_ref, 0, base)?;
        self.run_until(target_depth)?;
        // The module script ends like any other script, with an implicit
        // `null` return; `OP_MODULE` itself is a statement with no value,
        // so that trailing null is ours to discard, not the importer's.
        self.stack.pop();
        Ok(())
    }

    fn stdlib_module(&mut self, idx: u8) -> Result<ObjRef, RuntimeError> {
        let i = idx as usize;
        if let Some(Some(r)) = self.stdlib_cache.get(i) {
            return Ok(*r);
        }
        let name = *wisp_compiler::STDLIB_MODULES
            .get(i)
            .ok_or_else(|| self.runtime_error("Unknown standard library module."))?;
        tracing::debug!(module = name, "registering standard library module");
        let module_ref = stdlib::build_module(self, name);
        if i >= self.stdlib_cache.len() {
            self.stdlib_cache.resize(i + 1, None);
        }
        self.stdlib_cache[i] = Some(module_ref);
        Ok(module_ref)
    }
}

pub fn interpret(path: &Path, config: RunnerConfig) -> Result<(), WispError> {
    let mut vm = Vm::new(config);
    vm.interpret_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ok(source: &str) -> (Vm, ObjRef) {
        let mut vm = Vm::new(RunnerConfig::default());
        let module = vm.new_module("<test>", PathBuf::from("."));
        vm.run_source_in_module(source, module)
            .unwrap_or_else(|e| panic!("expected '{source}' to run, got: {e}"));
        (vm, module)
    }

    fn run_err(source: &str) -> WispError {
        let mut vm = Vm::new(RunnerConfig::default());
        let module = vm.new_module("<test>", PathBuf::from("."));
        vm.run_source_in_module(source, module)
            .expect_err("expected this source to fail")
    }

    fn module_var(vm: &mut Vm, module: ObjRef, name: &str) -> Value {
        let host = vm_roots!(vm);
        let name_ref = vm.heap.intern_string(name, &host);
        let hash = vm.heap.string_hash(name_ref);
        vm.heap
            .get(module)
            .as_module()
            .unwrap()
            .values
            .get(name_ref, hash)
            .unwrap_or_else(|| panic!("module has no variable '{name}'"))
    }

    fn as_num(v: Value) -> f64 {
        v.as_number().unwrap_or_else(|| panic!("expected a number, got {v:?}"))
    }

    #[test]
    fn arithmetic_and_variables() {
        let (mut vm, module) = run_ok("var a=3; var b=4; var c=a+b;");
        assert_eq!(as_num(module_var(&mut vm, module, "c")), 7.0);
    }

    #[test]
    fn closures_capture_mutable_upvalues() {
        let (mut vm, module) = run_ok(
            "fun make(){ var x=0; fun inc(){ x=x+1; return x; } return inc; }
             var f=make();
             var r1=f(); var r2=f(); var r3=f();",
        );
        assert_eq!(as_num(module_var(&mut vm, module, "r1")), 1.0);
        assert_eq!(as_num(module_var(&mut vm, module, "r2")), 2.0);
        assert_eq!(as_num(module_var(&mut vm, module, "r3")), 3.0);
    }

    #[test]
    fn inheritance_and_super_calls() {
        let (mut vm, module) = run_ok(
            "class A{ init(x){ this.x=x; } get(){ return this.x; } }
             class B extends A { get(){ return super.get()*2; } }
             var r=B(5).get();",
        );
        assert_eq!(as_num(module_var(&mut vm, module, "r")), 10.0);
    }

    #[test]
    fn list_subscript_read_and_write() {
        let (mut vm, module) = run_ok("var xs=[1,2,3]; xs[0]=xs[0]+10; var y=xs[0];");
        assert_eq!(as_num(module_var(&mut vm, module, "y")), 11.0);
        let xs = module_var(&mut vm, module, "xs");
        let items = vm.heap.get(xs.as_obj().unwrap()).as_list().unwrap().items.clone();
        let nums: Vec<f64> = items.iter().map(|v| as_num(*v)).collect();
        assert_eq!(nums, vec![11.0, 2.0, 3.0]);
    }

    #[test]
    fn recursive_function_call() {
        let (mut vm, module) =
            run_ok("fun fact(n){ if(n<=1) return 1; return n*fact(n-1); } var r=fact(6);");
        assert_eq!(as_num(module_var(&mut vm, module, "r")), 720.0);
    }

    #[test]
    fn stdlib_module_import_runs() {
        run_ok("using IO; IO.println(\"hi\");");
    }

    #[test]
    fn division_by_zero_yields_infinity_not_an_error() {
        let (mut vm, module) = run_ok("var r=1/0;");
        assert_eq!(as_num(module_var(&mut vm, module, "r")), f64::INFINITY);
    }

    #[test]
    fn mod_on_non_integers_is_a_runtime_error() {
        let err = run_err("var r=5.5 % 2;");
        assert!(matches!(err, WispError::Runtime(_)));
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let err = run_err("var x=1; x();");
        assert!(matches!(err, WispError::Runtime(_)));
    }

    #[test]
    fn inheriting_from_a_non_class_is_a_runtime_error() {
        let err = run_err("var x=1; class B extends x {}");
        assert!(matches!(err, WispError::Runtime(_)));
    }

    #[test]
    fn arity_mismatch_is_a_runtime_error() {
        let err = run_err("fun f(a,b){ return a+b; } f(1);");
        assert!(matches!(err, WispError::Runtime(_)));
    }

    #[test]
    fn list_index_out_of_bounds_errors_on_read() {
        let err = run_err("var xs=[1,2]; var y=xs[5];");
        assert!(matches!(err, WispError::Runtime(_)));
    }

    #[test]
    fn list_subscript_assign_autovivifies_with_nulls() {
        let (mut vm, module) = run_ok("var xs=[1]; xs[3]=9;");
        let xs = module_var(&mut vm, module, "xs");
        let items = vm.heap.get(xs.as_obj().unwrap()).as_list().unwrap().items.clone();
        assert_eq!(items.len(), 4);
        assert!(matches!(items[1], Value::Null));
        assert!(matches!(items[2], Value::Null));
        assert_eq!(as_num(items[3]), 9.0);
    }

    #[test]
    fn negative_index_reads_wrap_from_the_end() {
        let (mut vm, module) = run_ok("var xs=[1,2,3]; var a=xs[-1]; var b=xs[-3];");
        assert_eq!(as_num(module_var(&mut vm, module, "a")), 3.0);
        assert_eq!(as_num(module_var(&mut vm, module, "b")), 1.0);
    }

    #[test]
    fn negative_index_past_the_start_is_a_runtime_error() {
        let err = run_err("var xs=[1,2,3]; var y=xs[-4];");
        assert!(matches!(err, WispError::Runtime(_)));
    }

    #[test]
    fn negative_index_writes_wrap_from_the_end() {
        let (mut vm, module) = run_ok("var xs=[1,2,3]; xs[-1]=9;");
        let xs = module_var(&mut vm, module, "xs");
        let items = vm.heap.get(xs.as_obj().unwrap()).as_list().unwrap().items.clone();
        let nums: Vec<f64> = items.iter().map(|v| as_num(*v)).collect();
        assert_eq!(nums, vec![1.0, 2.0, 9.0]);
    }

    #[test]
    fn instance_prints_as_bracketed_class_name_then_instance() {
        let (mut vm, module) = run_ok("class Foo { init(){} } var f=Foo();");
        let f = module_var(&mut vm, module, "f");
        assert_eq!(vm.heap.print_value(f), "<Foo> instance");
    }

    #[test]
    fn reading_a_local_in_its_own_initializer_is_a_compile_error() {
        let err = run_err("{ var a = a; }");
        assert!(matches!(err, WispError::Compile(_)));
    }

    #[test]
    fn too_many_locals_is_a_compile_error() {
        let mut source = String::from("{\n");
        for i in 0..300 {
            source.push_str(&format!("var v{i} = {i};\n"));
        }
        source.push('}');
        let err = run_err(&source);
        assert!(matches!(err, WispError::Compile(_)));
    }

    #[test]
    fn error_recovery_leaves_the_vm_in_a_clean_state() {
        let mut vm = Vm::new(RunnerConfig::default());
        let module = vm.new_module("<test>", PathBuf::from("."));
        assert!(vm.run_source_in_module("var x=1; x();", module).is_err());
        assert!(vm.stack.is_empty());
        assert!(vm.open_upvalues.is_empty());
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn repeated_interning_returns_the_same_ref() {
        let mut vm = Vm::new(RunnerConfig::default());
        let host = vm_roots!(vm);
        let a = vm.heap.intern_string("hello", &host);
        let host = vm_roots!(vm);
        let b = vm.heap.intern_string("hello", &host);
        assert_eq!(a, b);
    }

    #[test]
    fn stress_gc_keeps_reachable_values_correct() {
        let config = RunnerConfig {
            initial_gc_threshold: 1,
            stress_gc: true,
            module_root: PathBuf::from("."),
        };
        let mut vm = Vm::new(config);
        let module = vm.new_module("<test>", PathBuf::from("."));
        let source = r#"
            class Node { init(v){ this.v=v; this.next=null; } }
            fun build(n){
                var head=null;
                var i=0;
                while(i<n){
                    var node=Node(i);
                    node.next=head;
                    head=node;
                    i=i+1;
                }
                return head;
            }
            var head=build(200);
            var sum=0;
            var cur=head;
            while(cur!=null){ sum=sum+cur.v; cur=cur.next; }
        "#;
        vm.run_source_in_module(source, module)
            .unwrap_or_else(|e| panic!("stress-gc program should run cleanly: {e}"));
        // 0+1+...+199
        assert_eq!(as_num(module_var(&mut vm, module, "sum")), 19900.0);
        assert!(vm.heap.collections_run > 0, "stress_gc should have forced at least one collection");
    }

    #[test]
    fn modules_are_compiled_once_and_cached_by_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dep_path = dir.path().join("dep.wisp");
        std::fs::write(&dep_path, "var shared=41; shared=shared+1;").unwrap();

        let entry_path = dir.path().join("entry.wisp");
        std::fs::write(
            &entry_path,
            "module \"dep.wisp\" as dep;\nmodule \"dep.wisp\" as dep2;\nvar r=dep.shared+dep2.shared;",
        )
        .unwrap();

        let mut vm = Vm::new(RunnerConfig::default());
        vm.interpret_file(&entry_path).unwrap_or_else(|e| panic!("module import should succeed: {e}"));
        let module = vm.last_module.expect("entry module should be the last module run");
        assert_eq!(as_num(module_var(&mut vm, module, "r")), 84.0);
        // Imported exactly once despite two `module` statements for the same path.
        assert_eq!(vm.modules.len(), 1);
    }
}
