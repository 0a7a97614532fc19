//! Standard library modules, activated with `using IO`/`using Math`/
//! `using Time`. Each submodule builds its own `Table` of
//! name -> native/constant entries; `build_module` wraps the finished table
//! into an `Obj::Module` the VM can cache and hand back on every later
//! `using` of the same name.

pub mod io;
pub mod list_methods;
pub mod math;
pub mod string_methods;
pub mod time;

use wisp_core::object::ObjRef;

use crate::vm::Vm;

pub(crate) fn build_module(vm: &mut Vm, name: &str) -> ObjRef {
    let table = match name {
        "IO" => io::build(vm),
        "Math" => math::build(vm),
        "Time" => time::build(vm),
        other => unreachable!("unknown standard library module '{other}'"),
    };
    vm.wrap_stdlib_module(name, table)
}
