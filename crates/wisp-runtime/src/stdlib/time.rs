//! `Time` module: a module-scoped home for `clock()` (src/natives.c
//! `clockNative`) for code that prefers `using Time` over the always-global
//! `clock()`.

use wisp_core::Table;

use crate::native::clock_native;
use crate::vm::Vm;

pub(crate) fn build(vm: &mut Vm) -> Table {
    let entries = vm.alloc_native_pairs(&[("clock", clock_native)]);
    let mut table = Table::new();
    for (k, h, v) in entries {
        table.set(k, h, v);
    }
    table
}
