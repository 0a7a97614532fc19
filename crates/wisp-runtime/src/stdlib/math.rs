//! `Math` module (src/libs/maths.c `initLib_Math`), supplemented with
//! `abs`, `pow`, and the constants `PI`/`E` the original didn't expose.

use wisp_core::heap::{GcHost, Heap};
use wisp_core::Table;
use wisp_core::Value;

use crate::native::expect_number;
use crate::vm::Vm;

pub(crate) fn build(vm: &mut Vm) -> Table {
    let entries = vm.alloc_native_pairs(&[
        ("sin", sin_native),
        ("cos", cos_native),
        ("tan", tan_native),
        ("asin", asin_native),
        ("acos", acos_native),
        ("atan", atan_native),
        ("floor", floor_native),
        ("ceil", ceil_native),
        ("ln", ln_native),
        ("log", log10_native),
        ("sqrt", sqrt_native),
        ("abs", abs_native),
        ("pow", pow_native),
    ]);
    let mut table = Table::new();
    for (k, h, v) in entries {
        table.set(k, h, v);
    }
    vm.define_const(&mut table, "PI", std::f64::consts::PI);
    vm.define_const(&mut table, "E", std::f64::consts::E);
    table
}

macro_rules! unary {
    ($fn_name:ident, $label:literal, $op:expr) => {
        fn $fn_name(_heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
            if args.len() != 1 {
                return Err(format!(
                    "'Math.{}(arg)' takes exactly one argument ({} provided).",
                    $label,
                    args.len()
                ));
            }
            let x = expect_number(args[0], $label)?;
            let f: fn(f64) -> f64 = $op;
            Ok(Value::Number(f(x)))
        }
    };
}

unary!(sin_native, "sin", f64::sin);
unary!(cos_native, "cos", f64::cos);
unary!(tan_native, "tan", f64::tan);
unary!(asin_native, "asin", f64::asin);
unary!(acos_native, "acos", f64::acos);
unary!(atan_native, "atan", f64::atan);
unary!(floor_native, "floor", f64::floor);
unary!(ceil_native, "ceil", f64::ceil);
unary!(ln_native, "ln", f64::ln);
unary!(log10_native, "log", f64::log10);
unary!(sqrt_native, "sqrt", f64::sqrt);
unary!(abs_native, "abs", f64::abs);

fn pow_native(_heap: &mut Heap, _host: &dyn GcHost, args: &[Value]) -> Result<Value, String> {
    if args.len() != 2 {
        return Err(format!(
            "'Math.pow(base, exponent)' takes exactly two arguments ({} provided).",
            args.len()
        ));
    }
    let base = expect_number(args[0], "pow")?;
    let exponent = expect_number(args[1], "pow")?;
    Ok(Value::Number(base.powf(exponent)))
}
