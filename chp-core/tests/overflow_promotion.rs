//! Arithmetic that overflows the machine-int range promotes to
//! `Value::BigInt` instead of wrapping or trapping.

mod common;

use chp_core::ast::{BinOp, Expr, ExprKind, Stmt};
use chp_core::instantiate::ProcessDef;
use chp_core::value::Value;
use common::{int_ty, lit, run_timed, var};
use std::rc::Rc;

fn build() -> Vec<ProcessDef> {
    let sum = Expr::new(
        ExprKind::Binary(BinOp::Add, Box::new(lit(i64::MAX, i64::MIN, i64::MAX)), Box::new(lit(1, 0, 1))),
        int_ty(i64::MIN, i64::MAX),
    );
    let body = Rc::new(Stmt::Assign { lhs: var(0, i64::MIN, i64::MAX), rhs: sum });
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 1, port_vars: Rc::from(vec![]), body };
    vec![main_def]
}

#[test]
fn adding_one_to_i64_max_promotes_to_bigint() {
    let (ctx, result) = run_timed("main", build());
    result.expect("overflowing assignment should not itself be a fatal error");

    let main = common::find_process(&ctx, "/");
    let vars = main.variables.borrow();
    match &vars[0] {
        Value::BigInt(b) => assert_eq!(b.to_string(), "9223372036854775808"),
        other => panic!("expected a promoted BigInt, got {other:?}"),
    }
}

#[test]
fn promoted_value_compares_greater_than_i64_max() {
    let (ctx, result) = run_timed("main", build());
    result.expect("overflowing assignment should not itself be a fatal error");

    let main = common::find_process(&ctx, "/");
    let vars = main.variables.borrow();
    let cmp = vars[0].int_cmp(&Value::MachineInt(i64::MAX)).unwrap();
    assert_eq!(cmp, std::cmp::Ordering::Greater);
}
