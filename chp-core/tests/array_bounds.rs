//! An out-of-range array subscript is a fatal `CoreError::IndexOutOfBounds`,
//! raised before the write/read ever touches the backing storage.

mod common;

use chp_core::ast::{Expr, ExprKind, Stmt, Type};
use chp_core::error::CoreError;
use chp_core::instantiate::ProcessDef;
use chp_core::value::Value;
use common::{lit, run_timed, var};
use std::rc::Rc;

fn array_ty() -> Type {
    Type::Array { elem: Rc::new(Type::Int { lo: 0, hi: 9 }), lo: 0, hi: 2 }
}

fn build(index: i64) -> Vec<ProcessDef> {
    let ty = array_ty();
    let init = Expr::new(
        ExprKind::Lit(Value::Array(Rc::new(vec![Value::MachineInt(1), Value::MachineInt(2), Value::MachineInt(3)]))),
        ty.clone(),
    );
    let arr_slot = Expr::new(ExprKind::Var(chp_core::ids::VarIdx(0)), ty);
    let body = Rc::new(Stmt::Compound(Rc::from(vec![
        Stmt::Assign { lhs: arr_slot.clone(), rhs: init },
        Stmt::Assign { lhs: var(1, 0, 9), rhs: Expr::new(ExprKind::Index(Box::new(arr_slot), Box::new(lit(index, -10, 10))), Type::Int { lo: 0, hi: 9 }) },
    ])));
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 2, port_vars: Rc::from(vec![]), body };
    vec![main_def]
}

#[test]
fn in_bounds_index_reads_the_expected_element() {
    let (ctx, result) = run_timed("main", build(1));
    result.expect("index within [0, 2] should succeed");
    let main = common::find_process(&ctx, "/");
    assert_eq!(main.variables.borrow()[1], Value::MachineInt(2));
}

#[test]
fn out_of_bounds_index_is_fatal() {
    let (_ctx, result) = run_timed("main", build(5));
    match result {
        Err(CoreError::IndexOutOfBounds { index }) => assert_eq!(index, 5),
        other => panic!("expected IndexOutOfBounds, got {other:?}"),
    }
}

#[test]
fn negative_index_is_also_fatal() {
    let (_ctx, result) = run_timed("main", build(-1));
    match result {
        Err(CoreError::IndexOutOfBounds { index }) => assert_eq!(index, -1),
        other => panic!("expected IndexOutOfBounds, got {other:?}"),
    }
}
