//! A selection with no true guard behaves differently depending on
//! `immediate`. The ordinary form subscribes and
//! suspends — the run drains with a live thread and reports
//! `CoreError::Deadlock`. The immediate (`[...]`) form fails fast with
//! `CoreError::NoTrueGuard` instead of ever suspending.

mod common;

use chp_core::ast::{Guard, Stmt, Type};
use chp_core::error::CoreError;
use chp_core::instantiate::ProcessDef;
use chp_core::value::Value;
use common::run_timed;
use std::rc::Rc;

fn build(immediate: bool) -> Vec<ProcessDef> {
    let guard = Guard {
        cond: chp_core::ast::Expr::new(chp_core::ast::ExprKind::Lit(Value::Bool(false)), Type::Bool),
        body: Stmt::Skip,
    };
    let body = Rc::new(Stmt::Selection { guards: Rc::from(vec![guard]), mutex: true, is_loop: false, immediate });
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 0, port_vars: Rc::from(vec![]), body };
    vec![main_def]
}

#[test]
fn normal_mode_suspends_and_the_run_deadlocks() {
    let (_ctx, result) = run_timed("main", build(false));
    match result {
        Err(CoreError::Deadlock { suspended, .. }) => assert_eq!(suspended, 1),
        other => panic!("expected Deadlock, got {other:?}"),
    }
}

#[test]
fn immediate_mode_fails_fast_without_ever_suspending() {
    let (ctx, result) = run_timed("main", build(true));
    match result {
        Err(CoreError::NoTrueGuard) => {}
        other => panic!("expected NoTrueGuard, got {other:?}"),
    }
    let suspended: u32 = ctx.processes.iter().map(|(_, p)| p.suspended_thread_count).sum();
    assert_eq!(suspended, 0, "immediate-mode selection must never subscribe/suspend");
}
