//! Shared AST-construction helpers for the end-to-end scenario tests.
//! There is no CHP parser in this workspace, so every test builds its
//! `ProcessDef`s by hand, the same way `chp-cli`'s `demo.rs` builds its
//! demo programs — duplicated here rather than imported, since `chp-core`
//! cannot depend on its own CLI crate.

#![allow(dead_code)]

use chp_core::ast::{Expr, ExprKind, Type};
use chp_core::context::{init_core, Context};
use chp_core::error::CoreResult;
use chp_core::ids::VarIdx;
use chp_core::instantiate::ProcessDef;
use chp_core::scheduler::SchedulingMode;
use chp_core::value::Value;
use std::rc::Rc;

pub fn int_ty(lo: i64, hi: i64) -> Type {
    Type::Int { lo, hi }
}

pub fn lit(v: i64, lo: i64, hi: i64) -> Expr {
    Expr::new(ExprKind::Lit(Value::MachineInt(v)), int_ty(lo, hi))
}

pub fn var(idx: u32, lo: i64, hi: i64) -> Expr {
    Expr::new(ExprKind::Var(VarIdx(idx)), int_ty(lo, hi))
}

pub fn port_var(idx: u32, data_lo: i64, data_hi: i64) -> Expr {
    Expr::new(ExprKind::Var(VarIdx(idx)), Type::Port(Rc::new(int_ty(data_lo, data_hi))))
}

/// Builds a fresh `Context` in timed (deterministic) mode, registers
/// `defs`, and drives it through `prepare_exec`/`interact_instantiate`/
/// `prepare_chp`/`interact_chp` against `root`. Returns the context (so
/// callers can inspect final variable state) alongside whatever
/// `interact_chp` returned.
pub fn run_timed(root: &str, defs: Vec<ProcessDef>) -> (Context, CoreResult<()>) {
    run_with_mode(root, defs, SchedulingMode::Timed, false, false)
}

pub fn run_with_mode(
    root: &str,
    defs: Vec<ProcessDef>,
    mode: SchedulingMode,
    strict: bool,
    critical_tracking: bool,
) -> (Context, CoreResult<()>) {
    let mut ctx = init_core(mode, strict, critical_tracking, false);
    for def in defs {
        ctx.register_def(def);
    }
    let result = (|| {
        ctx.prepare_exec(root)?;
        ctx.interact_instantiate()?;
        ctx.prepare_chp();
        ctx.interact_chp()
    })();
    (ctx, result)
}

/// Finds the single live process whose qualified name ends with
/// `suffix` (e.g. `"/q"`), for asserting on its final variable state.
pub fn find_process<'a>(ctx: &'a Context, suffix: &str) -> &'a chp_core::process::ProcessState {
    ctx.processes
        .iter()
        .map(|(_, p)| p)
        .find(|p| p.qualified_name.ends_with(suffix))
        .unwrap_or_else(|| panic!("no process with qualified name ending in {suffix:?}"))
}
