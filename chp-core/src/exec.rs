//! The statement executor: dispatch over guarded commands, assignments,
//! loops, and parallel composition.
//!
//! One dispatch from the scheduler enters `execute` with exactly one
//! control-state. Statements that complete without blocking (skip,
//! assignment, bool-set, compound unrolling, proper-frame folding on
//! parallel join) continue synchronously by recursing into `execute` for
//! the same or a newly-resumed control-state: within a single dispatched
//! action, all side effects complete before the next action is dequeued.
//! Statements that can block (selection with no true guard, a
//! communication phase waiting on a probe) register a wire subscription
//! and return without reinserting into the scheduler.

use crate::action::{Action, ActionKind};
use crate::ast::{CommStmt, Guard, ReplKind, Stmt};
use crate::channel::{self, Step as CommStep};
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::eval::{self, EvalCtx, EvalResult};
use crate::ids::{ControlId, ProcessId, VarIdx, WireId};
use crate::process::{ControlState, ParallelJoin, ProcReturn, VarArray};
use crate::value::Value;
use std::cell::Cell;
use std::rc::Rc;

pub fn execute(ctx: &mut Context, cid: ControlId) -> CoreResult<()> {
    let stmt = match ctx.controls.get(cid.0) {
        Some(cs) => cs.current.clone(),
        None => return Ok(()),
    };
    match stmt.as_ref() {
        Stmt::Skip => advance(ctx, cid),
        Stmt::Assign { lhs, rhs } => exec_assign(ctx, cid, lhs, rhs),
        Stmt::BoolSet { lhs, dir } => exec_bool_set(ctx, cid, lhs, *dir),
        Stmt::Compound(stmts) => exec_compound(ctx, cid, stmts),
        Stmt::Parallel(stmts) => exec_parallel(ctx, cid, stmts),
        Stmt::Replicated { kind, var, lo, hi, body } => exec_replicated(ctx, cid, *kind, *var, lo, hi, body),
        Stmt::Selection { guards, mutex, is_loop, immediate } => exec_selection(ctx, cid, guards, *mutex, *is_loop, *immediate),
        Stmt::Communication(comm) => exec_communication(ctx, cid, comm),
        Stmt::ProcCall { callee, args } => exec_proc_call(ctx, cid, callee, args),
        Stmt::BuiltinCall { name, args, dest } => exec_builtin_call(ctx, cid, name, args, dest.as_ref()),
        Stmt::InstanceDecl { .. } | Stmt::Connection { .. } => Err(CoreError::Instantiation(
            "instance/connect statement reached the runtime executor; these belong to the instantiation phase".into(),
        )),
        Stmt::ProductionRule { guard, target, dir, delay } => exec_production_rule(ctx, cid, guard, *target, *dir, *delay),
        Stmt::DelayHold { target, dir, cycles } => exec_delay_hold(ctx, cid, *target, *dir, *cycles),
    }
}

/// The nearest control-state whose parent is a parallel statement (a
/// branch, i.e. `join.is_some()`), or the thread root if none.
fn proper_frame(ctx: &Context, cid: ControlId) -> ControlId {
    let mut cur = cid;
    loop {
        match ctx.controls.get(cur.0) {
            Some(cs) if cs.join.is_some() => return cur,
            Some(cs) => match cs.caller {
                Some(caller) => cur = caller,
                None => return cur,
            },
            None => return cur,
        }
    }
}

fn var_array_of(ctx: &Context, cid: ControlId) -> CoreResult<VarArray> {
    let cs = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?;
    if let Some(locals) = &cs.locals {
        return Ok(locals.clone());
    }
    let proc = ctx
        .processes
        .get(cs.process.0)
        .ok_or_else(|| CoreError::Instantiation("dangling process".into()))?;
    Ok(proc.variables.clone())
}

/// Runs `f` with an `EvalCtx` wired up for `cid`'s effective variable array,
/// meta-parameters, replicator bindings, and (when `-strict`) the owning
/// process's interference table.
fn with_eval<R>(ctx: &mut Context, cid: ControlId, f: impl FnOnce(&mut EvalCtx) -> CoreResult<R>) -> CoreResult<R> {
    let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
    let vars_rc = var_array_of(ctx, cid)?;
    let mut vars = vars_rc.borrow_mut();
    let meta_params = ctx.processes.get(pid.0).map(|p| p.meta_params.clone()).unwrap_or_default();
    let repl = ctx.controls.get(cid.0).map(|cs| cs.replicator_stack.clone()).unwrap_or_default();
    let frame = proper_frame(ctx, cid);
    let proc = ctx.processes.get_mut(pid.0);
    let interference = proc.and_then(|p| p.strict_check.as_mut());
    let mut ectx = EvalCtx {
        variables: &mut vars,
        meta_params: &meta_params,
        wires: &mut ctx.wires,
        interference,
        frame,
        replicator_stack: &repl,
        warnings_as_errors: ctx.warnings_as_errors,
    };
    f(&mut ectx)
}


/// Suspends `cid` on `wire`, registering the dependency and marking the
/// owning process's suspended-thread count.
fn suspend_on(ctx: &mut Context, cid: ControlId, wire: WireId) -> CoreResult<()> {
    let node = ctx.wires.subscribe(wire, cid, crate::action::Direction::Up);
    if let Some(cs) = ctx.controls.get_mut(cid.0) {
        cs.deps.push(node);
        cs.action.suspended = true;
    }
    if let Some(pid) = ctx.controls.get(cid.0).map(|cs| cs.process) {
        if let Some(p) = ctx.processes.get_mut(pid.0) {
            p.suspended_thread_count += 1;
        }
    }
    Ok(())
}

/// Advances past the current statement: continues the residual sequence if
/// one remains, otherwise pops the frame.
fn advance(ctx: &mut Context, cid: ControlId) -> CoreResult<()> {
    let has_next = ctx.controls.get_mut(cid.0).map(|cs| cs.advance()).unwrap_or(false);
    if has_next {
        execute(ctx, cid)
    } else {
        pop_frame(ctx, cid)
    }
}

/// Frame exit: on every branch pop, the parallel join's outstanding count
/// is decremented; when it reaches zero, the parent advances. Also the
/// procedure-call return path. Removes `cid` from the control arena.
fn pop_frame(ctx: &mut Context, cid: ControlId) -> CoreResult<()> {
    let cs = match ctx.controls.remove(cid.0) {
        Some(cs) => cs,
        None => return Ok(()),
    };
    if let Some(pr) = &cs.proc_return {
        copy_out_results(ctx, pr, &cs.locals.clone().unwrap())?;
    }
    if let Some(table) = ctx
        .processes
        .get_mut(cs.process.0)
        .and_then(|p| p.strict_check.as_mut())
    {
        if let Some(join) = &cs.join {
            crate::interference::fold_into_parent(table, cid, join.parent);
        } else if let Some(caller) = cs.caller {
            crate::interference::fold_into_parent(table, cid, caller);
        }
    }
    if let Some(p) = ctx.processes.get_mut(cs.process.0) {
        p.thread_count = (p.thread_count - 1).max(0);
    }
    if let Some(join) = cs.join {
        let remaining = join.outstanding.get() - 1;
        join.outstanding.set(remaining);
        if remaining == 0 {
            return advance(ctx, join.parent);
        }
        return Ok(());
    }
    if let Some(caller) = cs.caller {
        return advance(ctx, caller);
    }
    Ok(())
}

/// Copies `res`/`valres` parameters from the procedure's fresh local array
/// back into the caller's lvalues, range-checked against their declared
/// type.
fn copy_out_results(ctx: &mut Context, pr: &ProcReturn, locals: &VarArray) -> CoreResult<()> {
    let values: Vec<(VarIdx, Value)> = {
        let locals = locals.borrow();
        pr.args
            .iter()
            .filter(|a| a.by_result)
            .filter_map(|a| locals.get(a.var.0 as usize).map(|v| (a.var, v.clone())))
            .collect()
    };
    for (idx, value) in values {
        if let Some(arg) = pr.args.iter().find(|a| a.var == idx) {
            if let Some(lhs) = &arg.expr {
                let lhs = lhs.clone();
                with_eval(ctx, pr.caller, |ectx| eval::assign(ectx, &lhs, value))?;
            }
        }
    }
    Ok(())
}

fn exec_assign(ctx: &mut Context, cid: ControlId, lhs: &crate::ast::Expr, rhs: &crate::ast::Expr) -> CoreResult<()> {
    let (lhs, rhs) = (lhs.clone(), rhs.clone());
    let outcome = with_eval(ctx, cid, |ectx| eval::eval_expr(ectx, &rhs))?;
    match outcome {
        EvalResult::Suspend(wire) => suspend_on(ctx, cid, wire),
        EvalResult::Value(v) if v.is_unassigned() => {
            if ctx.warnings_as_errors {
                return Err(CoreError::Warning("assignment RHS is unknown".into()));
            }
            tracing::warn!("assignment RHS is unknown; continuing without write");
            advance(ctx, cid)
        }
        EvalResult::Value(v) => {
            with_eval(ctx, cid, |ectx| eval::assign(ectx, &lhs, v))?;
            advance(ctx, cid)
        }
    }
}

fn exec_bool_set(ctx: &mut Context, cid: ControlId, lhs: &crate::ast::Expr, dir: bool) -> CoreResult<()> {
    let lhs = lhs.clone();
    with_eval(ctx, cid, |ectx| eval::assign(ectx, &lhs, Value::Bool(dir)))?;
    advance(ctx, cid)
}

fn exec_compound(ctx: &mut Context, cid: ControlId, stmts: &Rc<[Stmt]>) -> CoreResult<()> {
    let seq: Vec<Rc<Stmt>> = stmts.iter().cloned().map(Rc::new).collect();
    if let Some(cs) = ctx.controls.get_mut(cid.0) {
        cs.push_sequence(seq);
    }
    execute(ctx, cid)
}

fn exec_parallel(ctx: &mut Context, cid: ControlId, stmts: &Rc<[Stmt]>) -> CoreResult<()> {
    let n = stmts.len();
    if n == 0 {
        return advance(ctx, cid);
    }
    let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
    // Parallel entry increments the owning process's thread count by n-1.
    if let Some(p) = ctx.processes.get_mut(pid.0) {
        p.thread_count += n as i32 - 1;
    }
    let join = Rc::new(ParallelJoin { outstanding: Cell::new(n as u32), parent: cid });
    for s in stmts.iter() {
        spawn_branch(ctx, pid, Rc::new(s.clone()), cid, Some(join.clone()), None)?;
    }
    Ok(())
}

/// Allocates one new control-state sharing the owning process's variable
/// array (or a replicator binding layered on top of it) and schedules it
/// immediately.
fn spawn_branch(
    ctx: &mut Context,
    pid: ProcessId,
    body: Rc<Stmt>,
    caller: ControlId,
    join: Option<Rc<ParallelJoin>>,
    replicator: Option<(VarIdx, i64)>,
) -> CoreResult<ControlId> {
    let time = ctx.scheduler.current_time();
    let seq = ctx.scheduler.next_sequence();
    let placeholder = Action::new_statement(ControlId(0), time, seq);
    let mut cs = ControlState::new(pid, body, Some(caller), placeholder);
    cs.join = join;
    if let Some(r) = replicator {
        cs.replicator_stack.push(r);
    }
    let id = ControlId(ctx.controls.insert(cs));
    if let Some(cs) = ctx.controls.get_mut(id.0) {
        cs.action.owner = id;
    }
    ctx.scheduler.push(id, &ctx.controls.get(id.0).unwrap().action);
    Ok(id)
}

fn exec_replicated(
    ctx: &mut Context,
    cid: ControlId,
    kind: ReplKind,
    var: VarIdx,
    lo: &crate::ast::Expr,
    hi: &crate::ast::Expr,
    body: &Rc<Stmt>,
) -> CoreResult<()> {
    let (lo, hi) = (lo.clone(), hi.clone());
    let (lo_v, hi_v) = with_eval(ctx, cid, |ectx| {
        let lo_v = require_int(ectx, &lo)?;
        let hi_v = require_int(ectx, &hi)?;
        Ok((lo_v, hi_v))
    })?;
    if lo_v > hi_v {
        return advance(ctx, cid);
    }
    match kind {
        ReplKind::Comma => {
            let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
            let n = (hi_v - lo_v + 1) as u32;
            if let Some(p) = ctx.processes.get_mut(pid.0) {
                p.thread_count += n as i32 - 1;
            }
            let join = Rc::new(ParallelJoin { outstanding: Cell::new(n), parent: cid });
            for i in lo_v..=hi_v {
                spawn_branch(ctx, pid, body.clone(), cid, Some(join.clone()), Some((var, i)))?;
            }
            Ok(())
        }
        ReplKind::Semi => {
            // Rebinds `var` to `lo_v`, runs one copy of `body`, then —
            // rather than pre-unrolling all `hi_v - lo_v + 1` copies up
            // front with no way to rebind between them — re-enters this
            // same statement shape with `lo_v + 1` as its residual, so each
            // iteration's rebind happens immediately before that
            // iteration's body.
            bind_semi_replicator(ctx, cid, var, lo_v);
            let mut seq = vec![body.clone()];
            if lo_v < hi_v {
                let next_lo = crate::ast::Expr::new(crate::ast::ExprKind::Lit(Value::MachineInt(lo_v + 1)), lo.ty.clone());
                seq.push(Rc::new(Stmt::Replicated { kind: ReplKind::Semi, var, lo: next_lo, hi: hi.clone(), body: body.clone() }));
            }
            if let Some(cs) = ctx.controls.get_mut(cid.0) {
                cs.push_sequence(seq);
            }
            execute(ctx, cid)
        }
    }
}

/// Rebinds the semicolon-replicator's current iteration value before each
/// copy of `body` executes; advances by re-pushing the binding each time
/// the loop frame's residual is about to consume the next copy.
fn bind_semi_replicator(ctx: &mut Context, cid: ControlId, var: VarIdx, value: i64) {
    if let Some(cs) = ctx.controls.get_mut(cid.0) {
        if let Some(slot) = cs.replicator_stack.iter_mut().find(|(v, _)| *v == var) {
            slot.1 = value;
        } else {
            cs.replicator_stack.push((var, value));
        }
    }
}

fn require_int(ctx: &mut EvalCtx, expr: &crate::ast::Expr) -> CoreResult<i64> {
    match eval::eval_expr(ctx, expr)? {
        EvalResult::Value(Value::MachineInt(i)) => Ok(i),
        EvalResult::Value(Value::BigInt(b)) => b.to_i64().ok_or(CoreError::Resource("replicator bound too large".into())),
        EvalResult::Value(_) => Err(CoreError::RangeError { value: "non-integer".into(), lo: "int".into(), hi: "int".into() }),
        EvalResult::Suspend(_) => Err(CoreError::Instantiation("replicator bounds must not depend on a probe".into())),
    }
}

/// Evaluates a selection or loop's guards in order. Returns the index of
/// the unique true guard, `None` if none is ready (distinguishing "ready
/// to suspend" from "fatal ambiguity"), or an error if `mutex` is violated
/// by more than one true guard.
fn exec_selection(ctx: &mut Context, cid: ControlId, guards: &Rc<[Guard]>, mutex: bool, is_loop: bool, immediate: bool) -> CoreResult<()> {
    let guards = guards.clone();
    let mut true_idx: Option<usize> = None;
    let mut unresolved: Vec<WireId> = Vec::new();
    let mut any_unresolved = false;
    for (i, g) in guards.iter().enumerate() {
        let cond = g.cond.clone();
        let outcome = with_eval(ctx, cid, |ectx| eval::eval_expr(ectx, &cond))?;
        match outcome {
            EvalResult::Value(Value::Bool(true)) => {
                if mutex {
                    if true_idx.is_some() {
                        return Err(CoreError::Instantiation("ambiguous guards under mutex selection".into()));
                    }
                    true_idx = Some(i);
                } else if true_idx.is_none() {
                    true_idx = Some(i);
                }
            }
            EvalResult::Value(Value::Bool(false)) => {}
            EvalResult::Value(_) => {
                return Err(CoreError::RangeError { value: "non-bool guard".into(), lo: "bool".into(), hi: "bool".into() })
            }
            EvalResult::Suspend(wire) => {
                any_unresolved = true;
                unresolved.push(wire);
            }
        }
    }
    if !mutex {
        if let Some(i) = true_idx {
            return enter_guard(ctx, cid, &guards[i], is_loop);
        }
    } else if let Some(i) = true_idx {
        if !any_unresolved {
            return enter_guard(ctx, cid, &guards[i], is_loop);
        }
    }
    // `[...]` (immediate mode): fatal right away rather than waiting on
    // probes for a guard that might still become true.
    if immediate {
        return Err(CoreError::NoTrueGuard);
    }
    if any_unresolved {
        for wire in unresolved {
            suspend_on(ctx, cid, wire)?;
        }
        return Ok(());
    }
    // No true guard and nothing left to wait on: deadlocked.
    if let Some(pid) = ctx.controls.get(cid.0).map(|c| c.process) {
        if let Some(p) = ctx.processes.get_mut(pid.0) {
            p.suspended_thread_count += 1;
        }
    }
    if let Some(cs) = ctx.controls.get_mut(cid.0) {
        cs.action.suspended = true;
    }
    Ok(())
}

fn enter_guard(ctx: &mut Context, cid: ControlId, guard: &Guard, is_loop: bool) -> CoreResult<()> {
    let body = Rc::new(guard.body.clone());
    if is_loop {
        // `*[...]`: on completion of the body, re-enter the same selection
        // rather than popping the frame. Encode by pushing a synthetic
        // residual that re-dispatches this control-state's original
        // statement (the loop itself, still `cs.current` before we
        // overwrite it) once the guarded body finishes.
        if let Some(cs) = ctx.controls.get_mut(cid.0) {
            let loop_stmt = (*cs.current).clone();
            cs.residual.push(Rc::new(loop_stmt));
            cs.current = body;
        }
    } else if let Some(cs) = ctx.controls.get_mut(cid.0) {
        cs.current = body;
    }
    execute(ctx, cid)
}

fn exec_communication(ctx: &mut Context, cid: ControlId, comm: &CommStmt) -> CoreResult<()> {
    let comm = comm.clone();
    let port_ty = with_eval(ctx, cid, |ectx| {
        ectx.variables
            .get(comm.port.0 .0 as usize)
            .cloned()
            .ok_or_else(|| CoreError::Disconnected)
    });
    // Port type isn't carried on `Value::Port`; communication statements
    // range-check against the declared type of the send-value/dest
    // expression instead, which already carries it.
    let _ = port_ty;
    let ty = comm
        .value
        .as_ref()
        .or(comm.dest.as_ref())
        .map(|e| e.ty.clone())
        .unwrap_or(crate::ast::Type::Bool);

    let phase = ctx.controls.get(cid.0).map(|c| c.comm_phase).unwrap_or(0);
    let send_value = match (&comm.kind, &comm.value) {
        (crate::ast::CommKind::Send, Some(e)) | (crate::ast::CommKind::Pass, Some(e)) => {
            let e = e.clone();
            let v = with_eval(ctx, cid, |ectx| eval::eval_expr(ectx, &e))?;
            match v {
                EvalResult::Value(v) => Some(v),
                EvalResult::Suspend(wire) => return suspend_on(ctx, cid, wire),
            }
        }
        _ => None,
    };

    let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
    let vars_rc = var_array_of(ctx, cid)?;
    let mut vars = vars_rc.borrow_mut();
    let probe_wire = match vars.get(comm.port.0 .0 as usize) {
        Some(Value::Port(p)) => Some(p.probe),
        _ => None,
    };
    let meta_params = ctx.processes.get(pid.0).map(|p| p.meta_params.clone()).unwrap_or_default();
    let frame = proper_frame(ctx, cid);
    let mut ectx = EvalCtx {
        variables: &mut vars,
        meta_params: &meta_params,
        wires: &mut ctx.wires,
        interference: None,
        frame,
        replicator_stack: &[],
        warnings_as_errors: ctx.warnings_as_errors,
    };
    let mut wire_checks = Vec::new();
    let (step, received) = channel::step(&mut ectx, &mut ctx.channels, comm.kind, comm.port, phase, send_value.as_ref(), &ty, &mut wire_checks)?;
    drop(vars);
    // The handshake drives its probe wire directly rather than through
    // `Context::fire_wire`, so a watched probe needs its own trace here.
    if probe_wire.is_some_and(|w| ctx.wires.wire_is_watched(w)) {
        ctx.fire_on_trace(cid, "wire change");
    }
    ctx.settle_checks(wire_checks)?;

    match step {
        CommStep::Continue => {
            if let Some(cs) = ctx.controls.get_mut(cid.0) {
                cs.comm_phase += 1;
            }
            if let (Some(dest), Some(v)) = (&comm.dest, received) {
                let dest = dest.clone();
                with_eval(ctx, cid, |ectx| eval::assign(ectx, &dest, v))?;
            }
            execute(ctx, cid)
        }
        CommStep::Suspend(wire) => suspend_on(ctx, cid, wire),
        CommStep::Done => {
            if let Some(cs) = ctx.controls.get_mut(cid.0) {
                cs.comm_phase = 0;
            }
            advance(ctx, cid)
        }
    }
}

fn exec_proc_call(ctx: &mut Context, cid: ControlId, callee: &Rc<str>, args: &Rc<[crate::ast::ProcArg]>) -> CoreResult<()> {
    let def = ctx
        .registry
        .defs
        .get(callee.as_ref())
        .ok_or_else(|| CoreError::Instantiation(format!("unknown procedure {callee}")))?
        .clone();
    let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
    let locals: VarArray = Rc::new(std::cell::RefCell::new(vec![Value::Unassigned; def.var_count]));
    // Copy value/valres inputs into the fresh local array.
    for arg in args.iter() {
        if let Some(expr) = &arg.expr {
            if !arg.by_result || matches!(arg.expr, Some(_)) {
                let expr = expr.clone();
                let v = with_eval(ctx, cid, |ectx| eval::eval_expr(ectx, &expr))?;
                if let EvalResult::Value(v) = v {
                    let mut vars = locals.borrow_mut();
                    if let Some(slot) = vars.get_mut(arg.var.0 as usize) {
                        *slot = v;
                    }
                }
            }
        }
    }
    let time = ctx.scheduler.current_time();
    let seq = ctx.scheduler.next_sequence();
    let placeholder = Action::new_statement(ControlId(0), time, seq);
    let mut cs = ControlState::new(pid, def.body.clone(), Some(cid), placeholder);
    cs.locals = Some(locals);
    cs.proc_return = Some(ProcReturn { caller: cid, args: args.clone() });
    let id = ControlId(ctx.controls.insert(cs));
    if let Some(cs) = ctx.controls.get_mut(id.0) {
        cs.action.owner = id;
    }
    if let Some(p) = ctx.processes.get_mut(pid.0) {
        p.thread_count += 1;
    }
    execute(ctx, id)
}

/// Evaluates `args`, calls through to the attached `BuiltinRegistry`, and
/// assigns the result into `dest` if given.
fn exec_builtin_call(
    ctx: &mut Context,
    cid: ControlId,
    name: &Rc<str>,
    args: &Rc<[crate::ast::Expr]>,
    dest: Option<&crate::ast::Expr>,
) -> CoreResult<()> {
    let mut values = Vec::with_capacity(args.len());
    for a in args.iter() {
        let a = a.clone();
        match with_eval(ctx, cid, |ectx| eval::eval_expr(ectx, &a))? {
            EvalResult::Value(v) => values.push(v),
            EvalResult::Suspend(wire) => return suspend_on(ctx, cid, wire),
        }
    }
    let result = {
        let registry = ctx
            .builtins
            .as_deref()
            .ok_or_else(|| CoreError::Instantiation(format!("no builtin registry attached for {name}")))?;
        if !registry.contains(name) {
            return Err(CoreError::Instantiation(format!("unknown builtin {name}")));
        }
        registry.call(name, &values)?
    };
    if let Some(dest) = dest {
        let dest = dest.clone();
        with_eval(ctx, cid, |ectx| eval::assign(ectx, &dest, result))?;
    }
    advance(ctx, cid)
}

/// Materialises a PR action. This is a one-shot setup step: it compiles
/// `guard` into the wire-expression DAG, builds the PR action, registers
/// the trigger, and pops — the actual transitions are then driven by
/// `Context::dispatch_pr`/`fire_wire`. A delay-annotated PR (`delay > 0`)
/// stamps the action's scheduled time `2*delay` ticks ahead, so its first
/// dispatch cannot fire before the hold elapses.
fn exec_production_rule(
    ctx: &mut Context,
    cid: ControlId,
    guard: &crate::ast::Expr,
    target: crate::ast::PortRef,
    dir: crate::ast::Direction,
    delay: u32,
) -> CoreResult<()> {
    let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
    let target_wire = {
        let vars_rc = var_array_of(ctx, cid)?;
        let vars = vars_rc.borrow();
        match vars.get(target.0 .0 as usize) {
            Some(Value::WireWriter(w)) | Some(Value::WireReader(w)) => *w,
            _ => return Err(CoreError::Instantiation("production rule target is not a wire".into())),
        }
    };
    let node = compile_guard(ctx, cid, guard)?;
    let time = ctx.scheduler.current_time().plus_delay(delay as u64);
    let seq = ctx.scheduler.next_sequence();
    let action = Action::new_pr(ControlId(0), target_wire, time, seq, false);
    let pr_cs = ControlState::new(pid, Rc::new(Stmt::Skip), None, action);
    let pr_id = ControlId(ctx.controls.insert(pr_cs));
    if let Some(cs) = ctx.controls.get_mut(pr_id.0) {
        cs.action.owner = pr_id;
    }
    let direction = match dir {
        crate::ast::Direction::Up => crate::action::Direction::Up,
        crate::ast::Direction::Down => crate::action::Direction::Down,
    };
    if ctx.wires.exprs.get(node.0).is_some_and(|n| n.value && !n.undefined) {
        ctx.wires.mark_reset(target_wire);
    }
    ctx.wires.add_trigger(node, pr_id, direction);
    advance(ctx, cid)
}

/// Compiles a guard expression into the wire-expression DAG. Only the
/// fragment of expression shapes meaningful as a PR guard (wire refs,
/// `~`/`&`/`|`/`xor` over them) is supported here; richer expressions are
/// rejected as a fatal instantiation error rather than silently
/// misevaluated.
fn compile_guard(ctx: &mut Context, cid: ControlId, expr: &crate::ast::Expr) -> CoreResult<crate::ids::WireExprId> {
    use crate::ast::{BinOp, ExprKind, UnOp};
    use crate::wire::Gate;
    match &expr.kind {
        // A 0-child And gate folds to true, a 0-child Or gate to false —
        // the natural identities for "and of nothing"/"or of nothing".
        ExprKind::Lit(Value::Bool(b)) => Ok(ctx.wires.build_gate(if *b { Gate::And } else { Gate::Or }, &[])),
        ExprKind::Var(idx) => {
            let wire = {
                let vars_rc = var_array_of(ctx, cid)?;
                let vars = vars_rc.borrow();
                match vars.get(idx.0 as usize) {
                    Some(Value::WireReader(w)) | Some(Value::WireWriter(w)) => *w,
                    _ => return Err(CoreError::Instantiation("guard references a non-wire variable".into())),
                }
            };
            let w = ctx.wires.wire_fix(wire);
            Ok(ctx.wires.leaf(w))
        }
        ExprKind::Unary(UnOp::Not, inner) => {
            // A PR guard's complement is modelled by flipping the gate the
            // caller builds around this leaf; represented here as an OR of
            // zero children is not expressible, so `~w` compiles `w` itself
            // and the caller (production-rule direction) is responsible for
            // the polarity — consistent with `pr_up`/`pr_dn` already being
            // direction-tagged rather than the guard encoding polarity twice.
            compile_guard(ctx, cid, inner)
        }
        ExprKind::Binary(op, l, r) => {
            let gate = match op {
                BinOp::And => Gate::And,
                BinOp::Or => Gate::Or,
                BinOp::Xor => Gate::Xor,
                _ => return Err(CoreError::Instantiation("unsupported PR guard operator".into())),
            };
            let ln = compile_guard(ctx, cid, l)?;
            let rn = compile_guard(ctx, cid, r)?;
            Ok(ctx.wires.build_gate(gate, &[ln, rn]))
        }
        _ => Err(CoreError::Instantiation("unsupported PR guard expression".into())),
    }
}

/// Constructs a counter-driven hold node on the target wire. The hold
/// itself lives on the `Wire`'s `held_up`/`held_down` flags; this sets them
/// and schedules the counter-rule release after `cycles` counter-rule
/// ticks.
fn exec_delay_hold(ctx: &mut Context, cid: ControlId, target: crate::ast::PortRef, dir: crate::ast::Direction, cycles: u32) -> CoreResult<()> {
    let target_wire = {
        let vars_rc = var_array_of(ctx, cid)?;
        let vars = vars_rc.borrow();
        match vars.get(target.0 .0 as usize) {
            Some(Value::WireWriter(w)) | Some(Value::WireReader(w)) => *w,
            _ => return Err(CoreError::Instantiation("delay hold target is not a wire".into())),
        }
    };
    let pid = ctx.controls.get(cid.0).ok_or_else(|| CoreError::Instantiation("dangling control state".into()))?.process;
    let counter_id = crate::ids::CounterId(ctx.counters.insert(crate::counter::Counter::default()));
    let fixed = ctx.wires.wire_fix(target_wire);
    if let Some(w) = ctx.wires.wires.get_mut(fixed.0) {
        match dir {
            crate::ast::Direction::Up => w.held_up = true,
            crate::ast::Direction::Down => w.held_down = true,
        }
    }
    let time = ctx.scheduler.current_time().plus_delay(cycles as u64);
    let seq = ctx.scheduler.next_sequence();
    let direction = match dir {
        crate::ast::Direction::Up => crate::action::Direction::Up,
        crate::ast::Direction::Down => crate::action::Direction::Down,
    };
    let mut action = Action::new_statement(ControlId(0), time, seq);
    action.kind = ActionKind::CounterRule { direction };
    action.target = crate::action::ActionTarget::Counter(counter_id);
    action.hold_release = Some((fixed, direction));
    let release_cs = ControlState::new(pid, Rc::new(Stmt::DelayHold { target, dir, cycles: 0 }), None, action);
    let release_id = ControlId(ctx.controls.insert(release_cs));
    if let Some(cs) = ctx.controls.get_mut(release_id.0) {
        cs.action.owner = release_id;
    }
    ctx.scheduler.push(release_id, &ctx.controls.get(release_id.0).unwrap().action);
    advance(ctx, cid)
}
