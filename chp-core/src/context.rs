//! The execution context: owns every arena and exposes the top-level API
//! consumed by the CLI driver.

use crate::action::{Action, ActionKind, ScheduleTime};
use crate::arena::Arena;
use crate::ast::Stmt;
use crate::channel::Channels;
use crate::counter::Counter;
use crate::collab::{BuiltinRegistry, DebugHooks};
use crate::critical::CriticalNode;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ControlId, CounterId, ProcessId};
use crate::instantiate::{self, ProcessDef, Registry};
use crate::process::{ControlState, ProcessState};
use crate::scheduler::{Scheduler, SchedulingMode};
use crate::wire::WireNetwork;
use std::rc::Rc;

pub struct Context {
    pub processes: Arena<ProcessState>,
    pub controls: Arena<ControlState>,
    pub wires: WireNetwork,
    pub channels: Channels,
    pub counters: Arena<Counter>,
    pub scheduler: Scheduler,
    pub registry: Registry,
    pub strict: bool,
    pub critical_tracking: bool,
    /// Causal chain recorded when `critical_tracking` is set; empty
    /// otherwise.
    pub critical: Arena<CriticalNode>,
    pub root: Option<ProcessId>,
    /// Set once the scheduler drains with live suspensions.
    pub deadlock: Option<usize>,
    /// Set when a statement action raises a `CoreError`; the core
    /// transitions to a quiescent error state the debugger may inspect
    /// instead of unwinding the whole process.
    pub error: Option<CoreError>,
    /// Runtime bodies produced by `interact_instantiate`, not yet folded
    /// into live threads by `prepare_chp`.
    pending_bodies: Vec<(ProcessId, Rc<Stmt>)>,
    /// Debugger collaborator; absent for headless/batch runs.
    pub debug: Option<Box<dyn DebugHooks>>,
    /// Set by `DebugHooks::on_statement` returning `true`; `interact_chp`
    /// checks this before each dispatch and returns early without popping
    /// the halting action, so a later call resumes right where it left off.
    pub halted: bool,
    /// I/O builtin collaborator; absent when the embedding program
    /// declares no builtins.
    pub builtins: Option<Box<dyn BuiltinRegistry>>,
    /// When set, conditions the evaluator would otherwise log and continue
    /// past (an unassigned read, an unknown assignment RHS) instead raise
    /// `CoreError::Warning` and abort the dispatch that triggered them.
    pub warnings_as_errors: bool,
    /// The critical node of the action currently being dispatched, if any;
    /// used as the `cause` link for any critical node recorded while
    /// handling its effects, so the chain can be walked back breadcrumb by
    /// breadcrumb.
    current_critical: Option<crate::ids::CriticalNodeId>,
}

/// `init_core()`: allocates the scheduler, property store, and hash tables.
pub fn init_core(mode: SchedulingMode, strict: bool, critical_tracking: bool, warnings_as_errors: bool) -> Context {
    Context {
        processes: Arena::new(),
        controls: Arena::new(),
        wires: WireNetwork::new(),
        channels: Channels::new(),
        counters: Arena::new(),
        scheduler: Scheduler::new(mode),
        registry: Registry::new(),
        strict,
        critical_tracking,
        critical: Arena::new(),
        root: None,
        deadlock: None,
        error: None,
        pending_bodies: Vec::new(),
        debug: None,
        halted: false,
        builtins: None,
        warnings_as_errors,
        current_critical: None,
    }
}

impl Context {
    pub fn register_def(&mut self, def: ProcessDef) {
        self.registry.register(def);
    }

    pub fn set_debug_hooks(&mut self, hooks: Box<dyn DebugHooks>) {
        self.debug = Some(hooks);
    }

    pub fn set_builtins(&mut self, registry: Box<dyn BuiltinRegistry>) {
        self.builtins = Some(registry);
    }

    /// `-watchall`: marks every wire (present and future) watched, so
    /// `fire_wire` and channel-handshake probe writes surface a trace event
    /// on every change instead of only named ones.
    pub fn enable_watch_all(&mut self) {
        self.wires.set_watch_all();
    }

    /// `prepare_exec(root_def)`: creates the top-level process state named
    /// `/`.
    pub fn prepare_exec(&mut self, root_def_name: &str) -> CoreResult<ProcessId> {
        let def = self
            .registry
            .defs
            .get(root_def_name)
            .ok_or_else(|| CoreError::Instantiation(format!("unknown root process {root_def_name}")))?
            .clone();
        let mut state = ProcessState::new(Rc::from("/"), None, def.name.clone(), def.var_count);
        if self.strict {
            state.strict_check = Some(Default::default());
        }
        let id = ProcessId(self.processes.insert(state));
        self.root = Some(id);
        Ok(id)
    }

    /// `interact_instantiate(ctx)`: runs the instantiation phase. Walks the
    /// root's body executing `instance`/`connect` statements; every other
    /// statement becomes the residual CHP/HSE/PRS body queued for the
    /// execution phase.
    pub fn interact_instantiate(&mut self) -> CoreResult<()> {
        let root = self.root.ok_or_else(|| CoreError::Instantiation("prepare_exec not called".into()))?;
        let def = {
            let state = self.processes.get(root.0).unwrap();
            self.registry.defs.get(&state.process_def).unwrap().clone()
        };
        let runtime_body = self.run_instantiation_stmt(root, "/", &def.body)?;
        instantiate::verify_ports_wired(self.processes.get(root.0).unwrap(), &def.port_vars)?;
        if let Some(body) = runtime_body {
            self.pending_bodies.push((root, body));
        }
        Ok(())
    }

    /// Recurses through a meta body executing instantiation-time
    /// statements; returns the accumulated runtime (non-instantiation)
    /// statements as a `Compound`, if any.
    fn run_instantiation_stmt(&mut self, process: ProcessId, path: &str, stmt: &Rc<Stmt>) -> CoreResult<Option<Rc<Stmt>>> {
        match stmt.as_ref() {
            Stmt::Compound(stmts) => {
                let mut residual = Vec::new();
                for s in stmts.iter() {
                    if let Some(r) = self.run_instantiation_stmt(process, path, &Rc::new(s.clone()))? {
                        residual.push((*r).clone());
                    }
                }
                if residual.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Rc::new(Stmt::Compound(residual.into()))))
                }
            }
            Stmt::InstanceDecl { name, process_def, meta_args } => {
                let mut vals = Vec::with_capacity(meta_args.len());
                for e in meta_args.iter() {
                    vals.push(self.eval_meta_arg(process, e)?);
                }
                let child = instantiate::build_instance(&mut self.processes, &self.registry, process, path, name, process_def, vals.clone())?;
                // Install each evaluated meta-argument into the child's own
                // variable array at the same position: the convention this
                // core uses to promote a port through the call path without
                // a dedicated formal-parameter binding pass.
                if let Some(child_state) = self.processes.get(child.0) {
                    let mut child_vars = child_state.variables.borrow_mut();
                    for (i, v) in vals.into_iter().enumerate() {
                        if let Some(slot) = child_vars.get_mut(i) {
                            *slot = v;
                        }
                    }
                }
                let def = self
                    .registry
                    .defs
                    .get(process_def)
                    .ok_or_else(|| CoreError::Instantiation(format!("unknown process definition {process_def}")))?
                    .clone();
                let child_path = self.processes.get(child.0).unwrap().qualified_name.clone();
                let residual = self.run_instantiation_stmt(child, child_path.as_ref(), &def.body)?;
                instantiate::verify_ports_wired(self.processes.get(child.0).unwrap(), &def.port_vars)?;
                if let Some(body) = residual {
                    self.pending_bodies.push((child, body));
                }
                Ok(None)
            }
            Stmt::Connection { a, b } => {
                instantiate::connect_ports(&mut self.processes, &mut self.wires, &mut self.channels, process, *a, process, *b)?;
                Ok(None)
            }
            other => Ok(Some(Rc::new(other.clone()))),
        }
    }

    /// Evaluates an `instance`'s meta-argument expression in the
    /// instantiating process's own variable scope (there is no
    /// `ControlState` yet for the child, so this runs outside the usual
    /// dispatch path).
    fn eval_meta_arg(&mut self, process: ProcessId, expr: &crate::ast::Expr) -> CoreResult<crate::value::Value> {
        let state = self.processes.get(process.0).ok_or_else(|| CoreError::Instantiation("dangling process".into()))?;
        let vars_rc = state.variables.clone();
        let meta_params = state.meta_params.clone();
        let mut vars = vars_rc.borrow_mut();
        let mut ectx = crate::eval::EvalCtx {
            variables: &mut vars,
            meta_params: &meta_params,
            wires: &mut self.wires,
            interference: None,
            frame: ControlId(0),
            replicator_stack: &[],
            warnings_as_errors: self.warnings_as_errors,
        };
        match crate::eval::eval_expr(&mut ectx, expr)? {
            crate::eval::EvalResult::Value(v) => Ok(v),
            crate::eval::EvalResult::Suspend(_) => Err(CoreError::Instantiation("meta-argument must not depend on an unresolved probe".into())),
        }
    }

    /// `prepare_chp(ctx)`: folds meta bodies into chp/hse/prs — queues
    /// each pending runtime body as a fresh thread on the scheduler's
    /// waiting list, promoted onto the ready heap as soon as it drains.
    pub fn prepare_chp(&mut self) {
        let pending = std::mem::take(&mut self.pending_bodies);
        for (process, body) in pending {
            self.spawn_thread(process, body, None);
        }
    }

    /// Creates a fresh thread and parks it on the scheduler's waiting list
    /// rather than the ready heap directly; `interact_chp`'s loop promotes
    /// waiting entries once the heap empties (spec step 1 of the scheduler
    /// algorithm).
    pub fn spawn_thread(&mut self, process: ProcessId, body: Rc<Stmt>, caller: Option<ControlId>) -> ControlId {
        let seq = self.scheduler.next_sequence();
        let time = self.scheduler.current_time();
        let placeholder = Action::new_statement(ControlId(0), time, seq);
        let cs = ControlState::new(process, body, caller, placeholder);
        let id = ControlId(self.controls.insert(cs));
        if let Some(cs) = self.controls.get_mut(id.0) {
            cs.action.owner = id;
        }
        if let Some(p) = self.processes.get_mut(process.0) {
            if p.thread_count < 0 {
                p.thread_count = 1;
            } else {
                p.thread_count += 1;
            }
        }
        self.scheduler.push_waiting(id);
        id
    }

    /// `interact_chp(ctx)`: runs the execution phase to completion or
    /// deadlock.
    pub fn interact_chp(&mut self) -> CoreResult<()> {
        self.halted = false;
        loop {
            let Some(cid) = self.scheduler.peek() else {
                return self.finish_or_deadlock();
            };
            if self.fire_on_statement(cid) {
                self.halted = true;
                return Ok(());
            }
            let cid = self.scheduler.pop().expect("peeked action still present");
            if let Err(e) = self.dispatch_one(cid) {
                self.error = Some(e.clone());
                self.fire_on_error(&e);
                return Err(e);
            }
        }
    }

    /// Invokes `DebugHooks::on_statement` around the self-borrow it needs;
    /// no-op (never halts) when no debugger is attached.
    fn fire_on_statement(&mut self, cid: ControlId) -> bool {
        let Some(mut hooks) = self.debug.take() else {
            return false;
        };
        let halt = hooks.on_statement(self, cid);
        self.debug = Some(hooks);
        halt
    }

    fn fire_on_error(&mut self, err: &CoreError) {
        let Some(mut hooks) = self.debug.take() else {
            return;
        };
        hooks.on_error(self, err);
        self.debug = Some(hooks);
    }

    /// Invoked by callers that want a named trace event surfaced through
    /// the attached debugger (`-trace`/`-traceall`/`-watchall`).
    pub fn fire_on_trace(&mut self, cid: ControlId, event: &str) {
        let Some(mut hooks) = self.debug.take() else {
            return;
        };
        hooks.on_trace(self, cid, event);
        self.debug = Some(hooks);
    }

    fn finish_or_deadlock(&mut self) -> CoreResult<()> {
        let suspended: usize = self.processes.iter().map(|(_, p)| p.suspended_thread_count as usize).sum();
        if suspended > 0 {
            self.deadlock = Some(suspended);
            let thread = self
                .controls
                .iter()
                .find(|(_, c)| c.action.suspended)
                .map(|(idx, _)| ControlId(idx))
                .expect("suspended count is positive, so at least one control-state is suspended");
            return Err(CoreError::Deadlock { suspended, thread });
        }
        Ok(())
    }

    fn dispatch_one(&mut self, cid: ControlId) -> CoreResult<()> {
        let was_suspended = self.controls.get(cid.0).map(|c| c.action.suspended).unwrap_or(false);
        if was_suspended {
            if let Some(cs) = self.controls.get_mut(cid.0) {
                cs.deps.clear();
                cs.action.suspended = false;
            }
        }
        self.current_critical = self.controls.get(cid.0).and_then(|c| c.action.critical);
        if let Some(cs) = self.controls.get_mut(cid.0) {
            cs.action.clear_critical();
        }
        let kind = self.controls.get(cid.0).map(|c| c.action.kind.clone());
        match kind {
            Some(ActionKind::Statement) => crate::exec::execute(self, cid),
            Some(ActionKind::ProductionRule { pr_up, pr_dn, .. }) => self.dispatch_pr(cid, pr_up, pr_dn),
            Some(ActionKind::CounterRule { direction }) => self.dispatch_counter(cid, direction),
            Some(ActionKind::DelayResume) => crate::exec::execute(self, cid),
            None => Ok(()),
        }
    }

    fn dispatch_pr(&mut self, cid: ControlId, pr_up: bool, pr_dn: bool) -> CoreResult<()> {
        if !pr_up && !pr_dn {
            return Ok(());
        }
        let target = self.controls.get(cid.0).and_then(|c| match c.action.target {
            crate::action::ActionTarget::Wire(w) => Some(w),
            _ => None,
        });
        if let Some(wire) = target {
            self.fire_wire(cid, wire, pr_up)?;
        }
        Ok(())
    }

    fn dispatch_counter(&mut self, cid: ControlId, direction: crate::action::Direction) -> CoreResult<()> {
        let (target, hold_release) =
            self.controls.get(cid.0).map(|c| (c.action.target, c.action.hold_release)).unwrap_or((crate::action::ActionTarget::None, None));
        let counter_id = match target {
            crate::action::ActionTarget::Counter(c) => Some(c),
            _ => None,
        };
        if let Some(counter_id) = counter_id {
            if let Some(counter) = self.counters.get_mut(counter_id.0) {
                crate::counter::update_counter(counter, direction)?;
            }
        }
        if let Some((wire, dir)) = hold_release {
            if let Some(pending) = self.wires.release_hold(wire, dir) {
                self.fire_wire(cid, wire, pending)?;
            }
        }
        Ok(())
    }

    /// `write_wire` plus `run_checks`, looping until the wave settles. Any
    /// interference/instability aborts the whole dispatch. `owner` is the
    /// control-state whose dispatch drove this write, attributed to a
    /// `-watchall` trace event when the wire is marked watched.
    pub fn fire_wire(&mut self, owner: ControlId, wire: crate::ids::WireId, value: bool) -> CoreResult<()> {
        let checks = self.wires.write_wire(wire, value)?;
        if self.wires.wire_is_watched(wire) {
            self.fire_on_trace(owner, "wire change");
        }
        self.settle_checks_caused_by(checks, Some(wire))
    }

    /// Runs the PR two-phase commit and wakes any suspended control-states
    /// named by `checks` (the back half of `fire_wire`, factored out so
    /// statement-level wire writes that already called `write_wire`
    /// directly — the channel handshake's probe sets — can settle their own
    /// checks without writing the wire a second time).
    pub(crate) fn settle_checks(&mut self, checks: Vec<crate::wire::PendingCheck>) -> CoreResult<()> {
        self.settle_checks_caused_by(checks, None)
    }

    fn settle_checks_caused_by(&mut self, checks: Vec<crate::wire::PendingCheck>, cause_wire: Option<crate::ids::WireId>) -> CoreResult<()> {
        let outcomes = {
            let controls = &mut self.controls;
            self.wires.run_checks(
                &checks,
                &mut |id: crate::ids::ActionId| &mut controls.get_mut(id.0).unwrap().action,
                |id| format!("action#{}", id.0),
            )?
        };
        for (action_id, up) in outcomes {
            self.fire_wire_for_action(action_id, up)?;
        }
        self.wake_suspended(&checks, cause_wire);
        Ok(())
    }

    /// Records a causal link for `owner` when `critical_tracking` is on,
    /// threading it onto the woken action's breadcrumb. `cause` links back
    /// to the critical node of the action whose dispatch is waking `owner`,
    /// letting the chain be walked backward after the fact.
    fn record_critical(&mut self, owner: ControlId, wire: Option<crate::ids::WireId>) -> Option<crate::ids::CriticalNodeId> {
        if !self.critical_tracking {
            return None;
        }
        let time = self.scheduler.current_time();
        let cause = self.current_critical;
        let id = crate::ids::CriticalNodeId(self.critical.insert(CriticalNode { owner, wire, time, cause }));
        Some(id)
    }

    fn fire_wire_for_action(&mut self, action_id: crate::ids::ActionId, up: bool) -> CoreResult<()> {
        let target = self.controls.get(action_id.0).and_then(|c| match c.action.target {
            crate::action::ActionTarget::Wire(w) => Some(w),
            _ => None,
        });
        if let Some(w) = target {
            self.fire_wire(action_id, w, up)?;
        }
        Ok(())
    }

    /// Resumes any control-state whose dependency list intersects the
    /// wires touched by this write, scheduling the resulting transition.
    fn wake_suspended(&mut self, checks: &[crate::wire::PendingCheck], cause_wire: Option<crate::ids::WireId>) {
        let touched: Vec<_> = checks.iter().map(|c| c.action).collect();
        for id in touched {
            let ready = self.controls.get(id.0).map(|c| c.action.suspended).unwrap_or(false);
            if ready {
                let time = self.scheduler.current_time();
                let seq = self.scheduler.next_sequence();
                let critical = self.record_critical(id, cause_wire);
                if let Some(cs) = self.controls.get_mut(id.0) {
                    cs.action.scheduled_time = time;
                    cs.action.sequence = seq;
                    cs.action.critical = critical;
                }
                self.scheduler.push(id, &self.controls.get(id.0).unwrap().action);
                if let Some(p) = self.controls.get(id.0).map(|c| c.process) {
                    if let Some(proc) = self.processes.get_mut(p.0) {
                        proc.suspended_thread_count = proc.suspended_thread_count.saturating_sub(1);
                    }
                }
            }
        }
    }

    /// `term_exec(ctx)`: releases all resources. Arenas drop with the
    /// context; this exists as the documented call site.
    pub fn term_exec(self) {
        drop(self);
    }
}
