//! Process/thread state: the instance-tree node and its per-thread control
//! frames.

use crate::action::Action;
use crate::ast::{ProcArg, Stmt};
use crate::ids::{ControlId, ProcessId, VarIdx, WireExprId};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Thread-count sentinel values.
pub mod thread_count {
    pub const INSTANTIATED_NOT_STARTED: i32 = -1;
    pub const TERMINATED: i32 = -2;
}

/// A process instance's shared variable array. Control states for nested
/// statements share this array with the owning process rather than holding
/// their own copy; `Rc<RefCell<_>>` stands in for a raw shared pointer.
pub type VarArray = Rc<RefCell<Vec<Value>>>;

#[derive(Debug)]
pub struct ProcessState {
    pub qualified_name: Rc<str>,
    pub parent: Option<ProcessId>,
    pub children: Vec<ProcessId>,
    pub process_def: Rc<str>,
    pub meta_params: Vec<Value>,
    pub variables: VarArray,
    pub refcount: u32,
    /// -1 instantiated-not-started, -2 terminated, >=0 live thread count.
    pub thread_count: i32,
    pub suspended_thread_count: u32,
    pub strict_check: Option<crate::interference::SlotTable>,
}

impl ProcessState {
    pub fn new(qualified_name: Rc<str>, parent: Option<ProcessId>, process_def: Rc<str>, var_count: usize) -> Self {
        Self {
            qualified_name,
            parent,
            children: Vec::new(),
            process_def,
            meta_params: Vec::new(),
            variables: Rc::new(RefCell::new(vec![Value::Unassigned; var_count])),
            refcount: 1,
            thread_count: thread_count::INSTANTIATED_NOT_STARTED,
            suspended_thread_count: 0,
            strict_check: None,
        }
    }

    /// A process named `/a/b/c` is a transitive child of the node named
    /// `/a`.
    pub fn is_path_prefix_of(prefix: &str, full: &str) -> bool {
        full == prefix || full.starts_with(&format!("{prefix}/"))
    }

    pub fn is_live(&self) -> bool {
        self.thread_count >= 0
    }

    pub fn is_terminated(&self) -> bool {
        self.thread_count == thread_count::TERMINATED
    }
}

/// Tracks a parallel statement's join: `i` children outstanding, resuming
/// `parent` when it reaches zero.
#[derive(Debug)]
pub struct ParallelJoin {
    pub outstanding: std::cell::Cell<u32>,
    pub parent: ControlId,
}

/// Bookkeeping for a procedure-call frame: pushes a new control-state with a
/// fresh variable array, copies value/valres inputs in, and on pop copies
/// res/valres arguments back out with a range-check. Kept distinct from the
/// general "share the variable array with the owning process" rule, which
/// this more specific case overrides (see DESIGN.md).
#[derive(Debug)]
pub struct ProcReturn {
    pub caller: ControlId,
    pub args: Rc<[ProcArg]>,
}

#[derive(Debug)]
pub struct ControlState {
    pub process: ProcessId,
    /// Statement currently being executed.
    pub current: Rc<Stmt>,
    /// Remaining statements of the enclosing compound, most-imminent last.
    pub residual: Vec<Rc<Stmt>>,
    pub caller: Option<ControlId>,
    /// Join counter this control-state reports to on pop, if it is a
    /// parallel branch.
    pub join: Option<Rc<ParallelJoin>>,
    /// Set if this control-state is a procedure-call frame; drives the
    /// result-parameter copy-out on pop.
    pub proc_return: Option<ProcReturn>,
    /// A procedure call's own fresh variable array, overriding the owning
    /// process's shared array that every other statement kind uses. `None`
    /// for everything but a procedure-call frame.
    pub locals: Option<VarArray>,
    /// Replicator-value stack: `(var, bound value)` pairs, innermost last,
    /// consulted by the evaluator instead of the shared variable array so
    /// concurrent comma-replicated branches never alias the same slot.
    pub replicator_stack: Vec<(VarIdx, i64)>,
    /// Wires this control-state is currently subscribed to while suspended;
    /// empty whenever `suspended` is clear.
    pub deps: Vec<WireExprId>,
    /// Small per-handshake phase counter driving the channel state machine.
    pub comm_phase: u8,
    pub action: Action,
}

impl ControlState {
    pub fn new(process: ProcessId, stmt: Rc<Stmt>, caller: Option<ControlId>, action: Action) -> Self {
        Self {
            process,
            current: stmt,
            residual: Vec::new(),
            caller,
            join: None,
            proc_return: None,
            locals: None,
            replicator_stack: Vec::new(),
            deps: Vec::new(),
            comm_phase: 0,
            action,
        }
    }

    /// Pushes the residual tail of a compound statement so execution can
    /// resume there once `current` completes.
    pub fn push_sequence(&mut self, mut stmts: Vec<Rc<Stmt>>) {
        if stmts.is_empty() {
            return;
        }
        let head = stmts.remove(0);
        stmts.reverse();
        self.residual.extend(stmts);
        self.current = head;
    }

    /// Advances to the next statement in the residual tail, if any.
    pub fn advance(&mut self) -> bool {
        match self.residual.pop() {
            Some(next) => {
                self.current = next;
                true
            }
            None => false,
        }
    }
}
