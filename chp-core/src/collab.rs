//! Trait boundaries for the core's three external collaborators. The core
//! only ever sees these traits; concrete parsers, debuggers, and builtin
//! registries live in whichever driver embeds the core (`chp-cli`'s demo
//! program, line-oriented debug stub, and file-I/O registry, for instance).

use crate::context::Context;
use crate::error::CoreResult;
use crate::ids::ControlId;
use crate::instantiate::ProcessDef;
use crate::value::Value;
use std::rc::Rc;

/// A fully resolved program: every declaration already carries the
/// `var_idx`/`meta_idx` a real lexer/parser would assign, with resolved
/// symbol references and semantic types attached.
pub trait ParsedProgram {
    /// Name of the process definition `prepare_exec` should instantiate as
    /// `/`.
    fn root_def_name(&self) -> &str;
    /// Every process definition the program declares, root included.
    fn process_defs(&self) -> Vec<Rc<ProcessDef>>;
}

/// Per-statement inspection and breakpoint/trace callbacks: the core calls
/// into the attached debugger on breakpoint hit, on trace event, and on
/// error.
pub trait DebugHooks {
    /// Called immediately before `cid`'s current statement dispatches.
    /// Returning `true` halts the scheduler loop before this action runs.
    fn on_statement(&mut self, ctx: &Context, cid: ControlId) -> bool {
        let _ = (ctx, cid);
        false
    }
    /// Called once per named trace event (`-trace`, `-traceall`, `-watchall`).
    fn on_trace(&mut self, ctx: &Context, cid: ControlId, event: &str) {
        let _ = (ctx, cid, event);
    }
    /// Called when `interact_chp` returns an error, before it propagates.
    fn on_error(&mut self, ctx: &Context, err: &crate::error::CoreError) {
        let _ = (ctx, err);
    }
}

/// A registry mapping builtin names to callable closures, consulted during
/// evaluation whenever a builtin is invoked.
pub trait BuiltinRegistry {
    fn call(&self, name: &str, args: &[Value]) -> CoreResult<Value>;
    fn contains(&self, name: &str) -> bool;
}
