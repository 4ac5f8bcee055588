//! The `DebugHooks` collaborator: a line-oriented debug stub, not a full
//! interactive REPL. It supports just enough surface to make `-C`,
//! `-batch`/`-q`, and the `-trace*`/`-watchall` flags meaningful:
//! a queue of pre-execution commands, an optional per-statement prompt,
//! and unconditional trace-event echoing.

use chp_core::collab::DebugHooks;
use chp_core::context::Context;
use chp_core::error::CoreError;
use chp_core::ids::ControlId;
use std::io::{self, BufRead, Write};

pub struct LineDebugger {
    /// Commands queued by `-C`, drained (and echoed) before the first
    /// prompt; `"run"`/`"continue"` and `"quit"` are the only ones
    /// recognised, matching the scope this stub actually implements.
    pending_commands: Vec<String>,
    /// `-batch`/`-q`: never prompt, never halt; just drain pending
    /// commands (if any) and let the run go to completion.
    batch: bool,
    quiet: bool,
    trace_all: bool,
    watch_all: bool,
    halted_for_quit: bool,
}

impl LineDebugger {
    pub fn new(pending_commands: Vec<String>, batch: bool, quiet: bool, trace_all: bool, watch_all: bool) -> Self {
        Self { pending_commands, batch, quiet, trace_all, watch_all, halted_for_quit: false }
    }

    fn note(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{msg}");
        }
    }

    /// Drains any queued `-C` commands once, returning `true` if one of
    /// them asked to stop the run (`quit`).
    fn drain_pending(&mut self) -> bool {
        for cmd in std::mem::take(&mut self.pending_commands) {
            self.note(&format!("(chp) {cmd}"));
            if cmd.trim() == "quit" {
                return true;
            }
        }
        false
    }

    fn prompt_once(&mut self, ctx: &Context, cid: ControlId) -> bool {
        if let Some(cs) = ctx.controls.get(cid.0) {
            if let Some(p) = ctx.processes.get(cs.process.0) {
                self.note(&format!("stopped in {} at {cid}", p.qualified_name));
            }
        }
        print!("(chp) ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).unwrap_or(0) == 0 {
            return true;
        }
        matches!(line.trim(), "q" | "quit")
    }
}

impl DebugHooks for LineDebugger {
    fn on_statement(&mut self, ctx: &Context, cid: ControlId) -> bool {
        if !self.halted_for_quit && self.drain_pending() {
            self.halted_for_quit = true;
            return true;
        }
        if self.batch {
            return false;
        }
        self.prompt_once(ctx, cid)
    }

    fn on_trace(&mut self, _ctx: &Context, cid: ControlId, event: &str) {
        if self.trace_all || self.watch_all {
            self.note(&format!("trace: {cid} {event}"));
        }
    }

    fn on_error(&mut self, _ctx: &Context, err: &CoreError) {
        self.note(&format!("error: {err}"));
    }
}
