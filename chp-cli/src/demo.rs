//! Hand-built demo programs implementing `ParsedProgram`.
//!
//! There is no CHP lexer/parser in this workspace; each demo instead
//! builds its `ProcessDef`s directly and self-registers via `inventory`,
//! the same discovery pattern `phosphor-machines` uses for its own
//! machine table.

use chp_core::ast::{CommKind, CommStmt, Expr, ExprKind, Guard, PortRef, ReplKind, Stmt, Type};
use chp_core::collab::ParsedProgram;
use chp_core::ids::VarIdx;
use chp_core::instantiate::ProcessDef;
use chp_core::value::Value;
use std::rc::Rc;

pub struct DemoEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub build: fn() -> DemoProgram,
}

impl DemoEntry {
    pub const fn new(name: &'static str, description: &'static str, build: fn() -> DemoProgram) -> Self {
        Self { name, description, build }
    }
}

inventory::collect!(DemoEntry);

pub fn all() -> Vec<&'static DemoEntry> {
    let mut entries: Vec<_> = inventory::iter::<DemoEntry>.into_iter().collect();
    entries.sort_by_key(|e| e.name);
    entries
}

pub fn find(name: &str) -> Option<&'static DemoEntry> {
    inventory::iter::<DemoEntry>.into_iter().find(|e| e.name == name)
}

pub struct DemoProgram {
    root: &'static str,
    defs: Vec<Rc<ProcessDef>>,
}

impl ParsedProgram for DemoProgram {
    fn root_def_name(&self) -> &str {
        self.root
    }

    fn process_defs(&self) -> Vec<Rc<ProcessDef>> {
        self.defs.clone()
    }
}

fn int_ty(lo: i64, hi: i64) -> Type {
    Type::Int { lo, hi }
}

fn lit(v: i64, lo: i64, hi: i64) -> Expr {
    Expr::new(ExprKind::Lit(Value::MachineInt(v)), int_ty(lo, hi))
}

fn var(idx: u32, lo: i64, hi: i64) -> Expr {
    Expr::new(ExprKind::Var(VarIdx(idx)), int_ty(lo, hi))
}

fn port_var(idx: u32, data_lo: i64, data_hi: i64) -> Expr {
    Expr::new(ExprKind::Var(VarIdx(idx)), Type::Port(Rc::new(int_ty(data_lo, data_hi))))
}

inventory::submit! {
    DemoEntry::new(
        "ring",
        "two processes exchange four (even, odd) pairs over a single channel",
        build_ring,
    )
}

/// `P = *;[i:1..4] ( c!0 ; c!1 )`, `Q = *;[i:1..4] ( c?x ; c?y )`, wired by
/// a channel `main` declares and promotes down to each child as its sole
/// meta-argument (see DESIGN.md's note on `Stmt::Connection`'s
/// single-process scoping).
fn build_ring() -> DemoProgram {
    let p_body = Rc::new(Stmt::Replicated {
        kind: ReplKind::Semi,
        var: VarIdx(1),
        lo: lit(1, 1, 4),
        hi: lit(4, 1, 4),
        body: Rc::new(Stmt::Compound(Rc::from(vec![
            Stmt::Communication(CommStmt { kind: CommKind::Send, port: PortRef(VarIdx(0)), value: Some(lit(0, 0, 1)), dest: None }),
            Stmt::Communication(CommStmt { kind: CommKind::Send, port: PortRef(VarIdx(0)), value: Some(lit(1, 0, 1)), dest: None }),
        ]))),
    });
    let p_def = ProcessDef { name: Rc::from("P"), var_count: 2, port_vars: Rc::from(vec![VarIdx(0)]), body: p_body };

    let q_body = Rc::new(Stmt::Replicated {
        kind: ReplKind::Semi,
        var: VarIdx(1),
        lo: lit(1, 1, 4),
        hi: lit(4, 1, 4),
        body: Rc::new(Stmt::Compound(Rc::from(vec![
            Stmt::Communication(CommStmt { kind: CommKind::Receive, port: PortRef(VarIdx(0)), value: None, dest: Some(var(2, 0, 1)) }),
            Stmt::Communication(CommStmt { kind: CommKind::Receive, port: PortRef(VarIdx(0)), value: None, dest: Some(var(3, 0, 1)) }),
        ]))),
    });
    let q_def = ProcessDef { name: Rc::from("Q"), var_count: 4, port_vars: Rc::from(vec![VarIdx(0)]), body: q_body };

    let main_body = Rc::new(Stmt::Compound(Rc::from(vec![
        Stmt::Connection { a: PortRef(VarIdx(0)), b: PortRef(VarIdx(1)) },
        Stmt::InstanceDecl { name: Rc::from("p"), process_def: Rc::from("P"), meta_args: Rc::from(vec![port_var(0, 0, 1)]) },
        Stmt::InstanceDecl { name: Rc::from("q"), process_def: Rc::from("Q"), meta_args: Rc::from(vec![port_var(1, 0, 1)]) },
    ])));
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 2, port_vars: Rc::from(vec![]), body: main_body };

    DemoProgram { root: "main", defs: vec![Rc::new(main_def), Rc::new(p_def), Rc::new(q_def)] }
}

inventory::submit! {
    DemoEntry::new(
        "overflow",
        "adds 1 to i64::MAX and prints the big-int-promoted result",
        build_overflow,
    )
}

fn build_overflow() -> DemoProgram {
    let sum = Expr::new(
        ExprKind::Binary(chp_core::ast::BinOp::Add, Box::new(lit(i64::MAX, i64::MIN, i64::MAX)), Box::new(lit(1, 0, 1))),
        int_ty(i64::MIN, i64::MAX),
    );
    let body = Rc::new(Stmt::BuiltinCall { name: Rc::from("print"), args: Rc::from(vec![sum]), dest: None });
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 0, port_vars: Rc::from(vec![]), body };
    DemoProgram { root: "main", defs: vec![Rc::new(main_def)] }
}

inventory::submit! {
    DemoEntry::new(
        "deadlock",
        "a selection with no true guard suspends forever and the run reports Deadlock",
        build_deadlock,
    )
}

fn build_deadlock() -> DemoProgram {
    let guard = Guard { cond: Expr::new(ExprKind::Lit(Value::Bool(false)), Type::Bool), body: Stmt::Skip };
    let body = Rc::new(Stmt::Selection { guards: Rc::from(vec![guard]), mutex: true, is_loop: false, immediate: false });
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 0, port_vars: Rc::from(vec![]), body };
    DemoProgram { root: "main", defs: vec![Rc::new(main_def)] }
}

inventory::submit! {
    DemoEntry::new(
        "noguard",
        "a `[...]` immediate-mode selection with no true guard fails fast with NoTrueGuard",
        build_noguard,
    )
}

fn build_noguard() -> DemoProgram {
    let guard = Guard { cond: Expr::new(ExprKind::Lit(Value::Bool(false)), Type::Bool), body: Stmt::Skip };
    let body = Rc::new(Stmt::Selection { guards: Rc::from(vec![guard]), mutex: true, is_loop: false, immediate: true });
    let main_def = ProcessDef { name: Rc::from("main"), var_count: 0, port_vars: Rc::from(vec![]), body };
    DemoProgram { root: "main", defs: vec![Rc::new(main_def)] }
}
