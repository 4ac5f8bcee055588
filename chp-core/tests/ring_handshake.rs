//! Two replicated processes exchange four (0, 1) pairs over a
//! single channel, wired by `main` promoting one of its own port slots
//! down to each child. Mirrors `chp-cli`'s `"ring"` demo, built directly
//! against `ProcessDef` instead of through the `ParsedProgram` collaborator.

mod common;

use chp_core::ast::{CommKind, CommStmt, PortRef, ReplKind, Stmt};
use chp_core::ids::VarIdx;
use chp_core::instantiate::ProcessDef;
use chp_core::value::Value;
use common::{lit, port_var, run_timed, var};
use std::rc::Rc;

fn build() -> Vec<ProcessDef> {
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

    vec![main_def, p_def, q_def]
}

#[test]
fn four_round_handshake_runs_to_completion() {
    let (ctx, result) = run_timed("main", build());
    result.expect("ring handshake should run to completion without deadlock");

    // Every `P` send lands as the matching `Q` receive: the loop's last
    // iteration sends (0, 1), so that's what `Q`'s destination slots hold
    // once the run settles.
    let q = common::find_process(&ctx, "/q");
    let vars = q.variables.borrow();
    assert_eq!(vars[2], Value::MachineInt(0));
    assert_eq!(vars[3], Value::MachineInt(1));
}

#[test]
fn both_threads_terminate_with_no_suspended_threads_left() {
    let (ctx, result) = run_timed("main", build());
    result.expect("ring handshake should run to completion without deadlock");

    let suspended: u32 = ctx.processes.iter().map(|(_, p)| p.suspended_thread_count).sum();
    assert_eq!(suspended, 0);
}
