//! The channel handshake state machine.
//!
//! Each communication is a four-phase handshake between a local port `P`
//! and its peer `P'`, driven through the peer's probe wire. `ControlState`
//! holds the small `i` phase counter (`comm_phase`); this module advances
//! it and reports what the statement executor should do next. The shared
//! data slot for a connection lives in a `Channels` arena keyed by
//! `ChannelId` rather than inside either port's value, so a handshake never
//! needs to reach into a peer process's variable array.

use crate::arena::Arena;
use crate::ast::PortRef;
use crate::error::{CoreError, CoreResult};
use crate::eval::{range_check_for_port, EvalCtx};
use crate::ids::ChannelId;
use crate::value::{PortValue, Value};
use crate::wire::PendingCheck;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Channels {
    pub slots: Arena<Option<Value>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_channel(&mut self) -> ChannelId {
        ChannelId(self.slots.insert(None))
    }
}

/// What the statement executor should do after one handshake step.
pub enum Step {
    /// Advance `comm_phase` and retry immediately (probe was already
    /// satisfied, or a local-only flag flip completed).
    Continue,
    /// Suspend, subscribing to the named probe wire.
    Suspend(crate::ids::WireId),
    /// The handshake has fully completed.
    Done,
}

fn port_value(ctx: &EvalCtx, port: PortRef) -> CoreResult<Rc<PortValue>> {
    match ctx.variables.get(port.0 .0 as usize) {
        Some(Value::Port(p)) => Ok(p.clone()),
        _ => Err(CoreError::Disconnected),
    }
}

fn probe_satisfied(ctx: &mut EvalCtx, wire: crate::ids::WireId, want: bool) -> Option<bool> {
    let w = ctx.wires.wire_fix(wire);
    match ctx.wires.wires.get(w.0) {
        Some(w) if w.undefined => None,
        Some(w) => Some(w.value == want),
        None => None,
    }
}

/// Advances a send (`P!e`): `0: wait !pp.probe -> set p.probe, send data ->
/// 1: wait p.probe -> clear p.probe and pp.probe -> done`.
pub fn step_send(
    ctx: &mut EvalCtx,
    channels: &mut Channels,
    port: PortRef,
    phase: u8,
    value: &Value,
    port_ty: &crate::ast::Type,
    checks: &mut Vec<PendingCheck>,
) -> CoreResult<Step> {
    let p = port_value(ctx, port)?;
    let pp_probe = p.peer_probe.ok_or(CoreError::Disconnected)?;
    match phase {
        0 => match probe_satisfied(ctx, pp_probe, false) {
            Some(true) => {
                let checked = range_check_for_port(value, port_ty)?;
                checks.extend(ctx.wires.write_wire(p.probe, true)?);
                if let Some(chan) = p.channel {
                    if let Some(slot) = channels.slots.get_mut(chan.0) {
                        *slot = Some(checked);
                    }
                }
                Ok(Step::Continue)
            }
            _ => Ok(Step::Suspend(pp_probe)),
        },
        1 => match probe_satisfied(ctx, p.probe, false) {
            Some(true) => Ok(Step::Done),
            _ => {
                checks.extend(ctx.wires.write_wire(p.probe, false)?);
                Ok(Step::Suspend(p.probe))
            }
        },
        _ => Ok(Step::Done),
    }
}

/// Reconstructs a raw handshake value against the receiving lvalue's
/// declared type: for a bounded-integer destination, the lower bound
/// anchors sign-extension and the bits are taken modulo the type's width
/// rather than faulted on out-of-range, per the handshake's data-transfer
/// semantics. Non-integer destinations pass the value through untouched.
fn reconstruct_for_receive(raw: &Value, dest_ty: &crate::ast::Type) -> CoreResult<Value> {
    match dest_ty {
        crate::ast::Type::Int { lo, hi } => raw.reconstruct_bounded(*lo, *hi),
        _ => Ok(raw.clone()),
    }
}

/// Receive (`P?x`), symmetric to send: consumes the peer's pending data.
/// `clear` is false for peek, which leaves the data slot intact.
pub fn step_receive(
    ctx: &mut EvalCtx,
    channels: &mut Channels,
    port: PortRef,
    phase: u8,
    clear: bool,
    dest_ty: &crate::ast::Type,
    checks: &mut Vec<PendingCheck>,
) -> CoreResult<(Step, Option<Value>)> {
    let p = port_value(ctx, port)?;
    let pp_probe = p.peer_probe.ok_or(CoreError::Disconnected)?;
    match phase {
        0 => match probe_satisfied(ctx, pp_probe, true) {
            Some(true) => {
                let raw = p
                    .channel
                    .and_then(|chan| channels.slots.get(chan.0).cloned())
                    .flatten()
                    .unwrap_or(Value::Unassigned);
                let v = if raw.is_unassigned() { raw } else { reconstruct_for_receive(&raw, dest_ty)? };
                if clear {
                    if let Some(chan) = p.channel {
                        if let Some(slot) = channels.slots.get_mut(chan.0) {
                            *slot = None;
                        }
                    }
                }
                checks.extend(ctx.wires.write_wire(p.probe, true)?);
                Ok((Step::Continue, Some(v)))
            }
            _ => Ok((Step::Suspend(pp_probe), None)),
        },
        1 => {
            checks.extend(ctx.wires.write_wire(p.probe, false)?);
            Ok((Step::Done, None))
        }
        _ => Ok((Step::Done, None)),
    }
}

/// Drives one phase of any communication kind; `Pass` composes a
/// concurrent send+receive proxy over the same four states.
pub fn step(
    ctx: &mut EvalCtx,
    channels: &mut Channels,
    kind: crate::ast::CommKind,
    port: PortRef,
    phase: u8,
    send_value: Option<&Value>,
    port_ty: &crate::ast::Type,
    checks: &mut Vec<PendingCheck>,
) -> CoreResult<(Step, Option<Value>)> {
    use crate::ast::CommKind::*;
    match kind {
        Send => {
            let v = send_value.cloned().unwrap_or(Value::Unassigned);
            let s = step_send(ctx, channels, port, phase, &v, port_ty, checks)?;
            Ok((s, None))
        }
        Receive => step_receive(ctx, channels, port, phase, true, port_ty, checks),
        Peek => step_receive(ctx, channels, port, phase, false, port_ty, checks),
        Pass => {
            // Four-state composition: phases 0-1 behave like receive into a
            // staging slot, phases 2-3 like send of the staged value.
            if phase < 2 {
                step_receive(ctx, channels, port, phase, true, port_ty, checks)
            } else {
                let v = send_value.cloned().unwrap_or(Value::Unassigned);
                let s = step_send(ctx, channels, port, phase - 2, &v, port_ty, checks)?;
                Ok((s, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CommKind, Type};
    use crate::ids::{ControlId, ProcessId};
    use crate::wire::WireNetwork;

    fn connect(wires: &mut WireNetwork, channels: &mut Channels) -> (PortValue, PortValue) {
        let wa = wires.new_wire();
        let wb = wires.new_wire();
        wires.write_wire(wa, false).unwrap();
        wires.write_wire(wb, false).unwrap();
        let chan = channels.new_channel();
        let a = PortValue { probe: wa, peer_probe: Some(wb), channel: Some(chan), owning_process: ProcessId(0), decomp: Rc::from(vec![]) };
        let b = PortValue { probe: wb, peer_probe: Some(wa), channel: Some(chan), owning_process: ProcessId(1), decomp: Rc::from(vec![]) };
        (a, b)
    }

    #[test]
    fn send_then_receive_completes_one_handshake() {
        let mut wires = WireNetwork::new();
        let mut channels = Channels::new();
        let (a, b) = connect(&mut wires, &mut channels);
        let mut vars = vec![Value::Port(Rc::new(a)), Value::Port(Rc::new(b))];
        let mut c = EvalCtx { variables: &mut vars, meta_params: &[], wires: &mut wires, interference: None, frame: ControlId(0), replicator_stack: &[], warnings_as_errors: false };
        let ty = Type::Int { lo: 0, hi: 100 };
        let port_a = PortRef(crate::ids::VarIdx(0));
        let (s, _) = step(&mut c, &mut channels, CommKind::Send, port_a, 0, Some(&Value::MachineInt(42)), &ty, &mut Vec::new()).unwrap();
        assert!(matches!(s, Step::Continue));
        let port_b = PortRef(crate::ids::VarIdx(1));
        let (s2, v) = step(&mut c, &mut channels, CommKind::Receive, port_b, 0, None, &ty, &mut Vec::new()).unwrap();
        assert!(matches!(s2, Step::Continue));
        assert_eq!(v, Some(Value::MachineInt(42)));
    }

    #[test]
    fn peek_does_not_clear_data() {
        let mut wires = WireNetwork::new();
        let mut channels = Channels::new();
        let (a, b) = connect(&mut wires, &mut channels);
        let probe_a = a.probe;
        let mut vars = vec![Value::Port(Rc::new(a)), Value::Port(Rc::new(b))];
        let mut c = EvalCtx { variables: &mut vars, meta_params: &[], wires: &mut wires, interference: None, frame: ControlId(0), replicator_stack: &[], warnings_as_errors: false };
        let ty = Type::Int { lo: 0, hi: 100 };
        let port_a = PortRef(crate::ids::VarIdx(0));
        step(&mut c, &mut channels, CommKind::Send, port_a, 0, Some(&Value::MachineInt(7)), &ty, &mut Vec::new()).unwrap();
        let port_b = PortRef(crate::ids::VarIdx(1));
        let (_s, v1) = step(&mut c, &mut channels, CommKind::Peek, port_b, 0, None, &ty, &mut Vec::new()).unwrap();
        assert_eq!(v1, Some(Value::MachineInt(7)));
        // Re-assert the peer probe so a second read sees the same data.
        c.wires.write_wire(probe_a, true).ok();
        let (_s2, v2) = step(&mut c, &mut channels, CommKind::Receive, port_b, 0, None, &ty, &mut Vec::new()).unwrap();
        assert_eq!(v2, Some(Value::MachineInt(7)));
    }
}
