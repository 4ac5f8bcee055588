//! Wires and the wire-expression propagation network.

mod expr;
pub use expr::{Gate, WireExpr};

use crate::action::Direction;
use crate::arena::Arena;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ActionId, ControlId, WireExprId, WireId};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Wire {
    pub value: bool,
    pub undefined: bool,
    pub forward: Option<WireId>,
    pub has_writer: bool,
    pub writer: Option<ControlId>,
    pub is_probe: bool,
    pub held_up: bool,
    pub held_down: bool,
    /// A transition arrived while the opposing hold was active and is
    /// stashed in `pending_write`, waiting on the hold's release.
    pub wait: bool,
    /// Report every transition of this wire to the debugger, independent of
    /// `-watchall`.
    pub watch: bool,
    /// Set on a production-rule's target wire when the rule's guard was
    /// already satisfied at the moment the rule was set up, rather than
    /// becoming true only on a later transition.
    pub reset: bool,
    /// Leaf wire-expression nodes subscribed to this wire's value.
    pub dependents: Vec<WireExprId>,
    /// A write that arrived while a hold in the opposing direction was
    /// active; flushed once the hold's release clears the blocking flag.
    /// Later writes overwrite an earlier still-pending one, matching a
    /// normal wire where only the most recent drive matters.
    pub pending_write: Option<bool>,
}

impl Wire {
    pub fn new_undriven() -> Self {
        Self { undefined: true, ..Default::default() }
    }
}

/// What a leaf wire-expression node gets its input from — a wire directly,
/// or an already-resolved constant (literal folding during expression
/// construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    Wire(WireId),
    Constant(bool),
}

/// A pending check produced by a wire change, dispatched by `run_checks`.
#[derive(Debug, Clone, Copy)]
pub struct PendingCheck {
    pub action: ActionId,
    pub direction: Direction,
    pub satisfied: bool,
}

/// Memo key for DAG fan-in sharing: nodes are shared when flags match.
/// Children are sorted for commutative gates before hashing so that
/// `a & b` and `b & a` compile to the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ShareKey {
    Leaf(WireId),
    Gate(Gate, Vec<WireExprId>),
}

#[derive(Default)]
pub struct WireNetwork {
    pub wires: Arena<Wire>,
    pub exprs: Arena<WireExpr>,
    share_memo: HashMap<ShareKey, WireExprId>,
    /// Nodes whose truth value directly gates an action (a PR guard, a
    /// suspended thread's wake condition, or a hold release).
    triggers: HashMap<WireExprId, Vec<(ActionId, Direction)>>,
    /// `-watchall`: report every transition of every non-probe wire,
    /// independent of any wire's own `watch` flag.
    watch_all: bool,
}

impl WireNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_wire(&mut self) -> WireId {
        WireId(self.wires.insert(Wire::new_undriven()))
    }

    /// `-watchall`: from now on, every non-probe wire's transitions are
    /// traced regardless of its individual `watch` flag.
    pub fn set_watch_all(&mut self) {
        self.watch_all = true;
    }

    /// Marks a single wire watched (the `watch <wire>` debugger command),
    /// independent of `-watchall`.
    pub fn set_watch(&mut self, wire: WireId, watched: bool) {
        let wire = self.wire_fix(wire);
        if let Some(w) = self.wires.get_mut(wire.0) {
            w.watch = watched;
        }
    }

    /// Flags `wire` as a production-rule target whose guard was already
    /// satisfied when the rule was registered.
    pub fn mark_reset(&mut self, wire: WireId) {
        let wire = self.wire_fix(wire);
        if let Some(w) = self.wires.get_mut(wire.0) {
            w.reset = true;
        }
    }

    /// `wire_fix`: follows forwarding links to the canonical wire,
    /// short-circuiting the chain it walks (idempotent on already-fixed wires).
    pub fn wire_fix(&mut self, wire: WireId) -> WireId {
        let mut cur = wire;
        let mut chain = Vec::new();
        while let Some(next) = self.wires.get(cur.0).and_then(|w| w.forward) {
            chain.push(cur);
            cur = next;
        }
        for w in chain {
            if let Some(slot) = self.wires.get_mut(w.0) {
                slot.forward = Some(cur);
            }
        }
        cur
    }

    pub fn forward(&mut self, from: WireId, to: WireId) {
        let to = self.wire_fix(to);
        if let Some(w) = self.wires.get_mut(from.0) {
            w.forward = Some(to);
        }
    }

    fn leaf_node(&mut self, leaf: Leaf) -> WireExprId {
        match leaf {
            Leaf::Constant(v) => {
                let id = WireExprId(self.exprs.insert(WireExpr::new_constant(v)));
                id
            }
            Leaf::Wire(w) => {
                let w = self.wire_fix(w);
                if let Some(&existing) = self.share_memo.get(&ShareKey::Leaf(w)) {
                    return existing;
                }
                let value = self.wires.get(w.0).map(|x| x.value).unwrap_or(false);
                let undefined = self.wires.get(w.0).map(|x| x.undefined).unwrap_or(true);
                let id = WireExprId(self.exprs.insert(WireExpr::new_leaf(w, value, undefined)));
                self.share_memo.insert(ShareKey::Leaf(w), id);
                if let Some(wire) = self.wires.get_mut(w.0) {
                    wire.dependents.push(id);
                }
                id
            }
        }
    }

    /// Builds (or reuses, via DAG sharing) a gate node over `children`.
    pub fn build_gate(&mut self, gate: Gate, children: &[WireExprId]) -> WireExprId {
        let mut key_children = children.to_vec();
        if matches!(gate, Gate::And | Gate::Or | Gate::Xor) {
            key_children.sort_unstable_by_key(|c| c.0);
        }
        let key = ShareKey::Gate(gate, key_children);
        if let Some(&existing) = self.share_memo.get(&key) {
            return existing;
        }
        let (value, undefined, valcnt, undefcnt) = self.fold_children(gate, children);
        let node_id = WireExprId(self.exprs.insert(WireExpr::new_gate(
            gate,
            children.len() as u32,
            valcnt,
            undefcnt,
            value,
            undefined,
        )));
        for &child in children {
            if let Some(node) = self.exprs.get_mut(child.0) {
                node.parents.push(node_id);
            }
        }
        if let Some(node) = self.exprs.get_mut(node_id.0) {
            node.children = children.to_vec();
        }
        self.share_memo.insert(key, node_id);
        node_id
    }

    fn fold_children(&self, gate: Gate, children: &[WireExprId]) -> (bool, bool, u32, u32) {
        let mut valcnt = 0u32;
        let mut undefcnt = 0u32;
        let mut xor_value = false;
        for &c in children {
            if let Some(node) = self.exprs.get(c.0) {
                if node.undefined {
                    undefcnt += 1;
                } else if node.value {
                    valcnt += 1;
                    xor_value ^= true;
                }
            }
        }
        let undefined = undefcnt > 0;
        let value = match gate {
            Gate::And => !undefined && valcnt == children.len() as u32,
            Gate::Or => !undefined && valcnt > 0,
            Gate::Xor => !undefined && xor_value,
        };
        (value, undefined, valcnt, undefcnt)
    }

    /// Registers `action` to fire in `direction` whenever `node` becomes true.
    pub fn add_trigger(&mut self, node: WireExprId, action: ActionId, direction: Direction) {
        self.triggers.entry(node).or_default().push((action, direction));
    }

    /// Subscribes `action` directly to a wire's leaf node: suspension stores
    /// the current action into the dependency list of the wire that could
    /// unblock it. Used by the statement executor for probe waits and
    /// unresolved guard/expression suspension, not just PR guards.
    pub fn subscribe(&mut self, wire: WireId, action: ActionId, direction: Direction) -> WireExprId {
        let node = self.leaf_node(Leaf::Wire(wire));
        self.add_trigger(node, action, direction);
        node
    }

    /// Returns (building if needed) a wire's leaf node without registering a
    /// trigger — the building block PR guard compilation composes into
    /// And/Or/Xor gates before a single trigger is added at the top.
    pub fn leaf(&mut self, wire: WireId) -> WireExprId {
        self.leaf_node(Leaf::Wire(wire))
    }

    /// `write_wire`: follows forwards, compares old vs. new value, and
    /// (absent a blocking hold) mutates the wire and propagates the change
    /// through every dependent wire-expression, returning the checks that
    /// must be run by `run_checks` once the sweep settles.
    pub fn write_wire(&mut self, wire: WireId, new_value: bool) -> CoreResult<Vec<PendingCheck>> {
        let wire = self.wire_fix(wire);
        let w = self.wires.get(wire.0).ok_or_else(|| CoreError::Instantiation("dangling wire".into()))?;
        if !w.undefined && w.value == new_value {
            return Ok(Vec::new());
        }
        if (new_value && w.held_down) || (!new_value && w.held_up) {
            // A hold in the opposing direction is active: stash the write
            // instead of mutating the wire. `release_hold` replays it once
            // the hold's release action clears the blocking flag.
            if let Some(w) = self.wires.get_mut(wire.0) {
                w.pending_write = Some(new_value);
                w.wait = true;
            }
            return Ok(Vec::new());
        }
        let dependents = self.wires.get(wire.0).map(|w| w.dependents.clone()).unwrap_or_default();
        if let Some(w) = self.wires.get_mut(wire.0) {
            w.value = new_value;
            w.undefined = false;
            w.pending_write = None;
            w.wait = false;
        }

        let mut checks = Vec::new();
        let mut queue: Vec<WireExprId> = Vec::new();
        for leaf in &dependents {
            if let Some(node) = self.exprs.get_mut(leaf.0) {
                node.value = new_value;
                node.undefined = false;
            }
            queue.push(*leaf);
        }
        let mut visited = std::collections::HashSet::new();
        while let Some(node_id) = queue.pop() {
            if !visited.insert(node_id) {
                continue;
            }
            self.fire_triggers(node_id, &mut checks);
            let parents = match self.exprs.get(node_id.0) {
                Some(n) => n.parents.clone(),
                None => continue,
            };
            for parent in parents {
                if self.update_gate_from_child(parent) {
                    queue.push(parent);
                }
            }
        }
        Ok(checks)
    }

    /// True if `wire` (after following forwards) should surface a trace
    /// event for the write a caller just made: either it was marked watched
    /// individually, or `-watchall` is active and it isn't a probe (probe
    /// toggling is already visible through the handshake's own phases).
    pub fn wire_is_watched(&mut self, wire: WireId) -> bool {
        let wire = self.wire_fix(wire);
        match self.wires.get(wire.0) {
            Some(w) => w.watch || (self.watch_all && !w.is_probe),
            None => false,
        }
    }

    /// Clears the hold flag a delay hold set for `dir` on `wire` and hands
    /// back any write that had been stashed while the hold was active, so
    /// the caller can replay it through `write_wire`.
    pub fn release_hold(&mut self, wire: WireId, dir: Direction) -> Option<bool> {
        let wire = self.wire_fix(wire);
        let w = self.wires.get_mut(wire.0)?;
        match dir {
            Direction::Up => w.held_up = false,
            Direction::Down => w.held_down = false,
        }
        w.pending_write.take()
    }

    fn fire_triggers(&self, node: WireExprId, checks: &mut Vec<PendingCheck>) {
        if let Some(subs) = self.triggers.get(&node) {
            if let Some(n) = self.exprs.get(node.0) {
                for &(action, direction) in subs {
                    checks.push(PendingCheck { action, direction, satisfied: n.value && !n.undefined });
                }
            }
        }
    }

    /// Recomputes one gate node from its children's current state. Returns
    /// whether the node's externally-visible `(value, undefined)` changed.
    fn update_gate_from_child(&mut self, node_id: WireExprId) -> bool {
        let (gate, children, trigger_mode, old_value, old_undefined) = match self.exprs.get(node_id.0) {
            Some(n) => (n.gate, n.children.clone(), n.trigger, n.value, n.undefined),
            None => return false,
        };
        let (mut value, undefined, valcnt, undefcnt) = self.fold_children(gate, &children);

        if trigger_mode {
            // Trigger nodes fire once per full satisfaction and then reset;
            // `value` pulses true for exactly the transition into satisfaction.
            let node = self.exprs.get_mut(node_id.0).unwrap();
            if !undefined && valcnt == node.refcnt && node.valcnt != node.refcnt {
                value = true;
            } else {
                value = false;
            }
        }

        let node = self.exprs.get_mut(node_id.0).unwrap();
        node.valcnt = valcnt;
        node.undefcnt = undefcnt;
        node.value = value;
        node.undefined = undefined;
        value != old_value || undefined != old_undefined
    }

    /// Two-phase PR commit. Consumes the checks gathered by the writes in
    /// one dispatch and either raises Interference/Instability or returns
    /// the set of wires that must now be driven.
    pub fn run_checks(
        &self,
        checks: &[PendingCheck],
        actions: &mut dyn FnMut(ActionId) -> &mut crate::action::Action,
        wire_name: impl Fn(ActionId) -> String,
    ) -> CoreResult<Vec<(ActionId, bool)>> {
        use crate::action::ActionKind;
        let mut outcomes = Vec::new();
        for check in checks {
            let action = actions(check.action);
            if let ActionKind::ProductionRule { up_nxt, dn_nxt, .. } = &mut action.kind {
                match check.direction {
                    Direction::Up => *up_nxt = check.satisfied,
                    Direction::Down => *dn_nxt = check.satisfied,
                }
            }
        }
        for check in checks {
            let action = actions(check.action);
            if let ActionKind::ProductionRule { pr_up, pr_dn, up_nxt, dn_nxt } = &mut action.kind {
                if *up_nxt && *dn_nxt {
                    return Err(CoreError::Interference { wire: wire_name(check.action) });
                }
                let was_up = *pr_up;
                let was_dn = *pr_dn;
                *pr_up = *up_nxt;
                *pr_dn = *dn_nxt;
                if (was_up && !*up_nxt && !*dn_nxt) || (was_dn && !*dn_nxt && !*up_nxt) {
                    return Err(CoreError::Instability { wire: wire_name(check.action) });
                }
                if *pr_up {
                    outcomes.push((check.action, true));
                } else if *pr_dn {
                    outcomes.push((check.action, false));
                }
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_wire(net: &mut WireNetwork) -> (WireId, WireExprId) {
        let w = net.new_wire();
        let n = net.leaf_node(Leaf::Wire(w));
        (w, n)
    }

    #[test]
    fn and_gate_transitions_only_when_all_children_true() {
        let mut net = WireNetwork::new();
        let (a, na) = leaf_wire(&mut net);
        let (b, nb) = leaf_wire(&mut net);
        let and_node = net.build_gate(Gate::And, &[na, nb]);
        net.write_wire(a, true).unwrap();
        assert!(!net.exprs.get(and_node.0).unwrap().value);
        net.write_wire(b, true).unwrap();
        assert!(net.exprs.get(and_node.0).unwrap().value);
    }

    #[test]
    fn or_gate_transitions_on_first_true_child() {
        let mut net = WireNetwork::new();
        let (a, na) = leaf_wire(&mut net);
        let (_b, nb) = leaf_wire(&mut net);
        let or_node = net.build_gate(Gate::Or, &[na, nb]);
        net.write_wire(a, true).unwrap();
        assert!(net.exprs.get(or_node.0).unwrap().value);
    }

    #[test]
    fn xor_toggles_on_every_child_change() {
        let mut net = WireNetwork::new();
        let (a, na) = leaf_wire(&mut net);
        let (b, nb) = leaf_wire(&mut net);
        let xor_node = net.build_gate(Gate::Xor, &[na, nb]);
        net.write_wire(a, true).unwrap();
        assert!(net.exprs.get(xor_node.0).unwrap().value);
        net.write_wire(b, true).unwrap();
        assert!(!net.exprs.get(xor_node.0).unwrap().value);
    }

    #[test]
    fn wire_fix_short_circuits_chains_and_is_idempotent() {
        let mut net = WireNetwork::new();
        let a = net.new_wire();
        let b = net.new_wire();
        let c = net.new_wire();
        net.forward(a, b);
        net.forward(b, c);
        assert_eq!(net.wire_fix(a), c);
        assert_eq!(net.wire_fix(a), c);
    }

    #[test]
    fn gates_with_same_children_are_shared() {
        let mut net = WireNetwork::new();
        let (_a, na) = leaf_wire(&mut net);
        let (_b, nb) = leaf_wire(&mut net);
        let n1 = net.build_gate(Gate::And, &[na, nb]);
        let n2 = net.build_gate(Gate::And, &[nb, na]);
        assert_eq!(n1, n2);
    }

    /// A production rule whose pull-up and pull-down both become satisfied
    /// in the same settle is interference, regardless of which wire changes
    /// triggered the two checks.
    #[test]
    fn run_checks_rejects_simultaneous_up_and_down_on_one_action() {
        let net = WireNetwork::new();
        let owner = crate::ids::ControlId(1);
        let mut action = crate::action::Action::new_pr(owner, WireId(0), crate::action::ScheduleTime::ZERO, 0, false);
        let checks = [
            PendingCheck { action: owner, direction: Direction::Up, satisfied: true },
            PendingCheck { action: owner, direction: Direction::Down, satisfied: true },
        ];
        let err = net.run_checks(&checks, &mut |_| &mut action, |_| "out".to_string()).unwrap_err();
        assert_eq!(err, CoreError::Interference { wire: "out".to_string() });
    }

    /// A pull-up that was asserted and then loses its enabling condition
    /// without the opposing pull-down becoming true is instability, not a
    /// silent float.
    #[test]
    fn run_checks_rejects_pr_losing_its_guard_without_the_opposite_firing() {
        let net = WireNetwork::new();
        let owner = crate::ids::ControlId(2);
        let mut action = crate::action::Action::new_pr(owner, WireId(0), crate::action::ScheduleTime::ZERO, 0, false);
        if let crate::action::ActionKind::ProductionRule { pr_up, .. } = &mut action.kind {
            *pr_up = true;
        }
        let checks = [PendingCheck { action: owner, direction: Direction::Up, satisfied: false }];
        let err = net.run_checks(&checks, &mut |_| &mut action, |_| "out".to_string()).unwrap_err();
        assert_eq!(err, CoreError::Instability { wire: "out".to_string() });
    }

    #[test]
    fn watch_all_covers_wires_allocated_before_and_after_it_is_set() {
        let mut net = WireNetwork::new();
        let before = net.new_wire();
        assert!(!net.wire_is_watched(before));
        net.set_watch_all();
        assert!(net.wire_is_watched(before));
        let after = net.new_wire();
        assert!(net.wire_is_watched(after));
    }

    #[test]
    fn set_watch_targets_one_wire_independent_of_watch_all() {
        let mut net = WireNetwork::new();
        let watched = net.new_wire();
        let plain = net.new_wire();
        net.set_watch(watched, true);
        assert!(net.wire_is_watched(watched));
        assert!(!net.wire_is_watched(plain));
    }

    #[test]
    fn write_wire_sets_and_clears_wait_around_a_hold() {
        let mut net = WireNetwork::new();
        let w = net.new_wire();
        net.write_wire(w, true).unwrap();
        let w_fixed = net.wire_fix(w);
        net.wires.get_mut(w_fixed.0).unwrap().held_up = true;
        net.write_wire(w, false).unwrap();
        assert!(net.wires.get(w_fixed.0).unwrap().wait);
        net.release_hold(w, Direction::Up);
        net.write_wire(w, false).unwrap();
        assert!(!net.wires.get(w_fixed.0).unwrap().wait);
    }
}
