//! The scheduler's queue-level unit: the scheduled, timestamped work item a
//! control-state embeds.

use crate::ids::{ControlId, CounterId, CriticalNodeId, WireId};

/// Direction a production rule or counter rule drives its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    Wire(WireId),
    Counter(CounterId),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// A statement-level CHP/HSE thread resuming at `cs`.
    Statement,
    /// A production rule; `pr_up`/`pr_dn` are the two-phase commit bits,
    /// `up_nxt`/`dn_nxt` are updated immediately on every wire change and
    /// shifted into `pr_up`/`pr_dn` once the change sweep settles.
    ProductionRule { pr_up: bool, pr_dn: bool, up_nxt: bool, dn_nxt: bool },
    /// A counter rule driving its target up or down.
    CounterRule { direction: Direction },
    /// Resumption after a delay-hold expires.
    DelayResume,
}

/// An arbitrary-precision scheduling time. Timed-mode ticks fit comfortably
/// in `u64` for any simulation that finishes; we keep the name
/// `ScheduleTime` rather than `u64` to mark it as a distinct quantity (never
/// subtracted from a raw cycle count, only compared/added).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ScheduleTime(pub u64);

impl ScheduleTime {
    pub const ZERO: ScheduleTime = ScheduleTime(0);

    pub fn plus_delay(self, delay: u64) -> Self {
        ScheduleTime(self.0 + 2 * delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub scheduled_time: ScheduleTime,
    pub atomic: bool,
    pub suspended: bool,
    pub target: ActionTarget,
    pub owner: ControlId,
    pub kind: ActionKind,
    /// Breadcrumb for critical-path reconstruction. Explicitly cleared on
    /// dispatch rather than left dangling.
    pub critical: Option<CriticalNodeId>,
    /// Monotonic insertion sequence, used to break timed-mode ties FIFO.
    pub sequence: u64,
    /// Set only on the `CounterRule` action backing a delay hold's release:
    /// which wire and direction's hold flag to clear once this action
    /// dispatches, so a write blocked by the hold can be flushed.
    pub hold_release: Option<(WireId, Direction)>,
}

impl Action {
    pub fn new_statement(owner: ControlId, time: ScheduleTime, sequence: u64) -> Self {
        Self {
            scheduled_time: time,
            atomic: false,
            suspended: false,
            target: ActionTarget::None,
            owner,
            kind: ActionKind::Statement,
            critical: None,
            sequence,
            hold_release: None,
        }
    }

    pub fn new_pr(owner: ControlId, target: WireId, time: ScheduleTime, sequence: u64, atomic: bool) -> Self {
        Self {
            scheduled_time: time,
            atomic,
            suspended: false,
            target: ActionTarget::Wire(target),
            owner,
            kind: ActionKind::ProductionRule { pr_up: false, pr_dn: false, up_nxt: false, dn_nxt: false },
            critical: None,
            sequence,
            hold_release: None,
        }
    }

    /// Dispatch-time housekeeping: clears the critical-node breadcrumb. The
    /// original source has a stray `a->cs->crit == 0;` comparison where an
    /// assignment was meant; this makes the clear an explicit statement
    /// rather than a silent no-op.
    pub fn clear_critical(&mut self) {
        self.critical = None;
    }
}
