//! Critical-path bookkeeping, active only when `Context::critical_tracking`
//! is set.
//!
//! Every time a wire write schedules or re-schedules an action, the write
//! that caused it is recorded as a `CriticalNode` and the action's
//! `Action::critical` breadcrumb points at it. Dispatch clears the
//! breadcrumb explicitly (`Action::clear_critical`) rather than leaving it
//! to linger once the causal link has been consumed, resolving the stray
//! comparison-not-assignment bug the original source had here.

use crate::ids::{ControlId, CriticalNodeId, WireId};
use crate::action::ScheduleTime;

#[derive(Debug, Clone)]
pub struct CriticalNode {
    pub owner: ControlId,
    pub wire: Option<WireId>,
    pub time: ScheduleTime,
    pub cause: Option<CriticalNodeId>,
}
