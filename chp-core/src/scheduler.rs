//! The priority-queue event scheduler.

use crate::action::{Action, ScheduleTime};
use crate::ids::ControlId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// Fixed for the lifetime of a simulation run (Invariant 1).
#[derive(Debug, Clone, Copy)]
pub enum SchedulingMode {
    Timed,
    Randomized { seed: u64 },
}

/// A small splitmix64 PRNG used only in `Randomized` mode, never on the
/// timed-mode path.
#[derive(Debug, Clone)]
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// A uniformly chosen 31-bit priority.
    fn next_priority31(&mut self) -> i64 {
        (self.next_u64() & 0x7FFF_FFFF) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapKey {
    primary: i64,
    sequence: u64,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.primary.cmp(&other.primary).then(self.sequence.cmp(&other.sequence))
    }
}
impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    key: HeapKey,
    control: ControlId,
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Scheduler {
    mode: SchedulingMode,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    rng: SplitMix64,
    /// Instantiation entries produced by meta bodies, promoted once the
    /// queue drains.
    waiting: VecDeque<ControlId>,
    current_time: ScheduleTime,
    next_sequence: u64,
}

impl Scheduler {
    pub fn new(mode: SchedulingMode) -> Self {
        let seed = match mode {
            SchedulingMode::Randomized { seed } => seed,
            SchedulingMode::Timed => 0,
        };
        Self {
            mode,
            heap: BinaryHeap::new(),
            rng: SplitMix64::new(seed ^ 0x2545F4914F6CDD1D),
            waiting: VecDeque::new(),
            current_time: ScheduleTime::ZERO,
            next_sequence: 0,
        }
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn current_time(&self) -> ScheduleTime {
        self.current_time
    }

    pub fn next_sequence(&mut self) -> u64 {
        let s = self.next_sequence;
        self.next_sequence += 1;
        s
    }

    /// Stamps the timed-mode key: atomic actions land on the even tick,
    /// normal actions on the following odd tick. The low bit distinguishes
    /// instants from half-instants.
    fn timed_key(time: ScheduleTime, atomic: bool) -> i64 {
        let even = (time.0 & !1) as i64;
        if atomic {
            even
        } else {
            even + 1
        }
    }

    pub fn push(&mut self, control: ControlId, action: &Action) {
        let primary = match self.mode {
            SchedulingMode::Timed => Self::timed_key(action.scheduled_time, action.atomic),
            SchedulingMode::Randomized { .. } => {
                if action.atomic {
                    i64::from(i32::MIN)
                } else {
                    self.rng.next_priority31()
                }
            }
        };
        let key = HeapKey { primary, sequence: action.sequence };
        self.heap.push(Reverse(HeapEntry { key, control }));
    }

    pub fn push_waiting(&mut self, control: ControlId) {
        self.waiting.push_back(control);
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Looks at what `pop` would return next without dequeuing it (used by
    /// the debugger hook, which must inspect the about-to-run action before
    /// committing to run it).
    pub fn peek(&self) -> Option<ControlId> {
        if let Some(Reverse(entry)) = self.heap.peek() {
            return Some(entry.control);
        }
        self.waiting.front().copied()
    }

    /// Extracts the root action. Promotes a waiting instantiation entry if
    /// the queue is empty and one exists.
    /// Advances `current_time` monotonically on dequeue.
    pub fn pop(&mut self) -> Option<ControlId> {
        if let Some(Reverse(entry)) = self.heap.pop() {
            if matches!(self.mode, SchedulingMode::Timed) {
                let dequeued_time = ScheduleTime(entry.key.primary.max(0) as u64);
                if dequeued_time > self.current_time {
                    self.current_time = dequeued_time;
                }
            }
            return Some(entry.control);
        }
        self.waiting.pop_front()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, ActionTarget};

    fn stmt_action(owner: ControlId, time: u64, seq: u64, atomic: bool) -> Action {
        Action {
            scheduled_time: ScheduleTime(time),
            atomic,
            suspended: false,
            target: ActionTarget::None,
            owner,
            kind: ActionKind::Statement,
            critical: None,
            sequence: seq,
            hold_release: None,
        }
    }

    #[test]
    fn timed_mode_dequeues_in_nondecreasing_time_order() {
        let mut sched = Scheduler::new(SchedulingMode::Timed);
        sched.push(ControlId(1), &stmt_action(ControlId(1), 10, 0, false));
        sched.push(ControlId(2), &stmt_action(ControlId(2), 2, 1, false));
        sched.push(ControlId(3), &stmt_action(ControlId(3), 6, 2, false));
        let mut times = Vec::new();
        while let Some(_c) = sched.pop() {
            times.push(sched.current_time());
        }
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn timed_mode_atomic_precedes_nonatomic_at_same_time() {
        let mut sched = Scheduler::new(SchedulingMode::Timed);
        sched.push(ControlId(1), &stmt_action(ControlId(1), 4, 0, false));
        sched.push(ControlId(2), &stmt_action(ControlId(2), 4, 1, true));
        assert_eq!(sched.pop(), Some(ControlId(2)));
        assert_eq!(sched.pop(), Some(ControlId(1)));
    }

    #[test]
    fn timed_mode_ties_are_fifo() {
        let mut sched = Scheduler::new(SchedulingMode::Timed);
        sched.push(ControlId(1), &stmt_action(ControlId(1), 4, 0, false));
        sched.push(ControlId(2), &stmt_action(ControlId(2), 4, 1, false));
        assert_eq!(sched.pop(), Some(ControlId(1)));
        assert_eq!(sched.pop(), Some(ControlId(2)));
    }

    #[test]
    fn randomized_mode_atomic_always_first() {
        let mut sched = Scheduler::new(SchedulingMode::Randomized { seed: 42 });
        sched.push(ControlId(1), &stmt_action(ControlId(1), 0, 0, false));
        sched.push(ControlId(2), &stmt_action(ControlId(2), 0, 1, false));
        sched.push(ControlId(3), &stmt_action(ControlId(3), 0, 2, true));
        assert_eq!(sched.pop(), Some(ControlId(3)));
    }

    #[test]
    fn empty_queue_promotes_a_waiting_entry() {
        let mut sched = Scheduler::new(SchedulingMode::Timed);
        sched.push_waiting(ControlId(9));
        assert_eq!(sched.pop(), Some(ControlId(9)));
        assert_eq!(sched.pop(), None);
    }
}
