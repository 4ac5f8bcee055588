//! Counters with hold constraints: small non-negative integers bounded by
//! `MAX_COUNT`, updated by counter rules dispatched from the scheduler.

use crate::action::Direction;
use crate::error::{CoreError, CoreResult};
use crate::ids::WireExprId;
use crate::value::MAX_COUNT;

#[derive(Debug, Default, Clone)]
pub struct Counter {
    pub value: u32,
    pub dependents: Vec<WireExprId>,
}

/// Counter overflow is uniformly fatal rather than wrapping: it represents a
/// hold/rule miscount, not a value that legitimately wraps the way bit
/// slices of an integer variable do.
pub fn update_counter(counter: &mut Counter, direction: Direction) -> CoreResult<()> {
    match direction {
        Direction::Up => {
            if counter.value >= MAX_COUNT {
                return Err(CoreError::Resource("counter exceeded MAX_COUNT".into()));
            }
            counter.value += 1;
        }
        Direction::Down => {
            if counter.value == 0 {
                return Err(CoreError::Resource("negative counter".into()));
            }
            counter.value -= 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrementing_zero_is_fatal() {
        let mut c = Counter::default();
        assert!(update_counter(&mut c, Direction::Down).is_err());
    }

    #[test]
    fn stays_within_bounds() {
        let mut c = Counter { value: MAX_COUNT, dependents: vec![] };
        assert!(update_counter(&mut c, Direction::Up).is_err());
    }
}
