//! Strict per-variable interference checking.
//!
//! Enabled only in `-strict` mode. Tracks, per memory slot, the last
//! "proper frame" (the nearest control-state whose parent is a parallel
//! statement, or the thread root) that read or wrote it, and raises
//! `ParallelConflict` when a sibling frame's access would overlap.

use crate::error::CoreError;
use crate::ids::{ControlId, VarIdx};
use std::collections::HashMap;

/// A path element descending into an aggregate or bit-sliced integer.
/// Subelement and bit-slice accesses descend into per-index sub-records
/// transparently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElem {
    Index(i64),
    Field(Box<str>),
    Bit(u32),
    Slice(i64, i64),
}

pub type SlotPath = (VarIdx, Vec<PathElem>);

#[derive(Debug, Clone, Default)]
pub struct SlotRecord {
    pub read_frame: Option<ControlId>,
    pub write_frame: Option<ControlId>,
}

pub type SlotTable = HashMap<SlotPath, SlotRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Records one access at `frame` and raises `ParallelConflict` if it
/// overlaps a prior write recorded against a different frame.
pub fn observe(
    table: &mut SlotTable,
    frame: ControlId,
    slot: SlotPath,
    access: Access,
    var_name: &str,
) -> Result<(), CoreError> {
    let record = table.entry(slot).or_default();
    let conflicting_write = record.write_frame.is_some_and(|w| w != frame);
    let conflicting_read_write = access == Access::Write && record.read_frame.is_some_and(|r| r != frame);
    if conflicting_write || conflicting_read_write {
        return Err(CoreError::ParallelConflict { var: var_name.to_string() });
    }
    match access {
        Access::Read => record.read_frame = Some(frame),
        Access::Write => {
            record.write_frame = Some(frame);
            record.read_frame = Some(frame);
        }
    }
    Ok(())
}

/// On parallel completion, fold a child frame's annotations back into the
/// parent frame.
pub fn fold_into_parent(table: &mut SlotTable, child: ControlId, parent: ControlId) {
    for record in table.values_mut() {
        if record.read_frame == Some(child) {
            record.read_frame = Some(parent);
        }
        if record.write_frame == Some(child) {
            record.write_frame = Some(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_write_write_conflicts() {
        let mut table = SlotTable::new();
        let slot = (VarIdx(0), vec![]);
        observe(&mut table, ControlId(1), slot.clone(), Access::Write, "x").unwrap();
        let err = observe(&mut table, ControlId(2), slot, Access::Write, "x").unwrap_err();
        assert_eq!(err, CoreError::ParallelConflict { var: "x".into() });
    }

    #[test]
    fn same_frame_repeated_write_is_fine() {
        let mut table = SlotTable::new();
        let slot = (VarIdx(0), vec![]);
        observe(&mut table, ControlId(1), slot.clone(), Access::Write, "x").unwrap();
        observe(&mut table, ControlId(1), slot, Access::Write, "x").unwrap();
    }

    #[test]
    fn fold_rewrites_child_frame_to_parent() {
        let mut table = SlotTable::new();
        let slot = (VarIdx(0), vec![]);
        observe(&mut table, ControlId(2), slot.clone(), Access::Write, "x").unwrap();
        fold_into_parent(&mut table, ControlId(2), ControlId(1));
        assert_eq!(table.get(&slot).unwrap().write_frame, Some(ControlId(1)));
    }
}
