//! Arena-index newtypes.
//!
//! Every inter-component back-pointer the original C carries as a raw
//! pointer (process→variable, wire→expr→action→state→process, ...) becomes
//! a `u32` index into the owning arena here. Indices are cheap to copy,
//! cheap to compare, and never dangle: an arena slot is only reused after
//! its generation is checked (see `arena::Arena`).

use std::fmt;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(ProcessId);
arena_id!(ControlId);
arena_id!(WireId);
arena_id!(WireExprId);
arena_id!(CriticalNodeId);
arena_id!(CounterId);
arena_id!(ChannelId);

/// A scheduled action is uniquely identified by the control-state that
/// embeds it (each control state embeds exactly one action). `ActionId` is
/// kept as a distinct name at call sites that talk about the *action*, but
/// it is the same index space as `ControlId`.
pub type ActionId = ControlId;

/// Static index assigned by semantic analysis; not arena-backed, just a
/// position into a process's variable array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarIdx(pub u32);

/// Static index of a meta-parameter, assigned by semantic analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaIdx(pub u32);
