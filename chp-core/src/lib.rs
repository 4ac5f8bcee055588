//! A discrete-event simulation core for communicating hardware processes:
//! guarded commands, channels, and production rules over a shared wire
//! network, scheduled by priority-queued "actions".

pub mod action;
pub mod arena;
pub mod ast;
pub mod channel;
pub mod collab;
pub mod context;
pub mod counter;
pub mod critical;
pub mod error;
pub mod eval;
pub mod exec;
pub mod ids;
pub mod instantiate;
pub mod interference;
pub mod process;
pub mod scheduler;
pub mod value;
pub mod wire;

pub mod prelude {
    pub use crate::collab::{BuiltinRegistry, DebugHooks, ParsedProgram};
    pub use crate::context::{init_core, Context};
    pub use crate::error::{CoreError, CoreResult, Severity};
    pub use crate::ids::{ChannelId, ControlId, CounterId, ProcessId, WireExprId, WireId};
    pub use crate::instantiate::{ProcessDef, Registry};
    pub use crate::scheduler::SchedulingMode;
    pub use crate::value::Value;
}
