//! QuickJS glue: host values, the value bridge and its property traps, the
//! per-window runtime, and the timer task queue.

pub mod bridge;
mod interceptor;
pub mod runtime;
pub mod script;
pub mod timers;
pub mod value;

pub use bridge::ValueBridge;
pub use runtime::{RuntimeScope, ScriptRuntime};
pub use script::{ScriptDescriptor, ScriptKind, ScriptSource};
pub use timers::{Task, TaskQueue};
pub use value::{
    DetachedScope, HostClass, HostFunction, HostObject, HostRef, HostValue, ScriptFunction,
    ScriptScope,
};
