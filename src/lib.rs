//! A headless browser window backed by QuickJS.
//!
//! [`Window::load`] fetches or takes markup, builds the document, runs its
//! classic scripts, loads child frames, dispatches `load`, and drains the
//! window's task queue. Scripts reach host objects through proxies; see
//! [`js::ValueBridge`].

pub mod config;
pub mod dom;
pub mod error;
pub mod js;
pub mod net;
pub mod window;

pub use config::WindowConfig;
pub use error::{EvaluationError, FetchError, HostError, WindowError};
pub use js::{HostObject, HostValue, ScriptRuntime, TaskQueue};
pub use net::{Fetch, MapFetcher, NetFetcher};
pub use window::location::Navigation;
pub use window::{LoadOptions, LoadState, Window};
