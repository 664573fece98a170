use std::cell::RefCell;

use crate::error::HostError;
use crate::js::value::{HostClass, HostObject, HostValue, ScriptScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Log,
    Warn,
    Error,
}

impl ConsoleLevel {
    fn from_method(name: &str) -> Option<Self> {
        Some(match name {
            "debug" | "trace" => Self::Debug,
            "info" => Self::Info,
            "log" => Self::Log,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
}

/// Script console. Messages are kept for the embedder and forwarded to
/// `tracing` under the `quickjs` target.
#[derive(Default)]
pub struct Console {
    messages: RefCell<Vec<ConsoleMessage>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ConsoleMessage> {
        self.messages.borrow().clone()
    }

    pub fn write(&self, level: ConsoleLevel, text: String) {
        match level {
            ConsoleLevel::Debug => tracing::debug!(target: "quickjs", message = %text),
            ConsoleLevel::Info | ConsoleLevel::Log => tracing::info!(target: "quickjs", message = %text),
            ConsoleLevel::Warn => tracing::warn!(target: "quickjs", message = %text),
            ConsoleLevel::Error => tracing::error!(target: "quickjs", message = %text),
        }
        self.messages.borrow_mut().push(ConsoleMessage { level, text });
    }

    pub fn log(&self, text: impl Into<String>) {
        self.write(ConsoleLevel::Log, text.into());
    }
}

fn join(args: &[HostValue]) -> String {
    args.iter()
        .map(HostValue::to_display_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl HostObject for Console {
    fn class(&self) -> HostClass {
        HostClass::of::<Console>("Console")
    }

    fn responds_to(&self, name: &str) -> bool {
        ConsoleLevel::from_method(name).is_some()
    }

    fn call_method(
        &self,
        _scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        let level = ConsoleLevel::from_method(name)
            .ok_or_else(|| HostError::no_such_member("Console", name))?;
        self.write(level, join(&args));
        Ok(HostValue::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::value::DetachedScope;

    #[test]
    fn records_messages_by_level() {
        let console = Console::new();
        console
            .call_method(&DetachedScope, "warn", vec!["low".into(), 3.into()])
            .unwrap();
        console.log("plain");
        assert_eq!(
            console.messages(),
            vec![
                ConsoleMessage { level: ConsoleLevel::Warn, text: "low 3".into() },
                ConsoleMessage { level: ConsoleLevel::Log, text: "plain".into() },
            ]
        );
        assert!(console.call_method(&DetachedScope, "table", vec![]).is_err());
    }
}
