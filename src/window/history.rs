use std::cell::{Cell, RefCell};

use crate::error::HostError;
use crate::js::value::{number_arg, HostClass, HostObject, HostValue, ScriptScope};

/// Session history of one window.
///
/// Traversal only moves the cursor; it does not load anything.
#[derive(Default)]
pub struct History {
    entries: RefCell<Vec<String>>,
    index: Cell<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new entry after the current one, dropping forward entries.
    pub fn push(&self, url: &str) {
        let mut entries = self.entries.borrow_mut();
        if !entries.is_empty() {
            entries.truncate(self.index.get() + 1);
        }
        entries.push(url.to_string());
        self.index.set(entries.len() - 1);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn current(&self) -> Option<String> {
        self.entries.borrow().get(self.index.get()).cloned()
    }

    /// Move the cursor by `delta`; out-of-range moves are ignored.
    pub fn go(&self, delta: i64) {
        let target = self.index.get() as i64 + delta;
        if delta != 0 && target >= 0 && (target as usize) < self.len() {
            self.index.set(target as usize);
        }
    }
}

impl HostObject for History {
    fn class(&self) -> HostClass {
        HostClass::of::<History>("History")
    }

    fn has_property(&self, name: &str) -> bool {
        matches!(name, "length" | "state")
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        match name {
            "length" => Ok((self.len() as u32).into()),
            "state" => Ok(HostValue::Null),
            _ => Err(HostError::no_such_member("History", name)),
        }
    }

    fn responds_to(&self, name: &str) -> bool {
        matches!(name, "back" | "forward" | "go")
    }

    fn call_method(
        &self,
        _scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        match name {
            "back" => self.go(-1),
            "forward" => self.go(1),
            "go" => self.go(number_arg(&args, 0) as i64),
            _ => return Err(HostError::no_such_member("History", name)),
        }
        Ok(HostValue::Undefined)
    }
}
