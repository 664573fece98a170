//! Property traps invoked by the engine on host-object proxies.
//!
//! Every entry point returns a plain script value: host faults are reported
//! on the `quickwindow::bridge` target and surface as `undefined`.

use rquickjs::{Array, Ctx, Value};

use super::bridge::{report, ValueBridge};
use super::runtime::capture_exception;
use super::value::{HostValue, ScriptFunction, ScriptScope};
use crate::error::{BridgeError, HostError};

/// Property read. Lookup order: instance slots, script-visible properties,
/// host methods, generic indexing, then `undefined`.
pub(crate) fn get<'js>(bridge: &ValueBridge, ctx: &Ctx<'js>, handle: u32, name: &str) -> Value<'js> {
    match lookup(bridge, handle, name) {
        Ok(value) => bridge.to_script(ctx, &value),
        Err(err) => {
            report(&err, "property get failed");
            Value::new_undefined(ctx.clone())
        }
    }
}

fn lookup(bridge: &ValueBridge, handle: u32, name: &str) -> Result<HostValue, BridgeError> {
    let entry = bridge.object_entry(handle)?;
    if let Some(value) = entry.slot(name) {
        return Ok(value);
    }

    let object = &entry.object;
    if object.has_property(name) {
        return Ok(object.get_property(name)?);
    }
    if object.responds_to(name) {
        return Ok(HostValue::Callable(entry.method(name)));
    }
    if object.supports_index() {
        return Ok(object.index(name).unwrap_or_else(|err| {
            tracing::debug!(
                target: "quickwindow::bridge",
                class = object.class().name(),
                key = name,
                error = %err,
                "index lookup missed"
            );
            HostValue::Undefined
        }));
    }
    Ok(HostValue::Undefined)
}

/// Property write. Uses a `<name>=` setter when the host declares one, then
/// generic index assignment, and otherwise attaches an instance slot.
pub(crate) fn set<'js>(
    bridge: &ValueBridge,
    ctx: &Ctx<'js>,
    handle: u32,
    name: &str,
    value: Value<'js>,
) -> Value<'js> {
    match assign(bridge, ctx, handle, name, &value) {
        Ok(()) => value,
        Err(err) => {
            report(&err, "property set failed");
            Value::new_undefined(ctx.clone())
        }
    }
}

fn assign<'js>(
    bridge: &ValueBridge,
    ctx: &Ctx<'js>,
    handle: u32,
    name: &str,
    value: &Value<'js>,
) -> Result<(), BridgeError> {
    let entry = bridge.object_entry(handle)?;
    let converted = bridge.to_host(ctx, value)?;
    let object = &entry.object;

    if object.has_setter(name) {
        object.set_property(name, converted)?;
    } else if entry.has_slot(name) {
        entry.set_slot(name, converted);
    } else if object.supports_index_set() {
        object.index_set(name, converted)?;
    } else {
        entry.define_slot(name);
        entry.set_slot(name, converted);
    }
    Ok(())
}

pub(crate) fn has(bridge: &ValueBridge, handle: u32, name: &str) -> bool {
    match bridge.object_entry(handle) {
        Ok(entry) => {
            entry.has_slot(name) || entry.object.has_property(name) || entry.object.responds_to(name)
        }
        Err(err) => {
            report(&err, "property query failed");
            false
        }
    }
}

/// Invocation of a host function wrapper.
pub(crate) fn call<'js>(bridge: &ValueBridge, ctx: &Ctx<'js>, handle: u32, args: Array<'js>) -> Value<'js> {
    let result = bridge.function(handle).and_then(|function| {
        let args = host_args(bridge, ctx, &args)?;
        let scope = TrapScope { ctx, bridge };
        Ok(function.call(&scope, args)?)
    });
    match result {
        Ok(value) => bridge.to_script(ctx, &value),
        Err(err) => {
            report(&err, "host call failed");
            Value::new_undefined(ctx.clone())
        }
    }
}

/// `new Class(...)` on an exposed host class.
pub(crate) fn construct<'js>(
    bridge: &ValueBridge,
    ctx: &Ctx<'js>,
    class: u32,
    args: Array<'js>,
) -> Value<'js> {
    let result = bridge.class(class).and_then(|class| {
        let args = host_args(bridge, ctx, &args)?;
        Ok(class.construct(args)?)
    });
    match result {
        Ok(value) => bridge.to_script(ctx, &value),
        Err(err) => {
            report(&err, "host constructor failed");
            Value::new_undefined(ctx.clone())
        }
    }
}

fn host_args<'js>(bridge: &ValueBridge, ctx: &Ctx<'js>, args: &Array<'js>) -> Result<Vec<HostValue>, BridgeError> {
    let mut converted = Vec::with_capacity(args.len());
    for index in 0..args.len() {
        let arg: Value = args.get(index)?;
        converted.push(bridge.to_host(ctx, &arg)?);
    }
    Ok(converted)
}

/// Scope handed to host code running inside a trap; calls back into the
/// engine that is already executing.
pub(crate) struct TrapScope<'a, 'js> {
    pub(crate) ctx: &'a Ctx<'js>,
    pub(crate) bridge: &'a ValueBridge,
}

impl ScriptScope for TrapScope<'_, '_> {
    fn call(&self, function: &ScriptFunction, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        Ok(self.bridge.call_script(self.ctx, function, args)?)
    }

    fn evaluate(&self, source: &str) -> Result<HostValue, HostError> {
        match self.ctx.eval::<Value, _>(source.as_bytes()) {
            Ok(value) => Ok(self.bridge.to_host(self.ctx, &value)?),
            Err(rquickjs::Error::Exception) => Err(HostError::Script(
                capture_exception(self.ctx, None, None).to_string(),
            )),
            Err(err) => Err(HostError::Script(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::config::ScriptConfig;
    use crate::error::HostError;
    use crate::js::runtime::ScriptRuntime;
    use crate::js::value::{HostClass, HostObject, HostValue, ScriptScope};

    #[derive(Default)]
    struct Counter {
        count: Cell<i32>,
        label: RefCell<String>,
    }

    impl HostObject for Counter {
        fn class(&self) -> HostClass {
            HostClass::of::<Counter>("Counter")
        }

        fn has_property(&self, name: &str) -> bool {
            matches!(name, "count" | "label" | "broken")
        }

        fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
            match name {
                "count" => Ok(self.count.get().into()),
                "label" => Ok(self.label.borrow().clone().into()),
                _ => Err(HostError::NotSupported(name.to_string())),
            }
        }

        fn has_setter(&self, name: &str) -> bool {
            name == "label"
        }

        fn set_property(&self, _name: &str, value: HostValue) -> Result<(), HostError> {
            *self.label.borrow_mut() = value.to_display_string();
            Ok(())
        }

        fn responds_to(&self, name: &str) -> bool {
            matches!(name, "increment" | "apply")
        }

        fn call_method(
            &self,
            scope: &dyn ScriptScope,
            name: &str,
            args: Vec<HostValue>,
        ) -> Result<HostValue, HostError> {
            match name {
                "increment" => {
                    let by = args.first().and_then(HostValue::as_f64).unwrap_or(1.0) as i32;
                    self.count.set(self.count.get() + by);
                    Ok(self.count.get().into())
                }
                "apply" => {
                    let callback = args.first().cloned().unwrap_or(HostValue::Undefined);
                    callback.invoke(scope, vec![self.count.get().into()])
                }
                _ => Err(HostError::no_such_member("Counter", name)),
            }
        }
    }

    #[derive(Default)]
    struct Bag {
        items: RefCell<HashMap<String, HostValue>>,
    }

    impl HostObject for Bag {
        fn class(&self) -> HostClass {
            HostClass::of::<Bag>("Bag")
        }

        fn supports_index(&self) -> bool {
            true
        }

        fn index(&self, key: &str) -> Result<HostValue, HostError> {
            self.items
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| HostError::no_such_member("Bag", key))
        }

        fn supports_index_set(&self) -> bool {
            true
        }

        fn index_set(&self, key: &str, value: HostValue) -> Result<(), HostError> {
            self.items.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
    }

    fn runtime_with(name: &str, value: HostValue) -> ScriptRuntime {
        let runtime = ScriptRuntime::new(&ScriptConfig::default()).expect("runtime");
        runtime.bind(vec![(name.to_string(), value)]).expect("bind");
        runtime
    }

    #[test]
    fn properties_and_methods_dispatch_to_host() {
        let counter = Rc::new(Counter::default());
        let runtime = runtime_with("counter", HostValue::from(Rc::clone(&counter)));
        let result = runtime
            .evaluate("counter.increment(); counter.increment(2); counter.count", None, None)
            .expect("eval");
        assert_eq!(result, HostValue::Number(3.0));
        assert_eq!(counter.count.get(), 3);
    }

    #[test]
    fn setters_reach_the_host() {
        let counter = Rc::new(Counter::default());
        let runtime = runtime_with("counter", HostValue::from(Rc::clone(&counter)));
        runtime.evaluate("counter.label = 'hits'", None, None).expect("eval");
        assert_eq!(*counter.label.borrow(), "hits");
    }

    #[test]
    fn unknown_members_read_as_undefined() {
        let runtime = runtime_with("counter", HostValue::from(Rc::new(Counter::default())));
        let result = runtime
            .evaluate("typeof counter.missing", None, None)
            .expect("missing members never throw");
        assert_eq!(result, HostValue::from("undefined"));
    }

    #[test]
    fn host_faults_are_contained() {
        let runtime = runtime_with("counter", HostValue::from(Rc::new(Counter::default())));
        let result = runtime
            .evaluate("counter.broken === undefined", None, None)
            .expect("host faults never reach the engine");
        assert_eq!(result, HostValue::Bool(true));
    }

    #[test]
    fn unknown_assignments_define_instance_slots() {
        let first = Rc::new(Counter::default());
        let second = Rc::new(Counter::default());
        let runtime = ScriptRuntime::new(&ScriptConfig::default()).expect("runtime");
        runtime
            .bind(vec![
                ("first".to_string(), HostValue::from(first)),
                ("second".to_string(), HostValue::from(second)),
            ])
            .expect("bind");
        let result = runtime
            .evaluate(
                "first.extra = {n: 1}; first.extra.n = 2; [first.extra.n, typeof second.extra, 'extra' in first]",
                None,
                None,
            )
            .expect("eval");
        assert_eq!(
            result,
            HostValue::List(vec![1.into(), "undefined".into(), true.into()])
        );
    }

    #[test]
    fn indexers_serve_gets_and_sets() {
        let bag = Rc::new(Bag::default());
        let runtime = runtime_with("bag", HostValue::from(Rc::clone(&bag)));
        let result = runtime
            .evaluate("bag.colour = 'red'; [bag.colour, bag['nope']]", None, None)
            .expect("eval");
        assert_eq!(result, HostValue::List(vec!["red".into(), HostValue::Undefined]));
        assert_eq!(bag.items.borrow().get("colour"), Some(&HostValue::from("red")));
    }

    #[test]
    fn host_methods_can_call_back_into_script() {
        let runtime = runtime_with("counter", HostValue::from(Rc::new(Counter::default())));
        let result = runtime
            .evaluate("counter.increment(4); counter.apply((n) => n * 10)", None, None)
            .expect("eval");
        assert_eq!(result, HostValue::Number(40.0));
    }

    #[test]
    fn method_wrappers_are_stable() {
        let runtime = runtime_with("counter", HostValue::from(Rc::new(Counter::default())));
        let result = runtime
            .evaluate("counter.increment === counter.increment", None, None)
            .expect("eval");
        assert_eq!(result, HostValue::Bool(true));
    }
}
