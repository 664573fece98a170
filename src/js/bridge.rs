use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use rquickjs::{Array, Ctx, Function, Object, Persistent, Value};

use super::interceptor;
use super::runtime::capture_exception;
use super::value::{
    object_address, timestamp_from_millis, HostClass, HostFunction, HostRef, HostValue, Lease, ScriptFunction,
};
use crate::error::BridgeError;

/// One opaque host object known to a runtime, plus the per-instance
/// extension slots script code attached to it.
pub(crate) struct ObjectEntry {
    pub(crate) object: HostRef,
    slots: RefCell<HashMap<String, HostValue>>,
    methods: RefCell<HashMap<String, HostFunction>>,
}

impl ObjectEntry {
    fn new(object: HostRef) -> Self {
        Self {
            object,
            slots: RefCell::new(HashMap::new()),
            methods: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn slot(&self, name: &str) -> Option<HostValue> {
        self.slots.borrow().get(name).cloned()
    }

    pub(crate) fn has_slot(&self, name: &str) -> bool {
        self.slots.borrow().contains_key(name)
    }

    /// Attach a read/write slot to this instance only.
    pub(crate) fn define_slot(&self, name: &str) {
        self.slots
            .borrow_mut()
            .entry(name.to_string())
            .or_insert(HostValue::Undefined);
    }

    pub(crate) fn set_slot(&self, name: &str, value: HostValue) {
        self.slots.borrow_mut().insert(name.to_string(), value);
    }

    /// Bound method wrapper, cached so script code sees a stable function.
    pub(crate) fn method(&self, name: &str) -> HostFunction {
        if let Some(method) = self.methods.borrow().get(name) {
            return method.clone();
        }
        let object = Rc::clone(&self.object);
        let method_name = name.to_string();
        let method = HostFunction::new(name, move |scope, args| {
            object.call_method(scope, &method_name, args)
        });
        self.methods
            .borrow_mut()
            .insert(name.to_string(), method.clone());
        method
    }
}

#[derive(Clone)]
enum Handle {
    Object(Rc<ObjectEntry>),
    Function(HostFunction),
}

/// Handles and classes handed to one context. Entries live as long as the
/// context, so an address is never reused while it is registered.
#[derive(Default)]
struct Registry {
    handles: RefCell<Vec<Handle>>,
    by_address: RefCell<HashMap<usize, u32>>,
    classes: RefCell<Vec<HostClass>>,
    class_ids: RefCell<HashMap<TypeId, u32>>,
}

impl Registry {
    fn register(&self, address: usize, make: impl FnOnce() -> Handle) -> u32 {
        if let Some(id) = self.by_address.borrow().get(&address) {
            return *id;
        }
        let mut handles = self.handles.borrow_mut();
        handles.push(make());
        let id = handles.len() as u32;
        self.by_address.borrow_mut().insert(address, id);
        id
    }

    fn handle(&self, id: u32) -> Result<Handle, BridgeError> {
        let index = id.checked_sub(1).ok_or(BridgeError::UnknownHandle(id))?;
        self.handles
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or(BridgeError::UnknownHandle(id))
    }

    fn class_id(&self, class: &HostClass) -> (u32, bool) {
        if let Some(id) = self.class_ids.borrow().get(&class.type_id()) {
            return (*id, false);
        }
        let mut classes = self.classes.borrow_mut();
        classes.push(class.clone());
        let id = classes.len() as u32;
        self.class_ids.borrow_mut().insert(class.type_id(), id);
        (id, true)
    }

    fn class(&self, id: u32) -> Result<HostClass, BridgeError> {
        let index = id.checked_sub(1).ok_or(BridgeError::UnknownClass(id))?;
        self.classes
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or(BridgeError::UnknownClass(id))
    }
}

/// Two-way marshaller between host values and QuickJS values for a single
/// context.
///
/// Opaque host objects cross as proxies that carry a hidden handle, so
/// converting a proxy back yields the original `Rc`, and converting the same
/// object twice yields the same proxy. Lists and maps are copied.
///
/// The helper functions the conversions rely on live only here; page
/// scripts have no global that reaches them.
pub struct ValueBridge {
    runtime: u64,
    max_depth: usize,
    registry: Registry,
    helpers: RefCell<Option<Persistent<Object<'static>>>>,
    leases: RefCell<HashMap<u32, Weak<Lease>>>,
    released: Rc<RefCell<Vec<u32>>>,
}

impl ValueBridge {
    pub(crate) fn new(runtime: u64, max_depth: usize) -> Self {
        Self {
            runtime,
            max_depth,
            registry: Registry::default(),
            helpers: RefCell::new(None),
            leases: RefCell::new(HashMap::new()),
            released: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Install the native trap functions and the proxy bootstrap.
    pub(crate) fn install<'js>(bridge: &Rc<ValueBridge>, ctx: &Ctx<'js>) -> rquickjs::Result<()> {
        let native = Object::new(ctx.clone())?;

        {
            let bridge = Rc::clone(bridge);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, handle: u32, name: String| -> rquickjs::Result<Value<'js>> {
                    Ok(interceptor::get(&bridge, &ctx, handle, &name))
                },
            )?
            .with_name("get")?;
            native.set("get", func)?;
        }

        {
            let bridge = Rc::clone(bridge);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>,
                      handle: u32,
                      name: String,
                      value: Value<'js>|
                      -> rquickjs::Result<Value<'js>> {
                    Ok(interceptor::set(&bridge, &ctx, handle, &name, value))
                },
            )?
            .with_name("set")?;
            native.set("set", func)?;
        }

        {
            let bridge = Rc::clone(bridge);
            let func = Function::new(
                ctx.clone(),
                move |handle: u32, name: String| -> rquickjs::Result<bool> {
                    Ok(interceptor::has(&bridge, handle, &name))
                },
            )?
            .with_name("has")?;
            native.set("has", func)?;
        }

        {
            let bridge = Rc::clone(bridge);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, handle: u32, args: Array<'js>| -> rquickjs::Result<Value<'js>> {
                    Ok(interceptor::call(&bridge, &ctx, handle, args))
                },
            )?
            .with_name("call")?;
            native.set("call", func)?;
        }

        {
            let bridge = Rc::clone(bridge);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, class: u32, args: Array<'js>| -> rquickjs::Result<Value<'js>> {
                    Ok(interceptor::construct(&bridge, &ctx, class, args))
                },
            )?
            .with_name("construct")?;
            native.set("construct", func)?;
        }

        let bootstrap: Function = ctx.eval(BRIDGE_BOOTSTRAP.as_bytes())?;
        let helpers: Object = bootstrap.call((native,))?;
        *bridge.helpers.borrow_mut() = Some(Persistent::save(ctx, helpers));
        Ok(())
    }

    /// Drop the helpers so the context they live in can be collected. The
    /// native traps hold the bridge, and the helpers hold the traps.
    pub(crate) fn detach(&self) {
        self.helpers.borrow_mut().take();
    }

    fn helpers<'js>(&self, ctx: &Ctx<'js>) -> Result<Object<'js>, BridgeError> {
        let helpers = self.helpers.borrow().clone().ok_or(BridgeError::Detached)?;
        Ok(helpers.restore(ctx)?)
    }

    fn script_function(&self, id: u32) -> ScriptFunction {
        let existing = self.leases.borrow().get(&id).and_then(Weak::upgrade);
        let lease = existing.unwrap_or_else(|| {
            self.released.borrow_mut().retain(|pending| *pending != id);
            let lease = Rc::new(Lease::new(id, Rc::downgrade(&self.released)));
            self.leases.borrow_mut().insert(id, Rc::downgrade(&lease));
            lease
        });
        ScriptFunction::new(self.runtime, id, lease)
    }

    /// Let the engine forget script functions no host value refers to any more.
    pub(crate) fn release_pending<'js>(&self, ctx: &Ctx<'js>) -> Result<(), BridgeError> {
        let ids = std::mem::take(&mut *self.released.borrow_mut());
        if ids.is_empty() {
            return Ok(());
        }
        {
            let mut leases = self.leases.borrow_mut();
            for id in &ids {
                leases.remove(id);
            }
        }
        let release: Function = self.helpers(ctx)?.get("release")?;
        for id in &ids {
            release.call::<_, ()>((*id,))?;
        }
        tracing::trace!(target: "quickwindow::bridge", count = ids.len(), "released script functions");
        Ok(())
    }

    /// Number of script functions the engine is holding for the host.
    pub(crate) fn retained_count<'js>(&self, ctx: &Ctx<'js>) -> Result<usize, BridgeError> {
        let count: Function = self.helpers(ctx)?.get("retainedCount")?;
        Ok(count.call::<_, u32>(())? as usize)
    }

    /// Host to script. Never fails: a conversion fault is reported and the
    /// engine receives `undefined`.
    pub fn to_script<'js>(&self, ctx: &Ctx<'js>, value: &HostValue) -> Value<'js> {
        match self.try_to_script(ctx, value) {
            Ok(converted) => converted,
            Err(err) => {
                report(&err, "host value conversion failed");
                Value::new_undefined(ctx.clone())
            }
        }
    }

    pub(crate) fn try_to_script<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: &HostValue,
    ) -> Result<Value<'js>, BridgeError> {
        let converted = match value {
            HostValue::Undefined => Value::new_undefined(ctx.clone()),
            HostValue::Null => Value::new_null(ctx.clone()),
            HostValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
            HostValue::Number(n) => number_value(ctx, *n),
            HostValue::Text(text) => rquickjs::String::from_str(ctx.clone(), text)?.into_value(),
            HostValue::List(items) => {
                let array = Array::new(ctx.clone())?;
                for (index, item) in items.iter().enumerate() {
                    array.set(index, self.try_to_script(ctx, item)?)?;
                }
                array.into_value()
            }
            HostValue::Map(entries) => {
                let object = Object::new(ctx.clone())?;
                for (key, item) in entries {
                    object.set(key.as_str(), self.try_to_script(ctx, item)?)?;
                }
                object.into_value()
            }
            HostValue::Timestamp(at) => {
                let date: Function = self.helpers(ctx)?.get("date")?;
                date.call((at.timestamp_millis() as f64,))?
            }
            HostValue::Callable(function) => {
                let id = self.registry.register(function.address(), || {
                    Handle::Function(function.clone())
                });
                let wrap: Function = self.helpers(ctx)?.get("wrapFunction")?;
                wrap.call((id, function.name()))?
            }
            HostValue::Function(function) => {
                if function.runtime != self.runtime {
                    return Err(BridgeError::ForeignFunction);
                }
                let retained: Function = self.helpers(ctx)?.get("retained")?;
                retained.call((function.id,))?
            }
            HostValue::Class(class) => {
                let (id, _) = self.registry.class_id(class);
                let define: Function = self.helpers(ctx)?.get("defineClass")?;
                define.call((id, class.name()))?
            }
            HostValue::Object(object) => {
                let id = self.registry.register(object_address(object), || {
                    Handle::Object(Rc::new(ObjectEntry::new(Rc::clone(object))))
                });
                let class = object.class();
                let (class_id, _) = self.registry.class_id(&class);
                let wrap: Function = self.helpers(ctx)?.get("wrap")?;
                wrap.call((id, class_id, class.name()))?
            }
        };
        Ok(converted)
    }

    /// Script to host. Proxies give back the exact host reference; arrays and
    /// plain objects are copied into fresh lists and maps.
    pub fn to_host<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>) -> Result<HostValue, BridgeError> {
        self.to_host_at(ctx, value, 0)
    }

    fn to_host_at<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: &Value<'js>,
        depth: usize,
    ) -> Result<HostValue, BridgeError> {
        if value.is_undefined() {
            return Ok(HostValue::Undefined);
        }
        if value.is_null() {
            return Ok(HostValue::Null);
        }
        if let Some(b) = value.as_bool() {
            return Ok(HostValue::Bool(b));
        }
        if let Some(i) = value.as_int() {
            return Ok(HostValue::Number(f64::from(i)));
        }
        if let Some(f) = value.as_float() {
            return Ok(HostValue::Number(f));
        }
        if let Some(text) = value.as_string() {
            return Ok(HostValue::Text(text.to_string()?));
        }
        if !(value.is_object() || value.is_function()) {
            return Ok(HostValue::Undefined);
        }
        if depth >= self.max_depth {
            return Err(BridgeError::TooDeep(self.max_depth));
        }

        let describe: Function = self.helpers(ctx)?.get("describe")?;
        let description: Array = describe.call((value.clone(),))?;
        let kind: String = description.get(0)?;

        let converted = match kind.as_str() {
            "host" => match self.registry.handle(description.get(1)?)? {
                Handle::Object(entry) => HostValue::Object(Rc::clone(&entry.object)),
                Handle::Function(function) => HostValue::Callable(function),
            },
            "class" => HostValue::Class(self.registry.class(description.get(1)?)?),
            "function" => HostValue::Function(self.script_function(description.get(1)?)),
            "date" => {
                let millis: f64 = description.get(1)?;
                timestamp_from_millis(millis)
                    .map(HostValue::Timestamp)
                    .unwrap_or(HostValue::Null)
            }
            "array" => {
                let Some(array) = value.as_array() else {
                    return Ok(HostValue::Undefined);
                };
                let mut items = Vec::with_capacity(array.len());
                for index in 0..array.len() {
                    let item: Value = array.get(index)?;
                    items.push(self.to_host_at(ctx, &item, depth + 1)?);
                }
                HostValue::List(items)
            }
            "object" => {
                let Some(object) = value.as_object() else {
                    return Ok(HostValue::Undefined);
                };
                let keys: Vec<String> = description.get(1)?;
                let mut entries = Vec::with_capacity(keys.len());
                for key in keys {
                    let item: Value = object.get(key.as_str())?;
                    let converted = self.to_host_at(ctx, &item, depth + 1)?;
                    entries.push((key, converted));
                }
                HostValue::Map(entries)
            }
            _ => HostValue::Undefined,
        };
        Ok(converted)
    }

    /// Call a retained script function with host arguments.
    pub(crate) fn call_script<'js>(
        &self,
        ctx: &Ctx<'js>,
        function: &ScriptFunction,
        args: Vec<HostValue>,
    ) -> Result<HostValue, BridgeError> {
        if function.runtime != self.runtime {
            return Err(BridgeError::ForeignFunction);
        }
        let invoke: Function = self.helpers(ctx)?.get("invoke")?;
        let js_args = Array::new(ctx.clone())?;
        for (index, arg) in args.iter().enumerate() {
            js_args.set(index, self.try_to_script(ctx, arg)?)?;
        }
        match invoke.call::<_, Value>((function.id, js_args)) {
            Ok(result) => self.to_host(ctx, &result),
            Err(rquickjs::Error::Exception) => {
                Err(BridgeError::Exception(capture_exception(ctx, None, None).to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn object_entry(&self, id: u32) -> Result<Rc<ObjectEntry>, BridgeError> {
        match self.registry.handle(id)? {
            Handle::Object(entry) => Ok(entry),
            Handle::Function(_) => Err(BridgeError::UnknownHandle(id)),
        }
    }

    pub(crate) fn function(&self, id: u32) -> Result<HostFunction, BridgeError> {
        match self.registry.handle(id)? {
            Handle::Function(function) => Ok(function),
            Handle::Object(_) => Err(BridgeError::UnknownHandle(id)),
        }
    }

    pub(crate) fn class(&self, id: u32) -> Result<HostClass, BridgeError> {
        self.registry.class(id)
    }
}

fn number_value<'js>(ctx: &Ctx<'js>, n: f64) -> Value<'js> {
    if n.fract() == 0.0 && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) && !(n == 0.0 && n.is_sign_negative()) {
        Value::new_int(ctx.clone(), n as i32)
    } else {
        Value::new_float(ctx.clone(), n)
    }
}

pub(crate) fn report(err: &BridgeError, what: &str) {
    tracing::warn!(target: "quickwindow::bridge", error = %err, "{what}");
}

const BRIDGE_BOOTSTRAP: &str = r#"
((native) => {
    const HANDLE = Symbol('quickwindow.handle');
    const CLASS = Symbol('quickwindow.class');
    const proxies = new Map();
    const wrappers = new Map();
    const classes = new Map();
    const retained = new Map();
    const retainedIds = new WeakMap();
    let nextRetained = 1;

    const hide = (target, key, value) => Object.defineProperty(target, key, {
        value,
        enumerable: false,
        writable: false,
        configurable: false,
    });
    const owns = (value, key) => Object.prototype.hasOwnProperty.call(value, key);

    const traps = {
        get(target, key) {
            if (typeof key === 'symbol') {
                return Reflect.get(target, key);
            }
            const value = native.get(target[HANDLE], key);
            return value === undefined ? Reflect.get(target, key) : value;
        },
        set(target, key, value) {
            if (typeof key === 'symbol') {
                return Reflect.set(target, key, value);
            }
            native.set(target[HANDLE], key, value);
            return true;
        },
        has(target, key) {
            if (typeof key === 'symbol') {
                return Reflect.has(target, key);
            }
            return native.has(target[HANDLE], key) || Reflect.has(target, key);
        },
    };

    const defineClass = (id, name) => {
        let ctor = classes.get(id);
        if (ctor === undefined) {
            ctor = function (...args) {
                if (new.target === undefined) {
                    throw new TypeError(`Constructor ${name} requires 'new'`);
                }
                const instance = native.construct(id, args);
                if (instance === undefined) {
                    throw new TypeError('Illegal constructor');
                }
                return instance;
            };
            Object.defineProperty(ctor, 'name', { value: name });
            hide(ctor, CLASS, id);
            Object.defineProperty(ctor.prototype, 'toString', {
                value: function () { return `[object ${name}]`; },
                enumerable: false,
            });
            classes.set(id, ctor);
        }
        return ctor;
    };

    const wrap = (id, classId, className) => {
        let proxy = proxies.get(id);
        if (proxy === undefined) {
            const target = Object.create(defineClass(classId, className).prototype);
            hide(target, HANDLE, id);
            proxy = new Proxy(target, traps);
            proxies.set(id, proxy);
        }
        return proxy;
    };

    const wrapFunction = (id, name) => {
        let fn = wrappers.get(id);
        if (fn === undefined) {
            fn = function (...args) {
                return native.call(id, args);
            };
            Object.defineProperty(fn, 'name', { value: name });
            hide(fn, HANDLE, id);
            wrappers.set(id, fn);
        }
        return fn;
    };

    const retain = (fn) => {
        let id = retainedIds.get(fn);
        if (id === undefined) {
            id = nextRetained++;
            retainedIds.set(fn, id);
            retained.set(id, fn);
        }
        return id;
    };

    const describe = (value) => {
        if (typeof value === 'function') {
            if (owns(value, CLASS)) {
                return ['class', value[CLASS]];
            }
            if (owns(value, HANDLE)) {
                return ['host', value[HANDLE]];
            }
            return ['function', retain(value)];
        }
        if (value instanceof Date) {
            return ['date', value.getTime()];
        }
        const handle = value[HANDLE];
        if (handle !== undefined) {
            return ['host', handle];
        }
        if (Array.isArray(value)) {
            return ['array', value.length];
        }
        return ['object', Object.keys(value)];
    };

    const release = (id) => {
        const fn = retained.get(id);
        if (fn !== undefined) {
            retained.delete(id);
            retainedIds.delete(fn);
        }
    };

    return Object.freeze({
        defineClass,
        wrap,
        wrapFunction,
        describe,
        release,
        retained: (id) => retained.get(id),
        retainedCount: () => retained.size,
        invoke: (id, args) => retained.get(id).apply(undefined, args),
        date: (millis) => new Date(millis),
    });
})
"#;
