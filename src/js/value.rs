use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::HostError;

/// Shared reference to an object exposed to script code.
pub type HostRef = Rc<dyn HostObject>;

/// Signature of host callables invoked from script code.
pub type NativeFn = dyn Fn(&dyn ScriptScope, Vec<HostValue>) -> Result<HostValue, HostError>;

/// Host-side view of a value that can cross the engine boundary.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<HostValue>),
    /// Keyed mapping; entry order is preserved across the bridge.
    Map(Vec<(String, HostValue)>),
    Timestamp(DateTime<Utc>),
    Callable(HostFunction),
    /// Function created by script code, retained inside its runtime.
    Function(ScriptFunction),
    Class(HostClass),
    Object(HostRef),
}

impl HostValue {
    pub fn object<T: HostObject + 'static>(object: Rc<T>) -> Self {
        Self::Object(object)
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, HostValue)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Callable(_) | Self::Function(_) | Self::Text(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Recover the concrete host type behind an opaque object.
    pub fn downcast<T: HostObject + 'static>(&self) -> Option<Rc<T>> {
        let object = self.as_object()?;
        Rc::clone(object).into_any().downcast::<T>().ok()
    }

    /// Loose truthiness, matching what script code would see.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(text) => !text.is_empty(),
            _ => true,
        }
    }

    /// Text rendering used by console output and string-typed arguments.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Text(text) => text.clone(),
            Self::List(items) => items
                .iter()
                .map(|item| match item {
                    Self::Undefined | Self::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Map(_) => "[object Object]".to_string(),
            Self::Timestamp(at) => at.to_rfc2822(),
            Self::Callable(function) => format!("function {}() {{ [native code] }}", function.name()),
            Self::Function(_) => "function () { [script code] }".to_string(),
            Self::Class(class) => format!("function {}() {{ [native code] }}", class.name()),
            Self::Object(object) => format!("[object {}]", object.class().name()),
        }
    }

    /// Invoke a callable value: a host function, a script function, or a
    /// code string evaluated in the scope.
    pub fn invoke(&self, scope: &dyn ScriptScope, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        match self {
            Self::Callable(function) => function.call(scope, args),
            Self::Function(function) => scope.call(function, args),
            Self::Text(code) => scope.evaluate(code),
            _ => Err(HostError::NotCallable),
        }
    }

    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON projection; opaque values become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => JsonValue::from(*n as i64),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(text) => JsonValue::String(text.clone()),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => {
                let mut map = JsonMap::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(map)
            }
            Self::Timestamp(at) => JsonValue::String(at.to_rfc3339()),
            _ => JsonValue::Null,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Scalars and containers compare structurally; everything that carries a
/// foreign handle compares by identity of that handle.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Callable(a), Self::Callable(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => same_object(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Self::Timestamp(at) => f.debug_tuple("Timestamp").field(at).finish(),
            Self::Callable(function) => write!(f, "Callable({})", function.name()),
            Self::Function(function) => write!(f, "Function(#{})", function.id),
            Self::Class(class) => write!(f, "Class({})", class.name()),
            Self::Object(object) => write!(f, "Object({})", object.class().name()),
        }
    }
}

/// Identity of the shared allocation, ignoring vtable metadata.
pub fn same_object(a: &HostRef, b: &HostRef) -> bool {
    object_address(a) == object_address(b)
}

pub(crate) fn object_address(object: &HostRef) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for HostValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(value: Vec<HostValue>) -> Self {
        Self::List(value)
    }
}

impl From<DateTime<Utc>> for HostValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        Self::Callable(value)
    }
}

impl From<HostClass> for HostValue {
    fn from(value: HostClass) -> Self {
        Self::Class(value)
    }
}

impl<T: HostObject + 'static> From<Rc<T>> for HostValue {
    fn from(value: Rc<T>) -> Self {
        Self::Object(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Milliseconds since the epoch to a timestamp, as script `Date` does it.
pub(crate) fn timestamp_from_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Capability surface a host object exposes to script code.
///
/// The property interceptor consults these in a fixed order: properties,
/// then methods, then generic indexing. Every member defaults to "absent".
pub trait HostObject: AsAnyRc + 'static {
    fn class(&self) -> HostClass;

    /// Script-visible property readable with `get_property`.
    fn has_property(&self, _name: &str) -> bool {
        false
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        Err(HostError::no_such_member(self.class().name(), name))
    }

    /// Whether a `<name>=` setter exists.
    fn has_setter(&self, _name: &str) -> bool {
        false
    }

    fn set_property(&self, name: &str, _value: HostValue) -> Result<(), HostError> {
        Err(HostError::no_such_member(self.class().name(), name))
    }

    fn responds_to(&self, _name: &str) -> bool {
        false
    }

    fn call_method(
        &self,
        _scope: &dyn ScriptScope,
        name: &str,
        _args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        Err(HostError::no_such_member(self.class().name(), name))
    }

    fn supports_index(&self) -> bool {
        false
    }

    fn index(&self, key: &str) -> Result<HostValue, HostError> {
        Err(HostError::no_such_member(self.class().name(), key))
    }

    fn supports_index_set(&self) -> bool {
        false
    }

    fn index_set(&self, key: &str, _value: HostValue) -> Result<(), HostError> {
        Err(HostError::no_such_member(self.class().name(), key))
    }
}

pub trait AsAnyRc {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Any> AsAnyRc for T {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Constructor invoked for `new Class(...)` in script code.
pub type ClassConstructor = fn(Vec<HostValue>) -> Result<HostValue, HostError>;

/// Type descriptor for host objects; identity is the Rust type.
#[derive(Clone)]
pub struct HostClass {
    id: TypeId,
    name: &'static str,
    constructor: Option<ClassConstructor>,
}

impl HostClass {
    pub fn of<T: 'static>(name: &'static str) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
            constructor: None,
        }
    }

    pub fn with_constructor(mut self, constructor: ClassConstructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn construct(&self, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        match self.constructor {
            Some(constructor) => constructor(args),
            None => Err(HostError::NotSupported(format!("new {}", self.name))),
        }
    }
}

impl PartialEq for HostClass {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostClass").field(&self.name).finish()
    }
}

/// Host callable exposed to script code as a function.
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    call: Rc<NativeFn>,
}

impl HostFunction {
    pub fn new<F>(name: &str, call: F) -> Self
    where
        F: Fn(&dyn ScriptScope, Vec<HostValue>) -> Result<HostValue, HostError> + 'static,
    {
        Self {
            name: Rc::from(name),
            call: Rc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, scope: &dyn ScriptScope, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        (self.call)(scope, args)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.call) as *const () as usize
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostFunction").field(&self.name).finish()
    }
}

/// Handle to a function object living inside one script runtime.
///
/// The runtime keeps the function alive while any clone of the handle
/// exists; once the last clone drops, the id is queued for release.
#[derive(Clone)]
pub struct ScriptFunction {
    pub(crate) runtime: u64,
    pub(crate) id: u32,
    lease: Rc<Lease>,
}

impl ScriptFunction {
    pub(crate) fn new(runtime: u64, id: u32, lease: Rc<Lease>) -> Self {
        Self { runtime, id, lease }
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl Eq for ScriptFunction {}

impl Hash for ScriptFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.runtime.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("runtime", &self.runtime)
            .field("id", &self.id)
            .finish()
    }
}

/// Shared by every handle to one retained function. Dropping the last one
/// pushes the id onto the owning bridge's release queue.
pub(crate) struct Lease {
    id: u32,
    released: Weak<RefCell<Vec<u32>>>,
}

impl Lease {
    pub(crate) fn new(id: u32, released: Weak<RefCell<Vec<u32>>>) -> Self {
        Self { id, released }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(queue) = self.released.upgrade() {
            if let Ok(mut queue) = queue.try_borrow_mut() {
                queue.push(self.id);
            }
        }
    }
}

/// Access to the script runtime from host code that needs to call back into
/// script (event listeners, timer callbacks).
pub trait ScriptScope {
    fn call(&self, function: &ScriptFunction, args: Vec<HostValue>) -> Result<HostValue, HostError>;

    fn evaluate(&self, source: &str) -> Result<HostValue, HostError>;
}

/// Scope used when a window has no script runtime yet; there can be no
/// script functions to call.
pub struct DetachedScope;

impl ScriptScope for DetachedScope {
    fn call(&self, _function: &ScriptFunction, _args: Vec<HostValue>) -> Result<HostValue, HostError> {
        Err(HostError::Script("no script runtime".to_string()))
    }

    fn evaluate(&self, _source: &str) -> Result<HostValue, HostError> {
        Err(HostError::Script("no script runtime".to_string()))
    }
}

/// Positional argument helpers for host methods.
pub(crate) fn arg(args: &[HostValue], index: usize) -> HostValue {
    args.get(index).cloned().unwrap_or(HostValue::Undefined)
}

pub(crate) fn string_arg(args: &[HostValue], index: usize, what: &str) -> Result<String, HostError> {
    match args.get(index) {
        Some(HostValue::Undefined) | None => {
            Err(HostError::InvalidArgument(format!("{what} is required")))
        }
        Some(value) => Ok(value.to_display_string()),
    }
}

pub(crate) fn number_arg(args: &[HostValue], index: usize) -> f64 {
    match args.get(index) {
        Some(HostValue::Number(n)) => *n,
        Some(HostValue::Text(text)) => text.trim().parse().unwrap_or(0.0),
        Some(HostValue::Bool(true)) => 1.0,
        _ => 0.0,
    }
}
