use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::error::HostError;
use crate::js::value::{arg, string_arg, HostClass, HostObject, HostValue, ScriptScope};

/// Script-visible event object.
pub struct Event {
    event_type: RefCell<String>,
    bubbles: Cell<bool>,
    cancelable: Cell<bool>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
    immediate_stopped: Cell<bool>,
    target: RefCell<HostValue>,
    current_target: RefCell<HostValue>,
    created: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: &str, bubbles: bool, cancelable: bool) -> Rc<Self> {
        Rc::new(Self {
            event_type: RefCell::new(event_type.to_string()),
            bubbles: Cell::new(bubbles),
            cancelable: Cell::new(cancelable),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
            immediate_stopped: Cell::new(false),
            target: RefCell::new(HostValue::Null),
            current_target: RefCell::new(HostValue::Null),
            created: Utc::now(),
        })
    }

    pub fn class() -> HostClass {
        HostClass::of::<Event>("Event").with_constructor(construct)
    }

    pub fn event_type(&self) -> String {
        self.event_type.borrow().clone()
    }

    pub fn init(&self, event_type: &str, bubbles: bool, cancelable: bool) {
        *self.event_type.borrow_mut() = event_type.to_string();
        self.bubbles.set(bubbles);
        self.cancelable.set(cancelable);
        self.default_prevented.set(false);
        self.propagation_stopped.set(false);
        self.immediate_stopped.set(false);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub fn prevent_default(&self) {
        if self.cancelable.get() {
            self.default_prevented.set(true);
        }
    }

    pub fn target(&self) -> HostValue {
        self.target.borrow().clone()
    }
}

fn construct(args: Vec<HostValue>) -> Result<HostValue, HostError> {
    let event_type = string_arg(&args, 0, "event type")?;
    let options = arg(&args, 1);
    let flag = |name: &str| options.get(name).is_some_and(HostValue::truthy);
    Ok(HostValue::from(Event::new(&event_type, flag("bubbles"), flag("cancelable"))))
}

impl HostObject for Event {
    fn class(&self) -> HostClass {
        Event::class()
    }

    fn has_property(&self, name: &str) -> bool {
        matches!(
            name,
            "type"
                | "bubbles"
                | "cancelable"
                | "defaultPrevented"
                | "target"
                | "srcElement"
                | "currentTarget"
                | "timeStamp"
                | "isTrusted"
        )
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        Ok(match name {
            "type" => self.event_type().into(),
            "bubbles" => self.bubbles.get().into(),
            "cancelable" => self.cancelable.get().into(),
            "defaultPrevented" => self.default_prevented.get().into(),
            "target" | "srcElement" => self.target(),
            "currentTarget" => self.current_target.borrow().clone(),
            "timeStamp" => HostValue::Timestamp(self.created),
            "isTrusted" => false.into(),
            _ => return Err(HostError::no_such_member("Event", name)),
        })
    }

    fn responds_to(&self, name: &str) -> bool {
        matches!(
            name,
            "initEvent" | "preventDefault" | "stopPropagation" | "stopImmediatePropagation"
        )
    }

    fn call_method(
        &self,
        _scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        match name {
            "initEvent" => {
                let event_type = string_arg(&args, 0, "event type")?;
                self.init(&event_type, arg(&args, 1).truthy(), arg(&args, 2).truthy());
            }
            "preventDefault" => self.prevent_default(),
            "stopPropagation" => self.propagation_stopped.set(true),
            "stopImmediatePropagation" => {
                self.propagation_stopped.set(true);
                self.immediate_stopped.set(true);
            }
            _ => return Err(HostError::no_such_member("Event", name)),
        }
        Ok(HostValue::Undefined)
    }
}

struct Listener {
    event_type: String,
    callback: HostValue,
    capture: bool,
}

/// Result of a dispatch: whether a listener cancelled the event, and the
/// listener failures that were reported along the way.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub default_prevented: bool,
    pub failures: Vec<HostError>,
}

/// Listener registry shared by windows, documents, and elements.
///
/// Listeners run synchronously in registration order, then the `on<type>`
/// handler property if one is set.
#[derive(Default)]
pub struct EventTarget {
    listeners: RefCell<Vec<Listener>>,
    handlers: RefCell<HashMap<String, HostValue>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; a duplicate of an existing registration is ignored.
    pub fn add_listener(&self, event_type: &str, callback: HostValue, capture: bool) {
        if callback.is_nullish() {
            return;
        }
        let mut listeners = self.listeners.borrow_mut();
        let duplicate = listeners.iter().any(|existing| {
            existing.event_type == event_type && existing.capture == capture && existing.callback == callback
        });
        if !duplicate {
            listeners.push(Listener {
                event_type: event_type.to_string(),
                callback,
                capture,
            });
        }
    }

    pub fn remove_listener(&self, event_type: &str, callback: &HostValue, capture: bool) {
        self.listeners.borrow_mut().retain(|existing| {
            !(existing.event_type == event_type && existing.capture == capture && existing.callback == *callback)
        });
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|listener| listener.event_type == event_type)
            .count()
    }

    /// Forget every listener and handler.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
        self.handlers.borrow_mut().clear();
    }

    /// `on<type>` handler; `null` when unset.
    pub fn handler(&self, event_type: &str) -> HostValue {
        self.handlers
            .borrow()
            .get(event_type)
            .cloned()
            .unwrap_or(HostValue::Null)
    }

    pub fn set_handler(&self, event_type: &str, handler: HostValue) {
        let mut handlers = self.handlers.borrow_mut();
        if handler.is_nullish() {
            handlers.remove(event_type);
        } else {
            handlers.insert(event_type.to_string(), handler);
        }
    }

    /// Deliver `event` to this target. `this` is the script-facing object the
    /// event is dispatched on.
    pub fn dispatch(&self, scope: &dyn ScriptScope, this: HostValue, event: &Rc<Event>) -> DispatchOutcome {
        let event_type = event.event_type();
        if event.target.borrow().is_nullish() {
            *event.target.borrow_mut() = this.clone();
        }
        *event.current_target.borrow_mut() = this;

        let mut callbacks: Vec<HostValue> = self
            .listeners
            .borrow()
            .iter()
            .filter(|listener| listener.event_type == event_type)
            .map(|listener| listener.callback.clone())
            .collect();
        let handler = self.handler(&event_type);
        if handler.is_callable() {
            callbacks.push(handler);
        }

        let mut outcome = DispatchOutcome::default();
        for callback in callbacks {
            if event.immediate_stopped.get() {
                break;
            }
            if let Err(err) = callback.invoke(scope, vec![HostValue::from(Rc::clone(event))]) {
                tracing::error!(
                    target: "quickwindow::script",
                    event = %event_type,
                    error = %err,
                    "event listener failed"
                );
                outcome.failures.push(err);
            }
        }

        *event.current_target.borrow_mut() = HostValue::Null;
        outcome.default_prevented = event.default_prevented();
        outcome
    }
}

/// Shared handling of the event-target methods for host objects that embed
/// an [`EventTarget`]. Returns `None` for names that are not event methods.
pub(crate) fn call_target_method(
    target: &EventTarget,
    scope: &dyn ScriptScope,
    this: HostValue,
    name: &str,
    args: &[HostValue],
) -> Option<Result<HostValue, HostError>> {
    let capture = |value: HostValue| match value {
        HostValue::Map(_) => value.get("capture").is_some_and(HostValue::truthy),
        other => other.truthy(),
    };
    let result = match name {
        "addEventListener" => string_arg(args, 0, "event type").map(|event_type| {
            target.add_listener(&event_type, arg(args, 1), capture(arg(args, 2)));
            HostValue::Undefined
        }),
        "removeEventListener" => string_arg(args, 0, "event type").map(|event_type| {
            target.remove_listener(&event_type, &arg(args, 1), capture(arg(args, 2)));
            HostValue::Undefined
        }),
        "dispatchEvent" => match arg(args, 0).downcast::<Event>() {
            Some(event) => {
                let outcome = target.dispatch(scope, this, &event);
                Ok(HostValue::Bool(!outcome.default_prevented))
            }
            None => Err(HostError::InvalidArgument("dispatchEvent expects an Event".into())),
        },
        _ => return None,
    };
    Some(result)
}

pub(crate) fn is_target_method(name: &str) -> bool {
    matches!(name, "addEventListener" | "removeEventListener" | "dispatchEvent")
}

/// Event type named by an `on<type>` handler property.
pub(crate) fn handler_type(name: &str) -> Option<&str> {
    name.strip_prefix("on").filter(|rest| !rest.is_empty())
}
