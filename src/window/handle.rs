use std::rc::Weak;

use super::{Window, WindowInner};
use crate::dom::event::{call_target_method, handler_type, is_target_method};
use crate::error::HostError;
use crate::js::value::{arg, number_arg, HostClass, HostObject, HostRef, HostValue, ScriptScope};

/// The `window` object scripts see. Holds its window weakly; once the window
/// is dropped every member reports [`HostError::Detached`].
pub struct WindowHandle {
    window: Weak<WindowInner>,
}

const PROPERTIES: &[&str] = &[
    "window",
    "self",
    "top",
    "parent",
    "opener",
    "frames",
    "length",
    "name",
    "url",
    "closed",
    "document",
    "location",
    "navigator",
    "console",
    "history",
    "screen",
    "innerWidth",
    "innerHeight",
    "outerWidth",
    "outerHeight",
    "screenX",
    "screenY",
    "screenLeft",
    "screenTop",
    "pageXOffset",
    "pageYOffset",
    "scrollX",
    "scrollY",
    "defaultStatus",
];

const METHODS: &[&str] = &[
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "log",
    "print",
    "alert",
    "close",
    "getComputedStyle",
];

fn handle_of(window: &Window) -> HostValue {
    let handle: HostRef = window.handle();
    HostValue::Object(handle)
}

impl WindowHandle {
    pub(crate) fn new(window: Weak<WindowInner>) -> Self {
        Self { window }
    }

    pub fn class() -> HostClass {
        HostClass::of::<WindowHandle>("Window")
    }

    pub fn window(&self) -> Option<Window> {
        Window::from_weak(&self.window)
    }

    fn attached(&self) -> Result<Window, HostError> {
        self.window().ok_or(HostError::Detached)
    }

    fn schedule(&self, args: &[HostValue], repeat: bool) -> Result<HostValue, HostError> {
        let window = self.attached()?;
        let callback = arg(args, 0);
        if !callback.is_callable() && callback.as_str().is_none() {
            return Err(HostError::InvalidArgument(
                "timer callback must be a function or source text".into(),
            ));
        }
        let extra = args.get(2..).map(<[HostValue]>::to_vec).unwrap_or_default();
        let id = window.tasks().schedule(callback, number_arg(args, 1), extra, repeat);
        Ok(id.into())
    }

    fn frame(&self, key: &str) -> Option<Window> {
        let frames = self.window()?.frames();
        match key.parse::<usize>() {
            Ok(index) => frames.get(index).cloned(),
            Err(_) => frames.into_iter().find(|frame| frame.name() == key),
        }
    }
}

impl HostObject for WindowHandle {
    fn class(&self) -> HostClass {
        WindowHandle::class()
    }

    fn has_property(&self, name: &str) -> bool {
        PROPERTIES.contains(&name) || handler_type(name).is_some()
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        let window = self.attached()?;
        if let Some(event_type) = handler_type(name) {
            return Ok(window.events().handler(event_type));
        }
        let screen = &window.config().screen;
        Ok(match name {
            "window" | "self" => handle_of(&window),
            "top" => handle_of(&window.top()),
            "parent" => window.parent().as_ref().map_or(HostValue::Null, handle_of),
            "opener" => window.opener().as_ref().map_or(HostValue::Null, handle_of),
            "frames" => HostValue::List(window.frames().iter().map(handle_of).collect()),
            "length" => (window.frames().len() as u32).into(),
            "name" => window.name().into(),
            "url" => window.url().into(),
            "closed" => window.is_closed().into(),
            "document" => window.document().into(),
            "location" => window.location().into(),
            "navigator" => window.navigator().into(),
            "console" => window.console().into(),
            "history" => window.history().into(),
            "screen" => window.screen().into(),
            "innerWidth" | "outerWidth" => screen.width.into(),
            "innerHeight" | "outerHeight" => screen.height.into(),
            "screenX" | "screenY" | "screenLeft" | "screenTop" | "pageXOffset" | "pageYOffset"
            | "scrollX" | "scrollY" => 0.into(),
            "defaultStatus" => window.default_status().into(),
            _ => return Err(HostError::no_such_member("Window", name)),
        })
    }

    fn has_setter(&self, name: &str) -> bool {
        matches!(name, "location" | "name" | "defaultStatus") || handler_type(name).is_some()
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        let window = self.attached()?;
        match name {
            "location" => window.defer_navigation(value.to_display_string(), None),
            "name" => window.set_name(&value.to_display_string()),
            "defaultStatus" => window.set_default_status(&value.to_display_string()),
            _ => match handler_type(name) {
                Some(event_type) => window.events().set_handler(event_type, value),
                None => return Err(HostError::no_such_member("Window", name)),
            },
        }
        Ok(())
    }

    fn responds_to(&self, name: &str) -> bool {
        METHODS.contains(&name) || is_target_method(name)
    }

    fn call_method(
        &self,
        scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        let window = self.attached()?;
        if let Some(result) = call_target_method(window.events(), scope, handle_of(&window), name, &args) {
            return result;
        }
        match name {
            "setTimeout" => return self.schedule(&args, false),
            "setInterval" => return self.schedule(&args, true),
            "clearTimeout" | "clearInterval" => window.tasks().clear(number_arg(&args, 0) as u32),
            "log" | "print" => window.console().log(arg(&args, 0).to_display_string()),
            "alert" => window
                .console()
                .log(format!("alert: {}", arg(&args, 0).to_display_string())),
            "close" => window.close(),
            "getComputedStyle" => {
                return Err(HostError::NotSupported("Window.getComputedStyle".into()))
            }
            _ => return Err(HostError::no_such_member("Window", name)),
        }
        Ok(HostValue::Undefined)
    }

    fn supports_index(&self) -> bool {
        true
    }

    /// `window[0]` and `window["frameName"]` reach child frames.
    fn index(&self, key: &str) -> Result<HostValue, HostError> {
        self.frame(key)
            .as_ref()
            .map(handle_of)
            .ok_or_else(|| HostError::no_such_member("Window", key))
    }
}

impl std::fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowHandle")
            .field("attached", &(self.window.strong_count() > 0))
            .finish()
    }
}
