use std::cell::RefCell;
use std::rc::Weak;

use url::Url;

use super::{Window, WindowInner};
use crate::error::HostError;
use crate::js::value::{string_arg, HostClass, HostObject, HostValue, ScriptScope};

pub const ABOUT_BLANK: &str = "about:blank";

/// How an assignment to `window.location` is carried out.
///
/// Exactly one applies per assignment, chosen by comparing the target with
/// the current href.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Target equals the current href: load the same address again.
    Reload,
    /// Leaving `about:blank`: load without a history entry.
    Assign,
    /// Anything else: load and record a history entry.
    Replace,
}

impl Navigation {
    pub fn decide(current_href: &str, target: &str) -> Self {
        if current_href == target {
            Self::Reload
        } else if current_href == ABOUT_BLANK {
            Self::Assign
        } else {
            Self::Replace
        }
    }
}

/// Current address of a window, exposed to script code as `location`.
///
/// Writes from script code never navigate synchronously; they queue a
/// navigation task on the owning window.
pub struct Location {
    url: RefCell<Option<Url>>,
    window: RefCell<Weak<WindowInner>>,
}

impl Location {
    pub(crate) fn new(window: Weak<WindowInner>, url: Option<Url>) -> Self {
        Self {
            url: RefCell::new(url),
            window: RefCell::new(window),
        }
    }

    pub fn class() -> HostClass {
        HostClass::of::<Location>("Location")
    }

    pub fn url(&self) -> Option<Url> {
        self.url.borrow().clone()
    }

    pub fn href(&self) -> String {
        self.url
            .borrow()
            .as_ref()
            .map_or_else(|| ABOUT_BLANK.to_string(), Url::to_string)
    }

    /// Cut the link to the window once another document has replaced this
    /// one. The address stays readable; navigation reports detached.
    pub(crate) fn retire(&self) {
        *self.window.borrow_mut() = Weak::new();
    }

    fn component(&self, name: &str) -> Option<String> {
        let url = self.url.borrow();
        let Some(url) = url.as_ref() else {
            return Some(match name {
                "protocol" => "about:".to_string(),
                "pathname" => "blank".to_string(),
                "origin" => "null".to_string(),
                _ => String::new(),
            });
        };
        let value = match name {
            "protocol" => format!("{}:", url.scheme()),
            "host" => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => String::new(),
            },
            "hostname" => url.host_str().unwrap_or_default().to_string(),
            "port" => url.port().map(|port| port.to_string()).unwrap_or_default(),
            "pathname" => url.path().to_string(),
            "search" => url.query().map(|query| format!("?{query}")).unwrap_or_default(),
            "hash" => url.fragment().map(|fragment| format!("#{fragment}")).unwrap_or_default(),
            "origin" => url.origin().ascii_serialization(),
            _ => return None,
        };
        Some(value)
    }

    fn window(&self) -> Result<Window, HostError> {
        Window::from_weak(&self.window.borrow()).ok_or(HostError::Detached)
    }
}

impl HostObject for Location {
    fn class(&self) -> HostClass {
        Location::class()
    }

    fn has_property(&self, name: &str) -> bool {
        name == "href" || self.component(name).is_some()
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        if name == "href" {
            return Ok(self.href().into());
        }
        self.component(name)
            .map(HostValue::from)
            .ok_or_else(|| HostError::no_such_member("Location", name))
    }

    fn has_setter(&self, name: &str) -> bool {
        name == "href"
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        if name != "href" {
            return Err(HostError::no_such_member("Location", name));
        }
        self.window()?.defer_navigation(value.to_display_string(), None);
        Ok(())
    }

    fn responds_to(&self, name: &str) -> bool {
        matches!(name, "assign" | "replace" | "reload" | "toString")
    }

    fn call_method(
        &self,
        _scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        match name {
            "toString" => return Ok(self.href().into()),
            "assign" => {
                let uri = string_arg(&args, 0, "url")?;
                self.window()?.defer_navigation(uri, Some(Navigation::Assign));
            }
            "replace" => {
                let uri = string_arg(&args, 0, "url")?;
                self.window()?.defer_navigation(uri, Some(Navigation::Replace));
            }
            "reload" => {
                self.window()?.defer_navigation(self.href(), Some(Navigation::Reload));
            }
            _ => return Err(HostError::no_such_member("Location", name)),
        }
        Ok(HostValue::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_decision_table() {
        assert_eq!(Navigation::decide("http://x/a", "http://x/a"), Navigation::Reload);
        assert_eq!(Navigation::decide(ABOUT_BLANK, "http://x/a"), Navigation::Assign);
        assert_eq!(Navigation::decide("http://x/b", "http://x/a"), Navigation::Replace);
        assert_eq!(Navigation::decide(ABOUT_BLANK, ABOUT_BLANK), Navigation::Reload);
    }

    #[test]
    fn components_of_a_url() {
        let location = Location::new(
            Weak::new(),
            Some(Url::parse("https://example.com:8443/a/b.html?q=1#top").unwrap()),
        );
        let get = |name| location.get_property(name).unwrap();
        assert_eq!(get("protocol"), HostValue::from("https:"));
        assert_eq!(get("host"), HostValue::from("example.com:8443"));
        assert_eq!(get("hostname"), HostValue::from("example.com"));
        assert_eq!(get("port"), HostValue::from("8443"));
        assert_eq!(get("pathname"), HostValue::from("/a/b.html"));
        assert_eq!(get("search"), HostValue::from("?q=1"));
        assert_eq!(get("hash"), HostValue::from("#top"));
        assert_eq!(get("origin"), HostValue::from("https://example.com:8443"));
        assert!(location.get_property("nope").is_err());
    }

    #[test]
    fn blank_location() {
        let location = Location::new(Weak::new(), None);
        assert_eq!(location.href(), ABOUT_BLANK);
        assert_eq!(location.get_property("protocol").unwrap(), HostValue::from("about:"));
    }

    #[test]
    fn detached_location_cannot_navigate() {
        let location = Location::new(Weak::new(), None);
        assert!(matches!(
            location.set_property("href", HostValue::from("http://x/")),
            Err(HostError::Detached)
        ));
    }
}
