//! Window and its load pipeline.
//!
//! A load runs these stages in order, stopping at the first failure:
//! build the document, run its scripts, load its frames, dispatch `load`,
//! then drain the task queue.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use url::Url;

pub mod console;
pub mod handle;
pub mod history;
pub mod location;
pub mod navigator;
pub mod screen;

use crate::config::WindowConfig;
use crate::dom::{DispatchOutcome, Document, DocumentOptions, Element, Event, EventTarget};
use crate::error::{EvaluationError, FetchError, HostError, WindowError};
use crate::js::value::{DetachedScope, HostFunction, HostRef, HostValue, ScriptScope};
use crate::js::{ScriptDescriptor, ScriptKind, ScriptRuntime, ScriptSource, TaskQueue};
use crate::net::{is_fetchable, parse_fetchable, resolve_url, Fetch, NetFetcher};

use console::Console;
use handle::WindowHandle;
use history::History;
use location::{Location, Navigation, ABOUT_BLANK};
use navigator::Navigator;
use screen::Screen;

/// Globals that forward to the matching `window` member.
const FORWARDED_GLOBALS: &[&str] = &[
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "addEventListener",
    "removeEventListener",
    "dispatchEvent",
];

/// Last completed stage of the most recent load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    Unloaded,
    DocumentBuilt,
    ScriptsExecuted,
    FramesLoaded,
    LoadDispatched,
    Ready,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Address of inline markup, or the resource to fetch when no markup is
    /// given.
    pub url: Option<String>,
    pub scripting_enabled: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            url: None,
            scripting_enabled: true,
        }
    }
}

impl LoadOptions {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

pub(crate) struct WindowInner {
    name: RefCell<String>,
    parent: Weak<WindowInner>,
    opener: RefCell<Weak<WindowInner>>,
    frames: RefCell<Vec<Window>>,
    location: RefCell<Option<Rc<Location>>>,
    document: RefCell<Option<Rc<Document>>>,
    history: RefCell<Option<Rc<History>>>,
    navigator: RefCell<Option<Rc<Navigator>>>,
    screen: RefCell<Option<Rc<Screen>>>,
    console: RefCell<Option<Rc<Console>>>,
    runtime: RefCell<Option<Rc<ScriptRuntime>>>,
    handle: Rc<WindowHandle>,
    tasks: TaskQueue,
    events: EventTarget,
    state: Cell<LoadState>,
    default_status: RefCell<String>,
    closed: Cell<bool>,
    script_errors: RefCell<Vec<EvaluationError>>,
    config: Rc<WindowConfig>,
    fetcher: Rc<dyn Fetch>,
}

/// Browser window: owns its document, child frames, script runtime, and
/// task queue. Cloning yields another reference to the same window.
#[derive(Clone)]
pub struct Window(Rc<WindowInner>);

impl Window {
    pub fn new(config: WindowConfig, fetcher: Rc<dyn Fetch>) -> Self {
        Self::create(Rc::new(config), fetcher, None, String::new())
    }

    /// Top-level window fetching over the network and from disk.
    pub fn from_config(config: WindowConfig) -> Result<Self, WindowError> {
        let fetcher = NetFetcher::new(&config.fetch)?;
        Ok(Self::new(config, Rc::new(fetcher)))
    }

    fn create(
        config: Rc<WindowConfig>,
        fetcher: Rc<dyn Fetch>,
        parent: Option<&Window>,
        name: String,
    ) -> Self {
        let max_tasks = config.tasks.max_tasks_per_drain;
        Self(Rc::new_cyclic(|this| WindowInner {
            name: RefCell::new(name),
            parent: parent.map_or_else(|| this.clone(), |parent| Rc::downgrade(&parent.0)),
            opener: RefCell::new(Weak::new()),
            frames: RefCell::new(Vec::new()),
            location: RefCell::new(None),
            document: RefCell::new(None),
            history: RefCell::new(None),
            navigator: RefCell::new(None),
            screen: RefCell::new(None),
            console: RefCell::new(None),
            runtime: RefCell::new(None),
            handle: Rc::new(WindowHandle::new(this.clone())),
            tasks: TaskQueue::new(max_tasks),
            events: EventTarget::new(),
            state: Cell::new(LoadState::Unloaded),
            default_status: RefCell::new(String::new()),
            closed: Cell::new(false),
            script_errors: RefCell::new(Vec::new()),
            config,
            fetcher,
        }))
    }

    pub(crate) fn from_weak(window: &Weak<WindowInner>) -> Option<Self> {
        window.upgrade().map(Self)
    }

    fn child(&self, name: String) -> Window {
        Self::create(
            Rc::clone(&self.0.config),
            Rc::clone(&self.0.fetcher),
            Some(self),
            name,
        )
    }

    pub fn ptr_eq(&self, other: &Window) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn config(&self) -> &WindowConfig {
        &self.0.config
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.0.name.borrow_mut() = name.to_string();
    }

    /// Parent window; a top-level window is its own parent.
    pub fn parent(&self) -> Option<Window> {
        Self::from_weak(&self.0.parent)
    }

    pub fn is_top_level(&self) -> bool {
        std::ptr::eq(self.0.parent.as_ptr(), Rc::as_ptr(&self.0))
    }

    pub fn top(&self) -> Window {
        let mut current = self.clone();
        while !current.is_top_level() {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    pub fn opener(&self) -> Option<Window> {
        Self::from_weak(&self.0.opener.borrow())
    }

    pub fn set_opener(&self, opener: &Window) {
        *self.0.opener.borrow_mut() = Rc::downgrade(&opener.0);
    }

    pub fn frames(&self) -> Vec<Window> {
        self.0.frames.borrow().clone()
    }

    pub fn location(&self) -> Rc<Location> {
        let mut location = self.0.location.borrow_mut();
        let location = location.get_or_insert_with(|| Rc::new(Location::new(Rc::downgrade(&self.0), None)));
        Rc::clone(location)
    }

    pub fn url(&self) -> String {
        self.location().href()
    }

    pub fn document(&self) -> Option<Rc<Document>> {
        self.0.document.borrow().clone()
    }

    pub fn history(&self) -> Rc<History> {
        Rc::clone(self.0.history.borrow_mut().get_or_insert_with(|| Rc::new(History::new())))
    }

    pub fn navigator(&self) -> Rc<Navigator> {
        let mut navigator = self.0.navigator.borrow_mut();
        let navigator = navigator
            .get_or_insert_with(|| Rc::new(Navigator::new(self.0.config.navigator.clone())));
        Rc::clone(navigator)
    }

    pub fn screen(&self) -> Rc<Screen> {
        let mut screen = self.0.screen.borrow_mut();
        let screen =
            screen.get_or_insert_with(|| Rc::new(Screen::new(self.0.config.screen.clone())));
        Rc::clone(screen)
    }

    pub fn console(&self) -> Rc<Console> {
        Rc::clone(self.0.console.borrow_mut().get_or_insert_with(|| Rc::new(Console::new())))
    }

    /// Script-facing object for this window.
    pub fn handle(&self) -> Rc<WindowHandle> {
        Rc::clone(&self.0.handle)
    }

    pub fn events(&self) -> &EventTarget {
        &self.0.events
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.0.tasks
    }

    pub fn state(&self) -> LoadState {
        self.0.state.get()
    }

    /// Script failures reported while loading, in the order they happened.
    pub fn script_errors(&self) -> Vec<EvaluationError> {
        self.0.script_errors.borrow().clone()
    }

    pub fn default_status(&self) -> String {
        self.0.default_status.borrow().clone()
    }

    pub fn set_default_status(&self, status: &str) {
        *self.0.default_status.borrow_mut() = status.to_string();
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.get()
    }

    pub fn close(&self) {
        tracing::debug!(target: "quickwindow::window", name = %self.name(), "window closed");
        self.0.closed.set(true);
    }

    /// The window's script runtime, created and bound on first use.
    pub fn runtime(&self) -> Result<Rc<ScriptRuntime>, WindowError> {
        if let Some(runtime) = self.0.runtime.borrow().as_ref() {
            return Ok(Rc::clone(runtime));
        }
        let runtime = Rc::new(ScriptRuntime::new(&self.0.config.script)?);
        *self.0.runtime.borrow_mut() = Some(Rc::clone(&runtime));
        self.bind_globals(&runtime)?;
        Ok(runtime)
    }

    fn bind_globals(&self, runtime: &ScriptRuntime) -> Result<(), WindowError> {
        runtime.forward("window", FORWARDED_GLOBALS)?;
        let handle: HostRef = self.handle();
        let bindings = vec![
            ("window", HostValue::Object(handle)),
            ("document", HostValue::from(self.document())),
            ("location", HostValue::from(self.location())),
            ("navigator", HostValue::from(self.navigator())),
            ("console", HostValue::from(self.console())),
            ("Window", HostValue::from(WindowHandle::class())),
            ("Document", HostValue::from(Document::class())),
            ("Element", HostValue::from(Element::class())),
            ("Event", HostValue::from(Event::class())),
            ("Location", HostValue::from(Location::class())),
        ];
        runtime.bind(
            bindings
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )?;
        Ok(())
    }

    /// Evaluate source in this window's runtime.
    pub fn evaluate(
        &self,
        source: &str,
        origin_name: Option<&str>,
        origin_line: Option<u32>,
    ) -> Result<HostValue, WindowError> {
        let runtime = self.runtime()?;
        Ok(runtime.evaluate(source, origin_name, origin_line)?)
    }

    /// Run `f` with a scope that can call back into script, or a detached
    /// scope when no runtime exists yet.
    pub(crate) fn with_scope<R>(&self, f: impl FnOnce(&dyn ScriptScope) -> R) -> R {
        let runtime = self.0.runtime.borrow().clone();
        match runtime {
            Some(runtime) => f(&runtime.scope()),
            None => f(&DetachedScope),
        }
    }

    /// Resolve `uri` against the current location; absolute URIs pass
    /// through unchanged.
    pub fn normalize_uri(&self, uri: &str) -> Result<Url, WindowError> {
        let uri = uri.trim();
        match self.location().url() {
            Some(base) => Ok(resolve_url(uri, &base)?),
            None if uri.starts_with('/') => Ok(parse_fetchable(uri)?),
            None => Url::parse(uri).map_err(|_| {
                FetchError::Unresolvable {
                    uri: uri.to_string(),
                    base: ABOUT_BLANK.to_string(),
                }
                .into()
            }),
        }
    }

    /// Load a page. `input` is either markup or a fetchable address (a
    /// `file`, `http`, or `https` URL, or an absolute path); without it the
    /// page is fetched from `options.url`.
    pub fn load(&self, input: Option<&str>, options: LoadOptions) -> Result<(), WindowError> {
        let (html, url) = self.resolve_input(input, &options)?;
        self.run_pipeline(&html, url, options.scripting_enabled)
    }

    fn resolve_input(
        &self,
        input: Option<&str>,
        options: &LoadOptions,
    ) -> Result<(String, Option<Url>), WindowError> {
        match input {
            Some(address) if is_fetchable(address.trim()) => {
                let url = parse_fetchable(address.trim())?;
                let html = self.0.fetcher.fetch_text(&url)?;
                Ok((html, Some(url)))
            }
            Some(html) => {
                let url = options.url.as_deref().map(parse_address).transpose()?;
                Ok((html.to_string(), url))
            }
            None => match options.url.as_deref() {
                Some(address) => {
                    let url = parse_address(address)?;
                    let html = self.0.fetcher.fetch_text(&url)?;
                    Ok((html, Some(url)))
                }
                None => Err(WindowError::MissingInput),
            },
        }
    }

    fn run_pipeline(&self, html: &str, url: Option<Url>, scripting_enabled: bool) -> Result<(), WindowError> {
        self.0.state.set(LoadState::Unloaded);
        tracing::info!(
            target: "quickwindow::window",
            name = %self.name(),
            url = %url.as_ref().map_or(ABOUT_BLANK, Url::as_str),
            "loading window"
        );

        let location = Rc::new(Location::new(Rc::downgrade(&self.0), url.clone()));
        if let Some(previous) = self.0.location.replace(Some(location)) {
            previous.retire();
        }
        self.load_document(html, url, scripting_enabled)?;
        self.load_scripts()?;
        self.load_frames()?;
        self.trigger_load_event();
        self.drain_tasks();
        self.0.state.set(LoadState::Ready);
        Ok(())
    }

    fn load_document(&self, html: &str, url: Option<Url>, scripting_enabled: bool) -> Result<(), WindowError> {
        let owner: HostRef = self.handle();
        let options = DocumentOptions {
            url,
            scripting_enabled,
        };
        *self.0.document.borrow_mut() = Some(Document::build(Some(owner), html, &options));
        self.0.frames.borrow_mut().clear();
        self.0.tasks.clear_all();
        self.0.events.clear();

        let runtime = self.0.runtime.borrow().clone();
        if let Some(runtime) = runtime {
            runtime.reset()?;
            self.bind_globals(&runtime)?;
        }
        self.0.state.set(LoadState::DocumentBuilt);
        Ok(())
    }

    fn load_scripts(&self) -> Result<(), WindowError> {
        let scripts = self
            .document()
            .map(|document| document.get_elements_by_tag_name("script"))
            .unwrap_or_default();

        for (index, element) in scripts.iter().enumerate() {
            let script = ScriptDescriptor::describe(
                index,
                element.attribute("type").as_deref(),
                element.attribute("src").as_deref(),
                element.text_content(),
            );
            match script.kind {
                ScriptKind::Classic => {}
                ScriptKind::Module => {
                    tracing::warn!(target: "quickwindow::script", index, "module scripts are not supported; skipping");
                    continue;
                }
                ScriptKind::Unknown => {
                    tracing::debug!(target: "quickwindow::script", index, "skipping non-JavaScript script");
                    continue;
                }
            }
            let source = match &script.source {
                ScriptSource::External { src } => self.fetch_script(src)?,
                ScriptSource::Inline { code } => code.clone(),
            };
            self.run_script(&source, script.origin_name())?;
        }

        self.0.state.set(LoadState::ScriptsExecuted);
        Ok(())
    }

    fn fetch_script(&self, src: &str) -> Result<String, WindowError> {
        let url = self.normalize_uri(src)?;
        tracing::debug!(target: "quickwindow::script", url = %url, "loading external script");
        Ok(self.0.fetcher.fetch_text(&url)?)
    }

    /// Evaluate one script. Script errors are reported and recorded; only
    /// runtime failures stop the pipeline.
    fn run_script(&self, source: &str, origin_name: Option<&str>) -> Result<(), WindowError> {
        match self.evaluate(source, origin_name, None) {
            Ok(_) => Ok(()),
            Err(WindowError::Evaluation(err)) => {
                tracing::error!(target: "quickwindow::script", error = %err, "script failed");
                self.0.script_errors.borrow_mut().push(err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn load_frames(&self) -> Result<(), WindowError> {
        let frames: Vec<Rc<Element>> = self
            .document()
            .map(|document| document.get_elements_by_tag_name("*"))
            .unwrap_or_default()
            .into_iter()
            .filter(|element| matches!(element.local_name().as_str(), "iframe" | "frame"))
            .collect();

        for element in &frames {
            self.load_frame(element)?;
        }

        self.0.state.set(LoadState::FramesLoaded);
        Ok(())
    }

    /// Build a child window for a frame element. Its load runs to completion,
    /// task queue included, before the parent moves on.
    fn load_frame(&self, element: &Element) -> Result<(), WindowError> {
        let frame = self.child(element.attribute("name").unwrap_or_default());
        let src = element.attribute("src").filter(|src| !src.trim().is_empty());
        if let Some(src) = src {
            let url = self.normalize_uri(&src)?;
            frame.set_location(url.as_str())?;
        }
        self.0.frames.borrow_mut().push(frame);
        Ok(())
    }

    fn trigger_load_event(&self) {
        let event = match self.document() {
            Some(document) => document.create_event("Events"),
            None => Event::new("", false, false),
        };
        event.init("load", false, false);
        let outcome = self.dispatch_event(&event);
        self.0
            .script_errors
            .borrow_mut()
            .extend(outcome.failures.iter().map(|err| EvaluationError::new(err.to_string())));
        self.0.state.set(LoadState::LoadDispatched);
    }

    pub fn dispatch_event(&self, event: &Rc<Event>) -> DispatchOutcome {
        let this: HostRef = self.handle();
        self.with_scope(|scope| self.0.events.dispatch(scope, HostValue::Object(this), event))
    }

    /// Run queued tasks until none remain. Returns how many ran.
    pub fn drain_tasks(&self) -> usize {
        self.with_scope(|scope| self.0.tasks.drain(scope))
    }

    /// Assign to the location: reload when the target is the current href,
    /// assign when leaving `about:blank`, otherwise replace.
    pub fn set_location(&self, uri: &str) -> Result<Navigation, WindowError> {
        let target = self.normalize_uri(uri)?;
        let navigation = Navigation::decide(&self.url(), target.as_str());
        self.perform(target, navigation)?;
        Ok(navigation)
    }

    /// Navigate with an explicit strategy.
    pub fn navigate(&self, uri: &str, navigation: Navigation) -> Result<(), WindowError> {
        let target = self.normalize_uri(uri)?;
        self.perform(target, navigation)
    }

    pub fn reload(&self) -> Result<(), WindowError> {
        self.navigate(&self.url(), Navigation::Reload)
    }

    fn perform(&self, target: Url, navigation: Navigation) -> Result<(), WindowError> {
        tracing::debug!(target: "quickwindow::window", url = %target, ?navigation, "navigating");
        let html = match target.scheme() {
            "about" => String::new(),
            _ => self.0.fetcher.fetch_text(&target)?,
        };
        if navigation == Navigation::Replace {
            self.history().push(target.as_str());
        }
        if target.scheme() == "about" {
            return self.run_pipeline(&html, None, true);
        }
        self.run_pipeline(&html, Some(target), true)
    }

    /// Queue a navigation requested by script code. With no explicit
    /// strategy the location-assignment rule decides when the task runs.
    pub(crate) fn defer_navigation(&self, uri: String, navigation: Option<Navigation>) {
        let window = Rc::downgrade(&self.0);
        let task = HostFunction::new("navigate", move |_, _| {
            let window = Window::from_weak(&window).ok_or(HostError::Detached)?;
            let result = match navigation {
                Some(navigation) => window.navigate(&uri, navigation),
                None => window.set_location(&uri).map(|_| ()),
            };
            result
                .map(|()| HostValue::Undefined)
                .map_err(|err| HostError::Navigation(err.to_string()))
        });
        self.0.tasks.schedule(HostValue::Callable(task), 0.0, Vec::new(), false);
    }
}

fn parse_address(address: &str) -> Result<Url, WindowError> {
    let address = address.trim();
    if is_fetchable(address) {
        return Ok(parse_fetchable(address)?);
    }
    Url::parse(address).map_err(|source| WindowError::InvalidUrl {
        url: address.to_string(),
        source,
    })
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("name", &self.name())
            .field("url", &self.url())
            .field("state", &self.state())
            .finish()
    }
}
