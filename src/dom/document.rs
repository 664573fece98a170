use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use kuchiki::traits::*;
use kuchiki::{parse_html_with_options, NodeRef, ParseOpts};
use url::Url;

use super::event::{call_target_method, handler_type, is_target_method, Event, EventTarget};
use crate::error::HostError;
use crate::js::value::{arg, string_arg, HostClass, HostObject, HostRef, HostValue, ScriptScope};

const ABOUT_BLANK: &str = "about:blank";

/// Parser flags and the address the document was loaded from.
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    pub url: Option<Url>,
    pub scripting_enabled: bool,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            url: None,
            scripting_enabled: true,
        }
    }
}

/// Parsed HTML tree exposed to script code as `document`.
///
/// Element wrappers are created on demand and cached per node, so script
/// code sees the same object every time it reaches the same node.
pub struct Document {
    root: NodeRef,
    url: Option<Url>,
    owner: Option<HostRef>,
    elements: RefCell<HashMap<usize, Rc<Element>>>,
    events: EventTarget,
    this: Weak<Document>,
}

impl Document {
    pub fn build(owner: Option<HostRef>, html: &str, options: &DocumentOptions) -> Rc<Self> {
        let mut opts = ParseOpts::default();
        opts.tree_builder.scripting_enabled = options.scripting_enabled;
        let root = parse_html_with_options(opts).one(html);

        tracing::debug!(
            target: "quickwindow::window",
            url = %options.url.as_ref().map_or(ABOUT_BLANK, Url::as_str),
            bytes = html.len(),
            "built document"
        );
        Rc::new_cyclic(|this| Self {
            root,
            url: options.url.clone(),
            owner,
            elements: RefCell::new(HashMap::new()),
            events: EventTarget::new(),
            this: this.clone(),
        })
    }

    pub fn class() -> HostClass {
        HostClass::of::<Document>("Document")
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn url_string(&self) -> String {
        self.url
            .as_ref()
            .map_or_else(|| ABOUT_BLANK.to_string(), Url::to_string)
    }

    pub fn events(&self) -> &EventTarget {
        &self.events
    }

    fn as_value(&self) -> HostValue {
        self.this
            .upgrade()
            .map_or(HostValue::Null, HostValue::from)
    }

    /// Wrapper for `node`, shared by every lookup that reaches it.
    pub fn element(&self, node: &NodeRef) -> Rc<Element> {
        let key = Rc::as_ptr(&node.0) as usize;
        let mut elements = self.elements.borrow_mut();
        let element = elements.entry(key).or_insert_with(|| {
            Rc::new(Element {
                node: node.clone(),
                document: self.this.clone(),
                events: EventTarget::new(),
            })
        });
        Rc::clone(element)
    }

    /// Elements with the given tag name in document order; `*` matches all.
    pub fn get_elements_by_tag_name(&self, name: &str) -> Vec<Rc<Element>> {
        self.collect_by_tag(&self.root, name)
    }

    fn collect_by_tag(&self, scope: &NodeRef, name: &str) -> Vec<Rc<Element>> {
        scope
            .descendants()
            .filter(|node| {
                node.as_element()
                    .is_some_and(|data| name == "*" || data.name.local.as_ref().eq_ignore_ascii_case(name))
            })
            .map(|node| self.element(&node))
            .collect()
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<Rc<Element>> {
        self.root
            .descendants()
            .find(|node| {
                node.as_element()
                    .is_some_and(|data| data.attributes.borrow().get("id") == Some(id))
            })
            .map(|node| self.element(&node))
    }

    pub fn query_selector(&self, selectors: &str) -> Result<Option<Rc<Element>>, HostError> {
        Ok(self.query_selector_all(selectors)?.into_iter().next())
    }

    pub fn query_selector_all(&self, selectors: &str) -> Result<Vec<Rc<Element>>, HostError> {
        self.select_within(&self.root, selectors)
    }

    fn select_within(&self, scope: &NodeRef, selectors: &str) -> Result<Vec<Rc<Element>>, HostError> {
        let matches = scope
            .select(selectors)
            .map_err(|_| HostError::InvalidArgument(format!("invalid selector '{selectors}'")))?;
        Ok(matches
            .map(|data| data.as_node().clone())
            .filter(|node| node != scope)
            .map(|node| self.element(&node))
            .collect())
    }

    /// Uninitialised event for `initEvent`; the interface name is ignored.
    pub fn create_event(&self, _interface: &str) -> Rc<Event> {
        Event::new("", false, false)
    }

    pub fn title(&self) -> String {
        self.root
            .select_first("title")
            .map(|title| title.as_node().text_contents().trim().to_string())
            .unwrap_or_default()
    }

    pub fn document_element(&self) -> Option<Rc<Element>> {
        self.root
            .children()
            .find(|node| node.as_element().is_some())
            .map(|node| self.element(&node))
    }

    fn first_by_tag(&self, name: &str) -> Option<Rc<Element>> {
        self.get_elements_by_tag_name(name).into_iter().next()
    }

    /// Serialized markup of the whole tree.
    pub fn to_html(&self) -> String {
        self.root.to_string()
    }
}

fn element_list(elements: Vec<Rc<Element>>) -> HostValue {
    HostValue::List(elements.into_iter().map(HostValue::from).collect())
}

impl HostObject for Document {
    fn class(&self) -> HostClass {
        Document::class()
    }

    fn has_property(&self, name: &str) -> bool {
        matches!(
            name,
            "URL"
                | "documentURI"
                | "title"
                | "documentElement"
                | "head"
                | "body"
                | "defaultView"
                | "location"
                | "nodeType"
                | "nodeName"
        ) || handler_type(name).is_some()
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        let owner_member = |member: &str| match &self.owner {
            Some(owner) => owner.get_property(member),
            None => Ok(HostValue::Null),
        };
        Ok(match name {
            "URL" | "documentURI" => self.url_string().into(),
            "title" => self.title().into(),
            "documentElement" => self.document_element().into(),
            "head" => self.first_by_tag("head").into(),
            "body" => self.first_by_tag("body").into(),
            "defaultView" => self.owner.clone().map_or(HostValue::Null, HostValue::Object),
            "location" => owner_member("location")?,
            "nodeType" => 9.into(),
            "nodeName" => "#document".into(),
            _ => match handler_type(name) {
                Some(event_type) => self.events.handler(event_type),
                None => return Err(HostError::no_such_member("Document", name)),
            },
        })
    }

    fn has_setter(&self, name: &str) -> bool {
        name == "location" || handler_type(name).is_some()
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        if name == "location" {
            return match &self.owner {
                Some(owner) => owner.set_property("location", value),
                None => Err(HostError::Detached),
            };
        }
        match handler_type(name) {
            Some(event_type) => {
                self.events.set_handler(event_type, value);
                Ok(())
            }
            None => Err(HostError::no_such_member("Document", name)),
        }
    }

    fn responds_to(&self, name: &str) -> bool {
        matches!(
            name,
            "getElementsByTagName"
                | "getElementById"
                | "querySelector"
                | "querySelectorAll"
                | "createEvent"
        ) || is_target_method(name)
    }

    fn call_method(
        &self,
        scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        if let Some(result) = call_target_method(&self.events, scope, self.as_value(), name, &args) {
            return result;
        }
        match name {
            "getElementsByTagName" => {
                let tag = string_arg(&args, 0, "tag name")?;
                Ok(element_list(self.get_elements_by_tag_name(&tag)))
            }
            "getElementById" => {
                let id = string_arg(&args, 0, "id")?;
                Ok(self.get_element_by_id(&id).into())
            }
            "querySelector" => {
                let selectors = string_arg(&args, 0, "selector")?;
                Ok(self.query_selector(&selectors)?.into())
            }
            "querySelectorAll" => {
                let selectors = string_arg(&args, 0, "selector")?;
                Ok(element_list(self.query_selector_all(&selectors)?))
            }
            "createEvent" => {
                let interface = arg(&args, 0).to_display_string();
                Ok(self.create_event(&interface).into())
            }
            _ => Err(HostError::no_such_member("Document", name)),
        }
    }
}

/// Element node wrapper.
pub struct Element {
    node: NodeRef,
    document: Weak<Document>,
    events: EventTarget,
}

impl Element {
    pub fn class() -> HostClass {
        HostClass::of::<Element>("Element")
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Lower-case local name.
    pub fn local_name(&self) -> String {
        self.node
            .as_element()
            .map(|data| data.name.local.as_ref().to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn tag_name(&self) -> String {
        self.local_name().to_ascii_uppercase()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        let data = self.node.as_element()?;
        let attributes = data.attributes.borrow();
        attributes.get(name).map(str::to_string)
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        if let Some(data) = self.node.as_element() {
            data.attributes
                .borrow_mut()
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    pub fn remove_attribute(&self, name: &str) {
        if let Some(data) = self.node.as_element() {
            data.attributes.borrow_mut().remove(name);
        }
    }

    pub fn text_content(&self) -> String {
        self.node.text_contents()
    }

    pub fn set_text_content(&self, text: &str) {
        for child in self.node.children().collect::<Vec<_>>() {
            child.detach();
        }
        if !text.is_empty() {
            self.node.append(NodeRef::new_text(text));
        }
    }

    pub fn inner_html(&self) -> String {
        self.node.children().map(|child| child.to_string()).collect()
    }

    pub fn outer_html(&self) -> String {
        self.node.to_string()
    }

    pub fn events(&self) -> &EventTarget {
        &self.events
    }

    fn document(&self) -> Result<Rc<Document>, HostError> {
        self.document.upgrade().ok_or(HostError::Detached)
    }

    fn as_value(&self) -> HostValue {
        self.document()
            .map_or(HostValue::Null, |document| HostValue::from(document.element(&self.node)))
    }

    fn parent_node(&self) -> Result<HostValue, HostError> {
        let document = self.document()?;
        Ok(match self.node.parent() {
            Some(parent) if parent.as_element().is_some() => document.element(&parent).into(),
            Some(parent) if parent.as_document().is_some() => HostValue::from(document),
            _ => HostValue::Null,
        })
    }
}

impl HostObject for Element {
    fn class(&self) -> HostClass {
        Element::class()
    }

    fn has_property(&self, name: &str) -> bool {
        matches!(
            name,
            "tagName"
                | "nodeName"
                | "nodeType"
                | "id"
                | "className"
                | "textContent"
                | "innerHTML"
                | "outerHTML"
                | "parentNode"
                | "ownerDocument"
        ) || handler_type(name).is_some()
    }

    fn get_property(&self, name: &str) -> Result<HostValue, HostError> {
        Ok(match name {
            "tagName" | "nodeName" => self.tag_name().into(),
            "nodeType" => 1.into(),
            "id" => self.attribute("id").unwrap_or_default().into(),
            "className" => self.attribute("class").unwrap_or_default().into(),
            "textContent" => self.text_content().into(),
            "innerHTML" => self.inner_html().into(),
            "outerHTML" => self.outer_html().into(),
            "parentNode" => self.parent_node()?,
            "ownerDocument" => HostValue::from(self.document()?),
            _ => match handler_type(name) {
                Some(event_type) => self.events.handler(event_type),
                None => return Err(HostError::no_such_member("Element", name)),
            },
        })
    }

    fn has_setter(&self, name: &str) -> bool {
        matches!(name, "id" | "className" | "textContent") || handler_type(name).is_some()
    }

    fn set_property(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        match name {
            "id" => self.set_attribute("id", &value.to_display_string()),
            "className" => self.set_attribute("class", &value.to_display_string()),
            "textContent" => self.set_text_content(&value.to_display_string()),
            _ => match handler_type(name) {
                Some(event_type) => self.events.set_handler(event_type, value),
                None => return Err(HostError::no_such_member("Element", name)),
            },
        }
        Ok(())
    }

    fn responds_to(&self, name: &str) -> bool {
        matches!(
            name,
            "getAttribute"
                | "setAttribute"
                | "hasAttribute"
                | "removeAttribute"
                | "getElementsByTagName"
                | "querySelector"
                | "querySelectorAll"
        ) || is_target_method(name)
    }

    fn call_method(
        &self,
        scope: &dyn ScriptScope,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostError> {
        if let Some(result) = call_target_method(&self.events, scope, self.as_value(), name, &args) {
            return result;
        }
        match name {
            "getAttribute" => {
                let attribute = string_arg(&args, 0, "attribute name")?;
                Ok(self.attribute(&attribute).into())
            }
            "setAttribute" => {
                let attribute = string_arg(&args, 0, "attribute name")?;
                self.set_attribute(&attribute, &arg(&args, 1).to_display_string());
                Ok(HostValue::Undefined)
            }
            "hasAttribute" => {
                let attribute = string_arg(&args, 0, "attribute name")?;
                Ok(self.attribute(&attribute).is_some().into())
            }
            "removeAttribute" => {
                let attribute = string_arg(&args, 0, "attribute name")?;
                self.remove_attribute(&attribute);
                Ok(HostValue::Undefined)
            }
            "getElementsByTagName" => {
                let tag = string_arg(&args, 0, "tag name")?;
                Ok(element_list(self.document()?.collect_by_tag(&self.node, &tag)))
            }
            "querySelector" => {
                let selectors = string_arg(&args, 0, "selector")?;
                let found = self.document()?.select_within(&self.node, &selectors)?;
                Ok(found.into_iter().next().into())
            }
            "querySelectorAll" => {
                let selectors = string_arg(&args, 0, "selector")?;
                Ok(element_list(self.document()?.select_within(&self.node, &selectors)?))
            }
            _ => Err(HostError::no_such_member("Element", name)),
        }
    }

    /// Attribute access by name, `element['src']`.
    fn supports_index(&self) -> bool {
        true
    }

    fn index(&self, key: &str) -> Result<HostValue, HostError> {
        self.attribute(key)
            .map(HostValue::from)
            .ok_or_else(|| HostError::no_such_member("Element", key))
    }

    fn supports_index_set(&self) -> bool {
        true
    }

    fn index_set(&self, key: &str, value: HostValue) -> Result<(), HostError> {
        self.set_attribute(key, &value.to_display_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(html: &str) -> Rc<Document> {
        Document::build(None, html, &DocumentOptions::default())
    }

    #[test]
    fn finds_elements_in_document_order() {
        let document = build("<p id=a>one</p><div><p id=b>two</p></div><P id=c></P>");
        let ids: Vec<String> = document
            .get_elements_by_tag_name("p")
            .iter()
            .map(|p| p.attribute("id").unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(document.get_element_by_id("b").unwrap().text_content(), "two");
        assert!(document.get_element_by_id("missing").is_none());
    }

    #[test]
    fn element_wrappers_are_cached() {
        let document = build("<p id=a>one</p>");
        let first = document.get_element_by_id("a").unwrap();
        let second = document.get_elements_by_tag_name("p").remove(0);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn selectors() {
        let document = build("<ul><li class=x>1</li><li>2</li><li class=x>3</li></ul>");
        let found = document.query_selector_all("li.x").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(document.query_selector("li").unwrap().unwrap().text_content(), "1");
        assert!(document.query_selector("li[").is_err());
    }

    #[test]
    fn title_and_url() {
        let document = Document::build(
            None,
            "<title> Hello </title>",
            &DocumentOptions {
                url: Some(Url::parse("http://x/a").unwrap()),
                ..DocumentOptions::default()
            },
        );
        assert_eq!(document.title(), "Hello");
        assert_eq!(document.url_string(), "http://x/a");
        assert_eq!(build("").url_string(), "about:blank");
    }

    #[test]
    fn text_content_replaces_children() {
        let document = build("<div id=d><b>bold</b> text</div>");
        let div = document.get_element_by_id("d").unwrap();
        assert_eq!(div.inner_html(), "<b>bold</b> text");
        div.set_text_content("plain");
        assert_eq!(div.outer_html(), "<div id=\"d\">plain</div>");
    }

    #[test]
    fn attributes_are_indexable() {
        let document = build("<iframe src=b.html name=child></iframe>");
        let frame = document.get_elements_by_tag_name("iframe").remove(0);
        assert_eq!(frame.index("src").unwrap(), HostValue::from("b.html"));
        assert!(frame.index("nope").is_err());
        frame.index_set("title", HostValue::from("t")).unwrap();
        assert_eq!(frame.attribute("title").as_deref(), Some("t"));
        frame.remove_attribute("title");
        assert_eq!(frame.attribute("title"), None);
    }

    #[test]
    fn tag_lookup_ignores_case() {
        let document = build("<DIV id=d></DIV><svg><foreignObject id=f></foreignObject></svg>");
        let divs = document.get_elements_by_tag_name("Div");
        assert_eq!(divs.len(), 1);
        assert_eq!(divs[0].local_name(), "div");
        assert_eq!(divs[0].tag_name(), "DIV");
        let foreign = document.get_element_by_id("f").unwrap();
        assert_eq!(foreign.local_name(), "foreignobject");
        assert_eq!(document.get_elements_by_tag_name("FOREIGNOBJECT").len(), 1);
    }

    #[test]
    fn parent_node_walks_up() {
        let document = build("<div id=d><span id=s></span></div>");
        let span = document.get_element_by_id("s").unwrap();
        let parent = span.get_property("parentNode").unwrap();
        let div = parent.downcast::<Element>().unwrap();
        assert_eq!(div.attribute("id").as_deref(), Some("d"));
    }
}
