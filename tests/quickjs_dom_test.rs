use std::rc::Rc;

use quickwindow::{HostValue, LoadOptions, MapFetcher, Window, WindowConfig};

fn loaded(html: &str) -> Window {
    let window = Window::new(WindowConfig::default(), Rc::new(MapFetcher::new()));
    window.load(Some(html), LoadOptions::default()).expect("load");
    window
}

fn eval(window: &Window, source: &str) -> HostValue {
    window.evaluate(source, Some("test.js"), None).expect("evaluate")
}

#[test]
fn test_element_proxies_keep_identity() {
    let window = loaded(r#"<div id="target">Initial</div>"#);
    assert_eq!(
        eval(&window, "document.getElementById('target') === document.getElementById('target')"),
        HostValue::Bool(true)
    );
    assert_eq!(
        eval(&window, "document.body === document.querySelector('body')"),
        HostValue::Bool(true)
    );
    assert_eq!(
        eval(&window, "window.window === window && window.self === window"),
        HostValue::Bool(true)
    );
}

#[test]
fn test_script_writes_reach_the_document() {
    let window = loaded(
        r#"<div id="target">Initial</div>
        <script>document.getElementById('target').textContent = 'Updated';</script>"#,
    );
    let document = window.document().expect("document");
    let target = document.get_element_by_id("target").expect("target");
    assert_eq!(target.text_content(), "Updated");
}

#[test]
fn test_missing_members_read_as_undefined() {
    let window = loaded("<p>hi</p>");
    assert_eq!(eval(&window, "document.body.noSuchThing"), HostValue::Undefined);
    assert_eq!(eval(&window, "document.getElementById('nope')"), HostValue::Null);
    assert_eq!(
        eval(&window, "typeof window.getComputedStyle(document.body)"),
        HostValue::from("undefined")
    );
}

#[test]
fn test_expando_properties_live_on_the_proxy() {
    let window = loaded("");
    assert_eq!(eval(&window, "window.answer = 42; window.answer"), HostValue::from(42));
    assert_eq!(eval(&window, "'answer' in window"), HostValue::Bool(true));
}

#[test]
fn test_attributes_through_index_access() {
    let window = loaded(r#"<a id="link" href="/next">next</a>"#);
    assert_eq!(
        eval(&window, "document.getElementById('link').getAttribute('href')"),
        HostValue::from("/next")
    );
    eval(&window, "document.getElementById('link').setAttribute('data-x', 'y')");
    let link = window
        .document()
        .and_then(|document| document.get_element_by_id("link"))
        .expect("link");
    assert_eq!(link.attribute("data-x").as_deref(), Some("y"));
}

#[test]
fn test_host_classes_construct_and_match_instances() {
    let window = loaded("");
    assert_eq!(
        eval(&window, "var e = new Event('ping'); [e.type, e instanceof Event]"),
        HostValue::List(vec!["ping".into(), true.into()])
    );
    assert_eq!(eval(&window, "document instanceof Document"), HostValue::Bool(true));
    assert_eq!(eval(&window, "window instanceof Window"), HostValue::Bool(true));
}

#[test]
fn test_script_listeners_receive_dispatched_events() {
    let window = loaded("");
    let result = eval(
        &window,
        r#"
        var got = [];
        document.addEventListener('ping', function (event) {
            got.push(event.type);
            event.preventDefault();
        });
        var allowed = document.dispatchEvent(new Event('ping', { cancelable: true }));
        [got.length, got[0], allowed]
        "#,
    );
    assert_eq!(
        result,
        HostValue::List(vec![1.into(), "ping".into(), false.into()])
    );
}

#[test]
fn test_console_messages_are_collected() {
    let window = loaded("<script>console.log('hello', 1); console.error('bad');</script>");
    let messages: Vec<String> = window
        .console()
        .messages()
        .into_iter()
        .map(|message| message.text)
        .collect();
    assert_eq!(messages, vec!["hello 1", "bad"]);
}

#[test]
fn test_navigator_and_screen_are_exposed() {
    let window = loaded("");
    assert_eq!(eval(&window, "navigator.appName"), HostValue::from("Netscape"));
    assert_eq!(eval(&window, "window.screen.width"), HostValue::from(1024));
    assert_eq!(eval(&window, "window.innerHeight"), HostValue::from(768));
}

#[test]
fn test_bridge_internals_are_not_globals() {
    let window = loaded("<p>plain</p>");
    assert_eq!(
        eval(&window, "typeof __quickwindow + ':' + typeof __quickwindow_native"),
        HostValue::from("undefined:undefined")
    );
}
