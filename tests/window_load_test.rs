use std::rc::Rc;

use quickwindow::{
    FetchError, HostValue, LoadOptions, LoadState, MapFetcher, Window, WindowConfig, WindowError,
};

fn window_with(fetcher: &Rc<MapFetcher>) -> Window {
    Window::new(WindowConfig::default(), fetcher.clone())
}

fn global(window: &Window, name: &str) -> HostValue {
    window
        .runtime()
        .expect("runtime")
        .global(name)
        .expect("read global")
}

#[test]
fn test_failed_external_script_aborts_after_earlier_scripts_ran() {
    let fetcher = Rc::new(MapFetcher::new().with(
        "http://site.test/index.html",
        r#"<script>var counter = 1;</script><script src="missing.js"></script><script>counter = 2;</script>"#,
    ));
    let window = window_with(&fetcher);

    let err = window
        .load(Some("http://site.test/index.html"), LoadOptions::default())
        .expect_err("missing script should fail the load");

    assert!(matches!(err, WindowError::Network(FetchError::Network { .. })));
    assert_eq!(global(&window, "counter"), HostValue::from(1));
    assert_ne!(window.state(), LoadState::Ready);
    assert_eq!(
        fetcher.requests(),
        vec!["http://site.test/index.html", "http://site.test/missing.js"]
    );
}

#[test]
fn test_frames_load_recursively_with_resolved_urls() {
    let fetcher = Rc::new(
        MapFetcher::new()
            .with(
                "http://site.test/a.html",
                r#"<title>A</title><iframe name="child" src="b.html"></iframe>"#,
            )
            .with(
                "http://site.test/b.html",
                r#"<script>
                    var isChild = window.parent !== window;
                    var parentUrl = window.parent.location.href;
                </script>"#,
            ),
    );
    let window = window_with(&fetcher);
    window
        .load(Some("http://site.test/a.html"), LoadOptions::default())
        .expect("load");

    let frames = window.frames();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.name(), "child");
    assert_eq!(frame.url(), "http://site.test/b.html");
    assert!(frame.parent().expect("parent").ptr_eq(&window));
    assert!(frame.top().ptr_eq(&window));
    assert!(!frame.is_top_level());
    assert_eq!(frame.state(), LoadState::Ready);
    assert_eq!(global(frame, "isChild"), HostValue::Bool(true));
    assert_eq!(global(frame, "parentUrl"), HostValue::from("http://site.test/a.html"));
    assert!(frame.history().is_empty(), "first frame navigation is an assignment");
    assert_eq!(
        fetcher.requests(),
        vec!["http://site.test/a.html", "http://site.test/b.html"]
    );
}

fn frame_page(label: &str, frames: &str) -> String {
    format!(
        r#"<script>
            window.top.console.log('{label} script');
            setTimeout(function () {{ window.top.console.log('{label} task'); }}, 0);
        </script>{frames}"#
    )
}

#[test]
fn test_each_frame_finishes_its_tasks_before_the_next_one_loads() {
    let fetcher = Rc::new(
        MapFetcher::new()
            .with(
                "http://site.test/top.html",
                frame_page(
                    "top",
                    r#"<iframe name="one" src="one.html"></iframe><iframe name="two" src="two.html"></iframe>"#,
                ),
            )
            .with(
                "http://site.test/one.html",
                frame_page("one", r#"<iframe name="nested" src="nested.html"></iframe>"#),
            )
            .with("http://site.test/nested.html", frame_page("nested", ""))
            .with("http://site.test/two.html", frame_page("two", "")),
    );
    let window = window_with(&fetcher);
    window
        .load(Some("http://site.test/top.html"), LoadOptions::default())
        .expect("load");

    let order: Vec<String> = window
        .console()
        .messages()
        .into_iter()
        .map(|message| message.text)
        .collect();
    assert_eq!(
        order,
        vec![
            "top script",
            "one script",
            "nested script",
            "nested task",
            "one task",
            "two script",
            "two task",
            "top task",
        ]
    );

    let frames = window.frames();
    let names: Vec<String> = frames.iter().map(Window::name).collect();
    assert_eq!(names, vec!["one", "two"]);
    let nested = frames[0].frames();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].url(), "http://site.test/nested.html");
    assert!(nested[0].top().ptr_eq(&window));
    assert!(nested[0].parent().expect("parent").ptr_eq(&frames[0]));
    assert_eq!(
        fetcher.requests(),
        vec![
            "http://site.test/top.html",
            "http://site.test/one.html",
            "http://site.test/nested.html",
            "http://site.test/two.html",
        ]
    );
}

#[test]
fn test_frame_without_source_is_kept_unloaded() {
    let fetcher = Rc::new(MapFetcher::new());
    let window = window_with(&fetcher);
    window
        .load(Some(r#"<iframe name="empty"></iframe>"#), LoadOptions::default())
        .expect("load");

    let frames = window.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].name(), "empty");
    assert!(frames[0].document().is_none());
    assert!(fetcher.requests().is_empty());
}

#[test]
fn test_load_event_reaches_listeners_then_handler() {
    let fetcher = Rc::new(MapFetcher::new());
    let window = window_with(&fetcher);
    window
        .load(
            Some(
                r#"<script>
                    var fired = [];
                    window.addEventListener('load', function (event) {
                        fired.push('listener:' + event.type);
                    });
                    window.onload = function () { fired.push('onload'); };
                </script>"#,
            ),
            LoadOptions::default(),
        )
        .expect("load");

    assert_eq!(
        global(&window, "fired"),
        HostValue::List(vec!["listener:load".into(), "onload".into()])
    );
    assert_eq!(window.state(), LoadState::Ready);
}

#[test]
fn test_script_errors_are_recorded_and_loading_continues() {
    let fetcher = Rc::new(
        MapFetcher::new().with("http://site.test/bad.js", "throw new TypeError('nope');"),
    );
    let window = window_with(&fetcher);
    window
        .load(
            Some(
                r#"<script>throw new Error('boom');</script>
                <script src="bad.js"></script>
                <script>var after = true;</script>"#,
            ),
            LoadOptions::with_url("http://site.test/page.html"),
        )
        .expect("script errors do not fail the load");

    let errors = window.script_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].message.contains("boom"), "{}", errors[0]);
    assert!(errors[1].message.contains("nope"), "{}", errors[1]);
    assert_eq!(errors[0].file, None);
    assert_eq!(errors[1].file.as_deref(), Some("bad.js"));
    assert_eq!(global(&window, "after"), HostValue::Bool(true));
    assert_eq!(window.state(), LoadState::Ready);
}

#[test]
fn test_inline_markup_resolves_against_the_given_url() {
    let fetcher = Rc::new(
        MapFetcher::new().with("http://site.test/dir/lib.js", "var loaded = 'lib';"),
    );
    let window = window_with(&fetcher);
    window
        .load(
            Some(r#"<script src="lib.js"></script>"#),
            LoadOptions::with_url("http://site.test/dir/page.html"),
        )
        .expect("load");

    assert_eq!(window.url(), "http://site.test/dir/page.html");
    assert_eq!(global(&window, "loaded"), HostValue::from("lib"));
}

#[test]
fn test_url_option_alone_fetches_the_page() {
    let fetcher = Rc::new(
        MapFetcher::new().with("http://site.test/a.html", "<title>From the network</title>"),
    );
    let window = window_with(&fetcher);
    window
        .load(None, LoadOptions::with_url("http://site.test/a.html"))
        .expect("load");

    let document = window.document().expect("document");
    assert_eq!(document.title(), "From the network");
    assert_eq!(document.url_string(), "http://site.test/a.html");
}

#[test]
fn test_missing_input_is_rejected() {
    let window = window_with(&Rc::new(MapFetcher::new()));
    let err = window
        .load(None, LoadOptions::default())
        .expect_err("nothing to load");
    assert!(matches!(err, WindowError::MissingInput));
    assert_eq!(err.to_string(), "can't load without either html or url");
}

#[test]
fn test_scripting_disabled_document_still_runs_pipeline() {
    let window = window_with(&Rc::new(MapFetcher::new()));
    window
        .load(
            Some("<p id='x'>text</p>"),
            LoadOptions {
                scripting_enabled: false,
                ..LoadOptions::default()
            },
        )
        .expect("load");
    let document = window.document().expect("document");
    assert!(document.get_element_by_id("x").is_some());
    assert_eq!(window.state(), LoadState::Ready);
}
