use std::rc::Rc;

use quickwindow::{HostValue, LoadOptions, MapFetcher, Window, WindowConfig};

fn window() -> Window {
    Window::new(WindowConfig::default(), Rc::new(MapFetcher::new()))
}

fn global(window: &Window, name: &str) -> HostValue {
    window.runtime().expect("runtime").global(name).expect("global")
}

#[test]
fn test_load_drains_tasks_to_a_fixed_point() {
    let window = window();
    window
        .load(
            Some(
                r#"<script>
                    var order = [];
                    setTimeout(function () {
                        order.push('a');
                        setTimeout(function () { order.push('c'); }, 0);
                    }, 10);
                    setTimeout(function () { order.push('b'); });
                    window.onload = function () {
                        setTimeout(function () { order.push('after-load'); }, 0);
                    };
                </script>"#,
            ),
            LoadOptions::default(),
        )
        .expect("load");

    assert_eq!(
        global(&window, "order"),
        HostValue::List(vec!["a".into(), "b".into(), "after-load".into(), "c".into()])
    );
    assert!(window.tasks().is_empty());
}

#[test]
fn test_timer_arguments_and_source_callbacks() {
    let window = window();
    window
        .load(
            Some(
                r#"<script>
                    var sum = 0;
                    setTimeout(function (a, b) { sum = a + b; }, 0, 2, 3);
                    setTimeout("var fromSource = true;", 0);
                </script>"#,
            ),
            LoadOptions::default(),
        )
        .expect("load");

    assert_eq!(global(&window, "sum"), HostValue::from(5));
    assert_eq!(global(&window, "fromSource"), HostValue::Bool(true));
}

#[test]
fn test_cleared_timeout_never_runs() {
    let window = window();
    window
        .load(
            Some(
                r#"<script>
                    var ran = false;
                    var id = setTimeout(function () { ran = true; }, 0);
                    clearTimeout(id);
                </script>"#,
            ),
            LoadOptions::default(),
        )
        .expect("load");

    assert_eq!(global(&window, "ran"), HostValue::Bool(false));
}

#[test]
fn test_interval_runs_once_per_drain_until_cleared() {
    let window = window();
    window
        .load(
            Some(
                r#"<script>
                    var ticks = 0;
                    var id = setInterval(function () {
                        ticks++;
                        if (ticks === 3) clearInterval(id);
                    }, 5);
                </script>"#,
            ),
            LoadOptions::default(),
        )
        .expect("load");

    assert_eq!(global(&window, "ticks"), HostValue::from(1));
    assert_eq!(window.tasks().len(), 1);

    assert_eq!(window.drain_tasks(), 1);
    assert_eq!(window.drain_tasks(), 1);
    assert_eq!(global(&window, "ticks"), HostValue::from(3));
    assert!(window.tasks().is_empty());
}

#[test]
fn test_finished_callbacks_are_not_kept_alive() {
    let window = window();
    window
        .load(
            Some(
                r#"<script>
                    for (var i = 0; i < 5000; i++) {
                        clearTimeout(setTimeout(function () {}, 0));
                    }
                    var listener = function () {};
                    window.addEventListener('load', listener);
                    window.removeEventListener('load', listener);
                    setTimeout(function () { var done = true; }, 0);
                </script>"#,
            ),
            LoadOptions::default(),
        )
        .expect("load");

    let runtime = window.runtime().expect("runtime");
    assert!(window.tasks().is_empty());
    assert_eq!(runtime.retained_functions().expect("count"), 0);
}
