use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rquickjs::{Context, Ctx, Error as JsError, Runtime, Value};

use super::bridge::{report, ValueBridge};
use super::value::{HostValue, ScriptFunction, ScriptScope};
use crate::config::ScriptConfig;
use crate::error::{EvaluationError, HostError, RuntimeError};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// JavaScript runtime backed by QuickJS, owned by exactly one window.
///
/// The runtime owns the QuickJS runtime, the current context, the value
/// bridge that marshals host objects into it, and the list of globals bound
/// by the last [`bind`](Self::bind) call. [`reset`](Self::reset) swaps in a
/// fresh context so each document starts from a clean global scope.
pub struct ScriptRuntime {
    id: Cell<u64>,
    context: RefCell<Context>,
    runtime: Runtime,
    bridge: RefCell<Rc<ValueBridge>>,
    bound: RefCell<Vec<String>>,
    busy: Cell<bool>,
    max_pending_jobs: usize,
    max_depth: usize,
}

impl ScriptRuntime {
    pub fn new(config: &ScriptConfig) -> Result<Self, RuntimeError> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let (id, context, bridge) = fresh_context(&runtime, config.max_bridge_depth)?;

        tracing::debug!(target: "quickwindow::script", runtime = id, "created script runtime");
        Ok(Self {
            id: Cell::new(id),
            context: RefCell::new(context),
            runtime,
            bridge: RefCell::new(bridge),
            bound: RefCell::new(Vec::new()),
            busy: Cell::new(false),
            max_pending_jobs: config.max_pending_jobs,
            max_depth: config.max_bridge_depth,
        })
    }

    /// Identity of the current context. Changes on every [`reset`](Self::reset).
    pub fn id(&self) -> u64 {
        self.id.get()
    }

    pub(crate) fn bridge(&self) -> Rc<ValueBridge> {
        Rc::clone(&self.bridge.borrow())
    }

    /// Discard the current context and start a new one on the same engine.
    ///
    /// Globals, forwarders, proxies and retained functions of the old context
    /// are gone afterwards; script functions handed out before the reset are
    /// refused by [`call`](Self::call).
    pub fn reset(&self) -> Result<(), RuntimeError> {
        if self.busy.get() {
            return Err(RuntimeError::Busy);
        }
        let (id, context, bridge) = fresh_context(&self.runtime, self.max_depth)?;
        let previous = self.id.replace(id);
        self.bridge.replace(bridge).detach();
        drop(self.context.replace(context));
        self.bound.borrow_mut().clear();
        self.runtime.run_gc();
        tracing::debug!(target: "quickwindow::script", previous, context = id, "reset script context");
        Ok(())
    }

    /// Number of script functions currently kept alive for host values.
    pub fn retained_functions(&self) -> Result<usize, RuntimeError> {
        let bridge = self.bridge();
        self.enter(|ctx| bridge.retained_count(&ctx))?
            .map_err(|err| RuntimeError::Bridge(err.to_string()))
    }

    /// Run `f` inside the context. The engine cannot be entered twice; host
    /// code running under a trap must use the scope it was handed instead.
    pub(crate) fn enter<F, R>(&self, f: F) -> Result<R, RuntimeError>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        if self.busy.replace(true) {
            return Err(RuntimeError::Busy);
        }
        let _guard = BusyGuard(&self.busy);
        let context = self.context.borrow().clone();
        let bridge = self.bridge();
        Ok(context.with(|ctx| {
            if let Err(err) = bridge.release_pending(&ctx) {
                report(&err, "releasing script functions failed");
            }
            f(ctx)
        }))
    }

    /// Evaluate `source`, reporting the engine's diagnostic as an
    /// [`EvaluationError`] tagged with `origin_name` and a line number.
    ///
    /// `origin_line` is the line of the document the source starts on; the
    /// engine's line numbers are shifted to match it.
    pub fn evaluate(
        &self,
        source: &str,
        origin_name: Option<&str>,
        origin_line: Option<u32>,
    ) -> Result<HostValue, EvaluationError> {
        let script = with_source_url(source, origin_name, origin_line);
        let bridge = self.bridge();
        let result = self
            .enter(|ctx| match ctx.eval::<Value, _>(script) {
                Ok(value) => Ok(bridge.to_host(&ctx, &value).unwrap_or_else(|err| {
                    report(&err, "evaluation result conversion failed");
                    HostValue::Undefined
                })),
                Err(JsError::Exception) => Err(capture_exception(&ctx, origin_name, origin_line)),
                Err(err) => Err(EvaluationError {
                    file: origin_name.map(str::to_string),
                    line: origin_line,
                    ..EvaluationError::new(err.to_string())
                }),
            })
            .map_err(|err| EvaluationError::new(err.to_string()))?;

        self.execute_pending_jobs();
        result
    }

    /// Call a script function previously handed to the host.
    pub fn call(&self, function: &ScriptFunction, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        let bridge = self.bridge();
        let result = self
            .enter(|ctx| bridge.call_script(&ctx, function, args))
            .map_err(|err| HostError::Script(err.to_string()))?;
        self.execute_pending_jobs();
        Ok(result?)
    }

    /// Replace the bound globals. Names bound by the previous call are
    /// deleted first so nothing from an earlier document survives.
    pub fn bind(&self, bindings: Vec<(String, HostValue)>) -> Result<(), RuntimeError> {
        let bridge = self.bridge();
        let mut bound = self.bound.borrow_mut();
        let previous = std::mem::take(&mut *bound);
        self.enter(|ctx| -> rquickjs::Result<()> {
            let globals = ctx.globals();
            for name in &previous {
                globals.remove(name.as_str())?;
            }
            for (name, value) in &bindings {
                globals.set(name.as_str(), bridge.to_script(&ctx, value))?;
            }
            Ok(())
        })??;
        bound.extend(bindings.into_iter().map(|(name, _)| name));
        tracing::debug!(target: "quickwindow::script", globals = ?*bound, "bound globals");
        Ok(())
    }

    /// Read a global as a host value.
    pub fn global(&self, name: &str) -> Result<HostValue, RuntimeError> {
        let bridge = self.bridge();
        self.enter(|ctx| -> Result<HostValue, RuntimeError> {
            let value: Value = ctx.globals().get(name)?;
            Ok(bridge.to_host(&ctx, &value).unwrap_or_else(|err| {
                report(&err, "global conversion failed");
                HostValue::Undefined
            }))
        })?
    }

    /// Define bare globals that forward to members of another global, so
    /// `setTimeout(...)` reaches `window.setTimeout(...)`.
    pub fn forward(&self, target: &str, names: &[&str]) -> Result<(), RuntimeError> {
        let mut source = String::new();
        for name in names {
            source.push_str(&format!(
                "globalThis.{name} = function {name}(...args) {{ return globalThis.{target}.{name}(...args); }};\n"
            ));
        }
        self.enter(|ctx| ctx.eval::<(), _>(source))??;
        Ok(())
    }

    /// Scope for host code that calls into script from outside a trap.
    pub fn scope(&self) -> RuntimeScope<'_> {
        RuntimeScope { runtime: self }
    }

    /// Execute all pending jobs in the QuickJS job queue.
    ///
    /// This processes promise continuations queued by the evaluation that
    /// just finished.
    fn execute_pending_jobs(&self) {
        if self.busy.replace(true) {
            return;
        }
        let _guard = BusyGuard(&self.busy);

        let mut job_count = 0;
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= self.max_pending_jobs {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            self.max_pending_jobs
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(target: "quickjs", "Job execution error: {:?}", job_exception);
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        self.bridge.borrow().detach();
    }
}

fn fresh_context(runtime: &Runtime, max_depth: usize) -> Result<(u64, Context, Rc<ValueBridge>), RuntimeError> {
    let context = Context::full(runtime)?;
    let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
    let bridge = Rc::new(ValueBridge::new(id, max_depth));
    context.with(|ctx| ValueBridge::install(&bridge, &ctx))?;
    Ok((id, context, bridge))
}

struct BusyGuard<'a>(&'a Cell<bool>);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct RuntimeScope<'a> {
    runtime: &'a ScriptRuntime,
}

impl ScriptScope for RuntimeScope<'_> {
    fn call(&self, function: &ScriptFunction, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        self.runtime.call(function, args)
    }

    fn evaluate(&self, source: &str) -> Result<HostValue, HostError> {
        self.runtime
            .evaluate(source, None, None)
            .map_err(|err| HostError::Script(err.to_string()))
    }
}

/// Pad the source so engine line numbers line up with the document, and tag
/// it with its origin.
fn with_source_url(source: &str, origin_name: Option<&str>, origin_line: Option<u32>) -> Vec<u8> {
    let padding = origin_line.unwrap_or(1).saturating_sub(1) as usize;
    let mut script = String::with_capacity(source.len() + padding + 32);
    script.extend(std::iter::repeat('\n').take(padding));
    script.push_str(source);
    if let Some(filename) = origin_name {
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
    }
    script.into_bytes()
}

/// Take the pending exception off the context and describe it.
pub(crate) fn capture_exception(
    ctx: &Ctx<'_>,
    origin_name: Option<&str>,
    origin_line: Option<u32>,
) -> EvaluationError {
    let exception: Value = ctx.catch();
    let mut error = EvaluationError {
        file: origin_name.map(str::to_string),
        line: origin_line,
        ..EvaluationError::new("uncaught exception")
    };

    if let Some(obj) = exception.as_object() {
        let message = obj.get::<_, String>("message").unwrap_or_default();
        error.message = match obj.get::<_, String>("name") {
            Ok(name) if !message.is_empty() => format!("{name}: {message}"),
            Ok(name) => name,
            Err(_) => message,
        };
        if let Ok(stack) = obj.get::<_, String>("stack") {
            if let Some(line) = stack_line(&stack) {
                error.line = Some(line);
            }
            error.stack = Some(stack);
        }
        if let Ok(Some(line)) = obj.get::<_, Option<u32>>("lineNumber") {
            error.line = Some(line);
        }
    } else if let Some(text) = exception.as_string().and_then(|s| s.to_string().ok()) {
        error.message = text;
    } else if let Some(n) = exception.as_number() {
        error.message = HostValue::Number(n).to_display_string();
    } else if let Some(b) = exception.as_bool() {
        error.message = b.to_string();
    }
    error
}

/// First `file:line` location in a QuickJS stack trace.
fn stack_line(stack: &str) -> Option<u32> {
    stack.lines().find_map(|line| {
        let start = line.find('(')? + 1;
        let end = line[start..].find(')')? + start;
        line[start..end].split(':').nth(1)?.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::value::HostFunction;

    fn runtime() -> ScriptRuntime {
        ScriptRuntime::new(&ScriptConfig::default()).expect("runtime")
    }

    #[test]
    fn evaluates_to_host_values() {
        let runtime = runtime();
        assert_eq!(runtime.evaluate("1 + 2", None, None).unwrap(), HostValue::Number(3.0));
        assert_eq!(
            runtime.evaluate("'a' + 'b'", None, None).unwrap(),
            HostValue::from("ab")
        );
        assert_eq!(
            runtime.evaluate("[1, 'x', null]", None, None).unwrap(),
            HostValue::List(vec![1.into(), "x".into(), HostValue::Null])
        );
    }

    #[test]
    fn script_errors_carry_origin() {
        let runtime = runtime();
        let err = runtime
            .evaluate("let a = 1;\nnull.x;", Some("page.js"), Some(10))
            .expect_err("should fail");
        assert!(err.message.contains("TypeError"), "{err}");
        assert_eq!(err.file.as_deref(), Some("page.js"));
        assert!(err.line.is_some());
    }

    #[test]
    fn thrown_values_become_messages() {
        let runtime = runtime();
        let err = runtime.evaluate("throw 'plain'", None, None).expect_err("throws");
        assert_eq!(err.message, "plain");
        let err = runtime
            .evaluate("throw new RangeError('too far')", None, None)
            .expect_err("throws");
        assert_eq!(err.message, "RangeError: too far");
    }

    #[test]
    fn syntax_errors_are_evaluation_errors() {
        let runtime = runtime();
        let err = runtime.evaluate("function (", Some("bad.js"), None).expect_err("syntax");
        assert!(err.message.contains("SyntaxError"), "{err}");
    }

    #[test]
    fn state_persists_between_evaluations() {
        let runtime = runtime();
        runtime.evaluate("var counter = 1;", None, None).unwrap();
        runtime.evaluate("counter += 1;", None, None).unwrap();
        assert_eq!(runtime.global("counter").unwrap(), HostValue::Number(2.0));
    }

    #[test]
    fn rebinding_removes_stale_globals() {
        let runtime = runtime();
        runtime
            .bind(vec![("first".to_string(), HostValue::from(1))])
            .unwrap();
        runtime
            .bind(vec![("second".to_string(), HostValue::from(2))])
            .unwrap();
        assert_eq!(
            runtime.evaluate("typeof first", None, None).unwrap(),
            HostValue::from("undefined")
        );
        assert_eq!(runtime.global("second").unwrap(), HostValue::Number(2.0));
    }

    #[test]
    fn promise_jobs_run_after_evaluation() {
        let runtime = runtime();
        runtime
            .evaluate("var settled = false; Promise.resolve().then(() => { settled = true; });", None, None)
            .unwrap();
        assert_eq!(runtime.global("settled").unwrap(), HostValue::Bool(true));
    }

    #[test]
    fn forwarders_reach_the_target() {
        let runtime = runtime();
        let target = HostValue::map([(
            "greet",
            HostValue::Callable(HostFunction::new("greet", |_, args| {
                Ok(format!("hi {}", args[0].to_display_string()).into())
            })),
        )]);
        runtime.bind(vec![("host".to_string(), target)]).unwrap();
        runtime.forward("host", &["greet"]).unwrap();
        assert_eq!(
            runtime.evaluate("greet('there')", None, None).unwrap(),
            HostValue::from("hi there")
        );
    }

    #[test]
    fn reset_starts_a_clean_context() {
        let runtime = runtime();
        runtime.bind(vec![("host".to_string(), HostValue::from(1))]).unwrap();
        let HostValue::Function(function) = runtime
            .evaluate("var kept = 1; (function () { return kept; })", None, None)
            .unwrap()
        else {
            panic!("expected script function");
        };
        let before = runtime.id();

        runtime.reset().unwrap();

        assert_ne!(runtime.id(), before);
        assert_eq!(
            runtime.evaluate("typeof kept + ':' + typeof host", None, None).unwrap(),
            HostValue::from("undefined:undefined")
        );
        assert!(runtime.call(&function, vec![]).is_err());
        assert_eq!(runtime.retained_functions().unwrap(), 0);
    }

    #[test]
    fn reset_is_refused_while_running() {
        let runtime = runtime();
        let nested = runtime.enter(|_| runtime.reset());
        assert!(matches!(nested, Ok(Err(RuntimeError::Busy))));
    }

    #[test]
    fn nested_entry_is_refused() {
        let runtime = runtime();
        let nested = runtime.enter(|_| runtime.enter(|_| ()).map(|_| ()));
        assert!(matches!(nested, Ok(Err(RuntimeError::Busy))));
    }

    #[test]
    fn stack_lines_are_parsed() {
        assert_eq!(stack_line("    at <eval> (eval_script:12)\n"), Some(12));
        assert_eq!(stack_line("    at f (page.js:3:7)\n"), Some(3));
        assert_eq!(stack_line("no location"), None);
    }
}
