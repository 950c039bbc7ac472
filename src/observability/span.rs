//! Span creation: call wrappers, scoped guards, and current-span helpers.
//!
//! Every span started here is a child of the current context's active span
//! and is ended exactly once, on every exit path: normal return, `Err`,
//! early return, panic, or a dropped future.
//!
//! ```no_run
//! use waypoint::observability::span::{add_span_attributes, create_span, traced};
//! use waypoint::KeyValue;
//!
//! fn charge(amount: u64) -> Result<u64, std::io::Error> {
//!     traced("charge")
//!         .with_attributes([KeyValue::new("amount", amount as i64)])
//!         .try_run(|| {
//!             let _validate = create_span("validate");
//!             add_span_attributes([KeyValue::new("validated", true)]);
//!             Ok(amount)
//!         })
//! }
//! ```

use std::any::type_name;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use opentelemetry::trace::{FutureExt, SpanContext, SpanId, SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, ContextGuard, KeyValue};

use super::tracer::{get_tracer, Tracer, DEFAULT_TRACER_NAME};

/// Span attribute holding the wrapped call's wall-clock time in milliseconds.
pub const EXECUTION_TIME_MS: &str = "execution_time_ms";

/// Name of the span event recorded for an error.
pub const EXCEPTION_EVENT: &str = "exception";

/// Set once an error has been recorded on the span with id `span_id`.
///
/// Carried in the span's context so that exceptions recorded through the
/// current-span helpers are seen by the wrapper that later sets `Ok`.
#[derive(Debug)]
struct FailureMark {
    span_id: SpanId,
    failed: AtomicBool,
}

fn mark_failed(cx: &Context) {
    if let Some(mark) = cx.get::<FailureMark>() {
        if mark.span_id == cx.span().span_context().span_id() {
            mark.failed.store(true, Ordering::Relaxed);
        }
    }
}

/// A started span that ends when dropped.
pub(crate) struct OpenSpan {
    cx: Context,
    timer: Option<Instant>,
}

impl OpenSpan {
    /// Start a child of the current context.
    pub(crate) fn start(
        tracer: &Tracer,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        timed: bool,
    ) -> Self {
        Self::start_with_parent(tracer, name, kind, attributes, &Context::current(), timed)
    }

    /// Start a child of an explicit parent context.
    pub(crate) fn start_with_parent(
        tracer: &Tracer,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
        timed: bool,
    ) -> Self {
        let cx = tracer.start_child(name, kind, attributes, parent);
        let cx = cx.with_value(FailureMark {
            span_id: cx.span().span_context().span_id(),
            failed: AtomicBool::new(false),
        });
        // Timing starts after span creation so its cost is excluded.
        let timer = timed.then(Instant::now);
        Self { cx, timer }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.cx
    }

    pub(crate) fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub(crate) fn set_status(&self, status: Status) {
        if matches!(status, Status::Error { .. }) {
            mark_failed(&self.cx);
        }
        self.cx.span().set_status(status);
    }

    /// Whether an error has been recorded on this span.
    pub(crate) fn failed(&self) -> bool {
        self.cx
            .get::<FailureMark>()
            .is_some_and(|mark| mark.failed.load(Ordering::Relaxed))
    }

    /// Mark the span successful unless an error was already recorded.
    pub(crate) fn set_ok(&self) {
        if !self.failed() {
            self.cx.span().set_status(Status::Ok);
        }
    }

    pub(crate) fn record_error<E>(&self, err: &E, attributes: Vec<KeyValue>)
    where
        E: fmt::Display + ?Sized,
    {
        record_exception_on(&self.cx, err, attributes);
    }

    pub(crate) fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: fmt::Display,
    {
        match result {
            Ok(_) => self.set_ok(),
            Err(err) => self.record_error(err, Vec::new()),
        }
    }
}

impl Drop for OpenSpan {
    fn drop(&mut self) {
        let span = self.cx.span();
        if let Some(started) = self.timer.take() {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            span.set_attribute(KeyValue::new(EXECUTION_TIME_MS, elapsed_ms));
        }
        if std::thread::panicking() {
            span.set_status(Status::error("panicked"));
        }
        span.end();
    }
}

/// Builder for a traced call.
///
/// Created by [`traced`] or [`timed_span`]; run with one of the `run` forms.
#[derive(Clone, Debug)]
pub struct Traced {
    name: Cow<'static, str>,
    attributes: Vec<KeyValue>,
    kind: SpanKind,
    timed: bool,
    tracer: Option<Tracer>,
}

impl Traced {
    /// A traced call producing a span called `name`.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            kind: SpanKind::Internal,
            timed: false,
            tracer: None,
        }
    }

    /// Static attributes set on the span when it starts.
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Span kind (defaults to `Internal`).
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Start spans from `tracer` instead of the default `waypoint` tracer.
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Record the call's elapsed time as [`EXECUTION_TIME_MS`].
    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }

    fn open(self) -> OpenSpan {
        let tracer = self
            .tracer
            .unwrap_or_else(|| get_tracer(DEFAULT_TRACER_NAME));
        OpenSpan::start(&tracer, self.name, self.kind, self.attributes, self.timed)
    }

    /// Start the span and make it current until the guard drops.
    pub fn enter(self) -> SpanGuard {
        let span = self.open();
        let attached = span.context().clone().attach();
        SpanGuard {
            span,
            _attached: attached,
        }
    }

    /// Run an infallible call inside the span.
    pub fn run<R, F>(self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let guard = self.enter();
        let output = f();
        guard.set_ok();
        output
    }

    /// Run a fallible call inside the span.
    ///
    /// An `Err` is recorded on the span and returned unchanged.
    pub fn try_run<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let guard = self.enter();
        let result = f();
        guard.span.record_result(&result);
        result
    }

    /// Await an infallible future inside the span.
    ///
    /// The span stays open across suspension points; its context is attached
    /// only while this future is being polled.
    pub async fn run_async<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        let span = self.open();
        let output = future.with_context(span.context().clone()).await;
        span.set_ok();
        output
    }

    /// Await a fallible future inside the span.
    pub async fn try_run_async<T, E, F>(self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let span = self.open();
        let result = future.with_context(span.context().clone()).await;
        span.record_result(&result);
        result
    }

    /// Wrap `f` so every invocation runs inside a fresh span.
    pub fn wrap<A, R, F>(self, f: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        move |arg| self.clone().run(|| f(arg))
    }

    /// Like [`Traced::wrap`], recording `Err` results.
    pub fn try_wrap<A, T, E, F>(self, f: F) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        E: fmt::Display,
    {
        move |arg| self.clone().try_run(|| f(arg))
    }
}

/// Trace a call as a span named `name`.
///
/// Spans come from the `waypoint` tracer. Use [`traced_in`] or
/// [`Traced::with_tracer`] to attribute them to the calling module the way
/// `#[traced]` does.
pub fn traced(name: impl Into<Cow<'static, str>>) -> Traced {
    Traced::new(name)
}

/// Trace a call as a span named `name`, started from the tracer for `scope`.
///
/// ```
/// let total = waypoint::traced_in(module_path!(), "sum").run(|| 1 + 2);
/// assert_eq!(total, 3);
/// ```
pub fn traced_in(scope: &str, name: impl Into<Cow<'static, str>>) -> Traced {
    Traced::new(name).with_tracer(get_tracer(scope))
}

/// Trace a call and record its elapsed milliseconds as [`EXECUTION_TIME_MS`].
pub fn timed_span(name: impl Into<Cow<'static, str>>) -> Traced {
    Traced::new(name).timed()
}

/// A span that is current until dropped.
///
/// Holds the thread's context attachment, so it cannot cross threads or be
/// held across `.await`; use [`Traced::run_async`] for async work. Guards
/// must be dropped in reverse order of creation, which normal scoping does.
#[must_use = "the span ends as soon as the guard is dropped"]
pub struct SpanGuard {
    // Field order matters: the span ends before the context is detached.
    span: OpenSpan,
    _attached: ContextGuard,
}

impl SpanGuard {
    /// Set one attribute on the span.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.span.set_attribute(attribute);
    }

    /// Set several attributes on the span.
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        for attribute in attributes {
            self.span.set_attribute(attribute);
        }
    }

    /// Record an error on the span and mark it failed.
    pub fn record_exception<E>(&self, err: &E, attributes: impl IntoIterator<Item = KeyValue>)
    where
        E: fmt::Display + ?Sized,
    {
        self.span.record_error(err, attributes.into_iter().collect());
    }

    /// Mark the span successful. Has no effect once an error was recorded.
    pub fn set_ok(&self) {
        self.span.set_ok();
    }

    /// The context carrying this span.
    pub fn context(&self) -> &Context {
        self.span.context()
    }

    /// Identifiers of this span.
    pub fn span_context(&self) -> SpanContext {
        self.span.context().span().span_context().clone()
    }

    /// End the span now.
    pub fn end(self) {
        drop(self);
    }
}

impl fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanGuard")
            .field("span_context", &self.span_context())
            .finish()
    }
}

/// Start a child span of the current span, current until the guard drops.
///
/// Like [`traced`], spans come from the `waypoint` tracer; for another
/// scope use `traced_in(scope, name).enter()`.
pub fn create_span(name: impl Into<Cow<'static, str>>) -> SpanGuard {
    Traced::new(name).enter()
}

/// [`create_span`] with initial attributes.
pub fn create_span_with_attributes(
    name: impl Into<Cow<'static, str>>,
    attributes: impl IntoIterator<Item = KeyValue>,
) -> SpanGuard {
    Traced::new(name).with_attributes(attributes).enter()
}

/// Merge attributes into the current span. No-op without one.
pub fn add_span_attributes(attributes: impl IntoIterator<Item = KeyValue>) {
    let cx = Context::current();
    if !cx.has_active_span() {
        return;
    }
    let span = cx.span();
    for attribute in attributes {
        span.set_attribute(attribute);
    }
}

/// Record an error on the current span and mark it failed. No-op without one.
///
/// Adds an `exception` event with `exception.type`, `exception.message`,
/// `exception.stacktrace` (when a backtrace was captured) and `attributes`.
pub fn record_exception<E>(err: &E, attributes: impl IntoIterator<Item = KeyValue>)
where
    E: fmt::Display + ?Sized,
{
    let cx = Context::current();
    if !cx.has_active_span() {
        return;
    }
    record_exception_on(&cx, err, attributes.into_iter().collect());
}

/// Identifiers of the current span, if there is one.
pub fn current_span_context() -> Option<SpanContext> {
    let cx = Context::current();
    cx.has_active_span()
        .then(|| cx.span().span_context().clone())
}

fn record_exception_on<E>(cx: &Context, err: &E, extra: Vec<KeyValue>)
where
    E: fmt::Display + ?Sized,
{
    let span = cx.span();
    let message = err.to_string();
    let mut attributes = vec![
        KeyValue::new("exception.type", type_name::<E>()),
        KeyValue::new("exception.message", message.clone()),
    ];
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        attributes.push(KeyValue::new("exception.stacktrace", backtrace.to_string()));
    }
    attributes.extend(extra);
    span.add_event(EXCEPTION_EVENT, attributes);
    span.set_status(Status::error(message));
    mark_failed(cx);
}
