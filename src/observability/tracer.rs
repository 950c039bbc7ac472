//! Named tracer handles and the process-wide tracer cache.
//!
//! Tracers are created lazily from the global tracer provider and cached by
//! name. When a new pipeline is installed the cache is reset, so handles
//! acquired afterwards bind to the new provider.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{SpanBuilder, SpanKind, TraceContextExt, TracerProvider};
use opentelemetry::{Context, KeyValue};

/// Tracer name used when the caller does not name one.
pub const DEFAULT_TRACER_NAME: &str = "waypoint";

/// A named handle used to start spans.
///
/// Cheap to clone; clones share the same underlying tracer.
#[derive(Clone)]
pub struct Tracer {
    name: Arc<str>,
    inner: Arc<BoxedTracer>,
}

impl Tracer {
    /// Tracer bound to the current global provider.
    fn global(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(global::tracer(name.to_string())),
        }
    }

    /// Tracer bound to an explicit provider instead of the global one.
    pub fn from_provider<P>(provider: &P, name: &str) -> Self
    where
        P: TracerProvider,
        P::Tracer: Send + Sync + 'static,
        <P::Tracer as opentelemetry::trace::Tracer>::Span: Send + Sync + 'static,
    {
        let tracer = provider.tracer(name.to_string());
        Self {
            name: Arc::from(name),
            inner: Arc::new(BoxedTracer::new(Box::new(tracer))),
        }
    }

    /// The name this tracer was requested under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both handles share the same underlying tracer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start a span as a child of `parent` and return the child context.
    pub(crate) fn start_child(
        &self,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Context {
        let span = SpanBuilder::from_name(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(self.inner.as_ref(), parent);
        parent.with_span(span)
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("name", &self.name).finish()
    }
}

/// Process-wide cache of tracers keyed by name.
#[derive(Default)]
pub struct TracerRegistry {
    tracers: RwLock<HashMap<String, Tracer>>,
}

impl TracerRegistry {
    /// Return the cached tracer for `name`, creating it if absent.
    pub fn get_or_create(&self, name: &str) -> Tracer {
        if let Some(tracer) = self
            .tracers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return tracer.clone();
        }

        // Re-check under the write lock: another thread may have won the race.
        self.tracers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Tracer::global(name))
            .clone()
    }

    /// Number of cached tracers.
    pub fn len(&self) -> usize {
        self.tracers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached tracer.
    pub(crate) fn reset(&self) {
        self.tracers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

static TRACERS: OnceLock<TracerRegistry> = OnceLock::new();

/// The process-wide tracer registry.
pub fn tracer_registry() -> &'static TracerRegistry {
    TRACERS.get_or_init(TracerRegistry::default)
}

/// Get (creating if absent) the tracer for `module_name`.
///
/// Never fails: without an installed pipeline the global no-op tracer is used.
pub fn get_tracer(module_name: &str) -> Tracer {
    tracer_registry().get_or_create(module_name)
}
