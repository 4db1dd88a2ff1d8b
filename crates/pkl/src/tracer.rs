//! Evaluation tracing infrastructure.
//!
//! A trait-based tracing system with zero-cost abstraction: when using
//! [`NoopTracer`], all trace methods compile away via monomorphization.
//! The `trace(x)` language intrinsic, module-load events, and external
//! reader debug logging (enabled by `PKL_DEBUG=1`) all route through the
//! evaluator's tracer.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable log to stderr |
//! | [`RecordingTracer`] | Captures events for assertions in tests |

/// A single trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The `trace(x)` intrinsic fired: source text of the argument plus the
    /// rendered value.
    Trace { expression: String, rendered: String },
    /// A module was resolved and loaded.
    ModuleLoad { uri: String },
    /// A resource was read.
    ResourceRead { uri: String },
    /// External reader bridge activity (request/response summaries).
    Bridge { detail: String },
}

/// Trait for evaluation tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] needs no
/// code of its own. The evaluator carries the tracer as a type parameter, so
/// no-op calls are eliminated at compile time.
pub trait EvalTracer: std::fmt::Debug {
    /// Called by the `trace(x)` intrinsic with the argument's source text and
    /// its rendered value.
    #[inline]
    fn on_trace(&mut self, _expression: &str, _rendered: &str) {}

    /// Called after a module is loaded and evaluated for the first time.
    #[inline]
    fn on_module_load(&mut self, _uri: &str) {}

    /// Called after a resource read completes.
    #[inline]
    fn on_resource_read(&mut self, _uri: &str) {}

    /// Called for external reader bridge activity when debug logging is on.
    #[inline]
    fn on_bridge(&mut self, _detail: &str) {}
}

/// Zero-cost tracer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Tracer that writes human-readable lines to stderr.
///
/// This is what backs `trace(x)` in the CLI: `pkl: TRACE: expr = value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl EvalTracer for StderrTracer {
    fn on_trace(&mut self, expression: &str, rendered: &str) {
        eprintln!("pkl: TRACE: {expression} = {rendered}");
    }

    fn on_module_load(&mut self, uri: &str) {
        eprintln!("pkl: loaded module {uri}");
    }

    fn on_bridge(&mut self, detail: &str) {
        eprintln!("pkl: bridge: {detail}");
    }
}

/// Tracer that records all events for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rendered values of all `Trace` events, in order.
    #[must_use]
    pub fn traces(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Trace { rendered, .. } => Some(rendered.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EvalTracer for RecordingTracer {
    fn on_trace(&mut self, expression: &str, rendered: &str) {
        self.events.push(TraceEvent::Trace {
            expression: expression.to_owned(),
            rendered: rendered.to_owned(),
        });
    }

    fn on_module_load(&mut self, uri: &str) {
        self.events.push(TraceEvent::ModuleLoad { uri: uri.to_owned() });
    }

    fn on_resource_read(&mut self, uri: &str) {
        self.events.push(TraceEvent::ResourceRead { uri: uri.to_owned() });
    }

    fn on_bridge(&mut self, detail: &str) {
        self.events.push(TraceEvent::Bridge { detail: detail.to_owned() });
    }
}
