//! Call interception
//!
//! A [`Traced`] proxy wraps an operation without changing how it is called:
//!
//! 1. resolve the call site and take a capture timestamp
//! 2. record the named inputs
//! 3. call the wrapped operation, letting errors and panics pass through
//! 4. record the result under the name `result`
//! 5. return the result unchanged
//!
//! Typed closures go through [`Tracer::wrap`]; dynamic symbol trees go
//! through [`symbols::Instrumenter`].

pub mod symbols;
pub mod verify;

use crate::config::TracerConfig;
use crate::context::{ShutdownReport, TraceContext};
use crate::error::Result;
use crate::record::{CallSite, Label, TracedCallable};
use crate::value::{ArgumentMap, Capture, CaptureArgs};
use crate::writer::guard::{self, ActiveCall};
use std::panic::Location;
use std::sync::Arc;

/// Name under which return values are recorded
pub const RESULT_NAME: &str = "result";

/// Entry point for wrapping operations against one [`TraceContext`]
#[derive(Debug, Clone)]
pub struct Tracer {
    ctx: Arc<TraceContext>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Result<Self> {
        Ok(Self::from_context(Arc::new(TraceContext::new(config)?)))
    }

    pub fn from_context(ctx: Arc<TraceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<TraceContext> {
        &self.ctx
    }

    /// Wrap `f` as `module.name` with the given parameter names
    ///
    /// Operations matching an exclusion pattern are returned unwrapped: the
    /// proxy forwards calls without recording anything.
    pub fn wrap<F>(&self, module: &str, name: &str, params: &[&str], f: F) -> Traced<F> {
        let callable = self.ctx.register(module, name);
        let ctx = if self.ctx.is_excluded(&callable.qualified_name()) {
            None
        } else {
            Some(Arc::clone(&self.ctx))
        };

        Traced {
            ctx,
            callable,
            params: params.iter().map(|p| p.to_string()).collect(),
            f,
        }
    }

    pub fn shutdown(&self) -> Result<ShutdownReport> {
        self.ctx.shutdown()
    }
}

/// Instrumented proxy around a callable
pub struct Traced<F> {
    ctx: Option<Arc<TraceContext>>,
    callable: Arc<TracedCallable>,
    params: Vec<String>,
    f: F,
}

impl<F> Traced<F> {
    pub fn callable(&self) -> &TracedCallable {
        &self.callable
    }

    /// The wrapped operation
    pub fn inner(&self) -> &F {
        &self.f
    }

    pub fn is_traced(&self) -> bool {
        self.ctx.is_some()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Call a function taking its arguments as a tuple
    #[track_caller]
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
        A: CaptureArgs,
        R: Capture,
    {
        let Some(ctx) = &self.ctx else {
            return (self.f)(args);
        };

        let scope = CallScope::begin(ctx, &self.callable, Location::caller(), || {
            args.capture_args(&self.params)
        });
        let result = (self.f)(args);
        scope.finish(|| outputs(&result));
        result
    }

    /// Call a fallible function; an `Err` is returned unchanged and no outputs are recorded
    #[track_caller]
    pub fn try_call<A, T, E>(&self, args: A) -> std::result::Result<T, E>
    where
        F: Fn(A) -> std::result::Result<T, E>,
        A: CaptureArgs,
        T: Capture,
    {
        let Some(ctx) = &self.ctx else {
            return (self.f)(args);
        };

        let scope = CallScope::begin(ctx, &self.callable, Location::caller(), || {
            args.capture_args(&self.params)
        });
        let result = (self.f)(args);
        if let Ok(value) = &result {
            scope.finish(|| outputs(value));
        }
        result
    }

    /// Call a method; the receiver is not recorded
    #[track_caller]
    pub fn call_method<S, A, R>(&self, receiver: &S, args: A) -> R
    where
        S: ?Sized,
        F: Fn(&S, A) -> R,
        A: CaptureArgs,
        R: Capture,
    {
        let Some(ctx) = &self.ctx else {
            return (self.f)(receiver, args);
        };

        let scope = CallScope::begin(ctx, &self.callable, Location::caller(), || {
            args.capture_args(&self.params)
        });
        let result = (self.f)(receiver, args);
        scope.finish(|| outputs(&result));
        result
    }
}

impl<F> std::fmt::Debug for Traced<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Traced")
            .field("callable", &self.callable)
            .field("params", &self.params)
            .field("traced", &self.is_traced())
            .finish()
    }
}

pub(crate) fn outputs<R: Capture + ?Sized>(result: &R) -> ArgumentMap {
    let mut args = ArgumentMap::new();
    args.insert(RESULT_NAME.to_string(), result.capture());
    args
}

/// One intercepted call between its inputs and outputs records
///
/// A call made while a capture is already in progress on this thread (from
/// inside a `Capture` impl, say) is counted but not recorded: it takes no
/// tick and resolves no call site.
pub(crate) struct CallScope<'a> {
    ctx: &'a TraceContext,
    callable: &'a TracedCallable,
    admitted: Option<(u64, CallSite)>,
    _active: ActiveCall,
}

impl<'a> CallScope<'a> {
    pub(crate) fn begin<C>(
        ctx: &'a TraceContext,
        callable: &'a TracedCallable,
        location: &Location<'_>,
        capture: C,
    ) -> Self
    where
        C: FnOnce() -> ArgumentMap,
    {
        ctx.visit(callable);
        let active = ActiveCall::enter(callable.qualified_name());
        if !guard::admits(ctx.config().max_write_depth) {
            return Self {
                ctx,
                callable,
                admitted: None,
                _active: active,
            };
        }

        let site = ctx.resolve_site(location);
        let time = ctx.clock().tick();
        ctx.writer()
            .emit(callable, time, Label::Inputs, &site, capture);

        Self {
            ctx,
            callable,
            admitted: Some((time, site)),
            _active: active,
        }
    }

    pub(crate) fn finish<C>(self, capture: C)
    where
        C: FnOnce() -> ArgumentMap,
    {
        let Some((time, site)) = &self.admitted else {
            return;
        };
        self.ctx
            .writer()
            .emit(self.callable, *time, Label::Outputs, site, capture);
    }
}
