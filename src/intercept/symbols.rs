//! Dynamic operations and module trees
//!
//! Where operations are looked up by name at runtime (a numeric library
//! exposed as a table of functions, say), they are modelled as a tree of
//! [`Module`]s holding [`Symbol`]s. [`Instrumenter::wrap_module`] produces a
//! mirror tree in which every operation is replaced by a
//! [`TracedOperation`]; constants and nested modules are carried over.

use super::verify::{verify, VerificationReport};
use super::{outputs, CallScope};
use crate::context::TraceContext;
use crate::record::TracedCallable;
use crate::value::{param_name, ArgumentMap, CapturedValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Error raised by an operation; passed through tracing untouched
pub type OperationError = Box<dyn std::error::Error + Send + Sync>;

pub type OperationResult = std::result::Result<CapturedValue, OperationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationKind {
    #[default]
    Function,
    Method,
    /// Applied element by element over array arguments
    Elementwise,
}

/// Uniform variadic view of a callable
pub trait Operation: Send + Sync {
    fn name(&self) -> &str {
        ""
    }

    fn module(&self) -> &str {
        ""
    }

    fn params(&self) -> &[String] {
        &[]
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Function
    }

    /// Whether this operation already records its calls
    fn is_traced(&self) -> bool {
        false
    }

    fn invoke(&self, args: &[CapturedValue]) -> OperationResult;

    /// Invoke on behalf of a caller at `location`
    fn invoke_at(&self, args: &[CapturedValue], location: &'static Location<'static>) -> OperationResult {
        let _ = location;
        self.invoke(args)
    }
}

type OperationFn = dyn Fn(&[CapturedValue]) -> OperationResult + Send + Sync;

/// [`Operation`] backed by a closure
#[derive(Clone)]
pub struct FnOperation {
    name: String,
    module: String,
    params: Vec<String>,
    kind: OperationKind,
    f: Arc<OperationFn>,
}

impl FnOperation {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[CapturedValue]) -> OperationResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            module: String::new(),
            params: Vec::new(),
            kind: OperationKind::Function,
            f: Arc::new(f),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }
}

impl Operation for FnOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> &str {
        &self.module
    }

    fn params(&self) -> &[String] {
        &self.params
    }

    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn invoke(&self, args: &[CapturedValue]) -> OperationResult {
        (self.f)(args)
    }
}

impl fmt::Debug for FnOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("params", &self.params)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Entry of a module
#[derive(Clone)]
pub enum Symbol {
    Operation(Arc<dyn Operation>),
    Module(Arc<Module>),
    Value(CapturedValue),
}

impl Symbol {
    pub fn as_operation(&self) -> Option<&Arc<dyn Operation>> {
        match self {
            Symbol::Operation(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&Arc<Module>> {
        match self {
            Symbol::Module(module) => Some(module),
            _ => None,
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Operation(op) => write!(f, "Operation({:?}, traced: {})", op.name(), op.is_traced()),
            Symbol::Module(module) => write!(f, "Module({:?})", module.name),
            Symbol::Value(value) => write!(f, "Value({:?})", value),
        }
    }
}

/// Named, ordered collection of symbols
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub symbols: BTreeMap<String, Symbol>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: BTreeMap::new(),
        }
    }

    /// Add an operation under its own name
    pub fn with_operation(mut self, op: impl Operation + 'static) -> Self {
        let key = op.name().to_string();
        self.symbols.insert(key, Symbol::Operation(Arc::new(op)));
        self
    }

    pub fn with_module(mut self, module: Arc<Module>) -> Self {
        self.symbols.insert(module.name.clone(), Symbol::Module(module));
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: CapturedValue) -> Self {
        self.symbols.insert(key.into(), Symbol::Value(value));
        self
    }

    pub fn with_symbol(mut self, key: impl Into<String>, symbol: Symbol) -> Self {
        self.symbols.insert(key.into(), symbol);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Symbol> {
        self.symbols.get(key)
    }

    pub fn operation(&self, key: &str) -> Option<&Arc<dyn Operation>> {
        self.get(key).and_then(Symbol::as_operation)
    }

    /// Look up and invoke the operation `key`
    #[track_caller]
    pub fn call(&self, key: &str, args: &[CapturedValue]) -> OperationResult {
        let location = Location::caller();
        match self.get(key) {
            Some(Symbol::Operation(op)) => op.invoke_at(args, location),
            Some(_) => Err(format!("{}.{} is not callable", self.name, key).into()),
            None => Err(format!("{} has no symbol {}", self.name, key).into()),
        }
    }
}

/// Operation proxy that records inputs and outputs
pub struct TracedOperation {
    inner: Arc<dyn Operation>,
    ctx: Arc<TraceContext>,
    callable: Arc<TracedCallable>,
}

impl TracedOperation {
    /// Wrap `inner`; an empty module name falls back to `module`
    pub fn new(ctx: Arc<TraceContext>, inner: Arc<dyn Operation>, module: &str) -> Self {
        let module = if inner.module().is_empty() {
            module
        } else {
            inner.module()
        };
        let callable = ctx.register(module, inner.name());
        Self {
            inner,
            ctx,
            callable,
        }
    }

    pub fn callable(&self) -> &TracedCallable {
        &self.callable
    }

    pub fn inner(&self) -> &Arc<dyn Operation> {
        &self.inner
    }
}

impl Operation for TracedOperation {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn module(&self) -> &str {
        &self.callable.module
    }

    fn params(&self) -> &[String] {
        self.inner.params()
    }

    fn kind(&self) -> OperationKind {
        self.inner.kind()
    }

    fn is_traced(&self) -> bool {
        true
    }

    #[track_caller]
    fn invoke(&self, args: &[CapturedValue]) -> OperationResult {
        self.invoke_at(args, Location::caller())
    }

    fn invoke_at(&self, args: &[CapturedValue], location: &'static Location<'static>) -> OperationResult {
        let scope = CallScope::begin(&self.ctx, &self.callable, location, || {
            named_args(self.inner.params(), args)
        });
        let result = self.inner.invoke(args);
        if let Ok(value) = &result {
            scope.finish(|| outputs(value));
        }
        result
    }
}

impl fmt::Debug for TracedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedOperation")
            .field("callable", &self.callable)
            .finish()
    }
}

fn named_args(params: &[String], args: &[CapturedValue]) -> ArgumentMap {
    args.iter()
        .enumerate()
        .map(|(i, value)| (param_name(params, i), value.clone()))
        .collect()
}

/// `prefix.key`, or `key` alone at the root
pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Source of real modules, supplied by the host
pub trait ModuleLoader {
    fn load(&self, name: &str) -> Option<Arc<Module>>;
}

/// [`ModuleLoader`] over a fixed set of modules
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: HashMap<String, Arc<Module>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.insert(module.name.clone(), Arc::new(module));
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name).cloned()
    }
}

/// A wrapped module and what verification found
#[derive(Debug, Clone)]
pub struct InstrumentedModule {
    pub module: Arc<Module>,
    pub report: VerificationReport,
}

/// Builds instrumented mirrors of module trees
#[derive(Debug)]
pub struct Instrumenter {
    ctx: Arc<TraceContext>,
    // Keyed by address of the real module, which is kept alive alongside
    wrapped: Mutex<HashMap<usize, (Arc<Module>, Arc<Module>)>>,
}

impl Instrumenter {
    pub fn new(ctx: Arc<TraceContext>) -> Self {
        Self {
            ctx,
            wrapped: Mutex::new(HashMap::new()),
        }
    }

    /// Wrap one operation unless it is excluded or already traced
    pub fn wrap_operation(&self, op: &Arc<dyn Operation>, module: &str) -> Arc<dyn Operation> {
        if op.is_traced() {
            return Arc::clone(op);
        }
        let owner = if op.module().is_empty() { module } else { op.module() };
        let qualified = join_path(owner, op.name());
        if self.ctx.is_excluded(&qualified) {
            debug!(operation = %qualified, "Excluded from tracing");
            return Arc::clone(op);
        }
        Arc::new(TracedOperation::new(Arc::clone(&self.ctx), Arc::clone(op), module))
    }

    /// Mirror `real` with every reachable operation wrapped
    ///
    /// Operations are registered under their dotted path from `real`, so
    /// same-named operations in same-named submodules stay distinct. A module
    /// reached twice is wrapped once, under the first path that reached it.
    pub fn wrap_module(&self, real: &Arc<Module>) -> Arc<Module> {
        self.wrap_module_at(real, &real.name)
    }

    fn wrap_module_at(&self, real: &Arc<Module>, path: &str) -> Arc<Module> {
        let key = Arc::as_ptr(real) as usize;
        if let Some((_, wrapped)) = self.wrapped.lock().ok().and_then(|m| m.get(&key).cloned()) {
            return wrapped;
        }

        let symbols = real
            .symbols
            .iter()
            .map(|(key, symbol)| {
                let wrapped = match symbol {
                    Symbol::Operation(op) => Symbol::Operation(self.wrap_operation(op, path)),
                    Symbol::Module(nested) => {
                        Symbol::Module(self.wrap_module_at(nested, &join_path(path, key)))
                    }
                    Symbol::Value(value) => Symbol::Value(value.clone()),
                };
                (key.clone(), wrapped)
            })
            .collect();

        let wrapped = Arc::new(Module {
            name: real.name.clone(),
            symbols,
        });
        if let Ok(mut memo) = self.wrapped.lock() {
            memo.insert(key, (Arc::clone(real), Arc::clone(&wrapped)));
        }
        wrapped
    }

    /// Load `name`, wrap it and verify the result
    pub fn instrument(&self, loader: &dyn ModuleLoader, name: &str) -> Option<InstrumentedModule> {
        let real = loader.load(name)?;
        let module = self.wrap_module(&real);
        let report = verify(&real, &module);
        Some(InstrumentedModule { module, report })
    }
}
