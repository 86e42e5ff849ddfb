//! Namespaces and callable materialization
//!
//! Design:
//! - Callables are looked up in the repository on first use and cached for
//!   the life of the namespace
//! - Concurrent first use of one name builds it once; other callers wait on
//!   the same cell
//! - Frames are validated when materialized, never per call

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::config::Config;
use crate::error::{MarshalError, Result};
use crate::interop::{CallingConvention, FunctionCall, Library, SymbolResolver};
use crate::introspection::{CallableInfo, RegisteredType, Repository};
use crate::logging::{log_materialize, perf};
use crate::marshal::{CallFrame, Runtime};
use crate::value::Value;

/// A materialized callable: signature, call plan and native entry point
pub struct Function {
    info: Arc<CallableInfo>,
    frame: CallFrame,
    call: FunctionCall,
}

impl Function {
    pub fn new(info: Arc<CallableInfo>, entry: *const ()) -> Result<Self> {
        let frame = CallFrame::build(&info)?;
        let call = FunctionCall::new(
            entry,
            CallingConvention::platform(),
            frame.return_type(),
            frame.arg_types(),
        );
        Ok(Self { info, frame, call })
    }

    pub fn info(&self) -> &Arc<CallableInfo> {
        &self.info
    }

    pub fn frame(&self) -> &CallFrame {
        &self.frame
    }

    pub fn invoke(&self, rt: &Arc<Runtime>, args: &[Value]) -> Result<Value> {
        self.frame.call(rt, &self.call, args)
    }
}

type Slot = Arc<OnceCell<Arc<Function>>>;

pub struct Namespace {
    name: String,
    repository: Arc<dyn Repository>,
    symbols: Arc<dyn SymbolResolver>,
    runtime: Arc<Runtime>,
    functions: DashMap<String, Slot>,
}

impl Namespace {
    pub fn new(
        name: impl Into<String>,
        repository: Arc<dyn Repository>,
        symbols: Arc<dyn SymbolResolver>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            name: name.into(),
            repository,
            symbols,
            runtime,
            functions: DashMap::new(),
        }
    }

    /// Open the namespace's shared library
    ///
    /// A `[libraries]` entry in `config` takes precedence over the
    /// repository's answer.
    pub fn load(
        name: &str,
        repository: Arc<dyn Repository>,
        runtime: Arc<Runtime>,
        config: &Config,
    ) -> Result<Self> {
        let path = config
            .library_for(name)
            .map(str::to_string)
            .or_else(|| repository.shared_library(name))
            .ok_or_else(|| MarshalError::setup(name, "no shared library for namespace"))?;
        let library = Library::load(&path)?;
        Ok(Self::new(name, repository, Arc::new(library), runtime))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Module-level function, materialized on first use
    pub fn function(&self, name: &str) -> Result<Arc<Function>> {
        self.materialize(name.to_string(), || {
            self.repository.find_function(&self.name, name)
        })
    }

    /// Instance method of `class`, materialized on first use
    pub fn method(&self, class: &str, name: &str) -> Result<Arc<Function>> {
        self.materialize(format!("{}#{}", class, name), || {
            self.repository.find_method(&self.name, class, name)
        })
    }

    pub fn class(&self, name: &str) -> Result<Arc<RegisteredType>> {
        self.repository
            .find_type(&self.name, name)
            .ok_or_else(|| MarshalError::not_found("class", format!("{}::{}", self.name, name)))
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.function(name)?.invoke(&self.runtime, args)
    }

    /// Call a method; `args` starts with the receiver
    pub fn call_method(&self, class: &str, name: &str, args: &[Value]) -> Result<Value> {
        self.method(class, name)?.invoke(&self.runtime, args)
    }

    /// Number of callables materialized so far
    pub fn materialized(&self) -> usize {
        self.functions.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    fn materialize<F>(&self, key: String, find: F) -> Result<Arc<Function>>
    where
        F: FnOnce() -> Option<Arc<CallableInfo>>,
    {
        // The map guard is released before building so other names proceed
        let slot: Slot = self.functions.entry(key.clone()).or_default().clone();

        let function = slot.get_or_try_init(|| {
            let _timer = perf::track("materialize");
            let qualified = format!("{}::{}", self.name, key);
            let info = find().ok_or_else(|| MarshalError::setup(&qualified, "no introspection data"))?;
            let entry = self
                .symbols
                .resolve(&info.symbol)
                .map_err(|e| MarshalError::setup(&qualified, e.to_string()))?;
            let function = Function::new(info, entry)?;
            log_materialize(&self.name, &key);
            Ok::<_, MarshalError>(Arc::new(function))
        })?;
        Ok(function.clone())
    }
}
