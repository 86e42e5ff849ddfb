//! Introspection database interface
//!
//! The engine only queries metadata; discovery and typelib parsing live in
//! whatever implements [`Repository`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::callable::CallableInfo;
use super::registered::RegisteredType;

pub trait Repository: Send + Sync {
    fn find_function(&self, namespace: &str, name: &str) -> Option<Arc<CallableInfo>>;

    fn find_method(&self, namespace: &str, class: &str, name: &str) -> Option<Arc<CallableInfo>>;

    fn find_type(&self, namespace: &str, name: &str) -> Option<Arc<RegisteredType>>;

    /// Shared library providing the namespace's symbols
    fn shared_library(&self, namespace: &str) -> Option<String>;
}

/// Repository populated programmatically
#[derive(Default)]
pub struct InMemoryRepository {
    functions: RwLock<HashMap<(String, String), Arc<CallableInfo>>>,
    methods: RwLock<HashMap<(String, String, String), Arc<CallableInfo>>>,
    types: RwLock<HashMap<(String, String), Arc<RegisteredType>>>,
    libraries: RwLock<HashMap<String, String>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function or method, keyed by its receiver when present
    pub fn add_callable(&self, info: Arc<CallableInfo>) {
        match &info.receiver {
            Some(class) => {
                let key = (
                    info.namespace.clone(),
                    class.name().to_string(),
                    info.name.clone(),
                );
                self.methods.write().insert(key, info);
            }
            None => {
                let key = (info.namespace.clone(), info.name.clone());
                self.functions.write().insert(key, info);
            }
        }
    }

    pub fn add_type(&self, info: Arc<RegisteredType>) {
        let key = (info.namespace().to_string(), info.name().to_string());
        self.types.write().insert(key, info);
    }

    pub fn set_shared_library(&self, namespace: impl Into<String>, path: impl Into<String>) {
        self.libraries.write().insert(namespace.into(), path.into());
    }
}

impl Repository for InMemoryRepository {
    fn find_function(&self, namespace: &str, name: &str) -> Option<Arc<CallableInfo>> {
        self.functions
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn find_method(&self, namespace: &str, class: &str, name: &str) -> Option<Arc<CallableInfo>> {
        self.methods
            .read()
            .get(&(namespace.to_string(), class.to_string(), name.to_string()))
            .cloned()
    }

    fn find_type(&self, namespace: &str, name: &str) -> Option<Arc<RegisteredType>> {
        self.types
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn shared_library(&self, namespace: &str) -> Option<String> {
        self.libraries.read().get(namespace).cloned()
    }
}
