//! Dynamic library loading and symbol resolution
//!
//! Platform-agnostic wrapper around dlopen/LoadLibrary, plus an in-process
//! symbol table for functions registered directly by the embedder.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::collections::HashMap;
use std::ffi::CString;

use parking_lot::RwLock;

use crate::logging::{debug, warn};

/// Source of native entry points
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, symbol: &str) -> Result<*const (), SymbolError>;
}

/// Handle to dynamically loaded library
pub struct Library {
    name: String,
    handle: NonNull<c_void>,
}

impl Library {
    /// Load library by name
    ///
    /// Searches standard library paths; absolute paths are used as given.
    pub fn load(name: &str) -> Result<Self, LoadError> {
        let handle = Self::load_impl(name)?;
        super::record_library_loaded();
        debug!(library = name, "Library loaded");
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(unix)]
    fn load_impl(name: &str) -> Result<NonNull<c_void>, LoadError> {
        let cname = CString::new(name).map_err(|_| LoadError::InvalidName)?;

        unsafe {
            let handle = libc::dlopen(cname.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL);
            NonNull::new(handle).ok_or_else(|| {
                let err = libc::dlerror();
                let msg = if !err.is_null() {
                    std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
                } else {
                    "Unknown error".into()
                };
                warn!(library = name, error = %msg, "Library load failed");
                LoadError::LoadFailed(msg)
            })
        }
    }

    #[cfg(windows)]
    fn load_impl(name: &str) -> Result<NonNull<c_void>, LoadError> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::LoadLibraryW;

        let wide: Vec<u16> = OsStr::new(name).encode_wide().chain(Some(0)).collect();

        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle as *mut c_void).ok_or_else(|| {
                let code = GetLastError();
                LoadError::LoadFailed(format!("Error code: {}", code))
            })
        }
    }

    /// Get function pointer by symbol name
    pub fn symbol(&self, name: &str) -> Result<*const (), SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName)?;
        let ptr = unsafe { self.symbol_impl(&cname) };
        if ptr.is_null() {
            Err(SymbolError::NotFound(name.to_string()))
        } else {
            Ok(ptr as *const ())
        }
    }

    #[cfg(unix)]
    unsafe fn symbol_impl(&self, name: &CString) -> *mut c_void {
        libc::dlsym(self.handle.as_ptr(), name.as_ptr())
    }

    #[cfg(windows)]
    unsafe fn symbol_impl(&self, name: &CString) -> *mut c_void {
        use winapi::um::libloaderapi::GetProcAddress;

        GetProcAddress(self.handle.as_ptr() as _, name.as_ptr()) as *mut c_void
    }
}

impl SymbolResolver for Library {
    fn resolve(&self, symbol: &str) -> Result<*const (), SymbolError> {
        self.symbol(symbol)
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        use winapi::um::libloaderapi::FreeLibrary;

        unsafe {
            FreeLibrary(self.handle.as_ptr() as _);
        }
    }
}

unsafe impl Send for Library {}
unsafe impl Sync for Library {}

/// Symbols registered by address from the current process
#[derive(Default)]
pub struct SymbolTable {
    symbols: RwLock<HashMap<String, usize>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point, replacing any previous one with that name
    pub fn insert(&self, name: impl Into<String>, ptr: *const ()) {
        self.symbols.write().insert(name.into(), ptr as usize);
    }

    pub fn with(self, name: impl Into<String>, ptr: *const ()) -> Self {
        self.insert(name, ptr);
        self
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, symbol: &str) -> Result<*const (), SymbolError> {
        self.symbols
            .read()
            .get(symbol)
            .map(|&addr| addr as *const ())
            .ok_or_else(|| SymbolError::NotFound(symbol.to_string()))
    }
}

/// Library loading errors
#[derive(Debug)]
pub enum LoadError {
    InvalidName,
    LoadFailed(String),
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid library name"),
            Self::LoadFailed(msg) => write!(f, "Failed to load library: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug)]
pub enum SymbolError {
    InvalidName,
    NotFound(String),
}

impl core::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid symbol name"),
            Self::NotFound(name) => write!(f, "Symbol not found: {}", name),
        }
    }
}

impl std::error::Error for SymbolError {}
