//! Interoperability - raw native calls
//!
//! Architecture:
//! - `types.rs` - slot types (FfiType, FfiValue, TypedArg)
//! - `abi.rs` - calling conventions and register assignment
//! - `call.rs` - dynamic function calling with inline assembly
//! - `library.rs` - dynamic library loading and symbol resolution

mod abi;
mod call;
mod library;
mod types;

pub use abi::{CallingConvention, Register, RegisterAllocator};
pub use call::{call_extern, CallError, FunctionCall, Invoke};
pub use library::{Library, LoadError, SymbolError, SymbolResolver, SymbolTable};
pub use types::{FfiType, FfiValue, TypedArg};

use std::sync::atomic::{AtomicUsize, Ordering};

static CALLS_MADE: AtomicUsize = AtomicUsize::new(0);
static MARSHALING_ERRORS: AtomicUsize = AtomicUsize::new(0);
static LIBRARIES_LOADED: AtomicUsize = AtomicUsize::new(0);

#[inline]
pub(crate) fn record_call() {
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_marshaling_error() {
    MARSHALING_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_library_loaded() {
    LIBRARIES_LOADED.fetch_add(1, Ordering::Relaxed);
}

/// Get interop statistics
pub fn stats() -> InteropStats {
    InteropStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        marshaling_errors: MARSHALING_ERRORS.load(Ordering::Relaxed),
        libraries_loaded: LIBRARIES_LOADED.load(Ordering::Relaxed),
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy)]
pub struct InteropStats {
    pub calls_made: usize,
    pub marshaling_errors: usize,
    pub libraries_loaded: usize,
}
