//! Dynamic function calling with multiple calling conventions
//!
//! Arguments are assigned to registers up front, then a single inline
//! assembly block loads every argument register and performs the call.
//! Unused registers carry zeros.

use super::abi::{CallingConvention, Register, RegisterAllocator};
use super::types::{FfiType, FfiValue, TypedArg};

/// Something that can run a prepared native argument list
///
/// Implemented by [`FunctionCall`] for real native code and by closures so
/// callers can substitute in-process doubles.
pub trait Invoke {
    /// Invoke with one value per declared argument
    ///
    /// # Safety
    /// Pointer arguments must be valid for whatever the callee does with them.
    unsafe fn invoke(&self, args: &[FfiValue]) -> Result<FfiValue, CallError>;
}

impl<F> Invoke for F
where
    F: Fn(&[FfiValue]) -> FfiValue,
{
    unsafe fn invoke(&self, args: &[FfiValue]) -> Result<FfiValue, CallError> {
        Ok(self(args))
    }
}

/// Argument registers loaded before the call
#[derive(Debug, Default, Clone, Copy)]
struct RegisterFile {
    int: [u64; 8],
    float: [u64; 8],
}

/// Function call descriptor
pub struct FunctionCall {
    ptr: *const (),
    convention: CallingConvention,
    return_type: FfiType,
    arg_types: Vec<FfiType>,
}

// The descriptor only holds a code address and plain type data.
unsafe impl Send for FunctionCall {}
unsafe impl Sync for FunctionCall {}

impl FunctionCall {
    /// Create function call descriptor
    #[inline]
    pub fn new(
        ptr: *const (),
        convention: CallingConvention,
        return_type: FfiType,
        arg_types: Vec<FfiType>,
    ) -> Self {
        Self {
            ptr,
            convention,
            return_type,
            arg_types,
        }
    }

    pub fn arg_types(&self) -> &[FfiType] {
        &self.arg_types
    }

    pub fn return_type(&self) -> FfiType {
        self.return_type
    }

    /// Call function with arguments
    ///
    /// # Safety
    /// Caller must ensure:
    /// - Function pointer is valid
    /// - Arguments match declared types
    /// - Calling convention matches function
    pub unsafe fn call(&self, args: &[FfiValue]) -> Result<FfiValue, CallError> {
        if self.ptr.is_null() {
            return Err(CallError::NullFunction);
        }
        if args.len() != self.arg_types.len() {
            return Err(CallError::ArgCountMismatch {
                expected: self.arg_types.len(),
                got: args.len(),
            });
        }

        let regs = self.assign_registers(args)?;
        let (int_bits, float_bits) = self.call_impl(&regs)?;
        Ok(FfiValue::from_register_bits(self.return_type, int_bits, float_bits))
    }

    unsafe fn assign_registers(&self, args: &[FfiValue]) -> Result<RegisterFile, CallError> {
        let mut allocator = RegisterAllocator::new(self.convention);
        let mut regs = RegisterFile::default();

        for (arg, &ty) in args.iter().zip(&self.arg_types) {
            let bits = arg.to_register_bits(ty);
            match allocator.assign(ty.is_float()) {
                Some(Register::Int(i)) => regs.int[i] = bits,
                Some(Register::Float(i)) => regs.float[i] = bits,
                None => return Err(CallError::TooManyArgs),
            }
        }

        Ok(regs)
    }

    /// Platform-specific call implementation
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    unsafe fn call_impl(&self, regs: &RegisterFile) -> Result<(u64, u64), CallError> {
        if self.convention != CallingConvention::platform() {
            return Err(CallError::UnsupportedConvention(self.convention));
        }
        Ok(self.call_asm(regs))
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    unsafe fn call_impl(&self, _regs: &RegisterFile) -> Result<(u64, u64), CallError> {
        Err(CallError::UnsupportedArchitecture)
    }

    /// System V x86-64: integer args in RDI, RSI, RDX, RCX, R8, R9 and float
    /// args in XMM0-XMM7; returns in RAX or XMM0
    #[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
    unsafe fn call_asm(&self, regs: &RegisterFile) -> (u64, u64) {
        let ret_int: u64;
        let ret_fp: u64;

        core::arch::asm!(
            "call {func}",
            func = in(reg) self.ptr,
            in("rdi") regs.int[0],
            in("rsi") regs.int[1],
            in("rdx") regs.int[2],
            in("rcx") regs.int[3],
            in("r8") regs.int[4],
            in("r9") regs.int[5],
            inlateout("xmm0") regs.float[0] => ret_fp,
            in("xmm1") regs.float[1],
            in("xmm2") regs.float[2],
            in("xmm3") regs.float[3],
            in("xmm4") regs.float[4],
            in("xmm5") regs.float[5],
            in("xmm6") regs.float[6],
            in("xmm7") regs.float[7],
            lateout("rax") ret_int,
            clobber_abi("C"),
        );

        (ret_int, ret_fp)
    }

    /// Windows x64: four positional slots in RCX/XMM0, RDX/XMM1, R8/XMM2,
    /// R9/XMM3 plus 32 bytes of shadow space; returns in RAX or XMM0
    #[cfg(all(target_arch = "x86_64", target_os = "windows"))]
    unsafe fn call_asm(&self, regs: &RegisterFile) -> (u64, u64) {
        let ret_int: u64;
        let ret_fp: u64;

        core::arch::asm!(
            "sub rsp, 32",
            "call {func}",
            "add rsp, 32",
            func = in(reg) self.ptr,
            in("rcx") regs.int[0],
            in("rdx") regs.int[1],
            in("r8") regs.int[2],
            in("r9") regs.int[3],
            inlateout("xmm0") regs.float[0] => ret_fp,
            in("xmm1") regs.float[1],
            in("xmm2") regs.float[2],
            in("xmm3") regs.float[3],
            lateout("rax") ret_int,
            clobber_abi("C"),
        );

        (ret_int, ret_fp)
    }

    /// AArch64: integer args in X0-X7 and float args in V0-V7; returns in X0
    /// or D0
    #[cfg(target_arch = "aarch64")]
    unsafe fn call_asm(&self, regs: &RegisterFile) -> (u64, u64) {
        let ret_int: u64;
        let ret_fp: u64;

        core::arch::asm!(
            "blr {func}",
            func = in(reg) self.ptr,
            inlateout("x0") regs.int[0] => ret_int,
            in("x1") regs.int[1],
            in("x2") regs.int[2],
            in("x3") regs.int[3],
            in("x4") regs.int[4],
            in("x5") regs.int[5],
            in("x6") regs.int[6],
            in("x7") regs.int[7],
            inlateout("v0") regs.float[0] => ret_fp,
            in("v1") regs.float[1],
            in("v2") regs.float[2],
            in("v3") regs.float[3],
            in("v4") regs.float[4],
            in("v5") regs.float[5],
            in("v6") regs.float[6],
            in("v7") regs.float[7],
            clobber_abi("C"),
        );

        (ret_int, ret_fp)
    }
}

impl Invoke for FunctionCall {
    unsafe fn invoke(&self, args: &[FfiValue]) -> Result<FfiValue, CallError> {
        self.call(args)
    }
}

/// Function call errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    ArgCountMismatch { expected: usize, got: usize },
    TooManyArgs,
    NullFunction,
    UnsupportedConvention(CallingConvention),
    UnsupportedArchitecture,
}

impl core::fmt::Display for CallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ArgCountMismatch { expected, got } => {
                write!(f, "Expected {} arguments, got {}", expected, got)
            }
            Self::TooManyArgs => write!(f, "Too many arguments for register call"),
            Self::NullFunction => write!(f, "Null function pointer"),
            Self::UnsupportedConvention(cc) => {
                write!(f, "Calling convention {:?} not supported on this target", cc)
            }
            Self::UnsupportedArchitecture => write!(f, "Architecture not supported"),
        }
    }
}

impl std::error::Error for CallError {}

/// High-level API: Call C function with typed arguments
///
/// # Safety
/// See `FunctionCall::call` safety requirements
#[inline]
pub unsafe fn call_extern(
    fn_ptr: *const (),
    args: &[TypedArg],
    return_type: FfiType,
) -> Result<FfiValue, CallError> {
    let arg_types: Vec<_> = args.iter().map(|a| a.ty).collect();
    let arg_values: Vec<_> = args.iter().map(|a| a.value).collect();

    let call = FunctionCall::new(
        fn_ptr,
        CallingConvention::platform(),
        return_type,
        arg_types,
    );

    call.call(&arg_values)
}
