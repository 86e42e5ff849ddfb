//! ABI (Application Binary Interface) handling
//!
//! Assigns call arguments to argument registers for the supported calling
//! conventions. Arguments that would spill to the stack are rejected.

/// Calling convention specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallingConvention {
    /// C calling convention on an unsupported target
    C,
    /// System V AMD64 ABI (Unix x86-64)
    SysV,
    /// Microsoft x64 calling convention (Windows)
    Win64,
    /// ARM64 calling convention
    Aarch64,
}

impl CallingConvention {
    /// Get platform default
    #[inline]
    pub const fn platform() -> Self {
        #[cfg(all(target_arch = "x86_64", target_os = "windows"))]
        return Self::Win64;

        #[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
        return Self::SysV;

        #[cfg(target_arch = "aarch64")]
        return Self::Aarch64;

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        return Self::C;
    }

    /// Integer argument registers for this convention
    #[inline]
    pub const fn int_registers(self) -> usize {
        match self {
            Self::C => 0,
            Self::SysV => 6,    // RDI, RSI, RDX, RCX, R8, R9
            Self::Win64 => 4,   // RCX, RDX, R8, R9
            Self::Aarch64 => 8, // X0-X7
        }
    }

    /// Floating-point argument registers for this convention
    #[inline]
    pub const fn float_registers(self) -> usize {
        match self {
            Self::C => 0,
            Self::SysV => 8,    // XMM0-XMM7
            Self::Win64 => 4,   // XMM0-XMM3
            Self::Aarch64 => 8, // V0-V7
        }
    }

    /// Whether integer and float arguments share one positional sequence
    #[inline]
    pub const fn positional_registers(self) -> bool {
        matches!(self, Self::Win64)
    }
}

impl Default for CallingConvention {
    #[inline]
    fn default() -> Self {
        Self::platform()
    }
}

/// Register holding one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Int(usize),
    Float(usize),
}

/// Register allocation for a single call
pub struct RegisterAllocator {
    convention: CallingConvention,
    int_regs_used: usize,
    fp_regs_used: usize,
}

impl RegisterAllocator {
    /// Create allocator for calling convention
    #[inline]
    pub const fn new(convention: CallingConvention) -> Self {
        Self {
            convention,
            int_regs_used: 0,
            fp_regs_used: 0,
        }
    }

    /// Check if next arg goes in register
    #[inline]
    pub fn can_use_register(&self, is_float: bool) -> bool {
        if self.convention.positional_registers() {
            return self.int_regs_used < self.convention.int_registers();
        }
        if is_float {
            self.fp_regs_used < self.convention.float_registers()
        } else {
            self.int_regs_used < self.convention.int_registers()
        }
    }

    /// Assign the next register, or `None` when the argument would spill
    pub fn assign(&mut self, is_float: bool) -> Option<Register> {
        if !self.can_use_register(is_float) {
            return None;
        }

        if self.convention.positional_registers() {
            let slot = self.int_regs_used;
            self.int_regs_used += 1;
            self.fp_regs_used += 1;
            return Some(if is_float {
                Register::Float(slot)
            } else {
                Register::Int(slot)
            });
        }

        if is_float {
            self.fp_regs_used += 1;
            Some(Register::Float(self.fp_regs_used - 1))
        } else {
            self.int_regs_used += 1;
            Some(Register::Int(self.int_regs_used - 1))
        }
    }

    /// Reset for new call
    #[inline]
    pub fn reset(&mut self) {
        self.int_regs_used = 0;
        self.fp_regs_used = 0;
    }
}
