//! Native slot types for FFI calls
//!
//! Every marshaled argument, out-cell and return value is one of these
//! scalar shapes; composite and string values always travel as pointers.

use core::ffi::c_void;

/// Width and class of a single native slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FfiType {
    Void,
    /// `gboolean`, which is a C `int`
    Boolean,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// `GType`, pointer-sized
    GType,
    /// `gunichar`, a UCS-4 code point
    Unichar,
    Pointer,
}

impl FfiType {
    /// Get size of type in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::Boolean | Self::I32 | Self::U32 | Self::F32 | Self::Unichar => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::GType | Self::Pointer => core::mem::size_of::<usize>(),
        }
    }

    /// Get alignment requirement
    #[inline]
    pub const fn align(self) -> usize {
        if self.size() == 0 {
            1
        } else {
            self.size()
        }
    }

    /// Check if type is integral
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
                | Self::GType
                | Self::Unichar
        )
    }

    /// Check if type is floating point
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Check if type is signed
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Boolean | Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Introspection name of the type, used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Boolean => "gboolean",
            Self::I8 => "gint8",
            Self::I16 => "gint16",
            Self::I32 => "gint32",
            Self::I64 => "gint64",
            Self::U8 => "guint8",
            Self::U16 => "guint16",
            Self::U32 => "guint32",
            Self::U64 => "guint64",
            Self::F32 => "gfloat",
            Self::F64 => "gdouble",
            Self::GType => "GType",
            Self::Unichar => "gunichar",
            Self::Pointer => "gpointer",
        }
    }
}

/// FFI value container (untagged union)
///
/// Only the field matching the slot's [`FfiType`] is initialized; use the
/// typed accessors rather than reading fields directly.
#[repr(C)]
pub union FfiValue {
    pub void: (),
    pub i8: i8,
    pub i16: i16,
    pub i32: i32,
    pub i64: i64,
    pub u8: u8,
    pub u16: u16,
    pub u32: u32,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub ptr: *mut c_void,
}

impl FfiValue {
    /// Create void value
    #[inline]
    pub const fn void() -> Self {
        Self { void: () }
    }

    /// Create null pointer
    #[inline]
    pub const fn null() -> Self {
        Self {
            ptr: core::ptr::null_mut(),
        }
    }

    /// Create from pointer
    #[inline]
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self { ptr }
    }

    /// Create from an integer, truncated to the slot width
    pub fn from_int(ty: FfiType, value: i64) -> Self {
        match ty {
            FfiType::I8 => Self { i8: value as i8 },
            FfiType::U8 => Self { u8: value as u8 },
            FfiType::I16 => Self { i16: value as i16 },
            FfiType::U16 => Self { u16: value as u16 },
            FfiType::Boolean | FfiType::I32 => Self { i32: value as i32 },
            FfiType::U32 | FfiType::Unichar => Self { u32: value as u32 },
            FfiType::I64 => Self { i64: value },
            FfiType::U64 => Self { u64: value as u64 },
            FfiType::GType => Self { u64: value as u64 },
            FfiType::F32 => Self { f32: value as f32 },
            FfiType::F64 => Self { f64: value as f64 },
            FfiType::Pointer => Self {
                ptr: value as usize as *mut c_void,
            },
            FfiType::Void => Self::void(),
        }
    }

    /// Read the value as a sign- or zero-extended integer
    ///
    /// # Safety
    /// The field selected by `ty` must be initialized.
    pub unsafe fn as_i64(&self, ty: FfiType) -> i64 {
        match ty {
            FfiType::I8 => self.i8 as i64,
            FfiType::U8 => self.u8 as i64,
            FfiType::I16 => self.i16 as i64,
            FfiType::U16 => self.u16 as i64,
            FfiType::Boolean | FfiType::I32 => self.i32 as i64,
            FfiType::U32 | FfiType::Unichar => self.u32 as i64,
            FfiType::I64 => self.i64,
            FfiType::U64 | FfiType::GType => self.u64 as i64,
            FfiType::F32 => self.f32 as i64,
            FfiType::F64 => self.f64 as i64,
            FfiType::Pointer => self.ptr as usize as i64,
            FfiType::Void => 0,
        }
    }

    /// Bits to load into a general-purpose register
    ///
    /// # Safety
    /// The field selected by `ty` must be initialized.
    pub unsafe fn to_register_bits(&self, ty: FfiType) -> u64 {
        match ty {
            FfiType::F32 => self.f32.to_bits() as u64,
            FfiType::F64 => self.f64.to_bits(),
            FfiType::Pointer => self.ptr as usize as u64,
            _ => self.as_i64(ty) as u64,
        }
    }

    /// Rebuild a value from the raw return registers
    pub fn from_register_bits(ty: FfiType, int_bits: u64, float_bits: u64) -> Self {
        match ty {
            FfiType::F32 => Self {
                f32: f32::from_bits(float_bits as u32),
            },
            FfiType::F64 => Self {
                f64: f64::from_bits(float_bits),
            },
            FfiType::Pointer => Self {
                ptr: int_bits as usize as *mut c_void,
            },
            FfiType::Void => Self::void(),
            _ => Self::from_int(ty, int_bits as i64),
        }
    }

    /// Read a slot of type `ty` from native memory
    ///
    /// # Safety
    /// `addr` must be valid for reads of `ty.size()` bytes.
    pub unsafe fn read(ty: FfiType, addr: *const u8) -> Self {
        match ty {
            FfiType::I8 => Self { i8: (addr as *const i8).read_unaligned() },
            FfiType::U8 => Self { u8: addr.read_unaligned() },
            FfiType::I16 => Self { i16: (addr as *const i16).read_unaligned() },
            FfiType::U16 => Self { u16: (addr as *const u16).read_unaligned() },
            FfiType::Boolean | FfiType::I32 => Self { i32: (addr as *const i32).read_unaligned() },
            FfiType::U32 | FfiType::Unichar => Self { u32: (addr as *const u32).read_unaligned() },
            FfiType::I64 => Self { i64: (addr as *const i64).read_unaligned() },
            FfiType::U64 => Self { u64: (addr as *const u64).read_unaligned() },
            FfiType::GType => Self {
                u64: (addr as *const usize).read_unaligned() as u64,
            },
            FfiType::F32 => Self { f32: (addr as *const f32).read_unaligned() },
            FfiType::F64 => Self { f64: (addr as *const f64).read_unaligned() },
            FfiType::Pointer => Self {
                ptr: (addr as *const *mut c_void).read_unaligned(),
            },
            FfiType::Void => Self::void(),
        }
    }

    /// Write this value as a slot of type `ty` into native memory
    ///
    /// # Safety
    /// `addr` must be valid for writes of `ty.size()` bytes and the field
    /// selected by `ty` must be initialized.
    pub unsafe fn write(&self, ty: FfiType, addr: *mut u8) {
        match ty {
            FfiType::I8 => (addr as *mut i8).write_unaligned(self.i8),
            FfiType::U8 => addr.write_unaligned(self.u8),
            FfiType::I16 => (addr as *mut i16).write_unaligned(self.i16),
            FfiType::U16 => (addr as *mut u16).write_unaligned(self.u16),
            FfiType::Boolean | FfiType::I32 => (addr as *mut i32).write_unaligned(self.i32),
            FfiType::U32 | FfiType::Unichar => (addr as *mut u32).write_unaligned(self.u32),
            FfiType::I64 => (addr as *mut i64).write_unaligned(self.i64),
            FfiType::U64 => (addr as *mut u64).write_unaligned(self.u64),
            FfiType::GType => (addr as *mut usize).write_unaligned(self.u64 as usize),
            FfiType::F32 => (addr as *mut f32).write_unaligned(self.f32),
            FfiType::F64 => (addr as *mut f64).write_unaligned(self.f64),
            FfiType::Pointer => (addr as *mut *mut c_void).write_unaligned(self.ptr),
            FfiType::Void => {}
        }
    }
}

impl Default for FfiValue {
    #[inline]
    fn default() -> Self {
        Self::void()
    }
}

// Manual implementations for Copy, Clone, and Debug since union doesn't auto-derive
impl Copy for FfiValue {}
impl Clone for FfiValue {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl core::fmt::Debug for FfiValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FfiValue {{ ... }}")
    }
}

/// Type-tagged FFI argument
#[derive(Debug, Clone, Copy)]
pub struct TypedArg {
    pub ty: FfiType,
    pub value: FfiValue,
}

impl TypedArg {
    #[inline]
    pub const fn new(ty: FfiType, value: FfiValue) -> Self {
        Self { ty, value }
    }

    #[inline]
    pub const fn pointer(ptr: *mut c_void) -> Self {
        Self::new(FfiType::Pointer, FfiValue::from_ptr(ptr))
    }
}
