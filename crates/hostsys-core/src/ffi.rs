//! Type tags for the foreign-call dispatcher

/// How one argument (or the return value) is laid out for a native call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArgType {
    Void = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Pointer = 5,
    Float = 6,
    Double = 7,
}

impl ArgType {
    /// Passed in a vector/floating-point register
    #[inline]
    pub const fn is_floating(self) -> bool {
        matches!(self, ArgType::Float | ArgType::Double)
    }

    /// Widen a raw argument slot to the 64-bit register image the callee expects
    ///
    /// Narrow integers are sign-extended; floats keep their bit pattern in
    /// the low bits.
    pub const fn widen(self, raw: u64) -> u64 {
        match self {
            ArgType::Int8 => raw as u8 as i8 as i64 as u64,
            ArgType::Int16 => raw as u16 as i16 as i64 as u64,
            ArgType::Int32 => raw as u32 as i32 as i64 as u64,
            ArgType::Float => raw & 0xFFFF_FFFF,
            _ => raw,
        }
    }
}

impl TryFrom<u8> for ArgType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        Ok(match v {
            0 => ArgType::Void,
            1 => ArgType::Int8,
            2 => ArgType::Int16,
            3 => ArgType::Int32,
            4 => ArgType::Int64,
            5 => ArgType::Pointer,
            6 => ArgType::Float,
            7 => ArgType::Double,
            other => return Err(other),
        })
    }
}
