//! Foreign-call dispatcher
//!
//! Calls a native C-ABI function whose signature is only known at run time.
//! Arguments arrive as one 64-bit slot each with a parallel list of
//! [`ArgType`] tags. Integer-class arguments go to the integer argument
//! registers in order, floating ones to the vector registers in order.
//! Stack-passed arguments are not supported: a call needing more registers
//! than the architecture has is rejected instead of being mis-dispatched.

use hostsys_core::error::{SysError, SysResult};
use hostsys_core::ffi::ArgType;

use crate::arch::{call_float, call_int, FLOAT_ARG_REGS, INT_ARG_REGS};

/// Bytes per argument slot
pub const SLOT_SIZE: usize = core::mem::size_of::<u64>();

/// Invoke `function` with `arguments`, returning the raw result
///
/// - `buffer_size` is the byte size of `arguments` (`len * 8`), checked as
///   a guard against mismatched buffers
/// - integer results are sign-extended from their declared width; `Float`
///   results come back as their 32-bit pattern, `Double` as 64-bit
/// - `Void` returns 0
///
/// # Safety
///
/// `function` must point to a function whose real signature matches
/// `types` and `return_type`.
pub unsafe fn call(
    function: *const libc::c_void,
    arguments: &[u64],
    types: &[ArgType],
    buffer_size: usize,
    return_type: ArgType,
) -> SysResult<u64> {
    if function.is_null() {
        return Err(SysError::InvalidArgument("null function pointer"));
    }
    if arguments.len() != types.len() {
        return Err(SysError::InvalidArgument("argument and type counts differ"));
    }
    if buffer_size != arguments.len() * SLOT_SIZE {
        return Err(SysError::InvalidArgument("buffer size does not match argument count"));
    }

    let mut ints = [0u64; INT_ARG_REGS];
    let mut floats = [0f64; FLOAT_ARG_REGS];
    let (mut next_int, mut next_float) = (0, 0);

    for (&raw, &ty) in arguments.iter().zip(types) {
        match ty {
            ArgType::Void => return Err(SysError::InvalidArgument("void argument")),
            ty if ty.is_floating() => {
                let slot = floats
                    .get_mut(next_float)
                    .ok_or(SysError::Unsupported("too many floating-point arguments"))?;
                *slot = f64::from_bits(ty.widen(raw));
                next_float += 1;
            }
            _ => {
                let slot = ints
                    .get_mut(next_int)
                    .ok_or(SysError::Unsupported("too many integer arguments"))?;
                *slot = ty.widen(raw);
                next_int += 1;
            }
        }
    }

    let result = match return_type {
        ArgType::Void => {
            call_int(function, &ints, &floats);
            0
        }
        ty if ty.is_floating() => call_float(function, &ints, &floats).to_bits(),
        _ => call_int(function, &ints, &floats),
    };

    Ok(return_type.widen(result))
}
