//! x86_64 (System V) register access

use core::arch::asm;
use hostsys_core::context::Registers;

/// Integer/pointer argument registers: rdi, rsi, rdx, rcx, r8, r9
pub const INT_ARG_REGS: usize = 6;

/// Vector argument registers: xmm0-xmm7
pub const FLOAT_ARG_REGS: usize = 8;

/// Register view over a signal handler's machine context
pub struct MachineContext<'a> {
    gregs: &'a mut [libc::greg_t; 23],
}

impl<'a> MachineContext<'a> {
    /// # Safety
    ///
    /// `uctx` must be the `ucontext_t` pointer passed to an SA_SIGINFO
    /// handler that is still running.
    #[inline]
    pub unsafe fn from_ucontext(uctx: *mut libc::c_void) -> Self {
        let uc = &mut *(uctx as *mut libc::ucontext_t);
        Self { gregs: &mut uc.uc_mcontext.gregs }
    }

    #[inline]
    pub fn registers(&self) -> Registers {
        Registers::new(
            self.gregs[libc::REG_RIP as usize] as usize,
            self.gregs[libc::REG_RBP as usize] as usize,
            self.gregs[libc::REG_RSP as usize] as usize,
        )
    }

    #[inline]
    pub fn set_registers(&mut self, regs: &Registers) {
        self.gregs[libc::REG_RIP as usize] = regs.ip as libc::greg_t;
        self.gregs[libc::REG_RBP as usize] = regs.frame as libc::greg_t;
        self.gregs[libc::REG_RSP as usize] = regs.stack as libc::greg_t;
    }

    /// rbx, which the runtime reserves for its thread pointer
    #[inline]
    pub fn thread_register(&self) -> usize {
        self.gregs[libc::REG_RBX as usize] as usize
    }

    #[inline]
    pub fn set_thread_register(&mut self, value: usize) {
        self.gregs[libc::REG_RBX as usize] = value as libc::greg_t;
    }
}

/// ip/frame/stack at the call site
#[inline(always)]
pub fn current_registers() -> Registers {
    let (ip, frame, stack): (usize, usize, usize);
    unsafe {
        asm!(
            "lea {ip}, [rip]",
            "mov {fp}, rbp",
            "mov {sp}, rsp",
            ip = out(reg) ip,
            fp = out(reg) frame,
            sp = out(reg) stack,
            options(nomem, nostack, preserves_flags),
        );
    }
    Registers::new(ip, frame, stack)
}

type IntFn = unsafe extern "C" fn(
    u64, u64, u64, u64, u64, u64,
    f64, f64, f64, f64, f64, f64, f64, f64,
) -> u64;

type FloatFn = unsafe extern "C" fn(
    u64, u64, u64, u64, u64, u64,
    f64, f64, f64, f64, f64, f64, f64, f64,
) -> f64;

/// Call `function` with every argument register loaded; result from rax
///
/// # Safety
///
/// `function` must be a C-ABI function taking at most the loaded registers.
#[inline(never)]
pub unsafe fn call_int(
    function: *const libc::c_void,
    ints: &[u64; INT_ARG_REGS],
    floats: &[f64; FLOAT_ARG_REGS],
) -> u64 {
    let f: IntFn = core::mem::transmute(function);
    f(
        ints[0], ints[1], ints[2], ints[3], ints[4], ints[5],
        floats[0], floats[1], floats[2], floats[3], floats[4], floats[5], floats[6], floats[7],
    )
}

/// As [`call_int`], result from xmm0
///
/// # Safety
///
/// See [`call_int`].
#[inline(never)]
pub unsafe fn call_float(
    function: *const libc::c_void,
    ints: &[u64; INT_ARG_REGS],
    floats: &[f64; FLOAT_ARG_REGS],
) -> f64 {
    let f: FloatFn = core::mem::transmute(function);
    f(
        ints[0], ints[1], ints[2], ints[3], ints[4], ints[5],
        floats[0], floats[1], floats[2], floats[3], floats[4], floats[5], floats[6], floats[7],
    )
}
