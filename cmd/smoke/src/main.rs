//! hostsys End-to-End Smoke Test
//!
//! Exercises every platform service through the `System` facade:
//!   Part A: Locks and monitors: reentrancy, ping-pong, timed wait, interrupt
//!   Part B: Thread inspection: visit and suspend/resume of a spinning thread
//!   Part C: Fault interception: resume past a bad load, single registration
//!   Part D: Native calls: dispatcher and generated code
//!
//! Run: ./target/release/smoke
//!      HOSTSYS_CRASH_DUMP_DIR=/tmp ./target/release/smoke --crash
//! (`--crash` faults on purpose after the run and leaves a snapshot)

use hostsys::{
    page_size, ArgType, Detached, FaultAction, FaultContext, SysError, System, Thread,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Fault helpers ──

const BAD_ADDR: usize = 16;

static RESUME_AT: AtomicUsize = AtomicUsize::new(0);
static FAULTS: AtomicUsize = AtomicUsize::new(0);

/// Load from BAD_ADDR; RESUME_AT receives the address after the load
#[inline(never)]
fn bad_load() {
    unsafe {
        #[cfg(target_arch = "x86_64")]
        core::arch::asm!(
            "lea {tmp}, [rip + 2f]",
            "mov qword ptr [{slot}], {tmp}",
            "mov {tmp}, qword ptr [{bad}]",
            "2:",
            tmp = out(reg) _,
            slot = in(reg) RESUME_AT.as_ptr(),
            bad = in(reg) BAD_ADDR,
            options(nostack),
        );
        #[cfg(target_arch = "aarch64")]
        core::arch::asm!(
            "adr {tmp}, 2f",
            "str {tmp}, [{slot}]",
            "ldr {tmp}, [{bad}]",
            "2:",
            tmp = out(reg) _,
            slot = in(reg) RESUME_AT.as_ptr(),
            bad = in(reg) BAD_ADDR,
            options(nostack),
        );
    }
}

fn skip_bad_load(ctx: &mut FaultContext) -> FaultAction {
    let resume_at = RESUME_AT.load(Ordering::SeqCst);
    if ctx.address() != BAD_ADDR || resume_at == 0 {
        return FaultAction::NotHandled;
    }
    FAULTS.fetch_add(1, Ordering::SeqCst);
    ctx.ip = resume_at;
    FaultAction::Resume
}

fn decline(_: &mut FaultContext) -> FaultAction {
    FaultAction::NotHandled
}

// ════════════════════════════════════════════════════════════
// Part A: Locks and monitors
// ════════════════════════════════════════════════════════════

fn test_monitors(t: &mut TestRunner, system: &System, me: &Arc<Thread>) {
    t.section("Part A: Locks and monitors");

    // A1: plain lock
    match system.make_lock() {
        Ok(lock) => {
            lock.acquire();
            let busy = !lock.try_acquire();
            lock.release();
            t.check("lock excludes try_acquire while held", busy, "try_acquire succeeded");
        }
        Err(e) => t.fail("make_lock", &e.to_string()),
    }

    let monitor = match system.make_monitor() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            t.fail("make_monitor", &e.to_string());
            return;
        }
    };

    // A2: reentrancy
    monitor.acquire(me);
    monitor.acquire(me);
    let depth = monitor.depth(me);
    monitor.release(me);
    monitor.release(me);
    t.check("reentrant acquire reaches depth 2", depth == 2, &format!("depth {}", depth));
    t.check("fully released monitor has no owner", monitor.owner().is_none(), "still owned");

    // A3: timed wait
    monitor.acquire(me);
    let start = Instant::now();
    let interrupted = monitor.wait(me, 20);
    let waited = start.elapsed();
    monitor.release(me);
    t.check(
        "timed wait returns after timeout",
        !interrupted && waited >= Duration::from_millis(15),
        &format!("interrupted={} waited={:?}", interrupted, waited),
    );

    // A4: ping-pong between two threads
    const ROUNDS: usize = 1000;
    let turn = Arc::new(AtomicUsize::new(0));
    let players: Vec<_> = (0..2)
        .map(|side| {
            let (m, turn) = (Arc::clone(&monitor), Arc::clone(&turn));
            system.start(Arc::new(move |me: &Arc<Thread>| {
                m.acquire(me);
                for _ in 0..ROUNDS {
                    while turn.load(Ordering::SeqCst) % 2 != side {
                        m.wait(me, 0);
                    }
                    turn.fetch_add(1, Ordering::SeqCst);
                    m.notify(me);
                }
                m.release(me);
            }))
        })
        .collect();
    let start = Instant::now();
    let mut joined = true;
    for p in players {
        match p {
            Ok(thread) => joined &= thread.join().is_ok(),
            Err(e) => {
                t.fail("start ping-pong thread", &e.to_string());
                joined = false;
            }
        }
    }
    let turns = turn.load(Ordering::SeqCst);
    t.check(
        &format!("ping-pong {} handoffs", ROUNDS * 2),
        joined && turns == ROUNDS * 2,
        &format!("{} turns", turns),
    );
    println!("       {:?} per handoff", start.elapsed() / (ROUNDS as u32 * 2));

    // A5: interrupt a waiter
    let outcome = Arc::new(Mutex::new(None));
    let (m, o) = (Arc::clone(&monitor), Arc::clone(&outcome));
    let waiter = system.start(Arc::new(move |me: &Arc<Thread>| {
        m.acquire(me);
        let r = m.wait(me, 0);
        m.release(me);
        if let Ok(mut slot) = o.lock() {
            *slot = Some(r);
        }
    }));
    match waiter {
        Ok(waiter) => {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                monitor.acquire(me);
                let queued = monitor.waiter_count(me);
                monitor.release(me);
                if queued == 1 || Instant::now() > deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            waiter.interrupt();
            let _ = waiter.join();
            let got = outcome.lock().map(|o| *o).unwrap_or(None);
            t.check("interrupted wait reports true", got == Some(true), &format!("{:?}", got));
        }
        Err(e) => t.fail("start waiter", &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part B: Thread inspection
// ════════════════════════════════════════════════════════════

fn test_inspection(t: &mut TestRunner, system: &System, me: &Arc<Thread>) {
    t.section("Part B: Thread inspection");

    let marker = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let (mk, st) = (Arc::clone(&marker), Arc::clone(&stop));
    let spinner = match system.start(Arc::new(move |_: &Arc<Thread>| {
        let local = 0u64;
        mk.store(std::hint::black_box(&local) as *const u64 as usize, Ordering::SeqCst);
        while !st.load(Ordering::Relaxed) {
            std::hint::spin_loop();
        }
    })) {
        Ok(s) => s,
        Err(e) => {
            t.fail("start spinner", &e.to_string());
            return;
        }
    };
    while marker.load(Ordering::SeqCst) == 0 {
        std::thread::yield_now();
    }
    let local = marker.load(Ordering::SeqCst);

    // B1: visit
    let mut seen = None;
    let r = system.visit(me, &spinner, &mut |ip: usize, frame: usize, stack: usize| {
        seen = Some((ip, frame, stack));
    });
    match (r, seen) {
        (Ok(()), Some((ip, frame, stack))) => {
            println!("       ip=0x{:x} frame=0x{:x} stack=0x{:x}", ip, frame, stack);
            t.check(
                "visit reports registers on target stack",
                ip != 0 && stack <= local && local - stack < 1 << 20,
                "stack pointer far from target local",
            );
        }
        (Err(e), _) => t.fail("visit", &e.to_string()),
        (Ok(()), None) => t.fail("visit", "visitor never ran"),
    }

    // B2: many visits
    let start = Instant::now();
    let mut count = 0;
    for _ in 0..100 {
        if system.visit(me, &spinner, &mut |_: usize, _: usize, _: usize| count += 1).is_err() {
            break;
        }
    }
    t.check("100 consecutive visits", count == 100, &format!("{} visits", count));
    println!("       {:?} per visit", start.elapsed() / 100);

    // B3: suspend, read, write back, resume
    match system.suspend(me, &spinner) {
        Ok(mut paused) => {
            let regs = paused.registers();
            paused.set_registers(regs);
            let same = paused.registers() == regs;
            paused.resume();
            t.check("suspend + set_registers + resume", same, "registers changed");
        }
        Err(e) => t.fail("suspend", &e.to_string()),
    }

    stop.store(true, Ordering::Relaxed);
    let _ = spinner.join();

    // B4: finished target
    let r = system.visit(me, &spinner, &mut |_: usize, _: usize, _: usize| {});
    t.check(
        "finished thread is reported",
        r == Err(SysError::ThreadFinished),
        &format!("{:?}", r),
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Fault interception
// ════════════════════════════════════════════════════════════

fn test_faults(t: &mut TestRunner, system: &System) {
    t.section("Part C: Fault interception");

    // C1: install
    if let Err(e) = system.handle_faults(skip_bad_load) {
        t.fail("install fault handler", &e.to_string());
        return;
    }
    t.pass("install fault handler");

    // C2: second registration
    let again = system.handle_faults(decline);
    t.check(
        "second registration rejected",
        again == Err(SysError::AlreadyInstalled),
        &format!("{:?}", again),
    );

    // C3: resume past the load
    for _ in 0..10 {
        bad_load();
    }
    let hits = FAULTS.load(Ordering::SeqCst);
    t.check("10 faults resumed", hits == 10, &format!("{} faults", hits));

    // C4: uninstall
    let r = system.stop_handling_faults();
    t.check("uninstall", r.is_ok(), &format!("{:?}", r));
    let r = system.stop_handling_faults();
    t.check("second uninstall rejected", r == Err(SysError::NotInstalled), &format!("{:?}", r));
}

// ════════════════════════════════════════════════════════════
// Part D: Native calls
// ════════════════════════════════════════════════════════════

extern "C" fn mix(a: i32, x: f64, b: i64, y: f64) -> f64 {
    a as f64 * x + b as f64 * y
}

extern "C" fn negate(v: i64) -> i16 {
    -(v as i16)
}

fn test_calls(t: &mut TestRunner, system: &System) {
    t.section("Part D: Native calls");

    // D1: mixed integer and floating-point arguments
    let args = [3, 2.0f64.to_bits(), 10, 0.5f64.to_bits()];
    let types = [ArgType::Int32, ArgType::Double, ArgType::Int64, ArgType::Double];
    match unsafe { system.call(mix as *const _, &args, &types, args.len() * 8, ArgType::Double) } {
        Ok(bits) => {
            let v = f64::from_bits(bits);
            t.check("mixed argument call", v == 11.0, &format!("got {}", v));
        }
        Err(e) => t.fail("mixed argument call", &e.to_string()),
    }

    // D2: narrow return
    match unsafe { system.call(negate as *const _, &[7], &[ArgType::Int64], 8, ArgType::Int16) } {
        Ok(v) => t.check("narrow return sign-extended", v as i64 == -7, &format!("got {}", v as i64)),
        Err(e) => t.fail("narrow return sign-extended", &e.to_string()),
    }

    // D3: bad buffer size
    let r = unsafe { system.call(negate as *const _, &[7], &[ArgType::Int64], 4, ArgType::Int16) };
    t.check("mismatched buffer rejected", matches!(r, Err(SysError::InvalidArgument(_))), &format!("{:?}", r));

    // D4: generated code
    let region = match system.allocate_executable(page_size()) {
        Ok(r) => {
            t.pass("allocate one executable page");
            r
        }
        Err(e) => {
            t.fail("allocate one executable page", &e.to_string());
            return;
        }
    };
    let mut region = region;

    #[cfg(target_arch = "x86_64")]
    let code: &[u8] = &[0x48, 0x8D, 0x04, 0x37, 0xC3]; // lea rax, [rdi + rsi] ; ret
    #[cfg(target_arch = "aarch64")]
    let code: &[u8] = &[0x00, 0x00, 0x01, 0x8B, 0xC0, 0x03, 0x5F, 0xD6]; // add x0, x0, x1 ; ret

    region.as_mut_slice()[..code.len()].copy_from_slice(code);
    #[cfg(target_arch = "aarch64")]
    unsafe {
        extern "C" {
            fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
        }
        let p = region.as_ptr() as *mut libc::c_char;
        __clear_cache(p, p.add(code.len()));
    }

    let r = unsafe {
        system.call(region.as_ptr().cast(), &[40, 2], &[ArgType::Int64, ArgType::Int64], 16, ArgType::Int64)
    };
    t.check("call generated code", r == Ok(42), &format!("{:?}", r));
}

fn main() {
    println!("=== hostsys End-to-End Smoke Test ===");
    let crash = std::env::args().any(|a| a == "--crash");

    let mut t = TestRunner::new();

    let system = match System::from_env() {
        Ok(s) => s,
        Err(e) => {
            println!("\nFATAL: System::from_env failed: {} (status {})", e, e.status());
            std::process::exit(1);
        }
    };
    system.config().print();

    let me = match system.attach(Arc::new(Detached)) {
        Ok(me) => me,
        Err(e) => {
            println!("\nFATAL: attach failed: {}", e);
            std::process::exit(1);
        }
    };

    test_monitors(&mut t, &system, &me);
    test_inspection(&mut t, &system, &me);
    test_faults(&mut t, &system);
    test_calls(&mut t, &system);

    t.summary();

    if crash {
        println!("\nFaulting on purpose (dump dir: {:?})", system.config().crash_dump_dir);
        if system.handle_faults(decline).is_ok() {
            bad_load();
        }
        system.abort();
    }

    system.exit(if t.failed > 0 { 1 } else { 0 });
}
