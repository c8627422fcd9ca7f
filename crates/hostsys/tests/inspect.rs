//! Suspending threads and reading their registers through `System`

use hostsys::{Detached, SysError, System, SystemConfig, Thread};
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Spinner {
    thread: Arc<Thread>,
    marker: usize,
    stop: Arc<AtomicBool>,
}

#[inline(never)]
fn spin_until(stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        std::hint::spin_loop();
    }
}

/// Publish the address of a local in this frame, then spin in a callee so
/// the thread's stack pointer always sits below that local
#[inline(never)]
fn publish_and_spin(marker: &AtomicUsize, stop: &AtomicBool) {
    let local = 0u64;
    marker.store(black_box(&local) as *const u64 as usize, Ordering::SeqCst);
    spin_until(stop);
    black_box(&local);
}

impl Spinner {
    fn start(system: &System) -> Spinner {
        let marker = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (m, s) = (Arc::clone(&marker), Arc::clone(&stop));

        let thread = system
            .start(Arc::new(move |_: &Arc<Thread>| publish_and_spin(&m, &s)))
            .unwrap();

        while marker.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        Spinner { thread, marker: marker.load(Ordering::SeqCst), stop }
    }

    fn finish(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.join().unwrap();
    }
}

#[test]
fn visit_reports_target_stack() {
    let system = System::new(SystemConfig::new()).unwrap();
    let me = system.attach(Arc::new(Detached)).unwrap();
    let spinner = Spinner::start(&system);

    for _ in 0..20 {
        let mut seen = None;
        system
            .visit(&me, &spinner.thread, &mut |ip: usize, frame: usize, stack: usize| {
                seen = Some((ip, frame, stack));
            })
            .unwrap();

        let (ip, frame, stack) = seen.unwrap();
        assert_ne!(ip, 0);
        // The spinner runs in (or below) the frame holding `local`
        assert!(stack <= spinner.marker, "stack {:#x} above marker {:#x}", stack, spinner.marker);
        assert!(spinner.marker - stack < 1 << 20);
        assert!(frame >= stack && frame - stack < 1 << 20, "frame {:#x} stack {:#x}", frame, stack);
    }

    spinner.finish();
}

#[test]
fn suspend_then_rewrite_same_registers() {
    let system = System::new(SystemConfig::new()).unwrap();
    let me = system.attach(Arc::new(Detached)).unwrap();
    let spinner = Spinner::start(&system);

    let mut paused = system.suspend(&me, &spinner.thread).unwrap();
    let regs = paused.registers();
    paused.set_registers(regs);
    assert_eq!(paused.registers(), regs);
    paused.resume();

    // Dropping without an explicit resume also lets the thread go
    let paused = system.suspend(&me, &spinner.thread).unwrap();
    drop(paused);

    spinner.finish();
}

#[test]
fn concurrent_inspectors_are_serialized() {
    let system = Arc::new(System::new(SystemConfig::new()).unwrap());
    let spinner = Spinner::start(&system);
    let target = Arc::clone(&spinner.thread);
    let visits = Arc::new(AtomicUsize::new(0));

    let inspectors: Vec<_> = (0..3)
        .map(|_| {
            let system2 = Arc::clone(&system);
            let target = Arc::clone(&target);
            let visits = Arc::clone(&visits);
            system
                .start(Arc::new(move |me: &Arc<Thread>| {
                    for _ in 0..25 {
                        system2
                            .visit(me, &target, &mut |_: usize, _: usize, _: usize| {
                                visits.fetch_add(1, Ordering::Relaxed);
                            })
                            .unwrap();
                    }
                }))
                .unwrap()
        })
        .collect();

    for t in inspectors {
        t.join().unwrap();
    }
    assert_eq!(visits.load(Ordering::Relaxed), 75);
    spinner.finish();
}

#[test]
fn finished_thread_is_reported() {
    let system = System::new(SystemConfig::new()).unwrap();
    let me = system.attach(Arc::new(Detached)).unwrap();
    let done = system.start(Arc::new(|_: &Arc<Thread>| {})).unwrap();
    done.join().unwrap();

    let result = system.visit(&me, &done, &mut |_: usize, _: usize, _: usize| {
        panic!("visitor must not run");
    });
    assert_eq!(result, Err(SysError::ThreadFinished));
    assert_eq!(hostsys::status_of(&result), SysError::ThreadFinished.status());
}

#[test]
fn custom_inspect_signal() {
    let config = SystemConfig::new()
        .inspect_signal(libc::SIGUSR1)
        .inspect_timeout(Duration::from_secs(2));
    let system = System::new(config).unwrap();
    let me = system.attach(Arc::new(Detached)).unwrap();
    let spinner = Spinner::start(&system);

    let mut hits = 0;
    system
        .visit(&me, &spinner.thread, &mut |_: usize, _: usize, _: usize| hits += 1)
        .unwrap();
    assert_eq!(hits, 1);

    spinner.finish();
}
