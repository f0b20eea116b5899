//! Scheduling scenarios, run on the hosted backend: the test body acts as
//! the CPU's scheduler loop (`run_to_idle`) and drives the clock by hand.

use crate::{
    code,
    sync::{Mailbox, Mutex, Semaphore},
    test_support::{kernel_guard, run_to_idle, simulate_irq},
    thread,
    thread::{Builder, Entry},
    time,
    types::Priority,
};
use std::sync::{Arc as StdArc, Mutex as StdMutex};
use std::vec::Vec;

type EventLog = StdArc<StdMutex<Vec<&'static str>>>;

fn new_log() -> EventLog {
    StdArc::new(StdMutex::new(Vec::new()))
}

fn push(log: &EventLog, event: &'static str) {
    log.lock().unwrap().push(event);
}

fn events(log: &EventLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

fn spawn_suspended(
    log: &EventLog,
    priority: Priority,
    f: impl FnOnce(&EventLog) + Send + 'static,
) -> thread::ThreadNode {
    let log = log.clone();
    Builder::new(Entry::Closure(Box::new(move || f(&log))))
        .set_priority(priority)
        .build()
        .unwrap()
}

#[test]
fn fifo_within_one_priority() {
    let _g = kernel_guard();
    let log = new_log();
    let a = spawn_suspended(&log, 5, |log| push(log, "a"));
    let b = spawn_suspended(&log, 5, |log| push(log, "b"));
    let c = spawn_suspended(&log, 5, |log| push(log, "c"));
    thread::resume(&a).unwrap();
    thread::resume(&b).unwrap();
    thread::resume(&c).unwrap();
    run_to_idle();
    assert_eq!(events(&log), ["a", "b", "c"]);
}

#[test]
fn higher_priority_runs_first() {
    let _g = kernel_guard();
    let log = new_log();
    let low = spawn_suspended(&log, 9, |log| push(log, "low"));
    let high = spawn_suspended(&log, 3, |log| push(log, "high"));
    thread::resume(&low).unwrap();
    thread::resume(&high).unwrap();
    run_to_idle();
    assert_eq!(events(&log), ["high", "low"]);
}

#[test]
fn resume_preempts_lower_priority_thread() {
    let _g = kernel_guard();
    let log = new_log();
    let high = spawn_suspended(&log, 2, |log| push(log, "high"));
    let low = {
        let log = log.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            push(&log, "low-before");
            // The next instruction after this resume must run in `high`.
            thread::resume(&high).unwrap();
            push(&log, "low-after");
        })))
        .set_priority(10)
        .build()
        .unwrap()
    };
    thread::resume(&low).unwrap();
    run_to_idle();
    assert_eq!(events(&log), ["low-before", "high", "low-after"]);
}

#[test]
fn lowest_priority_never_preempts() {
    let _g = kernel_guard();
    let log = new_log();
    let weakest = spawn_suspended(&log, crate::config::LOWEST_PRIORITY, |log| {
        push(log, "weakest")
    });
    let runner = {
        let log = log.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            push(&log, "runner-before");
            thread::resume(&weakest).unwrap();
            push(&log, "runner-after");
        })))
        .set_priority(5)
        .build()
        .unwrap()
    };
    thread::resume(&runner).unwrap();
    run_to_idle();
    assert_eq!(events(&log), ["runner-before", "runner-after", "weakest"]);
}

#[test]
fn isr_defers_preemption_to_handler_exit() {
    let _g = kernel_guard();
    let log = new_log();
    let high = spawn_suspended(&log, 2, |log| push(log, "high"));
    let low = {
        let log = log.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            push(&log, "low-before");
            simulate_irq(|| {
                thread::resume(&high).unwrap();
                // Still in the handler: the wakeup must not have switched.
                push(&log, "isr-after-resume");
            });
            push(&log, "low-after");
        })))
        .set_priority(10)
        .build()
        .unwrap()
    };
    thread::resume(&low).unwrap();
    run_to_idle();
    assert_eq!(
        events(&log),
        ["low-before", "isr-after-resume", "high", "low-after"]
    );
}

#[test]
fn yield_round_robins_equal_priorities() {
    let _g = kernel_guard();
    let log = new_log();
    let a = spawn_suspended(&log, 5, |log| {
        push(log, "a1");
        crate::sched::yield_me();
        push(log, "a2");
    });
    let b = spawn_suspended(&log, 5, |log| {
        push(log, "b1");
        crate::sched::yield_me();
        push(log, "b2");
    });
    thread::resume(&a).unwrap();
    thread::resume(&b).unwrap();
    run_to_idle();
    assert_eq!(events(&log), ["a1", "b1", "a2", "b2"]);
}

#[test]
fn c_entry_and_double_resume() {
    use core::ffi::c_void;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static HITS: AtomicUsize = AtomicUsize::new(0);
    extern "C" fn bump(arg: *mut c_void) {
        let delta = arg as usize;
        HITS.fetch_add(delta, Ordering::Relaxed);
    }

    let _g = kernel_guard();
    HITS.store(0, Ordering::Relaxed);
    let t = thread::create(bump, 3 as *mut c_void, 7).unwrap();
    thread::resume(&t).unwrap();
    // Only a suspended thread can be resumed.
    assert_eq!(thread::resume(&t), Err(code::EINVAL));
    run_to_idle();
    assert_eq!(HITS.load(Ordering::Relaxed), 3);
    assert_eq!(t.state(), thread::NONE);
    assert_eq!(thread::resume(&t), Err(code::EINVAL));
}

#[test]
fn semaphore_wakes_by_priority_fifo_on_ties() {
    let _g = kernel_guard();
    let log = new_log();
    let sem = StdArc::new(Semaphore::new(0));
    sem.init();
    let mut waiters = Vec::new();
    for (name, priority) in [("a6", 6), ("b4", 4), ("c6", 6)] {
        let sem = sem.clone();
        let log = log.clone();
        let t = Builder::new(Entry::Closure(Box::new(move || {
            sem.get(time::WAITING_FOREVER).unwrap();
            push(&log, name);
        })))
        .set_priority(priority)
        .build()
        .unwrap();
        thread::resume(&t).unwrap();
        waiters.push(t);
    }
    run_to_idle();
    assert!(events(&log).is_empty());
    for _ in 0..3 {
        sem.put();
        run_to_idle();
    }
    // Highest priority first, FIFO between the equals.
    assert_eq!(events(&log), ["b4", "a6", "c6"]);
}

#[test]
fn sleep_times_out_and_leaves_the_queue() {
    let _g = kernel_guard();
    let result = StdArc::new(StdMutex::new(None));
    let sem = StdArc::new(Semaphore::new(0));
    sem.init();
    let t = {
        let sem = sem.clone();
        let result = result.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            *result.lock().unwrap() = Some(sem.get(10));
        })))
        .set_priority(5)
        .build()
        .unwrap()
    };
    thread::resume(&t).unwrap();
    run_to_idle();
    assert_eq!(*result.lock().unwrap(), None);
    for _ in 0..9 {
        time::tick();
    }
    run_to_idle();
    assert_eq!(*result.lock().unwrap(), None);
    time::tick();
    run_to_idle();
    assert_eq!(*result.lock().unwrap(), Some(Err(code::ETIMEDOUT)));
    // The sleeper left the queue: this unit stays available.
    sem.put();
    assert_eq!(sem.count(), 1);
}

#[test]
fn mailbox_capacity_two_blocks_third_send() {
    let _g = kernel_guard();
    // Static-path mailbox over leaked storage so both threads can borrow it.
    let mb: &'static Mailbox = Box::leak(Box::new(Mailbox::new()));
    let buf: &'static mut [u8] = Box::leak(vec![0u8; 2].into_boxed_slice());
    mb.init(1, buf).unwrap();
    assert_eq!(mb.capacity(), 2);

    let counts = StdArc::new(StdMutex::new(Vec::new()));
    let received = StdArc::new(StdMutex::new(Vec::new()));
    let sender = {
        let counts = counts.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            for v in [1u8, 2, 3] {
                mb.timed_send(&[v], time::WAITING_FOREVER).unwrap();
                counts.lock().unwrap().push(mb.count());
            }
        })))
        .set_priority(5)
        .build()
        .unwrap()
    };
    let receiver = {
        let counts = counts.clone();
        let received = received.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            for _ in 0..3 {
                let mut msg = [0u8];
                mb.timed_receive(&mut msg, time::WAITING_FOREVER).unwrap();
                received.lock().unwrap().push(msg[0]);
                counts.lock().unwrap().push(mb.count());
            }
        })))
        .set_priority(6)
        .build()
        .unwrap()
    };
    thread::resume(&sender).unwrap();
    thread::resume(&receiver).unwrap();
    run_to_idle();
    assert_eq!(*received.lock().unwrap(), [1, 2, 3]);
    // Sender blocks on the third message until the first receive; the
    // refill lands before the receiver samples, then the box drains.
    assert_eq!(*counts.lock().unwrap(), [1, 2, 2, 2, 1, 0]);
    mb.fini();
}

#[test]
fn mailbox_destroy_wakes_blocked_receiver() {
    let _g = kernel_guard();
    let mb = Mailbox::create(1, 1).unwrap();
    let target = &*mb as *const Mailbox as usize;
    let result = StdArc::new(StdMutex::new(None));
    let receiver = {
        let result = result.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            let mb = unsafe { &*(target as *const Mailbox) };
            let mut msg = [0u8];
            *result.lock().unwrap() = Some(mb.timed_receive(&mut msg, time::WAITING_FOREVER));
        })))
        .set_priority(5)
        .build()
        .unwrap()
    };
    thread::resume(&receiver).unwrap();
    run_to_idle();
    assert_eq!(*result.lock().unwrap(), None);
    Mailbox::destroy(mb);
    run_to_idle();
    assert_eq!(*result.lock().unwrap(), Some(Err(code::EINVAL)));
}

#[test]
fn mutex_priority_inheritance_holds_off_middle_thread() {
    let _g = kernel_guard();
    let log = new_log();
    let m = Mutex::create();

    let high = {
        let log = log.clone();
        let m = m.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            push(&log, "high-try");
            m.lock();
            push(&log, "high-locked");
            m.unlock();
        })))
        .set_priority(2)
        .build()
        .unwrap()
    };
    let middle = spawn_suspended(&log, 5, |log| push(log, "middle"));
    let low = {
        let log = log.clone();
        let m = m.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            let me = thread::current().unwrap();
            m.lock();
            push(&log, "low-locked");
            thread::resume(&high).unwrap();
            // `high` is blocked on the mutex now; its priority is ours.
            assert_eq!(me.priority(), 2);
            thread::resume(&middle).unwrap();
            push(&log, "low-unlock");
            m.unlock();
            assert_eq!(me.priority(), 10);
            push(&log, "low-end");
        })))
        .set_priority(10)
        .build()
        .unwrap()
    };
    thread::resume(&low).unwrap();
    run_to_idle();
    assert_eq!(
        events(&log),
        [
            "low-locked",
            "high-try",
            "low-unlock",
            "high-locked",
            "middle",
            "low-end"
        ]
    );
}

#[test]
fn mutex_inheritance_propagates_through_a_chain() {
    let _g = kernel_guard();
    let log = new_log();
    let m1 = Mutex::create();
    let m2 = Mutex::create();

    let t3 = {
        let log = log.clone();
        let m2 = m2.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            push(&log, "t3-try");
            m2.lock();
            push(&log, "t3-locked");
            m2.unlock();
        })))
        .set_priority(2)
        .build()
        .unwrap()
    };
    let t2 = {
        let log = log.clone();
        let m1 = m1.clone();
        let m2 = m2.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            m2.lock();
            push(&log, "t2-owns-m2");
            m1.lock();
            push(&log, "t2-owns-m1");
            m2.unlock();
            m1.unlock();
        })))
        .set_priority(15)
        .build()
        .unwrap()
    };
    let t1 = {
        let log = log.clone();
        let m1 = m1.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            let me = thread::current().unwrap();
            m1.lock();
            push(&log, "t1-owns-m1");
            thread::resume(&t2).unwrap();
            // t2 blocked on m1: inherited its priority.
            assert_eq!(me.priority(), 15);
            thread::resume(&t3).unwrap();
            // t3 blocked on m2, whose owner waits on m1 we hold: the
            // donation crossed both hops.
            assert_eq!(me.priority(), 2);
            m1.unlock();
            assert_eq!(me.priority(), 20);
        })))
        .set_priority(20)
        .build()
        .unwrap()
    };
    thread::resume(&t1).unwrap();
    run_to_idle();
    assert_eq!(
        events(&log),
        [
            "t1-owns-m1",
            "t2-owns-m2",
            "t3-try",
            "t2-owns-m1",
            "t3-locked"
        ]
    );
}

#[test]
fn wait_channel_wakes_sleepers() {
    let _g = kernel_guard();
    use crate::{sync::SpinLock, wchan::WaitChannel};
    let chan: &'static WaitChannel = Box::leak(Box::new(WaitChannel::new("test-chan")));
    chan.init();
    let flag: &'static SpinLock<bool> = Box::leak(Box::new(SpinLock::new("test-flag", false)));
    let log = new_log();
    let waiter = {
        let log = log.clone();
        Builder::new(Entry::Closure(Box::new(move || {
            let mut ready = flag.lock();
            while !*ready {
                chan.sleep(ready).unwrap();
                ready = flag.lock();
            }
            push(&log, "woken");
        })))
        .set_priority(5)
        .build()
        .unwrap()
    };
    thread::resume(&waiter).unwrap();
    run_to_idle();
    assert!(events(&log).is_empty());
    *flag.lock() = true;
    chan.wakeup_all();
    run_to_idle();
    assert_eq!(events(&log), ["woken"]);
}
