use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use threadcore::interrupt;
use threadcore::prelude::*;

fn blocker(pool: &Executor, gate: &Semaphore) -> Task {
    let gate = gate.clone();
    pool.execute(move || gate.wait())
}

#[test]
fn test_each_task_runs_or_is_canceled() {
    let pool = Executor::new(1).unwrap();
    let gate = Semaphore::new(0);
    let first = blocker(&pool, &gate);

    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..40).map(|_| AtomicUsize::new(0)).collect());
    let tasks: Vec<Task> = (0..40)
        .map(|i| {
            let runs = runs.clone();
            pool.execute(move || {
                runs[i].fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let canceled: Vec<bool> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| i % 3 == 0 && pool.cancel(t))
        .collect();

    gate.post();
    pool.wait_idle();

    for (i, task) in tasks.iter().enumerate() {
        let ran = runs[i].load(Ordering::SeqCst);
        if canceled[i] {
            assert_eq!(ran, 0, "canceled task {} ran", i);
            assert_eq!(task.state(), TaskState::Canceled);
        } else {
            assert_eq!(ran, 1, "task {} ran {} times", i, ran);
            assert_eq!(task.state(), TaskState::Done);
        }
    }
    assert!(canceled.iter().any(|&c| c));
    assert_eq!(first.state(), TaskState::Done);

    pool.delete();
}

#[test]
fn test_cancel_claimed_task_is_noop() {
    let pool = Executor::new(2).unwrap();
    let started = Semaphore::new(0);
    let gate = Semaphore::new(0);

    let running = {
        let started = started.clone();
        let gate = gate.clone();
        pool.execute(move || {
            started.post();
            gate.wait();
        })
    };

    started.wait();
    assert_eq!(running.state(), TaskState::Claimed);
    assert!(!pool.cancel(&running));

    gate.post();
    pool.wait_idle();
    assert!(!pool.cancel(&running));
    assert_eq!(running.state(), TaskState::Done);

    pool.delete();
}

#[test]
fn test_cancel_sibling_from_running_task() {
    let pool = Arc::new(Executor::new(1).unwrap());
    let sibling_ran = Arc::new(AtomicBool::new(false));
    let slot: Arc<Mutex<Option<Task>>> = Arc::new(Mutex::new(None));
    let gate = Semaphore::new(0);
    let result = Arc::new(Mutex::new(None));

    {
        let pool2 = pool.clone();
        let slot = slot.clone();
        let gate = gate.clone();
        let result = result.clone();
        pool.execute(move || {
            gate.wait();
            if let Some(sibling) = slot.lock().as_ref() {
                *result.lock() = Some(pool2.cancel(sibling));
            }
        });
    }

    let sibling = {
        let ran = sibling_ran.clone();
        pool.execute(move || ran.store(true, Ordering::SeqCst))
    };
    *slot.lock() = Some(sibling.clone());
    gate.post();

    pool.wait_idle();
    assert_eq!(*result.lock(), Some(true));
    assert!(!sibling_ran.load(Ordering::SeqCst));
    assert_eq!(sibling.state(), TaskState::Canceled);

    slot.lock().take();
    drop(pool);
}

#[test]
fn test_concurrency_never_exceeds_max_threads() {
    const K: usize = 3;
    let pool = Executor::new(K).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..30 {
        let current = current.clone();
        let peak = peak.clone();
        pool.execute(move || {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            current.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pool.wait_idle();
    assert!(peak.load(Ordering::SeqCst) <= K);
    assert!(pool.num_threads() <= K);
    assert!(pool.num_threads() >= 1);

    pool.delete();
}

#[test]
fn test_growth_is_lazy() {
    let pool = Executor::new(8).unwrap();
    for _ in 0..5 {
        pool.execute(|| {});
        pool.wait_idle();
    }
    // Work never outgrew one worker, so no extra thread was needed.
    assert_eq!(pool.num_threads(), 1);
    pool.delete();
}

#[test]
fn test_delete_joins_workers() {
    let pool = Executor::new(4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let counter = counter.clone();
        pool.execute(move || {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    pool.wait_idle();
    pool.delete();

    let after = counter.load(Ordering::SeqCst);
    assert_eq!(after, 20);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.load(Ordering::SeqCst), after);
}

fn double_range(pool: Arc<Executor>, data: Arc<Vec<AtomicI32>>, lo: usize, hi: usize) {
    if hi - lo == 1 {
        data[lo].fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v * 2))
            .unwrap();
        return;
    }

    let mid = lo + (hi - lo) / 2;
    for (a, b) in [(lo, mid), (mid, hi)] {
        let next_pool = pool.clone();
        let data = data.clone();
        pool.execute(move || double_range(next_pool.clone(), data.clone(), a, b));
    }
}

#[test]
fn test_recursive_submission() {
    let pool = Arc::new(Executor::new(4).unwrap());
    let data: Arc<Vec<AtomicI32>> = Arc::new((0..100).map(AtomicI32::new).collect());

    {
        let next_pool = pool.clone();
        let data = data.clone();
        pool.execute(move || double_range(next_pool.clone(), data.clone(), 0, 100));
    }

    pool.wait_idle();
    for (i, v) in data.iter().enumerate() {
        assert_eq!(v.load(Ordering::SeqCst), 2 * i as i32);
    }

    drop(pool);
}

#[test]
fn test_resubmit_finished_task() {
    let pool = Executor::new(2).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let task = {
        let hits = hits.clone();
        Task::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    };

    for _ in 0..3 {
        pool.submit(&task);
        pool.wait_idle();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    pool.delete();
}

#[test]
fn test_resubmit_while_running_keeps_claimed() {
    let pool = Arc::new(Executor::new(2).unwrap());
    let slot: Arc<Mutex<Option<Task>>> = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));
    let first_started = Semaphore::new(0);
    let second_started = Semaphore::new(0);
    let release_first = Semaphore::new(0);
    let release_second = Semaphore::new(0);

    let task = {
        let pool = pool.clone();
        let slot = slot.clone();
        let runs = runs.clone();
        let (first_started, second_started) = (first_started.clone(), second_started.clone());
        let (release_first, release_second) = (release_first.clone(), release_second.clone());
        Task::new(move || {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(me) = slot.lock().as_ref() {
                    pool.submit(me);
                }
                first_started.post();
                release_first.wait();
            } else {
                second_started.post();
                release_second.wait();
            }
        })
    };
    *slot.lock() = Some(task.clone());

    pool.submit(&task);
    first_started.wait();
    second_started.wait();
    assert_eq!(task.state(), TaskState::Claimed);

    // Let the first run finish; the second is still inside the callback.
    release_first.post();
    while pool.unfinished() != 1 {
        thread::yield_now();
    }
    assert_eq!(task.state(), TaskState::Claimed);
    assert!(!pool.cancel(&task));

    release_second.post();
    pool.wait_idle();
    assert_eq!(task.state(), TaskState::Done);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    slot.lock().take();
    drop(task);
    drop(pool);
}

#[test]
fn test_cancel_with_long_backlog() {
    const N: usize = 10_000;
    let pool = Executor::new(1).unwrap();
    let started = Semaphore::new(0);
    let gate = Semaphore::new(0);
    {
        let started = started.clone();
        let gate = gate.clone();
        pool.execute(move || {
            started.post();
            gate.wait();
        });
    }
    started.wait();

    let hits = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<Task> = (0..N)
        .map(|_| {
            let hits = hits.clone();
            pool.execute(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    let canceled = tasks
        .iter()
        .enumerate()
        .rev()
        .filter(|(i, t)| i % 2 == 1 && pool.cancel(t))
        .count();
    assert_eq!(canceled, N / 2);
    assert_eq!(pool.queued(), N / 2);

    gate.post();
    pool.wait_idle();
    assert_eq!(hits.load(Ordering::Relaxed), N / 2);
    for (i, task) in tasks.iter().enumerate() {
        let expected = if i % 2 == 1 { TaskState::Canceled } else { TaskState::Done };
        assert_eq!(task.state(), expected);
    }

    pool.delete();
}

#[test]
fn test_panicking_task_does_not_stall_pool() {
    let config = ExecutorConfig::builder()
        .max_threads(1)
        .panic_strategy(PanicStrategy::Isolate)
        .build()
        .unwrap();
    let pool = Executor::with_config(config).unwrap();
    let after = Arc::new(AtomicBool::new(false));

    let bad = pool.execute(|| panic!("intentional"));
    {
        let after = after.clone();
        pool.execute(move || after.store(true, Ordering::SeqCst));
    }

    pool.wait_idle();
    assert_eq!(bad.state(), TaskState::Done);
    assert!(after.load(Ordering::SeqCst));

    #[cfg(feature = "telemetry")]
    {
        let m = pool.metrics();
        assert_eq!(m.tasks_panicked, 1);
        assert_eq!(m.tasks_executed, 1);
    }

    pool.delete();
}

#[test]
fn test_worker_thread_names() {
    let config = ExecutorConfig::builder()
        .max_threads(1)
        .thread_name_prefix("decoder")
        .build()
        .unwrap();
    let pool = Executor::with_config(config).unwrap();
    let name = Arc::new(Mutex::new(String::new()));

    {
        let name = name.clone();
        pool.execute(move || {
            *name.lock() = thread::current().name().unwrap_or("").to_string();
        });
    }

    pool.wait_idle();
    assert_eq!(*name.lock(), "decoder-0");
    pool.delete();
}

// A job is either still queued (cancel it) or running (interrupt it), the
// way a media preparser tears down outstanding requests.
#[test]
fn test_cancel_or_interrupt_jobs() {
    let pool = Executor::new(2).unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let started = Semaphore::new(0);

    let jobs: Vec<(Task, Interrupt)> = (0..6)
        .map(|i| {
            let ctx = Interrupt::new();
            let job_ctx = ctx.clone();
            let outcomes = outcomes.clone();
            let started = started.clone();
            let task = pool.execute(move || {
                let previous = interrupt::set(Some(job_ctx.clone()));
                started.post();
                let res = interrupt::sleep(Duration::from_secs(30));
                interrupt::set(previous);
                outcomes.lock().push((i, res));
            });
            (task, ctx)
        })
        .collect();

    // Two workers means two jobs get to run; wait until both are blocked.
    started.wait();
    started.wait();

    let mut canceled = 0;
    for (task, ctx) in &jobs {
        if pool.cancel(task) {
            canceled += 1;
        } else {
            ctx.kill();
        }
    }

    pool.wait_idle();
    let outcomes = outcomes.lock();
    assert_eq!(canceled + outcomes.len(), jobs.len());
    assert!(outcomes.iter().all(|(_, res)| *res == Err(Interrupted)));

    pool.delete();
}
