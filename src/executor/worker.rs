// worker thread stuff
use super::pool::Shared;
use super::task::Task;
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Instant;

pub(crate) type WorkerId = usize;

// main loop
pub(crate) fn run(shared: Arc<Shared>, id: WorkerId) {
    tracing::debug!(worker = id, "worker started");

    let mut state = shared.state.lock();

    loop {
        let (task, generation) = match state.pending.pop_front() {
            Some(entry) => entry,
            None if state.closing => break,
            None => {
                shared.queue_cond.wait(&mut state);
                continue;
            }
        };

        if !task.claim(generation) {
            // Canceled, or superseded by a later submission.
            MutexGuard::unlocked(&mut state, || drop(task));
            continue;
        }
        state.queued -= 1;

        MutexGuard::unlocked(&mut state, || execute_task(&shared, &task));

        task.finish(generation);
        state.unfinished -= 1;
        if state.unfinished == 0 {
            shared.idle_cond.notify_all();
        }

        // The callback's captures may own the last handle to the executor;
        // never let them drop while we hold its lock.
        MutexGuard::unlocked(&mut state, || drop(task));
    }

    drop(state);
    tracing::debug!(worker = id, "worker exiting");
}

fn execute_task(shared: &Shared, task: &Task) {
    let start = Instant::now();

    let result = shared.panic_handler.execute(|| task.run());

    let duration_ns = start.elapsed().as_nanos() as u64;

    match result {
        Ok(()) => {
            #[cfg(feature = "telemetry")]
            shared.metrics.record_task_execution(duration_ns);
        }
        Err(_) => {
            tracing::debug!(task = %task.id(), duration_ns, "task callback panicked");
            #[cfg(feature = "telemetry")]
            shared.metrics.record_task_panic();
        }
    }
}
