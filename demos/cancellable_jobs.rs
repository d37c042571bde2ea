//! Probe a batch of media items on a small pool, then abandon the batch:
//! jobs still waiting are canceled, jobs already running are interrupted.
//!
//! Run with `RUST_LOG=debug cargo run --example cancellable_jobs`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use threadcore::interrupt;
use threadcore::prelude::*;

struct Job {
    name: String,
    task: Task,
    ctx: Interrupt,
}

fn probe(name: &str) -> std::result::Result<u64, Interrupted> {
    // Pretend to read headers in a few interruptible steps.
    let mut bytes = 0;
    for _ in 0..10 {
        interrupt::sleep(Duration::from_millis(50))?;
        bytes += name.len() as u64 * 188;
    }
    Ok(bytes)
}

fn main() -> threadcore::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ExecutorConfig::builder()
        .max_threads(2)
        .thread_name_prefix("probe")
        .build()?;
    let pool = Executor::with_config(config)?;
    let report = Arc::new(Mutex::new(Vec::new()));

    let jobs: Vec<Job> = ["intro.mkv", "talk.ts", "song.flac", "clip.mp4", "radio.ogg"]
        .iter()
        .map(|name| {
            let ctx = Interrupt::new();
            let job_ctx = ctx.clone();
            let report = report.clone();
            let job_name = name.to_string();
            let task = pool.execute(move || {
                let previous = interrupt::set(Some(job_ctx.clone()));
                let outcome = probe(&job_name);
                interrupt::set(previous);
                report.lock().push((job_name.clone(), outcome));
            });
            Job {
                name: name.to_string(),
                task,
                ctx,
            }
        })
        .collect();

    std::thread::sleep(Duration::from_millis(120));

    for job in &jobs {
        if pool.cancel(&job.task) {
            println!("{:<10} canceled before start", job.name);
        } else {
            job.ctx.kill();
        }
    }

    pool.wait_idle();

    for (name, outcome) in report.lock().iter() {
        match outcome {
            Ok(bytes) => println!("{:<10} probed {} bytes", name, bytes),
            Err(Interrupted) => println!("{:<10} interrupted", name),
        }
    }

    #[cfg(feature = "telemetry")]
    {
        let m = pool.metrics();
        println!(
            "submitted={} settled={} canceled={} threads={}",
            m.tasks_submitted,
            m.tasks_settled(),
            m.tasks_canceled,
            m.threads_spawned
        );
    }

    pool.delete();
    Ok(())
}
