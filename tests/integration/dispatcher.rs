// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Dispatcher behaviour observed through its public API.

use crate::tests::{read_lines, temp_log};
use anyhow::Result;
use ringlog::dispatch::WorkerState;
use ringlog::{DispatchError, Dispatcher, DispatcherConfig, Job, JobCategory, LogSystem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn config() -> DispatcherConfig {
    DispatcherConfig {
        workers: 2,
        idle_timeout_ms: 20,
    }
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Workers parked on the idle queue and ready for a direct handoff
fn idle_count(dispatcher: &Dispatcher) -> usize {
    dispatcher.idle_workers()
}

/// Job that records its id and counts process/finish calls
struct Tracked {
    id: usize,
    category: JobCategory,
    log: Arc<Mutex<Vec<usize>>>,
    finished: Arc<AtomicUsize>,
}

impl Job for Tracked {
    fn category(&self) -> JobCategory {
        self.category
    }

    fn process(&mut self) {
        self.log.lock().unwrap().push(self.id);
    }

    fn finish(&mut self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "tracked"
    }
}

#[test]
fn test_direct_handoff_skips_queue() -> Result<()> {
    let dispatcher = Dispatcher::new(config(), None);
    dispatcher.init(1)?;
    wait_until(|| idle_count(&dispatcher) == 1);

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    dispatcher.add_fn(JobCategory::General, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })?;
    wait_until(|| ran.load(Ordering::SeqCst) == 1);

    let stats = dispatcher.stats();
    assert_eq!(stats.direct_handoffs, 1);
    assert_eq!(stats.queued, 0);
    dispatcher.stop()?;
    Ok(())
}

#[test]
fn test_queue_fallback_runs_each_job_once() -> Result<()> {
    const JOBS: usize = 10;

    let dispatcher = Dispatcher::new(config(), None);
    dispatcher.init(2)?;
    wait_until(|| idle_count(&dispatcher) == 2);

    // Park both workers so every further job has to queue.
    let gate = Arc::new(Barrier::new(3));
    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        dispatcher.add_fn(JobCategory::General, move || {
            gate.wait();
        })?;
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(AtomicUsize::new(0));
    for id in 0..JOBS {
        dispatcher.add_request(Box::new(Tracked {
            id,
            category: JobCategory::General,
            log: Arc::clone(&log),
            finished: Arc::clone(&finished),
        }))?;
    }
    assert_eq!(dispatcher.pending(JobCategory::General), JOBS);

    gate.wait();
    wait_until(|| finished.load(Ordering::SeqCst) == JOBS);

    let mut ids = log.lock().unwrap().clone();
    ids.sort_unstable();
    assert_eq!(ids, (0..JOBS).collect::<Vec<_>>());

    let stats = dispatcher.stats();
    assert_eq!(stats.direct_handoffs, 2);
    assert_eq!(stats.queued, JOBS as u64);
    dispatcher.stop()?;
    assert_eq!(dispatcher.stats().processed, (JOBS + 2) as u64);
    Ok(())
}

#[test]
fn test_single_worker_preserves_fifo() -> Result<()> {
    let dispatcher = Dispatcher::new(config(), None);
    dispatcher.init(1)?;
    wait_until(|| idle_count(&dispatcher) == 1);

    let gate = Arc::new(Barrier::new(2));
    let blocker = Arc::clone(&gate);
    dispatcher.add_fn(JobCategory::General, move || {
        blocker.wait();
    })?;

    let log = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(AtomicUsize::new(0));
    for id in 0..5 {
        dispatcher.add_request(Box::new(Tracked {
            id,
            category: JobCategory::General,
            log: Arc::clone(&log),
            finished: Arc::clone(&finished),
        }))?;
    }

    gate.wait();
    wait_until(|| finished.load(Ordering::SeqCst) == 5);
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    dispatcher.stop()?;
    Ok(())
}

#[test]
fn test_category_jobs_run_on_calling_thread() -> Result<()> {
    let dispatcher = Dispatcher::new(config(), None);
    dispatcher.init(2)?;

    let caller = thread::current().id();
    let ran_on = Arc::new(Mutex::new(Vec::new()));
    for category in [JobCategory::Render, JobCategory::Render, JobCategory::Io] {
        let ran_on = Arc::clone(&ran_on);
        dispatcher.add_fn(category, move || {
            ran_on.lock().unwrap().push(thread::current().id());
        })?;
    }

    // Workers never pick up non-general jobs.
    thread::sleep(Duration::from_millis(50));
    assert!(ran_on.lock().unwrap().is_empty());
    assert_eq!(dispatcher.pending(JobCategory::Render), 2);
    assert_eq!(dispatcher.pending(JobCategory::Io), 1);

    assert_eq!(dispatcher.job_process_for_category(JobCategory::Render), 2);
    assert_eq!(dispatcher.job_process_for_category(JobCategory::Io), 1);
    assert!(ran_on.lock().unwrap().iter().all(|id| *id == caller));
    assert_eq!(ran_on.lock().unwrap().len(), 3);

    dispatcher.stop()?;
    Ok(())
}

#[test]
fn test_stop_waits_for_running_jobs() -> Result<()> {
    let dispatcher = Dispatcher::new(config(), None);
    dispatcher.init(1)?;
    wait_until(|| idle_count(&dispatcher) == 1);

    let started = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicUsize::new(0));
    {
        let started = Arc::clone(&started);
        let done = Arc::clone(&done);
        dispatcher.add_fn(JobCategory::General, move || {
            started.wait();
            thread::sleep(Duration::from_millis(50));
            done.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    started.wait();
    assert_eq!(dispatcher.worker_states(), vec![WorkerState::Running]);
    dispatcher.stop()?;
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert!(matches!(
        dispatcher.add_fn(JobCategory::General, || {}),
        Err(DispatchError::NotRunning)
    ));
    Ok(())
}

#[test]
fn test_jobs_can_submit_jobs() -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new(config(), None));
    dispatcher.init(2)?;

    let done = Arc::new(AtomicUsize::new(0));
    {
        let inner = Arc::clone(&dispatcher);
        let done = Arc::clone(&done);
        dispatcher.add_fn(JobCategory::General, move || {
            let done = Arc::clone(&done);
            inner
                .add_fn(JobCategory::General, move || {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .expect("dispatcher still running");
        })?;
    }

    wait_until(|| done.load(Ordering::SeqCst) == 1);
    dispatcher.stop()?;
    Ok(())
}

#[test]
fn test_lifecycle_is_logged() -> Result<()> {
    let (_dir, path) = temp_log("dispatch.log");
    let system = LogSystem::open(&path)?;

    let dispatcher = Dispatcher::new(config(), Some(system.logger()));
    dispatcher.init(2)?;
    dispatcher.add_fn(JobCategory::Main, || {})?;
    dispatcher.stop()?;
    system.shutdown()?;

    let lines = read_lines(&path);
    assert!(lines.iter().any(|l| l == "dispatcher started with 2 workers"));
    assert!(lines.iter().any(|l| l == "worker 0 started"));
    assert!(lines.iter().any(|l| l == "worker 1 stopped"));
    assert!(lines
        .iter()
        .any(|l| l == "dispatcher stopped, 1 pending job(s) discarded"));
    Ok(())
}
