// SPDX-License-Identifier: Apache-2.0 OR MIT
// Job dispatcher: direct handoff to idle workers, per-category FIFO queues

use super::category::JobCategory;
use super::job::{self, FnJob, Job};
use super::worker::{Wake, Worker, WorkerState};
use crate::config::DispatcherConfig;
use crate::logging::Logger;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Filter tag for the dispatcher's own log records
pub const LOG_TAG: &str = "dispatch";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("dispatcher needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("dispatcher is not running")]
    NotRunning,

    #[error("{count} worker(s) panicked while running a job")]
    WorkerPanicked { count: usize },
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs handed straight to an idle worker
    pub direct_handoffs: u64,
    /// Jobs that went through a category queue
    pub queued: u64,
    /// Jobs run to completion
    pub processed: u64,
    /// Queued jobs dropped by `stop`
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    direct_handoffs: AtomicU64,
    queued: AtomicU64,
    processed: AtomicU64,
    discarded: AtomicU64,
}

type Queues = [VecDeque<Box<dyn Job>>; JobCategory::COUNT];

/// State shared with the worker threads
///
/// Lock order: `idle` before `requests`.
struct Core {
    idle: Mutex<VecDeque<Arc<Worker>>>,
    requests: Mutex<Queues>,
    /// Written only while holding `idle`
    running: AtomicBool,
    idle_timeout: Duration,
    counters: Counters,
    logger: Option<Logger>,
}

impl Core {
    fn log(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.log(LOG_TAG, args);
        }
    }

    fn idle(&self) -> MutexGuard<'_, VecDeque<Arc<Worker>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requests(&self) -> MutexGuard<'_, Queues> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by a worker that has nothing to do
    ///
    /// Assigns the oldest queued `General` job to `worker` and returns `false`,
    /// otherwise parks the worker on the idle queue and returns `true`. Both
    /// queues are held together so a job cannot slip into the queue while the
    /// worker is being parked.
    fn add_worker(&self, worker: &Arc<Worker>) -> bool {
        let mut idle = self.idle();
        if !self.running.load(Ordering::Acquire) {
            worker.signal_stop();
            return true;
        }

        let mut requests = self.requests();
        match requests[JobCategory::General.index()].pop_front() {
            Some(job) => {
                drop(requests);
                drop(idle);
                worker.assign(job);
                false
            }
            None => {
                worker.set_idle();
                idle.push_back(Arc::clone(worker));
                true
            }
        }
    }
}

/// Marks the worker terminated however its thread exits
struct TerminateGuard<'a>(&'a Worker);

impl Drop for TerminateGuard<'_> {
    fn drop(&mut self) {
        self.0.set_terminated();
    }
}

fn worker_main(core: Arc<Core>, worker: Arc<Worker>) {
    let _terminated = TerminateGuard(&worker);
    core.log(format_args!("worker {} started", worker.id()));

    loop {
        core.add_worker(&worker);
        match worker.wait(core.idle_timeout) {
            Wake::Job(mut job) => {
                job::run(job.as_mut());
                core.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Wake::Stop => break,
        }
    }

    core.log(format_args!("worker {} stopped", worker.id()));
}

struct WorkerHandle {
    worker: Arc<Worker>,
    thread: JoinHandle<()>,
}

/// Job dispatcher over a pool of worker threads
///
/// `General` jobs run on the pool; other categories wait in their queue
/// until some thread calls [`Dispatcher::job_process_for_category`].
pub struct Dispatcher {
    core: Arc<Core>,
    /// Also serializes `init` against `stop`
    workers: Mutex<Vec<WorkerHandle>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, logger: Option<Logger>) -> Self {
        Self {
            core: Arc::new(Core {
                idle: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Default::default()),
                running: AtomicBool::new(false),
                idle_timeout: config.idle_timeout(),
                counters: Counters::default(),
                logger,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `worker_count` pool threads and start accepting jobs
    pub fn init(&self, worker_count: usize) -> Result<(), DispatchError> {
        let mut workers = self.workers();
        if self.core.running.load(Ordering::Acquire) {
            return Err(DispatchError::AlreadyRunning);
        }
        if worker_count == 0 {
            return Err(DispatchError::NoWorkers);
        }

        {
            let _idle = self.core.idle();
            self.core.running.store(true, Ordering::Release);
        }

        for index in 0..worker_count {
            let worker = Arc::new(Worker::new(index));
            let core = Arc::clone(&self.core);
            let thread_worker = Arc::clone(&worker);
            let spawned = thread::Builder::new()
                .name(format!("dispatch-worker-{}", index))
                .spawn(move || worker_main(core, thread_worker));

            match spawned {
                Ok(thread) => workers.push(WorkerHandle { worker, thread }),
                Err(source) => {
                    let _ = self.shutdown(&mut workers);
                    return Err(DispatchError::Spawn { index, source });
                }
            }
        }

        self.core
            .log(format_args!("dispatcher started with {} workers", worker_count));
        Ok(())
    }

    /// Submit a job
    ///
    /// A `General` job goes straight to an idle worker when there is one;
    /// everything else is queued FIFO under its category. The job is dropped
    /// if the dispatcher is not running.
    pub fn add_request(&self, job: Box<dyn Job>) -> Result<(), DispatchError> {
        let core = &*self.core;
        let category = job.category();

        let mut idle = core.idle();
        if !core.running.load(Ordering::Acquire) {
            return Err(DispatchError::NotRunning);
        }

        if category.is_pooled() {
            if let Some(worker) = idle.pop_front() {
                // Assign under the idle lock so `stop` cannot retire the
                // worker between the pop and the handoff.
                worker.assign(job);
                drop(idle);
                core.counters.direct_handoffs.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        core.requests()[category.index()].push_back(job);
        core.counters.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Submit a closure as a job
    pub fn add_fn<F>(&self, category: JobCategory, work: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_request(Box::new(FnJob::new(category, work)))
    }

    /// Run every job currently queued under `category` on the calling thread
    ///
    /// Jobs submitted while these run wait for the next call. Returns how many
    /// jobs ran.
    pub fn job_process_for_category(&self, category: JobCategory) -> usize {
        let batch = std::mem::take(&mut self.core.requests()[category.index()]);
        let count = batch.len();
        for mut job in batch {
            job::run(job.as_mut());
            self.core.counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Stop every worker, wait for in-flight jobs and drop queued ones
    pub fn stop(&self) -> Result<(), DispatchError> {
        let mut workers = self.workers();
        if !self.core.running.load(Ordering::Acquire) {
            return Err(DispatchError::NotRunning);
        }
        self.shutdown(&mut workers)
    }

    fn shutdown(&self, workers: &mut Vec<WorkerHandle>) -> Result<(), DispatchError> {
        let core = &*self.core;
        {
            let mut idle = core.idle();
            core.running.store(false, Ordering::Release);
            idle.clear();
        }

        for handle in workers.iter() {
            handle.worker.signal_stop();
        }

        let mut panicked = 0;
        for handle in workers.drain(..) {
            if handle.thread.join().is_err() {
                panicked += 1;
            }
        }

        let discarded: usize = core
            .requests()
            .iter_mut()
            .map(|queue| queue.drain(..).count())
            .sum();
        core.counters
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);

        core.log(format_args!(
            "dispatcher stopped, {} pending job(s) discarded",
            discarded
        ));

        if panicked > 0 {
            Err(DispatchError::WorkerPanicked { count: panicked })
        } else {
            Ok(())
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = &self.core.counters;
        DispatchStats {
            direct_handoffs: counters.direct_handoffs.load(Ordering::Relaxed),
            queued: counters.queued.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Jobs waiting in `category`'s queue
    pub fn pending(&self, category: JobCategory) -> usize {
        self.core.requests()[category.index()].len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers().len()
    }

    /// Current state of each worker, by worker index
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers()
            .iter()
            .map(|handle| handle.worker.state())
            .collect()
    }

    /// Workers parked on the idle queue
    pub fn idle_workers(&self) -> usize {
        self.core.idle().len()
    }

    fn workers(&self) -> MutexGuard<'_, Vec<WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                eprintln!("[ringlog] dispatcher stop failed: {}", err);
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}
