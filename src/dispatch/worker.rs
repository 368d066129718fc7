// SPDX-License-Identifier: Apache-2.0 OR MIT
// Pool worker: one OS thread parked on its own condvar between jobs

use super::job::Job;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Worker lifecycle
///
/// `Idle -> Assigned -> Running -> Idle`, or `Idle -> Stopping -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Idle,
    Assigned,
    Running,
    Stopping,
    Terminated,
}

impl WorkerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Assigned => "assigned",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a parked worker woke up to
pub(crate) enum Wake {
    Job(Box<dyn Job>),
    Stop,
}

struct Slot {
    state: WorkerState,
    job: Option<Box<dyn Job>>,
    stop: bool,
}

impl Slot {
    /// The ready flag: something for the worker to act on
    fn is_ready(&self) -> bool {
        self.job.is_some() || self.stop
    }
}

pub(crate) struct Worker {
    id: usize,
    slot: Mutex<Slot>,
    cvar: Condvar,
}

impl Worker {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            slot: Mutex::new(Slot {
                state: WorkerState::Idle,
                job: None,
                stop: false,
            }),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// Hand `job` to this worker and wake it
    pub(crate) fn assign(&self, job: Box<dyn Job>) {
        let mut slot = self.lock();
        debug_assert!(slot.job.is_none(), "worker {} already holds a job", self.id);
        slot.job = Some(job);
        slot.state = WorkerState::Assigned;
        self.cvar.notify_one();
    }

    /// Mark the worker idle before it is published on the idle queue
    pub(crate) fn set_idle(&self) {
        self.lock().state = WorkerState::Idle;
    }

    /// Ask the worker to exit once it holds no job
    pub(crate) fn signal_stop(&self) {
        let mut slot = self.lock();
        slot.stop = true;
        if slot.job.is_none() && slot.state == WorkerState::Idle {
            slot.state = WorkerState::Stopping;
        }
        self.cvar.notify_one();
    }

    pub(crate) fn set_terminated(&self) {
        self.lock().state = WorkerState::Terminated;
    }

    /// Block until a job or a stop request arrives
    ///
    /// Waits in `idle_timeout` slices, re-checking the ready flag after each
    /// one. A pending job wins over a stop request.
    pub(crate) fn wait(&self, idle_timeout: Duration) -> Wake {
        let mut slot = self.lock();
        while !slot.is_ready() {
            slot = match self.cvar.wait_timeout(slot, idle_timeout) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        match slot.job.take() {
            Some(job) => {
                slot.state = WorkerState::Running;
                Wake::Job(job)
            }
            None => {
                slot.state = WorkerState::Stopping;
                Wake::Stop
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
