// SPDX-License-Identifier: Apache-2.0 OR MIT
// Job dispatcher over a pool of worker threads
//
// General jobs go straight to an idle worker when one is parked, otherwise
// they wait in a FIFO queue that workers drain as they finish. Jobs in the
// other categories are only run by the thread that owns the category, through
// `Dispatcher::job_process_for_category`.

mod category;
mod dispatcher;
mod job;
mod worker;

pub use category::JobCategory;
pub use dispatcher::{DispatchError, DispatchStats, Dispatcher, LOG_TAG};
pub use job::{FnJob, Job};
pub use worker::WorkerState;
