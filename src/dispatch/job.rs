// SPDX-License-Identifier: Apache-2.0 OR MIT
// Units of work accepted by the dispatcher

use super::category::JobCategory;
use std::fmt;

/// A unit of work
///
/// `process` does the work; `finish` runs right after it on the same thread
/// and is where a job releases whatever it holds.
pub trait Job: Send {
    fn category(&self) -> JobCategory {
        JobCategory::General
    }

    fn process(&mut self);

    fn finish(&mut self) {}

    /// Short label used in dispatcher diagnostics
    fn name(&self) -> &str {
        "job"
    }
}

/// Closure-backed job
pub struct FnJob<F> {
    name: String,
    category: JobCategory,
    work: Option<F>,
}

impl<F> FnJob<F>
where
    F: FnOnce() + Send,
{
    pub fn new(category: JobCategory, work: F) -> Self {
        Self::named("fn", category, work)
    }

    pub fn named(name: impl Into<String>, category: JobCategory, work: F) -> Self {
        Self {
            name: name.into(),
            category,
            work: Some(work),
        }
    }
}

impl<F> Job for FnJob<F>
where
    F: FnOnce() + Send,
{
    fn category(&self) -> JobCategory {
        self.category
    }

    fn process(&mut self) {
        if let Some(work) = self.work.take() {
            work();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("done", &self.work.is_none())
            .finish()
    }
}

/// Run a job to completion on the current thread
pub(crate) fn run(job: &mut dyn Job) {
    job.process();
    job.finish();
}
