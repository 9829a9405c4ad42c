//! Schedulable units of work.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

struct JobInner {
    id: Option<u64>,
    active: Cell<bool>,
    allow_recurse: Cell<bool>,
    task: RefCell<Box<dyn FnMut()>>,
}

/// A unit of deferred work.
///
/// Jobs are compared by identity: queueing the same `Job` twice before it
/// runs has no effect. Jobs with an ID run in ascending ID order; jobs
/// without one run after every ordered job, in queue order.
#[derive(Clone)]
pub struct Job {
    inner: Rc<JobInner>,
}

impl Job {
    /// Create a job that sorts by `id`.
    pub fn new(id: Option<u64>, task: impl FnMut() + 'static) -> Self {
        Self {
            inner: Rc::new(JobInner {
                id,
                active: Cell::new(true),
                allow_recurse: Cell::new(false),
                task: RefCell::new(Box::new(task)),
            }),
        }
    }

    /// Create a job with no ID. It runs after every ordered job.
    pub fn unordered(task: impl FnMut() + 'static) -> Self {
        Self::new(None, task)
    }

    pub fn id(&self) -> Option<u64> {
        self.inner.id
    }

    /// Inactive jobs are skipped when dequeued.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Cancel the job. Queued copies are skipped lazily.
    pub fn deactivate(&self) {
        self.inner.active.set(false);
    }

    /// Whether the job may re-queue itself while it is running.
    pub fn allows_recurse(&self) -> bool {
        self.inner.allow_recurse.get()
    }

    pub fn set_allow_recurse(&self, allow: bool) {
        self.inner.allow_recurse.set(allow);
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Job) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sort key: missing IDs sort last.
    pub(crate) fn order_key(&self) -> u64 {
        self.inner.id.unwrap_or(u64::MAX)
    }

    /// Identity key for bookkeeping maps.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    /// Run the task. A job that is already running (re-entered from its own
    /// task) is not run again; returns whether the task ran.
    pub(crate) fn invoke(&self) -> bool {
        match self.inner.task.try_borrow_mut() {
            Ok(mut task) => {
                (*task)();
                true
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_compare_by_identity() {
        let a = Job::new(Some(1), || {});
        let b = Job::new(Some(1), || {});
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn missing_id_sorts_last() {
        assert_eq!(Job::unordered(|| {}).order_key(), u64::MAX);
        assert_eq!(Job::new(Some(3), || {}).order_key(), 3);
    }

    #[test]
    fn invoke_runs_task_and_refuses_reentry() {
        let hits = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let job = {
            let hits = hits.clone();
            let slot = slot.clone();
            Job::new(Some(0), move || {
                hits.set(hits.get() + 1);
                let inner = slot.borrow().clone();
                if let Some(job) = inner {
                    assert!(!job.invoke());
                }
            })
        };
        *slot.borrow_mut() = Some(job.clone());
        assert!(job.invoke());
        assert_eq!(hits.get(), 1);
        slot.borrow_mut().take();
    }

    #[test]
    fn deactivate() {
        let job = Job::unordered(|| {});
        assert!(job.is_active());
        job.deactivate();
        assert!(!job.is_active());
    }
}
