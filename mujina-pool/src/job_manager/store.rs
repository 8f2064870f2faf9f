//! The window of jobs miners may submit against.
//!
//! The window is bounded. A refresh at the same height slides it (the oldest
//! job is evicted once full), keeping recently superseded jobs valid for late
//! submissions. A new height clears it, so shares for a stale block can
//! never validate. The most recently inserted job is the current job.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::job::{Job, JobId};
use crate::share::{ShareError, SubmissionKey};

/// A job in the window with its replay log.
#[derive(Debug)]
pub struct ActiveJob {
    pub job: Arc<Job>,
    submissions: Mutex<HashSet<SubmissionKey>>,
}

impl ActiveJob {
    fn new(job: Arc<Job>) -> Self {
        Self {
            job,
            submissions: Mutex::new(HashSet::new()),
        }
    }

    /// Record a submission. Returns false if it was already recorded.
    pub fn register(&self, key: SubmissionKey) -> bool {
        self.submissions.lock().insert(key)
    }

    /// Number of distinct submissions seen for this job.
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[derive(Debug, Default)]
struct Window {
    /// Oldest first; the back is the current job.
    order: VecDeque<JobId>,
    by_id: HashMap<JobId, Arc<ActiveJob>>,
}

/// Bounded, lock-guarded job window.
#[derive(Debug)]
pub struct JobStore {
    capacity: usize,
    window: RwLock<Window>,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: RwLock::new(Window::default()),
        }
    }

    /// Insert `job` as the current job, returning the ids it displaced.
    pub fn insert(&self, job: Arc<Job>, is_new_height: bool) -> Vec<JobId> {
        let mut window = self.window.write();
        let mut evicted = Vec::new();

        if is_new_height {
            evicted.extend(window.order.drain(..));
            window.by_id.clear();
        } else {
            while window.order.len() >= self.capacity {
                let Some(oldest) = window.order.pop_front() else {
                    break;
                };
                window.by_id.remove(&oldest);
                evicted.push(oldest);
            }
        }

        let id = job.id;
        window.order.push_back(id);
        window.by_id.insert(id, Arc::new(ActiveJob::new(job)));
        evicted
    }

    /// The most recently inserted job.
    pub fn current_job(&self) -> Option<Arc<Job>> {
        let window = self.window.read();
        window
            .order
            .back()
            .and_then(|id| window.by_id.get(id))
            .map(|active| active.job.clone())
    }

    /// Look up a job still in the window.
    pub fn find_by_id(&self, id: JobId) -> Result<Arc<ActiveJob>, ShareError> {
        self.window
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(ShareError::JobNotFound)
    }

    pub fn len(&self) -> usize {
        self.window.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids in the window, oldest first.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.window.read().order.iter().copied().collect()
    }

    /// Jobs in the window, oldest first.
    pub fn jobs(&self) -> Vec<Arc<ActiveJob>> {
        let window = self.window.read();
        window
            .order
            .iter()
            .filter_map(|id| window.by_id.get(id).cloned())
            .collect()
    }
}
