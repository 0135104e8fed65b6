use crate::job::ManagedJob;
use chrono::TimeZone;
use std::sync::Arc;

/// Min-heap of managed jobs ordered by next fire time.
///
/// Every node carries its own heap slot in `ManagedJob::index` so that a
/// handle holder can be located (and removed) in O(log n); each swap
/// rewrites the back-references of both nodes, and ejected nodes get -1.
pub(crate) struct JobQueue<T, Tz: TimeZone> {
    jobs: Vec<Arc<ManagedJob<T, Tz>>>,
}

impl<T, Tz: TimeZone> JobQueue<T, Tz> {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Vec::with_capacity(16),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn peek(&self) -> Option<&Arc<ManagedJob<T, Tz>>> {
        self.jobs.first()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Arc<ManagedJob<T, Tz>>> {
        self.jobs.get(index)
    }

    /// Shallow copy of the heap in its current layout.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ManagedJob<T, Tz>>> {
        self.jobs.clone()
    }

    pub(crate) fn push(&mut self, job: Arc<ManagedJob<T, Tz>>) {
        let index = self.jobs.len();
        job.set_index(index as isize);
        self.jobs.push(job);
        self.sift_up(index);
    }

    pub(crate) fn pop(&mut self) -> Option<Arc<ManagedJob<T, Tz>>> {
        self.remove(0)
    }

    /// Removes and returns the job at `index`.
    pub(crate) fn remove(&mut self, index: usize) -> Option<Arc<ManagedJob<T, Tz>>> {
        if index >= self.jobs.len() {
            return None;
        }

        let last = self.jobs.len() - 1;
        if index != last {
            self.swap(index, last);
        }
        let job = self.jobs.pop().expect("the queue is not empty");
        job.set_index(-1);
        if index != last {
            self.fix(index);
        }
        Some(job)
    }

    /// Restores the heap order around `index` after its key changed in place.
    pub(crate) fn fix(&mut self, index: usize) {
        self.sift_down(index);
        self.sift_up(index);
    }

    fn key(&self, index: usize) -> i64 {
        self.jobs[index].next_nanos()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.jobs.swap(i, j);
        self.jobs[i].set_index(i as isize);
        self.jobs[j].set_index(j as isize);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.key(index) >= self.key(parent) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.jobs.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < len && self.key(right) < self.key(left) {
                smallest = right;
            }
            if self.key(index) <= self.key(smallest) {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }
}
