use crate::id::WorkerId;
use crate::worker::WorkerHandle;

/// Bounded collection of the live workers for one application version,
/// handed out round-robin.
pub(crate) struct WorkerSet {
    workers: Vec<WorkerHandle>,
    cursor: usize,
    max_size: usize,
}

impl WorkerSet {
    pub fn new(max_size: usize) -> Self {
        Self {
            workers: vec![],
            cursor: 0,
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.workers.len() < self.max_size
    }

    pub fn add(&mut self, worker: WorkerHandle) {
        debug_assert!(self.has_capacity());
        self.workers.push(worker);
    }

    /// Current worker in rotation; advances the cursor, wrapping at the
    /// end. `None` on an empty set, which callers must guard against.
    pub fn next(&mut self) -> Option<WorkerHandle> {
        if self.workers.is_empty() {
            return None;
        }
        if self.cursor >= self.workers.len() {
            self.cursor = 0;
        }
        let worker = self.workers[self.cursor].clone();
        self.cursor += 1;
        Some(worker)
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.workers.iter().find(|x| x.id() == id)
    }

    /// Removes by id, keeping the cyclic order of the remaining workers.
    pub fn remove(&mut self, id: WorkerId) -> Option<WorkerHandle> {
        let index = self.workers.iter().position(|x| x.id() == id)?;
        let worker = self.workers.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(worker)
    }

    pub fn into_workers(self) -> Vec<WorkerHandle> {
        self.workers
    }
}
