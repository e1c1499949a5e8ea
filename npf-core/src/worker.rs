//! The background worker thread (§4.11), grounded on the original's
//! `npf_worker`: a single thread wakes on a fixed interval (default 5s),
//! runs every registered job in turn, then sleeps again unless signalled
//! early. `unregister` blocks until the loop has completed at least one
//! full pass after the job was removed, matching the original's
//! `worker_loop` generation counter under `cv_wait`/`cv_broadcast`.
//!
//! Unlike the original's kernel thread, this one is plain `std::thread`
//! plus `parking_lot::{Mutex, Condvar}`; the dataplane itself never blocks
//! on this thread, so a `Condvar`-based wait is fine here (§5).

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

type Job = Arc<dyn Fn() + Send + Sync>;

struct Slot {
    id: u64,
    job: Job,
}

struct Shared {
    slots: Mutex<Vec<Slot>>,
    cv: Condvar,
    lock: Mutex<()>,
    /// Bumped every time the loop finishes a full pass over `slots`, so
    /// `unregister` can wait for "at least one pass without me".
    generation: Mutex<u64>,
    gen_cv: Condvar,
    stop: AtomicBool,
    next_id: Mutex<u64>,
}

/// Owns the worker thread. Dropping it signals the loop to stop, lets it
/// run one last pass over the registered jobs, and joins the thread.
pub struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Vec::new()),
            cv: Condvar::new(),
            lock: Mutex::new(()),
            generation: Mutex::new(0),
            gen_cv: Condvar::new(),
            stop: AtomicBool::new(false),
            next_id: Mutex::new(1),
        });

        let loop_shared = shared.clone();
        let handle = std::thread::spawn(move || worker_loop(loop_shared, interval));

        Worker { shared, handle: Some(handle) }
    }

    /// Registers `job` to run on every tick. Returns a handle that
    /// `unregister` takes back to remove it.
    pub fn register(&self, job: impl Fn() + Send + Sync + 'static) -> JobHandle {
        let id = {
            let mut next = self.shared.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.shared.slots.lock().push(Slot { id, job: Arc::new(job) });
        JobHandle(id)
    }

    /// Removes the job and blocks until the worker loop has completed a
    /// full pass that no longer includes it, so the caller knows the job
    /// will not run again before returning.
    pub fn unregister(&self, handle: JobHandle) {
        let target_gen = {
            let mut slots = self.shared.slots.lock();
            slots.retain(|s| s.id != handle.0);
            *self.shared.generation.lock()
        };

        self.shared.cv.notify_one();

        let mut gen_guard = self.shared.generation.lock();
        while *gen_guard <= target_gen {
            self.shared.gen_cv.wait(&mut gen_guard);
        }
    }

    /// Wakes the worker immediately instead of waiting for the next tick.
    pub fn signal(&self) {
        self.shared.cv.notify_one();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cv.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobHandle(u64);

fn worker_loop(shared: Arc<Shared>, interval: Duration) {
    loop {
        let finish = shared.stop.load(Ordering::SeqCst);

        // Clone the Arcs out under the lock, then run with it released, so
        // a job calling back into `register`/`unregister` cannot deadlock
        // against itself, and a concurrent `unregister` can't free a job
        // while it's running.
        let jobs: Vec<Job> = shared.slots.lock().iter().map(|s| s.job.clone()).collect();
        for job in &jobs {
            job();
        }

        {
            let mut gen = shared.generation.lock();
            *gen += 1;
            shared.gen_cv.notify_all();
        }

        if finish {
            debug!("worker thread exiting");
            break;
        }

        let mut guard = shared.lock.lock();
        shared.cv.wait_for(&mut guard, interval);
    }
}
