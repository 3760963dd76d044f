/*! Job scheduling for the rendering core.
 *
 * A fixed pool of worker threads consumes jobs from a channel; a separate
 * queue holds jobs pinned to the main thread, which the application drains
 * between frames. Completion is communicated through [`WaitGroup`]s, the
 * only suspension primitive the core uses.
 */

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

/// A counter that fibers and threads can block on.
///
/// The counter starts at the construction count and is decremented by
/// [`Self::signal`]; waiters are released when it reaches zero. A group
/// created with a count of zero is born signaled, which the geometry pool
/// uses for synchronously available allocations.
pub struct WaitGroup {
    counter: Mutex<u32>,
    condvar: Condvar,
}

impl WaitGroup {
    pub fn new(count: u32) -> Arc<Self> {
        Arc::new(Self {
            counter: Mutex::new(count),
            condvar: Condvar::new(),
        })
    }

    /// A group whose `wait` never blocks.
    pub fn signaled() -> Arc<Self> {
        Self::new(0)
    }

    /// Adds `count` pending signals.
    ///
    /// Must not be called after the group has reached zero; a group is not
    /// reusable.
    pub fn add(&self, count: u32) {
        let mut counter = self.counter.lock();
        debug_assert!(*counter > 0 || count == 0, "wait group already signaled");
        *counter += count;
    }

    /// Decrements the counter, waking waiters at zero.
    pub fn signal(&self) {
        let mut counter = self.counter.lock();
        debug_assert!(*counter > 0, "wait group signaled too many times");
        *counter -= 1;
        if *counter == 0 {
            self.condvar.notify_all();
        }
    }

    /// Blocks the caller until the counter reaches zero.
    pub fn wait(&self) {
        let mut counter = self.counter.lock();
        while *counter > 0 {
            self.condvar.wait(&mut counter);
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.counter.lock() == 0
    }
}

/// Where a job is allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobAffinity {
    /// Any worker thread.
    AnyWorker,
    /// The thread that calls [`JobSystem::run_main_thread_jobs`].
    MainThread,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

struct Shared {
    worker_tx: Sender<WorkerMessage>,
    main_tx: Sender<Job>,
    main_rx: Receiver<Job>,
}

/// The worker pool the rendering core schedules on.
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl JobSystem {
    /// Spawns `worker_count` workers; zero selects one worker per available
    /// core, minus one for the main thread.
    pub fn new(worker_count: usize) -> Arc<Self> {
        let worker_count = if worker_count == 0 {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1)
        } else {
            worker_count
        };

        let (worker_tx, worker_rx) = crossbeam_channel::unbounded::<WorkerMessage>();
        let (main_tx, main_rx) = crossbeam_channel::unbounded::<Job>();

        let workers = (0..worker_count)
            .map(|index| {
                let rx = worker_rx.clone();
                thread::Builder::new()
                    .name(format!("fe-worker-{index}"))
                    .spawn(move || worker_loop(&rx))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Arc::new(Self {
            shared: Arc::new(Shared {
                worker_tx,
                main_tx,
                main_rx,
            }),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueues a job. Jobs with the same affinity run in schedule order
    /// only when a single worker serves them; use a [`WaitGroup`] for
    /// ordering guarantees.
    pub fn schedule(&self, affinity: JobAffinity, job: impl FnOnce() + Send + 'static) {
        match affinity {
            JobAffinity::AnyWorker => {
                // Send fails only after `stop`; late jobs are dropped.
                let _ = self.shared.worker_tx.send(WorkerMessage::Run(Box::new(job)));
            }
            JobAffinity::MainThread => {
                let _ = self.shared.main_tx.send(Box::new(job));
            }
        }
    }

    /// Schedules a job and returns a group signaled when it completes.
    pub fn schedule_with_wait_group(
        &self,
        affinity: JobAffinity,
        job: impl FnOnce() + Send + 'static,
    ) -> Arc<WaitGroup> {
        let wait_group = WaitGroup::new(1);
        let signal = Arc::clone(&wait_group);
        self.schedule(affinity, move || {
            job();
            signal.signal();
        });
        wait_group
    }

    /// Drains the main-thread queue without blocking. Must be called from
    /// the thread that owns main-thread affinity.
    pub fn run_main_thread_jobs(&self) {
        while let Ok(job) = self.shared.main_rx.try_recv() {
            job();
        }
    }

    /// Stops the workers after the jobs already queued have run.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        for _ in workers.iter() {
            let _ = self.shared.worker_tx.send(WorkerMessage::Stop);
        }
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: &Receiver<WorkerMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Run(job) => job(),
            WorkerMessage::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn wait_group_releases_at_zero() {
        let group = WaitGroup::new(2);
        assert!(!group.is_signaled());
        group.signal();
        assert!(!group.is_signaled());
        group.signal();
        assert!(group.is_signaled());
        group.wait();
    }

    #[test]
    fn presignaled_group_never_blocks() {
        let group = WaitGroup::signaled();
        group.wait();
        assert!(group.is_signaled());
    }

    #[test]
    fn jobs_complete_and_signal() {
        let jobs = JobSystem::new(4);
        let counter = Arc::new(AtomicU32::new(0));

        let group = WaitGroup::new(16);
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let group = Arc::clone(&group);
            jobs.schedule(JobAffinity::AnyWorker, move || {
                counter.fetch_add(1, Ordering::Relaxed);
                group.signal();
            });
        }

        group.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 16);
        jobs.stop();
    }

    #[test]
    fn main_thread_jobs_run_only_on_drain() {
        let jobs = JobSystem::new(1);
        let counter = Arc::new(AtomicU32::new(0));

        let job_counter = Arc::clone(&counter);
        jobs.schedule(JobAffinity::MainThread, move || {
            job_counter.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(counter.load(Ordering::Relaxed), 0);
        jobs.run_main_thread_jobs();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
